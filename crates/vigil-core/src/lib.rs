// vigil-core: token lifecycle, reconciliation, and rendering between
// the device-facing API layer and the artifact directories consumed by
// the polling agent and dashboard engine.

pub mod convert;
pub mod error;
pub mod reconcile;
pub mod render;
pub mod scheduler;
pub mod summary;
pub mod tokens;

mod files;

// ── Primary re-exports ──────────────────────────────────────────────
pub use error::CoreError;
pub use reconcile::{LogReload, Monitor, MonitorConfig, ReloadSignal};
pub use scheduler::{SchedulerHandle, TriggerHandle, start_scheduler};
pub use summary::{DeviceFailure, FailureStage, PassSummary};
pub use tokens::{TokenManager, secret_key_for};
