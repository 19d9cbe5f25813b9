// vigil-api: device-facing HTTP layer (transport, auth flows, discovery).

pub mod auth;
pub mod client;
pub mod discovery;
pub mod error;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{AuthScheme, CachedToken, Credential, ExchangeMethod, authenticate};
pub use client::DeviceClient;
pub use discovery::{Discovery, Endpoint, fetch_openapi_endpoints};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
