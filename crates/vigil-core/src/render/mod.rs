//! Artifact rendering.
//!
//! Pure data-to-text transformation: a device plus its resolved endpoint
//! set becomes one poller config fragment and one dashboard definition.
//! No network, no file I/O, no hidden state — identical inputs always
//! produce byte-identical output, which is what makes reconciliation
//! passes idempotent.

mod dashboard;
mod poller;

pub use dashboard::dashboard_fragment;
pub use poller::{BASE_POLLER_CONFIG, poller_fragment};
