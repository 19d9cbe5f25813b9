// ── Core error types ──
//
// Only inventory load failures abort a pass. Every other failure is
// scoped to a single device and recorded in the pass summary; the
// helpers here turn API-layer errors into the short reason strings
// those records carry.

use thiserror::Error;

/// Pass-fatal errors from the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("inventory load failed: {0}")]
    Load(#[from] vigil_config::InventoryError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Collapse an API-layer error into a per-device failure reason.
///
/// TLS and timeout causes are called out explicitly so the summary is
/// actionable without digging through transport error chains.
pub fn failure_reason(err: &vigil_api::Error) -> String {
    if err.is_tls() {
        return format!("tls: {err}");
    }
    if err.is_timeout() {
        return format!("timeout: {err}");
    }
    err.to_string()
}
