use thiserror::Error;

/// Top-level error type for the `vigil-api` crate.
///
/// Covers every failure mode of the device-facing HTTP layer:
/// authentication flows, token extraction, transport, and discovery.
/// `vigil-core` maps these into per-device failure records — no error
/// here ever aborts a whole reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// An auth flow failed (bad credentials, non-2xx from the auth
    /// endpoint, account locked, etc.)
    #[error("authentication failed: {message}")]
    Authentication {
        message: String,
        status: Option<u16>,
    },

    /// A previously issued credential was rejected (HTTP 401/403) while
    /// using it. Signals the token manager to invalidate and retry once.
    #[error("credential rejected (HTTP {status})")]
    CredentialRejected { status: u16 },

    /// The token could not be extracted from the auth response at the
    /// configured dot-path (missing segment or non-object intermediate).
    #[error("no token at '{path}' in auth response")]
    TokenExtraction { path: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// Non-2xx response outside an auth flow.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// The response body was not the JSON we expected.
    #[error("deserialization error: {message}")]
    Deserialization { message: String },
}

impl Error {
    /// Whether this error is an authorization rejection that should
    /// trigger lazy token invalidation.
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self, Self::CredentialRejected { .. })
    }

    /// Whether the underlying cause was a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// Whether the underlying cause was a TLS/certificate failure.
    ///
    /// reqwest surfaces certificate errors as opaque connect errors, so
    /// this inspects the rendered error chain.
    pub fn is_tls(&self) -> bool {
        match self {
            Self::Tls(_) => true,
            Self::Transport(e) if e.is_connect() => {
                let mut source: Option<&dyn std::error::Error> = Some(e);
                while let Some(err) = source {
                    let text = err.to_string();
                    if text.contains("certificate") || text.contains("Tls") {
                        return true;
                    }
                    source = err.source();
                }
                false
            }
            _ => false,
        }
    }
}
