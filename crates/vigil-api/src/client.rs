// Per-device HTTP client
//
// Wraps `reqwest::Client` with device-specific URL construction and
// credential application. Auth flows and discovery are implemented in
// their own modules on top of this transport surface.

use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::auth::Credential;
use crate::error::Error;
use crate::transport::TransportConfig;

/// HTTP client bound to one device's base URL and TLS policy.
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DeviceClient {
    /// Create a new client for a device.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client` (tests).
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The device base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying HTTP client (for auth flows that need direct access).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Join a path onto the base URL: `{base}/{path}` with duplicate
    /// slashes trimmed on the seam.
    pub fn join(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}")).map_err(Error::InvalidUrl)
    }

    /// Apply a credential to a request builder.
    ///
    /// Anonymous credentials leave the request untouched; basic auth and
    /// bearer tokens map onto the standard `Authorization` header.
    pub fn apply_credential(
        builder: reqwest::RequestBuilder,
        credential: &Credential,
    ) -> reqwest::RequestBuilder {
        match credential {
            Credential::Anonymous => builder,
            Credential::Basic { username, password } => {
                builder.basic_auth(username, Some(password.expose_secret()))
            }
            Credential::Bearer { token } => builder.bearer_auth(token.expose_secret()),
            Credential::Token(token) => builder.bearer_auth(token.value.expose_secret()),
        }
    }

    /// GET a JSON document with the given credential applied.
    ///
    /// 401/403 responses map to [`Error::CredentialRejected`] so callers
    /// can lazily refresh tokens of unknown TTL.
    pub async fn get_json(&self, url: Url, credential: &Credential) -> Result<Value, Error> {
        debug!("GET {}", url);

        let builder = Self::apply_credential(self.http.get(url.clone()), credential);
        let resp = builder.send().await.map_err(Error::Transport)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::CredentialRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;

    fn client(base: &str) -> DeviceClient {
        let url = Url::parse(base).expect("valid test URL");
        DeviceClient::new(url, &TransportConfig::default()).expect("client builds")
    }

    #[test]
    fn join_trims_duplicate_slashes() {
        let c = client("http://device.local:8080/");
        let url = c.join("/api/login").expect("joins");
        assert_eq!(url.as_str(), "http://device.local:8080/api/login");
    }

    #[test]
    fn join_handles_missing_slashes() {
        let c = client("http://device.local");
        let url = c.join("health").expect("joins");
        assert_eq!(url.as_str(), "http://device.local/health");
    }
}
