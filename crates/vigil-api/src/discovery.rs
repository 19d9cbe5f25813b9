// Endpoint discovery
//
// Reads a device's OpenAPI/Swagger description and enumerates its path
// map into probe-able endpoints. Read-only and idempotent; a malformed
// or missing document degrades to an empty set with a warning, never a
// hard failure. Explicitly configured endpoints bypass this module
// entirely (the reconciler passes them through verbatim).

use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::auth::Credential;
use crate::client::DeviceClient;
use crate::error::Error;

/// Method keys recognized inside an OpenAPI path item. Path items also
/// carry non-method keys (`parameters`, `summary`, ...), which must not
/// become probes.
const HTTP_METHODS: &[&str] = &["get", "post", "put", "delete", "patch", "head", "options"];

/// One probe-able path+method pair for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    /// Uppercase HTTP method.
    pub method: String,
    pub critical: bool,
    pub nested_json: bool,
}

impl Endpoint {
    /// An endpoint discovered from an API description: never critical,
    /// never flagged as nested JSON (those flags are inventory-authored).
    pub fn discovered(path: impl Into<String>, method: &str) -> Self {
        Self {
            path: path.into(),
            method: method.to_uppercase(),
            critical: false,
            nested_json: false,
        }
    }
}

/// Result of one discovery attempt.
#[derive(Debug, Default)]
pub struct Discovery {
    pub endpoints: Vec<Endpoint>,
    /// Set when the document was unusable; the device still gets its
    /// health fragment, so this is a warning rather than an error.
    pub warning: Option<String>,
}

impl Discovery {
    fn warn(message: impl Into<String>) -> Self {
        Self {
            endpoints: Vec::new(),
            warning: Some(message.into()),
        }
    }
}

/// Fetch and parse an API description document.
///
/// `swagger_url` may be absolute or relative to the device base URL.
/// The request carries the same credential and TLS policy as the auth
/// flow. A 401/403 propagates as [`Error::CredentialRejected`] so the
/// token manager can invalidate a stale unknown-TTL token; every other
/// failure collapses into an empty [`Discovery`] with a warning.
pub async fn fetch_openapi_endpoints(
    client: &DeviceClient,
    swagger_url: &str,
    credential: &Credential,
) -> Result<Discovery, Error> {
    let url = resolve_url(client, swagger_url)?;

    let doc = match client.get_json(url.clone(), credential).await {
        Ok(doc) => doc,
        Err(e) if e.is_credential_rejection() => return Err(e),
        Err(e) => {
            warn!(%url, error = %e, "API description fetch failed");
            return Ok(Discovery::warn(format!("description fetch failed: {e}")));
        }
    };

    Ok(parse_path_map(&doc))
}

fn resolve_url(client: &DeviceClient, swagger_url: &str) -> Result<Url, Error> {
    match Url::parse(swagger_url) {
        Ok(absolute) => Ok(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => client.join(swagger_url),
        Err(e) => Err(Error::InvalidUrl(e)),
    }
}

/// Enumerate the `paths` map: one endpoint per declared method per path.
fn parse_path_map(doc: &Value) -> Discovery {
    let Some(paths) = doc.get("paths").and_then(Value::as_object) else {
        return Discovery::warn("API description has no path map");
    };

    let mut endpoints = Vec::new();
    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        for method in HTTP_METHODS {
            if item.contains_key(*method) {
                endpoints.push(Endpoint::discovered(path.clone(), method));
            }
        }
    }

    debug!(count = endpoints.len(), "endpoints discovered from API description");

    Discovery {
        endpoints,
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_map_yields_one_endpoint_per_method() {
        let doc = json!({
            "paths": {
                "/status": {"get": {}},
                "/actions": {"get": {}, "post": {}}
            }
        });

        let discovery = parse_path_map(&doc);

        assert!(discovery.warning.is_none());
        assert_eq!(discovery.endpoints.len(), 3);
        assert!(discovery
            .endpoints
            .contains(&Endpoint::discovered("/status", "get")));
        assert!(discovery
            .endpoints
            .contains(&Endpoint::discovered("/actions", "post")));
    }

    #[test]
    fn non_method_keys_are_ignored() {
        let doc = json!({
            "paths": {
                "/status": {"get": {}, "parameters": [], "summary": "Status"}
            }
        });

        let discovery = parse_path_map(&doc);
        assert_eq!(discovery.endpoints.len(), 1);
        assert_eq!(discovery.endpoints[0].method, "GET");
    }

    #[test]
    fn missing_path_map_is_a_warning() {
        let discovery = parse_path_map(&json!({"openapi": "3.0.0"}));
        assert!(discovery.endpoints.is_empty());
        assert!(discovery.warning.is_some());
    }
}
