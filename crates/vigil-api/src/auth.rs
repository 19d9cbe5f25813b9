// Device authentication
//
// A closed set of auth strategies dispatched through a single resolver
// function. Adding a scheme means adding a variant here, not a new type.
// Static schemes (none/basic/bearer) never touch the network; the token
// exchange flows do one request against the device's auth endpoint.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use crate::client::DeviceClient;
use crate::error::Error;

/// Safety margin subtracted from a token's TTL so we never hand out a
/// credential that expires mid-probe.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// HTTP method for the plain token-exchange flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeMethod {
    #[default]
    Post,
    Get,
}

/// How to authenticate against one device.
///
/// Closed tagged enum — the resolver has exactly one branch per variant.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// No authentication.
    None,

    /// HTTP basic auth from static credentials. Validity is confirmed
    /// implicitly by later probes; no login round-trip exists.
    Basic {
        username: String,
        password: SecretString,
    },

    /// Static bearer token.
    Bearer { token: SecretString },

    /// Credential exchange: send username/password to a login endpoint,
    /// pull the token out of the JSON response at a dot-path.
    TokenExchange {
        /// Login endpoint, relative to the device base URL.
        endpoint: String,
        method: ExchangeMethod,
        /// Payload template. Values `{{username}}` / `{{password}}` are
        /// substituted from the static credentials; an empty map falls
        /// back to `{"username": .., "password": ..}`.
        payload: BTreeMap<String, String>,
        /// Dot-separated path to the token in the JSON response.
        token_path: String,
        username: String,
        password: SecretString,
    },

    /// OpenID-Connect resource-owner-password exchange against an OIDC
    /// token endpoint (form-encoded `grant_type=password`).
    OpenIdPassword {
        endpoint: String,
        client_id: String,
        scope: String,
        username: String,
        password: SecretString,
    },
}

impl AuthScheme {
    /// Whether this scheme produces tokens worth caching.
    pub fn is_token_based(&self) -> bool {
        matches!(
            self,
            Self::TokenExchange { .. } | Self::OpenIdPassword { .. }
        )
    }
}

/// A token acquired at runtime, with enough metadata to decide staleness.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: SecretString,
    pub obtained_at: DateTime<Utc>,
    /// `None` means the auth response carried no `expires_in`-like field;
    /// such tokens stay valid until a request using them is rejected.
    pub ttl: Option<std::time::Duration>,
    /// Refresh token, when the OIDC flow handed one out.
    pub refresh_token: Option<SecretString>,
    pub source_device: String,
}

impl CachedToken {
    /// Expiry check with a 60 s safety buffer. Short-lived tokens (TTL
    /// within twice the buffer) keep their full window so they are not
    /// stale on arrival. Unknown-TTL tokens never expire by clock; they
    /// are invalidated lazily on rejection.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl else { return false };
        let age_secs = now.signed_duration_since(self.obtained_at).num_seconds();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let usable = if ttl_secs > EXPIRY_BUFFER_SECS * 2 {
            ttl_secs - EXPIRY_BUFFER_SECS
        } else {
            ttl_secs
        };
        age_secs >= usable
    }
}

/// Resolved, usable auth material for one device.
#[derive(Debug, Clone)]
pub enum Credential {
    /// No auth material; requests go out bare.
    Anonymous,
    Basic {
        username: String,
        password: SecretString,
    },
    Bearer {
        token: SecretString,
    },
    /// A runtime-acquired token with expiry metadata.
    Token(CachedToken),
}

impl Credential {
    /// The bearer value carried by this credential, if any.
    pub fn bearer_value(&self) -> Option<&SecretString> {
        match self {
            Self::Bearer { token } => Some(token),
            Self::Token(token) => Some(&token.value),
            _ => None,
        }
    }
}

// ── Resolver ────────────────────────────────────────────────────────

/// Execute the auth procedure for `scheme` against the device.
///
/// Static schemes return immediately without network traffic. Exchange
/// flows perform one request and wrap the result as a [`CachedToken`].
/// Failures never panic and never carry past the device boundary — the
/// caller degrades that single device.
pub async fn authenticate(
    client: &DeviceClient,
    scheme: &AuthScheme,
    device: &str,
) -> Result<Credential, Error> {
    match scheme {
        AuthScheme::None => Ok(Credential::Anonymous),

        AuthScheme::Basic { username, password } => Ok(Credential::Basic {
            username: username.clone(),
            password: password.clone(),
        }),

        AuthScheme::Bearer { token } => Ok(Credential::Bearer {
            token: token.clone(),
        }),

        AuthScheme::TokenExchange {
            endpoint,
            method,
            payload,
            token_path,
            username,
            password,
        } => {
            exchange_token(
                client, device, endpoint, *method, payload, token_path, username, password,
            )
            .await
        }

        AuthScheme::OpenIdPassword {
            endpoint,
            client_id,
            scope,
            username,
            password,
        } => openid_password_grant(client, device, endpoint, client_id, scope, username, password).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn exchange_token(
    client: &DeviceClient,
    device: &str,
    endpoint: &str,
    method: ExchangeMethod,
    payload: &BTreeMap<String, String>,
    token_path: &str,
    username: &str,
    password: &SecretString,
) -> Result<Credential, Error> {
    let url = client.join(endpoint)?;
    let body = substitute_payload(payload, username, password);

    debug!(device, %url, "requesting auth token");

    let builder = match method {
        ExchangeMethod::Post => client.http().post(url).json(&body),
        ExchangeMethod::Get => client.http().get(url).query(&body),
    };
    let resp = builder.send().await.map_err(Error::Transport)?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(Error::Authentication {
            message: format!("auth endpoint returned HTTP {status}: {}", preview(&text)),
            status: Some(status.as_u16()),
        });
    }

    let data: Value = resp.json().await.map_err(|e| Error::Deserialization {
        message: format!("auth response is not JSON: {e}"),
    })?;

    let token = extract_token(&data, token_path)?;
    let ttl = ttl_near_token(&data, token_path);

    debug!(device, ttl_secs = ttl.map(|t| t.as_secs()), "auth token obtained");

    Ok(Credential::Token(CachedToken {
        value: SecretString::from(token),
        obtained_at: Utc::now(),
        ttl,
        refresh_token: None,
        source_device: device.to_owned(),
    }))
}

async fn openid_password_grant(
    client: &DeviceClient,
    device: &str,
    endpoint: &str,
    client_id: &str,
    scope: &str,
    username: &str,
    password: &SecretString,
) -> Result<Credential, Error> {
    let url = client.join(endpoint)?;

    debug!(device, %url, "requesting OIDC token (password grant)");

    let form = [
        ("client_id", client_id),
        ("username", username),
        ("password", password.expose_secret()),
        ("grant_type", "password"),
        ("scope", scope),
    ];
    let resp = client
        .http()
        .post(url)
        .form(&form)
        .send()
        .await
        .map_err(Error::Transport)?;

    parse_oidc_response(resp, device, None).await
}

/// Exchange a stored refresh token for a fresh access token
/// (`grant_type=refresh_token`). On failure callers fall back to the
/// full password grant.
pub async fn refresh_token_grant(
    client: &DeviceClient,
    device: &str,
    endpoint: &str,
    client_id: &str,
    refresh_token: &SecretString,
) -> Result<Credential, Error> {
    let url = client.join(endpoint)?;

    debug!(device, %url, "refreshing OIDC access token");

    let form = [
        ("client_id", client_id),
        ("refresh_token", refresh_token.expose_secret()),
        ("grant_type", "refresh_token"),
    ];
    let resp = client
        .http()
        .post(url)
        .form(&form)
        .send()
        .await
        .map_err(Error::Transport)?;

    parse_oidc_response(resp, device, Some(refresh_token.clone())).await
}

/// Shared response handling for both OIDC grants. `prior_refresh` is
/// reused when the server rotates nothing.
async fn parse_oidc_response(
    resp: reqwest::Response,
    device: &str,
    prior_refresh: Option<SecretString>,
) -> Result<Credential, Error> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(Error::Authentication {
            message: format!("token endpoint returned HTTP {status}: {}", preview(&text)),
            status: Some(status.as_u16()),
        });
    }

    let data: Value = resp.json().await.map_err(|e| Error::Deserialization {
        message: format!("token response is not JSON: {e}"),
    })?;

    let access = data
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::TokenExtraction {
            path: "access_token".into(),
        })?;

    let ttl = data
        .get("expires_in")
        .and_then(Value::as_u64)
        .map(std::time::Duration::from_secs);

    let refresh = data
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(|s| SecretString::from(s.to_owned()))
        .or(prior_refresh);

    debug!(device, ttl_secs = ttl.map(|t| t.as_secs()), "OIDC token obtained");

    Ok(Credential::Token(CachedToken {
        value: SecretString::from(access.to_owned()),
        obtained_at: Utc::now(),
        ttl,
        refresh_token: refresh,
        source_device: device.to_owned(),
    }))
}

/// Body excerpt for error messages (char-safe truncation).
fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

// ── Payload templating & token extraction ───────────────────────────

/// Substitute the fixed placeholder set into an auth payload template.
///
/// Deliberately not a template engine: only whole-value `{{username}}`
/// and `{{password}}` are recognized, keeping the injection surface at
/// exactly two known keys.
fn substitute_payload(
    payload: &BTreeMap<String, String>,
    username: &str,
    password: &SecretString,
) -> BTreeMap<String, String> {
    if payload.is_empty() {
        let mut body = BTreeMap::new();
        body.insert("username".to_owned(), username.to_owned());
        body.insert("password".to_owned(), password.expose_secret().to_owned());
        return body;
    }

    payload
        .iter()
        .map(|(key, value)| {
            let resolved = match value.as_str() {
                "{{username}}" => username.to_owned(),
                "{{password}}" => password.expose_secret().to_owned(),
                other => other.to_owned(),
            };
            (key.clone(), resolved)
        })
        .collect()
}

/// Walk a dot-separated path into a JSON document and return the string
/// token found there.
fn extract_token(data: &Value, path: &str) -> Result<String, Error> {
    let missing = || Error::TokenExtraction { path: path.into() };

    let mut current = data;
    for segment in path.split('.') {
        current = current
            .as_object()
            .and_then(|obj| obj.get(segment))
            .ok_or_else(missing)?;
    }
    current.as_str().map(str::to_owned).ok_or_else(missing)
}

/// Look for an `expires_in` field next to the token (same object), then
/// at the document root.
fn ttl_near_token(data: &Value, token_path: &str) -> Option<std::time::Duration> {
    let parent = match token_path.rsplit_once('.') {
        Some((parent_path, _)) => {
            let mut current = data;
            for segment in parent_path.split('.') {
                current = current.as_object()?.get(segment)?;
            }
            current
        }
        None => data,
    };

    parent
        .get("expires_in")
        .or_else(|| data.get("expires_in"))
        .and_then(Value::as_u64)
        .map(std::time::Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_token_walks_nested_path() {
        let data = json!({"data": {"auth": {"token": "abc"}}});
        assert_eq!(
            extract_token(&data, "data.auth.token").expect("token present"),
            "abc"
        );
    }

    #[test]
    fn extract_token_fails_on_missing_segment() {
        let data = json!({"data": {"token": "abc"}});
        let err = extract_token(&data, "data.missing").expect_err("no such field");
        assert!(matches!(err, Error::TokenExtraction { path } if path == "data.missing"));
    }

    #[test]
    fn extract_token_fails_on_non_object_intermediate() {
        let data = json!({"data": "flat"});
        let err = extract_token(&data, "data.token").expect_err("intermediate not object");
        assert!(matches!(err, Error::TokenExtraction { .. }));
    }

    #[test]
    fn ttl_prefers_sibling_of_token() {
        let data = json!({"data": {"token": "abc", "expires_in": 60}, "expires_in": 999});
        let ttl = ttl_near_token(&data, "data.token").expect("ttl present");
        assert_eq!(ttl.as_secs(), 60);
    }

    #[test]
    fn ttl_falls_back_to_root() {
        let data = json!({"data": {"token": "abc"}, "expires_in": 120});
        let ttl = ttl_near_token(&data, "data.token").expect("ttl present");
        assert_eq!(ttl.as_secs(), 120);
    }

    #[test]
    fn ttl_absent_means_unknown() {
        let data = json!({"token": "abc"});
        assert!(ttl_near_token(&data, "token").is_none());
    }

    #[test]
    fn payload_substitution_covers_fixed_placeholders_only() {
        let mut template = BTreeMap::new();
        template.insert("user".to_owned(), "{{username}}".to_owned());
        template.insert("pass".to_owned(), "{{password}}".to_owned());
        template.insert("realm".to_owned(), "{{realm}}".to_owned());

        let resolved =
            substitute_payload(&template, "admin", &SecretString::from("s3cret".to_owned()));

        assert_eq!(resolved["user"], "admin");
        assert_eq!(resolved["pass"], "s3cret");
        // Unknown placeholders pass through untouched.
        assert_eq!(resolved["realm"], "{{realm}}");
    }

    #[test]
    fn empty_payload_defaults_to_username_password() {
        let resolved = substitute_payload(
            &BTreeMap::new(),
            "admin",
            &SecretString::from("pw".to_owned()),
        );
        assert_eq!(resolved["username"], "admin");
        assert_eq!(resolved["password"], "pw");
    }

    #[test]
    fn unknown_ttl_token_never_expires_by_clock() {
        let token = CachedToken {
            value: SecretString::from("t".to_owned()),
            obtained_at: Utc::now() - chrono::Duration::days(365),
            ttl: None,
            refresh_token: None,
            source_device: "dev".into(),
        };
        assert!(!token.is_expired_at(Utc::now()));
    }

    #[test]
    fn expiry_applies_safety_buffer_to_long_ttls() {
        let now = Utc::now();
        let token = CachedToken {
            value: SecretString::from("t".to_owned()),
            obtained_at: now,
            ttl: Some(std::time::Duration::from_secs(3600)),
            refresh_token: None,
            source_device: "dev".into(),
        };
        assert!(!token.is_expired_at(now + chrono::Duration::seconds(3539)));
        assert!(token.is_expired_at(now + chrono::Duration::seconds(3540)));
    }

    #[test]
    fn short_ttls_keep_their_full_window() {
        let now = Utc::now();
        let token = CachedToken {
            value: SecretString::from("t".to_owned()),
            obtained_at: now,
            ttl: Some(std::time::Duration::from_secs(60)),
            refresh_token: None,
            source_device: "dev".into(),
        };
        assert!(!token.is_expired_at(now + chrono::Duration::seconds(59)));
        assert!(token.is_expired_at(now + chrono::Duration::seconds(60)));
    }
}
