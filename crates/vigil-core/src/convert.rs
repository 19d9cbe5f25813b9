// ── Inventory → API-layer translation ──
//
// The config crate describes devices as they appear in the YAML
// document; the API layer wants concrete auth schemes and transport
// settings. This module is the only place that mapping lives.

use std::time::Duration;

use secrecy::SecretString;

use vigil_api::discovery::Endpoint;
use vigil_api::{AuthScheme, ExchangeMethod, TlsMode, TransportConfig};
use vigil_config::{ApiConfig, AuthMethod, AuthType};

/// Defaults matching common OIDC-fronted device UIs.
const DEFAULT_OPENID_CLIENT_ID: &str = "webui";
const DEFAULT_OPENID_SCOPE: &str = "offline_access";
const DEFAULT_TOKEN_PATH: &str = "token";

/// Build the auth scheme for a device. Assumes the device passed
/// load-time validation (defective devices never reach this point).
pub fn auth_scheme(api: &ApiConfig) -> AuthScheme {
    let username = api.username.clone().unwrap_or_default();
    let password = SecretString::from(api.password.clone().unwrap_or_default());

    match api.auth_type {
        AuthType::None => AuthScheme::None,

        AuthType::Basic => AuthScheme::Basic { username, password },

        AuthType::Bearer => AuthScheme::Bearer {
            token: SecretString::from(api.token.clone().unwrap_or_default()),
        },

        AuthType::TokenFromAuth => {
            let endpoint = api.auth_endpoint.clone().unwrap_or_default();
            if api.auth_type_extension.as_deref() == Some("openid_connect") {
                AuthScheme::OpenIdPassword {
                    endpoint,
                    client_id: api
                        .openid_client_id
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OPENID_CLIENT_ID.into()),
                    scope: api
                        .openid_scope
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OPENID_SCOPE.into()),
                    username,
                    password,
                }
            } else {
                AuthScheme::TokenExchange {
                    endpoint,
                    method: match api.auth_method {
                        AuthMethod::Post => ExchangeMethod::Post,
                        AuthMethod::Get => ExchangeMethod::Get,
                    },
                    payload: api.auth_payload.clone(),
                    token_path: api
                        .token_path
                        .clone()
                        .unwrap_or_else(|| DEFAULT_TOKEN_PATH.into()),
                    username,
                    password,
                }
            }
        }
    }
}

/// Build transport settings for a device.
pub fn transport(api: &ApiConfig, timeout: Duration) -> TransportConfig {
    TransportConfig {
        tls: if api.verify_ssl {
            TlsMode::Verify
        } else {
            TlsMode::DangerAcceptInvalid
        },
        timeout,
    }
}

/// Explicit inventory endpoints, passed through verbatim.
pub fn explicit_endpoints(api: &ApiConfig) -> Vec<Endpoint> {
    api.endpoints
        .iter()
        .map(|spec| Endpoint {
            path: spec.path.clone(),
            method: spec.method.to_uppercase(),
            critical: spec.critical,
            nested_json: spec.nested_json,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_config::parse_inventory;

    fn api_of(doc: &str) -> ApiConfig {
        parse_inventory(doc).expect("parses").devices.remove(0).api
    }

    #[test]
    fn openid_extension_selects_password_grant() {
        let api = api_of(
            r"
devices:
  - name: oidc
    api:
      base_url: http://o
      auth_type: token_from_auth
      auth_type_extension: openid_connect
      auth_endpoint: /token
      token_path: access_token
      username: u
      password: p
",
        );

        let scheme = auth_scheme(&api);
        assert!(
            matches!(scheme, AuthScheme::OpenIdPassword { ref client_id, ref scope, .. }
                if client_id == "webui" && scope == "offline_access")
        );
    }

    #[test]
    fn plain_exchange_keeps_payload_and_path() {
        let api = api_of(
            r"
devices:
  - name: plain
    api:
      base_url: http://p
      auth_type: token_from_auth
      auth_endpoint: /login
      token_path: data.token
      auth_payload: {user: '{{username}}'}
      username: u
      password: p
",
        );

        match auth_scheme(&api) {
            AuthScheme::TokenExchange {
                token_path,
                payload,
                ..
            } => {
                assert_eq!(token_path, "data.token");
                assert_eq!(payload["user"], "{{username}}");
            }
            other => panic!("expected TokenExchange, got {other:?}"),
        }
    }

    #[test]
    fn verify_ssl_false_disables_verification() {
        let api = api_of(
            r"
devices:
  - name: selfsigned
    api:
      base_url: https://s
      verify_ssl: false
",
        );

        let transport = transport(&api, Duration::from_secs(5));
        assert_eq!(transport.tls, TlsMode::DangerAcceptInvalid);
    }

    #[test]
    fn explicit_endpoints_pass_through_verbatim() {
        let api = api_of(
            r"
devices:
  - name: fixed
    api:
      base_url: http://f
      endpoints:
        - {path: /health, method: get, critical: true}
",
        );

        let endpoints = explicit_endpoints(&api);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].method, "GET");
        assert!(endpoints[0].critical);
    }
}
