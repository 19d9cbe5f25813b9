//! Device inventory loading.
//!
//! The inventory is a YAML document with a `devices` sequence and a
//! `global` defaults block. Secret-bearing fields (`username`,
//! `password`, `token`) may hold whole-value `${ENV_VAR}` placeholders
//! resolved at load time. A malformed document is fatal for the whole
//! pass; a device whose placeholders or auth wiring are broken is only
//! marked defective and rendered as degraded.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

// ── Error ───────────────────────────────────────────────────────────

/// Artifact basenames the generator owns or must never touch; a device
/// with one of these names would collide with them.
const RESERVED_NAMES: &[&str] = &["telegraf", "default", "welcome"];

/// Pass-fatal inventory load failures. Per-device problems never land
/// here — they become [`Device::defect`] instead.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid inventory document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("duplicate device name '{name}' in inventory")]
    DuplicateName { name: String },

    #[error("device with empty name in inventory")]
    EmptyName,

    #[error("device name '{name}' is reserved for generated artifacts")]
    ReservedName { name: String },
}

// ── Document model ──────────────────────────────────────────────────

/// Declared auth scheme for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Bearer,
    TokenFromAuth,
}

/// HTTP method for the token-exchange login request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum AuthMethod {
    #[default]
    #[serde(rename = "POST", alias = "post")]
    Post,
    #[serde(rename = "GET", alias = "get")]
    Get,
}

/// An explicitly configured probe endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointSpec {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub nested_json: bool,
}

/// Everything needed to reach and authenticate against one device API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,

    #[serde(default)]
    pub auth_type: AuthType,
    /// Flow variant marker, e.g. `openid_connect`.
    pub auth_type_extension: Option<String>,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    // Static credential material (may be `${ENV_VAR}` placeholders).
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,

    // Token acquisition (auth_type = token_from_auth).
    pub auth_endpoint: Option<String>,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub auth_payload: BTreeMap<String, String>,
    pub token_path: Option<String>,

    // OpenID Connect specifics.
    pub openid_client_id: Option<String>,
    pub openid_scope: Option<String>,

    /// API description document for endpoint discovery.
    pub swagger_url: Option<String>,

    /// Declared metrics-scrape surface (e.g. `prometheus`).
    pub metrics_type: Option<String>,
    pub metrics_path: Option<String>,

    /// Explicit endpoints; when non-empty, discovery is bypassed.
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

/// One monitored device.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub name: String,
    /// Category tag understood by the renderer.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    pub api: ApiConfig,

    /// Load-time problem (unresolved placeholder, broken auth wiring).
    /// A defective device is rendered as degraded with this reason.
    #[serde(skip)]
    pub defect: Option<String>,
}

/// Defaults applied to every device.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GlobalDefaults {
    /// Probe interval in seconds.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    /// Probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub timeout: u64,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            timeout: default_probe_timeout(),
        }
    }
}

/// A loaded inventory: declaration order preserved, names unique.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub devices: Vec<Device>,
    pub global: GlobalDefaults,
}

impl Inventory {
    /// The set of device names in this inventory.
    pub fn device_names(&self) -> BTreeSet<String> {
        self.devices.iter().map(|d| d.name.clone()).collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    global: GlobalDefaults,
}

fn default_true() -> bool {
    true
}
fn default_kind() -> String {
    "generic".into()
}
fn default_method() -> String {
    "GET".into()
}
fn default_polling_interval() -> u64 {
    60
}
fn default_probe_timeout() -> u64 {
    10
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load and validate the inventory document at `path`.
pub fn load_inventory(path: &Path) -> Result<Inventory, InventoryError> {
    let text = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_inventory(&text)
}

/// Parse an inventory document from a string (exposed for tests).
pub fn parse_inventory(text: &str) -> Result<Inventory, InventoryError> {
    let raw: RawDocument = serde_yaml::from_str(text)?;

    let mut seen = BTreeSet::new();
    for device in &raw.devices {
        if device.name.trim().is_empty() {
            return Err(InventoryError::EmptyName);
        }
        if RESERVED_NAMES.contains(&device.name.as_str()) {
            return Err(InventoryError::ReservedName {
                name: device.name.clone(),
            });
        }
        if !seen.insert(device.name.clone()) {
            return Err(InventoryError::DuplicateName {
                name: device.name.clone(),
            });
        }
    }

    let devices = raw
        .devices
        .into_iter()
        .map(|mut device| {
            device.defect = resolve_device(&mut device.api).err();
            device
        })
        .collect();

    Ok(Inventory {
        devices,
        global: raw.global,
    })
}

/// Resolve placeholders and check auth wiring for one device. The error
/// string becomes the device's defect.
fn resolve_device(api: &mut ApiConfig) -> Result<(), String> {
    resolve_secret(&mut api.username, "username")?;
    resolve_secret(&mut api.password, "password")?;
    resolve_secret(&mut api.token, "token")?;

    match api.auth_type {
        AuthType::None => {}
        AuthType::Basic => {
            if api.username.is_none() || api.password.is_none() {
                return Err("basic auth requires username and password".into());
            }
        }
        AuthType::Bearer => {
            if api.token.is_none() {
                return Err("bearer auth requires a token".into());
            }
        }
        AuthType::TokenFromAuth => {
            if api.auth_endpoint.is_none() || api.token_path.is_none() {
                return Err("token_from_auth requires auth_endpoint and token_path".into());
            }
            if api.username.is_none() || api.password.is_none() {
                return Err("token_from_auth requires username and password".into());
            }
        }
    }
    Ok(())
}

fn resolve_secret(field: &mut Option<String>, name: &str) -> Result<(), String> {
    if let Some(value) = field.as_deref() {
        if let Some(var) = placeholder_var(value) {
            match std::env::var(var) {
                Ok(resolved) if !resolved.is_empty() => *field = Some(resolved),
                _ => return Err(format!("environment variable {var} for {name} not set or empty")),
            }
        }
    }
    Ok(())
}

/// Recognize a whole-value `${VAR}` placeholder. Partial interpolation
/// is intentionally unsupported.
fn placeholder_var(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|v| v.strip_suffix('}'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r"
devices:
  - name: fridge
    type: appliance
    api:
      base_url: http://fridge.local
global:
  polling_interval: 30
";

    #[test]
    fn parses_minimal_document() {
        let inventory = parse_inventory(MINIMAL).expect("parses");

        assert_eq!(inventory.devices.len(), 1);
        let device = &inventory.devices[0];
        assert_eq!(device.name, "fridge");
        assert_eq!(device.kind, "appliance");
        assert_eq!(device.api.auth_type, AuthType::None);
        assert!(device.api.verify_ssl);
        assert!(device.defect.is_none());
        assert_eq!(inventory.global.polling_interval, 30);
        assert_eq!(inventory.global.timeout, 10);
    }

    #[test]
    fn empty_document_yields_empty_inventory() {
        let inventory = parse_inventory("devices: []").expect("parses");
        assert!(inventory.devices.is_empty());
    }

    #[test]
    fn duplicate_names_are_fatal() {
        let doc = r"
devices:
  - name: a
    api: {base_url: http://a}
  - name: a
    api: {base_url: http://a2}
";
        let err = parse_inventory(doc).expect_err("duplicate");
        assert!(matches!(err, InventoryError::DuplicateName { name } if name == "a"));
    }

    #[test]
    fn reserved_artifact_names_are_fatal() {
        // A device named after the base poller config would overwrite it
        // and escape stale cleanup forever.
        let doc = r"
devices:
  - name: telegraf
    api: {base_url: http://t}
";
        let err = parse_inventory(doc).expect_err("reserved");
        assert!(matches!(err, InventoryError::ReservedName { name } if name == "telegraf"));

        let doc = r"
devices:
  - name: default
    api: {base_url: http://d}
";
        assert!(matches!(
            parse_inventory(doc).expect_err("reserved"),
            InventoryError::ReservedName { .. }
        ));
    }

    #[test]
    fn empty_device_name_is_fatal() {
        let doc = r"
devices:
  - name: ''
    api: {base_url: http://x}
";
        assert!(matches!(
            parse_inventory(doc).expect_err("empty name"),
            InventoryError::EmptyName
        ));

        let doc = r"
devices:
  - name: '   '
    api: {base_url: http://x}
";
        assert!(matches!(
            parse_inventory(doc).expect_err("blank name"),
            InventoryError::EmptyName
        ));
    }

    #[test]
    fn token_from_auth_without_endpoint_is_a_defect_not_fatal() {
        let doc = r"
devices:
  - name: broken
    api:
      base_url: http://b
      auth_type: token_from_auth
      username: admin
      password: pw
  - name: fine
    api: {base_url: http://f}
";
        let inventory = parse_inventory(doc).expect("parses");

        assert!(inventory.devices[0].defect.as_deref().is_some_and(|d| d
            .contains("auth_endpoint")));
        assert!(inventory.devices[1].defect.is_none());
    }

    #[test]
    fn unresolved_placeholder_is_a_defect() {
        let doc = r"
devices:
  - name: secretive
    api:
      base_url: http://s
      auth_type: basic
      username: admin
      password: ${VIGIL_TEST_NO_SUCH_VAR_12345}
";
        let inventory = parse_inventory(doc).expect("parses");

        let defect = inventory.devices[0].defect.as_deref().expect("defect set");
        assert!(defect.contains("VIGIL_TEST_NO_SUCH_VAR_12345"));
    }

    #[test]
    fn placeholder_detection_requires_whole_value() {
        assert_eq!(placeholder_var("${TOKEN}"), Some("TOKEN"));
        assert_eq!(placeholder_var("prefix-${TOKEN}"), None);
        assert_eq!(placeholder_var("plain"), None);
    }

    #[test]
    fn explicit_endpoints_parse_with_defaults() {
        let doc = r"
devices:
  - name: dev
    api:
      base_url: http://d
      endpoints:
        - path: /health
        - {path: /jobs, method: POST, critical: true, nested_json: true}
";
        let inventory = parse_inventory(doc).expect("parses");
        let endpoints = &inventory.devices[0].api.endpoints;

        assert_eq!(endpoints[0].method, "GET");
        assert!(!endpoints[0].critical);
        assert!(endpoints[1].critical);
        assert!(endpoints[1].nested_json);
    }

    #[test]
    fn load_reports_missing_file_with_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("devices.yml");

        let err = load_inventory(&path).expect_err("missing file");
        assert!(matches!(err, InventoryError::Io { .. }));
        assert!(err.to_string().contains("devices.yml"));

        std::fs::write(&path, MINIMAL).expect("inventory written");
        let inventory = load_inventory(&path).expect("loads");
        assert_eq!(inventory.devices.len(), 1);
    }

    #[test]
    fn auth_method_accepts_both_cases() {
        let doc = r"
devices:
  - name: dev
    api:
      base_url: http://d
      auth_type: token_from_auth
      auth_endpoint: /login
      token_path: token
      auth_method: post
      username: u
      password: p
";
        let inventory = parse_inventory(doc).expect("parses");
        assert_eq!(inventory.devices[0].api.auth_method, AuthMethod::Post);
    }
}
