//! Process settings: where artifacts go and how often passes run.
//!
//! Defaults match a containerized deployment with a `/config` volume
//! shared with the polling agent; every field can be overridden through
//! a `VIGIL_`-prefixed environment variable.

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for SettingsError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Service-level settings (not the device inventory).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Device inventory document.
    pub inventory_path: PathBuf,

    /// Directory watched by the polling agent for per-device fragments.
    pub poller_dir: PathBuf,

    /// Directory watched by the dashboard engine for definitions.
    pub dashboard_dir: PathBuf,

    /// Secrets file consumed by the polling agent (`KEY=VALUE` lines).
    pub secrets_path: PathBuf,

    /// Persisted token cache so restarts reuse still-valid tokens.
    pub token_store_path: PathBuf,

    /// Seconds between scheduled reconciliation passes. 0 disables the
    /// periodic trigger (on-demand only).
    pub refresh_interval_secs: u64,

    /// Bind address for the trigger/health HTTP surface.
    pub listen_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            inventory_path: PathBuf::from("/config/devices.yml"),
            poller_dir: PathBuf::from("/config/telegraf"),
            dashboard_dir: PathBuf::from("/config/grafana/provisioning/dashboards"),
            secrets_path: PathBuf::from("/config/telegraf/auth_tokens.env"),
            token_store_path: PathBuf::from("/config/token_store.json"),
            refresh_interval_secs: 3600,
            listen_addr: "0.0.0.0:8080".into(),
        }
    }
}

/// Load settings from defaults + `VIGIL_*` environment overrides.
pub fn load_settings() -> Result<Settings, SettingsError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Env::prefixed("VIGIL_"));

    let settings: Settings = figment.extract()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_config_volume() {
        let settings = Settings::default();
        assert_eq!(settings.inventory_path, PathBuf::from("/config/devices.yml"));
        assert_eq!(settings.refresh_interval_secs, 3600);
    }
}
