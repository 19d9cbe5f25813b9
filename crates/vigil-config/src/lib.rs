//! Shared configuration for the vigil service.
//!
//! Two concerns live here: process [`Settings`] (paths, intervals,
//! listener address — figment defaults with `VIGIL_` env overrides) and
//! the device [`inventory`] (the YAML document describing what to
//! monitor, with `${ENV_VAR}` placeholder resolution for secrets).

pub mod inventory;
pub mod settings;

pub use inventory::{
    ApiConfig, AuthMethod, AuthType, Device, EndpointSpec, GlobalDefaults, Inventory,
    InventoryError, load_inventory, parse_inventory,
};
pub use settings::{Settings, SettingsError, load_settings};
