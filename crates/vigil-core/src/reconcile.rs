//! Reconciliation passes.
//!
//! A pass turns the device inventory into the artifact tree: one poller
//! fragment and one dashboard per device, a shared base poller config,
//! and the secrets env file. Device processing runs in parallel; inside
//! one device the steps are sequential (credential, then discovery, then
//! render). Only an unreadable inventory aborts a pass — every other
//! failure degrades a single device and is recorded in the summary.
//!
//! Callers must serialize passes (the scheduler does); concurrent passes
//! would race on the artifact files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use url::Url;

use vigil_api::{Credential, DeviceClient, Endpoint, fetch_openapi_endpoints};
use vigil_config::{Device, GlobalDefaults, load_inventory};

use crate::convert;
use crate::error::{CoreError, failure_reason};
use crate::files::write_if_changed;
use crate::render;
use crate::summary::{FailureStage, PassSummary};
use crate::tokens::TokenManager;

/// Basename of the shared base poller config, excluded from cleanup.
const BASE_POLLER_NAME: &str = "telegraf";
/// Dashboard basenames that are provisioned externally, never deleted.
const PROTECTED_DASHBOARDS: &[&str] = &["default", "welcome"];

/// Filesystem layout for one monitor instance.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub inventory_path: PathBuf,
    pub poller_dir: PathBuf,
    pub dashboard_dir: PathBuf,
    pub secrets_path: PathBuf,
    /// Persisted token cache, reloaded on startup so restarts reuse
    /// still-valid tokens.
    pub token_store_path: PathBuf,
}

/// Best-effort notification that artifacts changed, fired after every
/// completed pass with at least one changed or removed file. The
/// delivery mechanism belongs to the deployment, not to this crate.
pub trait ReloadSignal: Send + Sync {
    fn artifacts_changed(&self, summary: &PassSummary);
}

/// Default signal: log and rely on the agent's own file watching.
pub struct LogReload;

impl ReloadSignal for LogReload {
    fn artifacts_changed(&self, summary: &PassSummary) {
        info!(
            succeeded = summary.succeeded,
            degraded = summary.degraded,
            removed = summary.removed,
            "artifacts changed, poller reload expected"
        );
    }
}

/// Drives reconciliation passes over one inventory and artifact tree.
pub struct Monitor {
    config: MonitorConfig,
    tokens: Arc<TokenManager>,
    reload: Box<dyn ReloadSignal>,
    summary_tx: watch::Sender<Option<PassSummary>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_reload_signal(config, LogReload)
    }

    pub fn with_reload_signal(config: MonitorConfig, reload: impl ReloadSignal + 'static) -> Self {
        let (summary_tx, _) = watch::channel(None);
        let tokens = TokenManager::new();
        tokens.load_store(&config.token_store_path);
        Self {
            config,
            tokens: Arc::new(tokens),
            reload: Box::new(reload),
            summary_tx,
        }
    }

    /// Watch the most recent pass summary (`None` until the first pass
    /// completes).
    pub fn summaries(&self) -> watch::Receiver<Option<PassSummary>> {
        self.summary_tx.subscribe()
    }

    /// The shared token cache.
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Run one full reconciliation pass.
    pub async fn run_pass(&self) -> Result<PassSummary, CoreError> {
        let inventory = load_inventory(&self.config.inventory_path)?;
        let current = inventory.device_names();
        info!(devices = current.len(), "reconciliation pass started");

        let mut summary = PassSummary::default();
        let mut changed = false;

        changed |= write_if_changed(
            &self.config.poller_dir.join("telegraf.conf"),
            render::BASE_POLLER_CONFIG,
        )?;

        self.cleanup_stale(&current, &mut summary);
        changed |= summary.removed > 0;

        let mut tasks = JoinSet::new();
        for device in inventory.devices {
            let tokens = Arc::clone(&self.tokens);
            let global = inventory.global;
            let poller_dir = self.config.poller_dir.clone();
            let dashboard_dir = self.config.dashboard_dir.clone();
            tasks.spawn(async move {
                process_device(tokens, device, global, &poller_dir, &dashboard_dir).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    changed |= outcome.changed;
                    if outcome.succeeded {
                        summary.succeeded += 1;
                    }
                    if outcome.degraded {
                        summary.degraded += 1;
                    }
                    for (stage, reason) in outcome.failures {
                        summary.record(&outcome.device, stage, reason);
                    }
                }
                Err(join_err) => error!(error = %join_err, "device task aborted"),
            }
        }

        self.tokens.drop_stale(&current);
        match self.tokens.export_secrets(&self.config.secrets_path) {
            Ok(secrets_changed) => changed |= secrets_changed,
            Err(e) => summary.record("secrets", FailureStage::Render, e.to_string()),
        }
        // The store is read only by a restarted vigil, never by the
        // polling agent, so it does not factor into the reload decision.
        if let Err(e) = self.tokens.save_store(&self.config.token_store_path) {
            summary.record("token_store", FailureStage::Render, e.to_string());
        }

        if changed {
            self.reload.artifacts_changed(&summary);
        }
        info!(
            succeeded = summary.succeeded,
            degraded = summary.degraded,
            removed = summary.removed,
            failures = summary.failures.len(),
            "reconciliation pass finished"
        );
        self.summary_tx.send_replace(Some(summary.clone()));
        Ok(summary)
    }

    /// Delete artifacts whose device no longer exists in the inventory.
    fn cleanup_stale(&self, current: &BTreeSet<String>, summary: &mut PassSummary) {
        let mut removed = BTreeSet::new();
        cleanup_dir(
            &self.config.poller_dir,
            "conf",
            &[BASE_POLLER_NAME],
            current,
            &mut removed,
            summary,
        );
        cleanup_dir(
            &self.config.dashboard_dir,
            "json",
            PROTECTED_DASHBOARDS,
            current,
            &mut removed,
            summary,
        );
        summary.removed = removed.len();
    }
}

fn cleanup_dir(
    dir: &Path,
    extension: &str,
    protected: &[&str],
    current: &BTreeSet<String>,
    removed: &mut BTreeSet<String>,
    summary: &mut PassSummary,
) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if protected.contains(&stem) || current.contains(stem) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(device = stem, path = %path.display(), "removed stale artifact");
                removed.insert(stem.to_owned());
            }
            Err(e) => summary.record(
                stem,
                FailureStage::Cleanup,
                format!("failed to delete {}: {e}", path.display()),
            ),
        }
    }
}

// ── Per-device processing ───────────────────────────────────────────

struct DeviceOutcome {
    device: String,
    succeeded: bool,
    degraded: bool,
    changed: bool,
    failures: Vec<(FailureStage, String)>,
}

enum Resolution {
    Healthy { endpoints: Vec<Endpoint> },
    Degraded { stage: FailureStage, reason: String },
}

async fn process_device(
    tokens: Arc<TokenManager>,
    device: Device,
    global: GlobalDefaults,
    poller_dir: &Path,
    dashboard_dir: &Path,
) -> DeviceOutcome {
    let resolution = match device.defect.clone() {
        Some(reason) => Resolution::Degraded {
            stage: FailureStage::Auth,
            reason,
        },
        None => resolve_endpoints(&tokens, &device, &global).await,
    };

    let mut outcome = DeviceOutcome {
        device: device.name.clone(),
        succeeded: false,
        degraded: false,
        changed: false,
        failures: Vec::new(),
    };

    let (endpoints, degraded_reason) = match &resolution {
        Resolution::Healthy { endpoints } => (endpoints.as_slice(), None),
        Resolution::Degraded { stage, reason } => {
            warn!(device = %device.name, %reason, "device degraded");
            outcome.failures.push((*stage, reason.clone()));
            (&[][..], Some(reason.as_str()))
        }
    };

    match write_artifacts(
        &device,
        endpoints,
        &global,
        degraded_reason,
        poller_dir,
        dashboard_dir,
    ) {
        Ok(changed) => {
            outcome.changed = changed;
            outcome.succeeded = degraded_reason.is_none();
            outcome.degraded = degraded_reason.is_some();
        }
        Err(e) => {
            // Prior artifacts stay in place; the device is neither
            // counted succeeded nor degraded this pass.
            error!(device = %device.name, error = %e, "artifact write failed");
            outcome.failures.push((FailureStage::Render, e.to_string()));
        }
    }

    outcome
}

/// Credential acquisition plus endpoint resolution for one device.
///
/// A credential rejection during discovery invalidates the cached token
/// and retries once with a freshly acquired one (lazy refresh of
/// unknown-TTL tokens).
async fn resolve_endpoints(
    tokens: &TokenManager,
    device: &Device,
    global: &GlobalDefaults,
) -> Resolution {
    let api = &device.api;

    let base_url = match Url::parse(&api.base_url) {
        Ok(url) => url,
        Err(e) => {
            return Resolution::Degraded {
                stage: FailureStage::Auth,
                reason: format!("invalid base_url: {e}"),
            };
        }
    };
    let transport = convert::transport(api, Duration::from_secs(global.timeout));
    let client = match DeviceClient::new(base_url, &transport) {
        Ok(client) => client,
        Err(e) => {
            return Resolution::Degraded {
                stage: FailureStage::Auth,
                reason: failure_reason(&e),
            };
        }
    };

    let scheme = convert::auth_scheme(api);
    let credential = match tokens.get_credential(&client, &scheme, &device.name).await {
        Ok(credential) => credential,
        Err(e) => {
            return Resolution::Degraded {
                stage: FailureStage::Auth,
                reason: failure_reason(&e),
            };
        }
    };
    if let Credential::Bearer { token } = &credential {
        tokens.note_static_bearer(&device.name, token);
    }

    if !api.endpoints.is_empty() {
        return Resolution::Healthy {
            endpoints: convert::explicit_endpoints(api),
        };
    }
    let Some(swagger) = api.swagger_url.as_deref() else {
        // No discovery source; the device still gets its health probe.
        return Resolution::Healthy {
            endpoints: Vec::new(),
        };
    };

    match fetch_openapi_endpoints(&client, swagger, &credential).await {
        Ok(discovery) => discovery_resolution(discovery),
        Err(e) if e.is_credential_rejection() => {
            tokens.invalidate(&device.name);
            match tokens.get_credential(&client, &scheme, &device.name).await {
                Ok(fresh) => match fetch_openapi_endpoints(&client, swagger, &fresh).await {
                    Ok(discovery) => discovery_resolution(discovery),
                    Err(e) => Resolution::Degraded {
                        stage: FailureStage::Discovery,
                        reason: failure_reason(&e),
                    },
                },
                Err(e) => Resolution::Degraded {
                    stage: FailureStage::Auth,
                    reason: failure_reason(&e),
                },
            }
        }
        Err(e) => Resolution::Degraded {
            stage: FailureStage::Discovery,
            reason: failure_reason(&e),
        },
    }
}

fn discovery_resolution(discovery: vigil_api::Discovery) -> Resolution {
    match discovery.warning {
        None => Resolution::Healthy {
            endpoints: discovery.endpoints,
        },
        Some(warning) => Resolution::Degraded {
            stage: FailureStage::Discovery,
            reason: warning,
        },
    }
}

fn write_artifacts(
    device: &Device,
    endpoints: &[Endpoint],
    global: &GlobalDefaults,
    degraded: Option<&str>,
    poller_dir: &Path,
    dashboard_dir: &Path,
) -> Result<bool, CoreError> {
    let poller = render::poller_fragment(device, endpoints, global, degraded);
    let dashboard = render::dashboard_fragment(device, endpoints, degraded);

    let mut changed = write_if_changed(&poller_dir.join(format!("{}.conf", device.name)), &poller)?;
    changed |= write_if_changed(
        &dashboard_dir.join(format!("{}.json", device.name)),
        &dashboard,
    )?;
    Ok(changed)
}
