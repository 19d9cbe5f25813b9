// ── Runtime token cache and secrets export ──
//
// One TokenManager lives for the whole process. Tokens acquired during a
// pass are reused across passes until they expire (with a safety buffer)
// or a device rejects them. The cache is persisted to a JSON store after
// every pass and reloaded on startup, so restarts don't redo password
// grants for tokens that are still valid. The cache is also the source
// for the secrets env file the polling agent reads bearer values from,
// so rendered configs never contain a token inline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vigil_api::auth::refresh_token_grant;
use vigil_api::{AuthScheme, CachedToken, Credential, DeviceClient, Error, authenticate};

use crate::error::CoreError;
use crate::files::write_if_changed;

/// Shared token cache keyed by device name.
#[derive(Debug, Default)]
pub struct TokenManager {
    cache: DashMap<String, CachedToken>,
}

/// On-disk form of one cached token. The store lives next to the other
/// generated artifacts and carries the same secrets the env file does.
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    value: String,
    obtained_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl TokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a usable credential for `device`, reusing a cached token
    /// when one is still valid.
    ///
    /// For OIDC devices an expired token with a refresh token tries the
    /// cheap refresh grant first and falls back to the full password
    /// grant when the refresh is rejected.
    pub async fn get_credential(
        &self,
        client: &DeviceClient,
        scheme: &AuthScheme,
        device: &str,
    ) -> Result<Credential, Error> {
        if !scheme.is_token_based() {
            return authenticate(client, scheme, device).await;
        }

        let cached = self.cache.get(device).map(|entry| entry.value().clone());
        if let Some(token) = cached {
            if !token.is_expired_at(Utc::now()) {
                debug!(device, "reusing cached token");
                return Ok(Credential::Token(token));
            }
            if let Some(refreshed) = self.try_refresh(client, scheme, device, &token).await {
                return Ok(refreshed);
            }
        }

        let credential = authenticate(client, scheme, device).await?;
        if let Credential::Token(token) = &credential {
            self.cache.insert(device.to_owned(), token.clone());
        }
        Ok(credential)
    }

    /// Attempt the OIDC refresh grant for an expired token. `None` means
    /// the caller should fall through to a full re-authentication.
    async fn try_refresh(
        &self,
        client: &DeviceClient,
        scheme: &AuthScheme,
        device: &str,
        expired: &CachedToken,
    ) -> Option<Credential> {
        let AuthScheme::OpenIdPassword {
            endpoint,
            client_id,
            ..
        } = scheme
        else {
            return None;
        };
        let refresh = expired.refresh_token.as_ref()?;

        match refresh_token_grant(client, device, endpoint, client_id, refresh).await {
            Ok(credential) => {
                if let Credential::Token(token) = &credential {
                    self.cache.insert(device.to_owned(), token.clone());
                }
                debug!(device, "access token refreshed");
                Some(credential)
            }
            Err(err) => {
                warn!(device, error = %err, "token refresh failed, re-authenticating");
                None
            }
        }
    }

    /// Record a statically configured bearer token so it lands in the
    /// secrets file alongside acquired ones. The polling agent reads
    /// every bearer value through that file; configs never inline them.
    pub fn note_static_bearer(&self, device: &str, token: &secrecy::SecretString) {
        self.cache.insert(
            device.to_owned(),
            CachedToken {
                value: token.clone(),
                obtained_at: Utc::now(),
                ttl: None,
                refresh_token: None,
                source_device: device.to_owned(),
            },
        );
    }

    /// Drop the cached token for a device whose requests were rejected.
    /// The next credential lookup re-authenticates from scratch.
    pub fn invalidate(&self, device: &str) {
        if self.cache.remove(device).is_some() {
            info!(device, "cached token invalidated");
        }
    }

    /// Drop tokens for devices no longer present in the inventory.
    pub fn drop_stale(&self, current: &BTreeSet<String>) {
        self.cache.retain(|device, _| current.contains(device));
    }

    /// Number of cached tokens (for status reporting).
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Write the secrets env file the polling agent reads bearer tokens
    /// from. Lines are sorted by key and the file is replaced atomically;
    /// returns whether the content changed.
    pub fn export_secrets(&self, path: &Path) -> Result<bool, CoreError> {
        let mut lines: Vec<String> = self
            .cache
            .iter()
            .map(|entry| {
                format!(
                    "{}={}",
                    secret_key_for(entry.key()),
                    entry.value().value.expose_secret()
                )
            })
            .collect();
        lines.sort();

        let mut content = String::from("# Managed by vigil. Do not edit.\n");
        for line in &lines {
            content.push_str(line);
            content.push('\n');
        }

        write_if_changed(path, &content)
    }

    /// Load previously persisted tokens. A missing or unreadable store is
    /// not an error; the affected devices simply re-authenticate.
    pub fn load_store(&self, path: &Path) {
        let Ok(text) = std::fs::read_to_string(path) else {
            return;
        };
        let stored: BTreeMap<String, StoredToken> = match serde_json::from_str(&text) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable token store");
                return;
            }
        };

        for (device, token) in stored {
            self.cache.insert(
                device.clone(),
                CachedToken {
                    value: SecretString::from(token.value),
                    obtained_at: token.obtained_at,
                    ttl: token.ttl_secs.map(std::time::Duration::from_secs),
                    refresh_token: token.refresh_token.map(SecretString::from),
                    source_device: device,
                },
            );
        }
        info!(tokens = self.cache.len(), path = %path.display(), "token store loaded");
    }

    /// Persist the cache so a restart can reuse still-valid tokens
    /// instead of redoing password grants. Same atomic write-if-changed
    /// policy as the secrets file; returns whether the store changed.
    pub fn save_store(&self, path: &Path) -> Result<bool, CoreError> {
        let stored: BTreeMap<String, StoredToken> = self
            .cache
            .iter()
            .map(|entry| {
                let token = entry.value();
                (
                    entry.key().clone(),
                    StoredToken {
                        value: token.value.expose_secret().to_owned(),
                        obtained_at: token.obtained_at,
                        ttl_secs: token.ttl.map(|t| t.as_secs()),
                        refresh_token: token
                            .refresh_token
                            .as_ref()
                            .map(|r| r.expose_secret().to_owned()),
                    },
                )
            })
            .collect();

        let mut content = serde_json::to_string_pretty(&stored).map_err(|err| CoreError::Write {
            path: path.display().to_string(),
            source: std::io::Error::other(err),
        })?;
        content.push('\n');

        write_if_changed(path, &content)
    }
}

/// Env-file key for a device's token: the device name uppercased with
/// every non-alphanumeric run collapsed to `_`, suffixed `_TOKEN`. A
/// leading digit gets a `_` prefix so the key stays a valid env name.
pub fn secret_key_for(device: &str) -> String {
    let mut key = String::with_capacity(device.len() + 6);
    for ch in device.chars() {
        if ch.is_ascii_alphanumeric() {
            key.push(ch.to_ascii_uppercase());
        } else if !key.ends_with('_') {
            key.push('_');
        }
    }
    let key = key.trim_matches('_').to_owned();
    if key.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("_{key}_TOKEN")
    } else {
        format!("{key}_TOKEN")
    }
}
