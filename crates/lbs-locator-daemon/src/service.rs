//! Locator service lifecycle: wiring config to a running locator, plus the
//! offline status and maintenance commands.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use lbs_locator::lifecycle::{
    clear_key_failure, in_key_cooldown, key_failure_time, KEY_FAILURE_COOLDOWN,
};
use lbs_locator::{
    FallbackPreferences, HttpTransport, JsonFileStore, KeyFile, KeySource, Locator,
    LocatorConfig, LocatorHandle, MemoryStore, SettingsStore,
};

use crate::error::DaemonResult;

/// Extra headroom the HTTP client allows beyond the request deadline.
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Resolved configuration and key-cooldown state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub endpoint: String,
    pub key_path: String,
    pub key_available: bool,
    pub state_path: Option<String>,
    pub fallbacks: FallbackPreferences,
    pub request_timeout_ms: u64,
    pub key_failure_time: Option<String>,
    pub cooldown_until: Option<String>,
    pub in_cooldown: bool,
}

/// Owns the locator configuration and its settings store.
pub struct LocatorService {
    config: LocatorConfig,
    store: Arc<dyn SettingsStore>,
    ephemeral: bool,
}

impl LocatorService {
    /// Use the state file named in `config`. The file is created on first write.
    pub fn open(config: LocatorConfig) -> Self {
        tracing::info!("Using state file: {}", config.state_path.display());
        let store = Arc::new(JsonFileStore::new(config.state_path.clone()));
        Self {
            config,
            store,
            ephemeral: false,
        }
    }

    /// Keep state in memory only; nothing survives the process.
    pub fn ephemeral(config: LocatorConfig) -> Self {
        tracing::info!("Using in-memory state");
        Self {
            config,
            store: Arc::new(MemoryStore::new()),
            ephemeral: true,
        }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn SettingsStore> {
        self.store.clone()
    }

    /// Start a locator talking HTTP to the configured endpoint.
    pub fn spawn(&self) -> DaemonResult<(LocatorHandle, JoinHandle<()>)> {
        let transport = HttpTransport::new(
            self.config.endpoint.clone(),
            self.config.request_timeout + HTTP_TIMEOUT_SLACK,
        )?;
        tracing::info!(
            endpoint = %self.config.endpoint,
            key = %self.config.key_path.display(),
            lacf = self.config.fallbacks.lacf,
            ipf = self.config.fallbacks.ipf,
            "Starting locator"
        );
        Ok(Locator::new(
            Arc::new(transport),
            self.store.clone(),
            Arc::new(KeyFile::new(self.config.key_path.clone())),
        )
        .with_fallbacks(self.config.fallbacks)
        .with_request_timeout(self.config.request_timeout)
        .spawn())
    }

    pub fn status_report(&self, now: DateTime<Utc>) -> DaemonResult<StatusReport> {
        let failure = key_failure_time(self.store.as_ref())?;
        let cooldown = chrono::Duration::from_std(KEY_FAILURE_COOLDOWN)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let stamp = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);

        Ok(StatusReport {
            endpoint: self.config.endpoint.clone(),
            key_path: self.config.key_path.display().to_string(),
            key_available: KeyFile::new(self.config.key_path.clone()).load().is_ok(),
            state_path: (!self.ephemeral).then(|| self.config.state_path.display().to_string()),
            fallbacks: self.config.fallbacks,
            request_timeout_ms: self.config.request_timeout.as_millis() as u64,
            key_failure_time: failure.map(stamp),
            cooldown_until: failure
                .filter(|t| in_key_cooldown(*t, now))
                .map(|t| stamp(t + cooldown)),
            in_cooldown: failure.is_some_and(|t| in_key_cooldown(t, now)),
        })
    }

    /// Remove the key-failure marker. Returns whether one was recorded.
    pub fn clear_cooldown(&self) -> DaemonResult<bool> {
        let existed = self
            .store
            .get(lbs_locator::lifecycle::KEY_FAILURE_TIME_KEY)?
            .is_some();
        clear_key_failure(self.store.as_ref())?;
        if existed {
            tracing::info!("Cleared key failure marker");
        }
        Ok(existed)
    }
}
