//! Thread-safe storage for the currently active [`TrackConfig`].
use std::sync::{Arc, RwLock};

use crate::{storage::Storage, Error, Result, TrackConfig};

/// Storage key of the persisted configuration record.
pub(crate) const TRACK_CONFIG_KEY: &str = "jentis.track_config";

/// `ConfigStore` is the single authority on which [`TrackConfig`] is active. It allows concurrent
/// access for readers and writers and mirrors the active configuration into [`Storage`].
///
/// `TrackConfig` itself is immutable and can only be replaced completely.
pub struct ConfigStore {
    configuration: RwLock<Option<Arc<TrackConfig>>>,
    storage: Arc<dyn Storage>,
}

impl ConfigStore {
    /// Create an empty configuration store. Nothing is read from `storage` until
    /// [`ConfigStore::load`] is called.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        ConfigStore {
            configuration: RwLock::new(None),
            storage,
        }
    }

    /// Replace the active configuration and persist it. Returns the new active configuration.
    pub fn configure(&self, config: TrackConfig) -> Arc<TrackConfig> {
        match serde_json::to_string(&config) {
            Ok(record) => {
                if let Err(err) = self.storage.set(TRACK_CONFIG_KEY, record) {
                    log::warn!(target: "jentis", "failed to persist tracking configuration: {err}");
                }
            }
            Err(err) => {
                log::warn!(target: "jentis", "failed to encode tracking configuration: {err}");
            }
        }

        let config = Arc::new(config);
        self.replace(Some(config.clone()));

        log::info!(target: "jentis",
                   track_domain = config.track_domain.as_str(),
                   container = config.container.as_str(),
                   environment = config.environment.as_str();
                   "tracking configured");
        config
    }

    /// Get currently active configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] if no configuration has been set or loaded.
    pub fn current(&self) -> Result<Arc<TrackConfig>> {
        // Err() is possible only if the lock is poisoned (writer panicked while holding the lock),
        // which should never happen. Still, report it as missing configuration instead of crashing.
        let configuration = self.configuration.read().map_err(|_| Error::NotConfigured)?;
        configuration.clone().ok_or(Error::NotConfigured)
    }

    /// Load the persisted configuration, making it active. Returns `None` if storage holds no
    /// usable configuration record, leaving the current state untouched.
    pub fn load(&self) -> Option<Arc<TrackConfig>> {
        let Some(record) = self.storage.get(TRACK_CONFIG_KEY) else {
            log::debug!(target: "jentis", "no persisted tracking configuration");
            return None;
        };

        match serde_json::from_str::<TrackConfig>(&record) {
            Ok(config) => {
                let config = Arc::new(config);
                self.replace(Some(config.clone()));
                log::info!(target: "jentis",
                           container = config.container.as_str();
                           "loaded persisted tracking configuration");
                Some(config)
            }
            Err(err) => {
                log::warn!(target: "jentis", "ignoring invalid persisted configuration: {err}");
                None
            }
        }
    }

    /// Remove persisted configuration and forget the active one.
    pub fn clear(&self) {
        if let Err(err) = self.storage.remove(TRACK_CONFIG_KEY) {
            log::warn!(target: "jentis", "failed to remove persisted configuration: {err}");
        }
        self.replace(None);
        log::info!(target: "jentis", "tracking configuration cleared");
    }

    fn replace(&self, value: Option<Arc<TrackConfig>>) {
        if let Ok(mut slot) = self.configuration.write() {
            *slot = value;
        }
    }
}
