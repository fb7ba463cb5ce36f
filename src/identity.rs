//! Durable visitor and consent identifiers.
use std::sync::Arc;

use uuid::Uuid;

use crate::{model::Action, storage::Storage};

/// Reads or mints one durable identifier stored under a container-scoped key.
///
/// The identifier is generated once per install and reused afterwards. Only the first
/// [`IdentityProvider::get_or_create`] call that generates the value reports [`Action::New`].
pub struct IdentityProvider {
    storage: Arc<dyn Storage>,
    key: String,
}

impl IdentityProvider {
    /// Visitor identifier of `container`.
    pub fn user(storage: Arc<dyn Storage>, container: &str) -> IdentityProvider {
        IdentityProvider::with_key(storage, format!("{container}_userID"))
    }

    /// Consent identifier of `container`.
    pub fn consent(storage: Arc<dyn Storage>, container: &str) -> IdentityProvider {
        IdentityProvider::with_key(storage, format!("{container}_consentID"))
    }

    pub fn with_key(storage: Arc<dyn Storage>, key: impl Into<String>) -> IdentityProvider {
        IdentityProvider {
            storage,
            key: key.into(),
        }
    }

    /// Storage key of the identifier.
    #[cfg(test)]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return the stored identifier, generating and persisting a new one if none is stored.
    ///
    /// If storage cannot persist the new identifier, the value is still returned (with
    /// [`Action::New`]) and the next call generates another one.
    pub fn get_or_create(&self) -> (String, Action) {
        let key = self.key.as_str();

        if let Some(id) = self.storage.get(key) {
            log::trace!(target: "jentis", key = key; "reusing stored identifier");
            return (id, Action::Update);
        }

        let id = Uuid::new_v4().to_string();
        match self.storage.set(key, id.clone()) {
            Ok(()) => log::info!(target: "jentis", key = key; "stored new identifier"),
            Err(err) => log::warn!(target: "jentis", key = key; "failed to store new identifier: {err}"),
        }
        (id, Action::New)
    }

    /// Forget the stored identifier. The next [`IdentityProvider::get_or_create`] mints a new one.
    pub fn clear(&self) {
        if let Err(err) = self.storage.remove(&self.key) {
            log::warn!(target: "jentis", key = self.key.as_str(); "failed to remove identifier: {err}");
        }
    }
}
