//! Credential storage and the per-authority authentication manager.
//!
//! The credential store keeps, per realm, an active-user marker plus one
//! secret per username. `is_logged_in` requires both; logout removes both.

use crate::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// A username/secret pair for an authentication realm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

/// Abstract credential storage capability, keyed by realm.
pub trait CredentialStore: Send + Sync {
    fn store(&self, realm: &str, key: &str, value: &str) -> SyncResult<()>;
    fn retrieve(&self, realm: &str, key: &str) -> SyncResult<Option<String>>;
    fn delete(&self, realm: &str, key: &str) -> SyncResult<()>;
}

const ACTIVE_USER_KEY: &str = "active-user";

/// Manages login state for one authentication realm.
pub struct AuthManager {
    realm: String,
    store: std::sync::Arc<dyn CredentialStore>,
}

impl AuthManager {
    pub fn new(realm: impl Into<String>, store: std::sync::Arc<dyn CredentialStore>) -> Self {
        Self {
            realm: realm.into(),
            store,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Record credentials for the realm and mark the user active.
    ///
    /// Credentials are not validated here; callers probe an authenticated
    /// endpoint and call [`AuthManager::logout`] if they turn out invalid.
    pub fn login(&self, username: &str, secret: &str) -> SyncResult<()> {
        self.store.store(&self.realm, username, secret)?;
        self.store.store(&self.realm, ACTIVE_USER_KEY, username)?;
        Ok(())
    }

    /// Whether an active user with stored credentials exists.
    ///
    /// Does not validate the credentials against the server.
    pub fn is_logged_in(&self) -> SyncResult<bool> {
        Ok(self.active_credential()?.is_some())
    }

    /// The active credential, if any.
    pub fn active_credential(&self) -> SyncResult<Option<Credential>> {
        let Some(username) = self.store.retrieve(&self.realm, ACTIVE_USER_KEY)? else {
            return Ok(None);
        };
        let Some(secret) = self.store.retrieve(&self.realm, &username)? else {
            return Ok(None);
        };
        Ok(Some(Credential { username, secret }))
    }

    /// Remove the active user and their stored credential.
    pub fn logout(&self) -> SyncResult<()> {
        if let Some(username) = self.store.retrieve(&self.realm, ACTIVE_USER_KEY)? {
            self.store.delete(&self.realm, &username)?;
        }
        self.store.delete(&self.realm, ACTIVE_USER_KEY)?;
        Ok(())
    }
}

/// Credential store backed by the OS keychain.
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    fn entry(realm: &str, key: &str) -> SyncResult<keyring::Entry> {
        keyring::Entry::new(realm, key)
            .map_err(|e| SyncError::Authentication(format!("keyring unavailable: {e}")))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn store(&self, realm: &str, key: &str, value: &str) -> SyncResult<()> {
        Self::entry(realm, key)?
            .set_password(value)
            .map_err(|e| SyncError::Authentication(format!("keyring store failed: {e}")))
    }

    fn retrieve(&self, realm: &str, key: &str) -> SyncResult<Option<String>> {
        match Self::entry(realm, key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SyncError::Authentication(format!(
                "keyring retrieve failed: {e}"
            ))),
        }
    }

    fn delete(&self, realm: &str, key: &str) -> SyncResult<()> {
        match Self::entry(realm, key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SyncError::Authentication(format!(
                "keyring delete failed: {e}"
            ))),
        }
    }
}

/// In-memory credential store. Used by tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn store(&self, realm: &str, key: &str, value: &str) -> SyncResult<()> {
        self.entries
            .lock()
            .expect("credential store poisoned")
            .insert((realm.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn retrieve(&self, realm: &str, key: &str) -> SyncResult<Option<String>> {
        Ok(self
            .entries
            .lock()
            .expect("credential store poisoned")
            .get(&(realm.to_string(), key.to_string()))
            .cloned())
    }

    fn delete(&self, realm: &str, key: &str) -> SyncResult<()> {
        self.entries
            .lock()
            .expect("credential store poisoned")
            .remove(&(realm.to_string(), key.to_string()));
        Ok(())
    }
}
