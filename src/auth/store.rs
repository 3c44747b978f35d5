//! Credential persistence.
//!
//! Two interchangeable stores implement [`CredentialStore`]:
//! - [`SessionCredentialStore`]: in-process, lives until `clear_session` or exit
//! - [`KeyringCredentialStore`]: the system keychain, survives restarts
//!
//! The engine receives whichever stores the descriptor enables and treats
//! them uniformly.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use tracing::debug;

use super::{Credential, CredentialKey};

const KEYRING_SERVICE: &str = "requester";

/// Lifetime of persisted credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// Kept for the life of the process.
    Session,
    /// Kept in the system keychain.
    Durable,
}

/// Errors for credential store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The system keychain could not be accessed.
    #[error("unable to access system keychain for stored credentials")]
    KeychainUnavailable,
    /// Stored payload could not be (de)serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Persists credentials keyed by protocol, host, port, and realm.
///
/// Implementations are shared across concurrent requests and serialize their
/// own reads and writes.
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Scope this store persists in.
    fn scope(&self) -> CredentialScope;

    /// Returns the credential saved for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store cannot be read.
    fn lookup(&self, key: &CredentialKey) -> Result<Option<Credential>, StoreError>;

    /// Saves `credential` for `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store cannot be written.
    fn save(&self, key: &CredentialKey, credential: &Credential) -> Result<(), StoreError>;

    /// Removes the entry for `key`. Missing entries are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store cannot be written.
    fn remove(&self, key: &CredentialKey) -> Result<(), StoreError>;
}

static SHARED_SESSION: LazyLock<Arc<SessionCredentialStore>> =
    LazyLock::new(|| Arc::new(SessionCredentialStore::new()));

/// Process-lifetime credential store.
#[derive(Debug, Default)]
pub struct SessionCredentialStore {
    entries: Mutex<HashMap<CredentialKey, Credential>>,
}

impl SessionCredentialStore {
    /// Creates an empty, private session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide session store used when none is configured.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED_SESSION)
    }

    /// Forgets every session credential.
    pub fn clear_session(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(count = entries.len(), "clearing session credentials");
        entries.clear();
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for SessionCredentialStore {
    fn scope(&self) -> CredentialScope {
        CredentialScope::Session
    }

    fn lookup(&self, key: &CredentialKey) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn save(&self, key: &CredentialKey, credential: &Credential) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), credential.clone());
        Ok(())
    }

    fn remove(&self, key: &CredentialKey) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// System keychain credential store.
///
/// Each entry lives under the `requester` service with the key's display
/// form as account name; the secret is the JSON-encoded credential.
#[derive(Debug)]
pub struct KeyringCredentialStore {
    service: String,
    // Keychain backends are not all safe for concurrent use from one process.
    lock: Mutex<()>,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringCredentialStore {
    /// Creates a store under the default service name.
    #[must_use]
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    /// Creates a store under a custom service name.
    #[must_use]
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            lock: Mutex::new(()),
        }
    }

    fn entry(&self, key: &CredentialKey) -> Result<keyring::Entry, StoreError> {
        let account = key.to_string();
        catch_unwind(|| keyring::Entry::new(&self.service, &account))
            .map_err(|_| StoreError::KeychainUnavailable)?
            .map_err(|_| StoreError::KeychainUnavailable)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn scope(&self) -> CredentialScope {
        CredentialScope::Durable
    }

    fn lookup(&self, key: &CredentialKey) -> Result<Option<Credential>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = self.entry(key)?;
        let secret = catch_unwind(AssertUnwindSafe(|| entry.get_password()))
            .map_err(|_| StoreError::KeychainUnavailable)?;
        match secret {
            Ok(secret) => Ok(Some(serde_json::from_str(&secret)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(_) => Err(StoreError::KeychainUnavailable),
        }
    }

    fn save(&self, key: &CredentialKey, credential: &Credential) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let secret = serde_json::to_string(credential)?;
        let entry = self.entry(key)?;
        catch_unwind(AssertUnwindSafe(|| entry.set_password(&secret)))
            .map_err(|_| StoreError::KeychainUnavailable)?
            .map_err(|_| StoreError::KeychainUnavailable)
    }

    fn remove(&self, key: &CredentialKey) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = self.entry(key)?;
        let outcome = catch_unwind(AssertUnwindSafe(|| entry.delete_credential()))
            .map_err(|_| StoreError::KeychainUnavailable)?;
        match outcome {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(_) => Err(StoreError::KeychainUnavailable),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(realm: &str) -> CredentialKey {
        CredentialKey {
            protocol: "https".to_string(),
            host: "example.test".to_string(),
            port: 443,
            realm: realm.to_string(),
        }
    }

    #[test]
    fn test_session_store_save_lookup_remove() {
        let store = SessionCredentialStore::new();
        assert!(store.lookup(&key("a")).unwrap().is_none());

        store.save(&key("a"), &Credential::new("u", "p")).unwrap();
        assert_eq!(
            store.lookup(&key("a")).unwrap(),
            Some(Credential::new("u", "p"))
        );
        assert!(store.lookup(&key("b")).unwrap().is_none());

        store.remove(&key("a")).unwrap();
        assert!(store.lookup(&key("a")).unwrap().is_none());
    }

    #[test]
    fn test_session_store_clear_session() {
        let store = SessionCredentialStore::new();
        store.save(&key("a"), &Credential::new("u", "p")).unwrap();
        store.save(&key("b"), &Credential::new("v", "q")).unwrap();
        assert_eq!(store.len(), 2);

        store.clear_session();
        assert!(store.is_empty());
    }

    #[test]
    fn test_shared_session_store_is_process_wide() {
        let a = SessionCredentialStore::shared();
        let b = SessionCredentialStore::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_scopes() {
        assert_eq!(SessionCredentialStore::new().scope(), CredentialScope::Session);
        assert_eq!(KeyringCredentialStore::new().scope(), CredentialScope::Durable);
    }

    fn keychain_tests_required() -> bool {
        std::env::var("REQUESTER_REQUIRE_KEYCHAIN_TESTS")
            .ok()
            .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
    }

    #[test]
    fn test_keyring_store_reads_back_across_instances() {
        let service = format!("requester-test-{}", std::process::id());
        let key = key("round-trip");
        let writer = KeyringCredentialStore::with_service(service.clone());
        match writer.save(&key, &Credential::new("u", "p")) {
            Err(StoreError::KeychainUnavailable) if !keychain_tests_required() => {
                eprintln!(
                    "[keychain-test] system keychain unavailable; skipping. \
                     Set REQUESTER_REQUIRE_KEYCHAIN_TESTS=1 to fail-fast instead."
                );
                return;
            }
            outcome => outcome.unwrap(),
        }

        let reader = KeyringCredentialStore::with_service(service);
        let found = reader.lookup(&key);
        reader.remove(&key).unwrap();

        assert_eq!(found.unwrap(), Some(Credential::new("u", "p")));
        assert!(reader.lookup(&key).unwrap().is_none());
    }

    #[test]
    fn test_credential_json_round_trip_for_keyring_payload() {
        let secret = serde_json::to_string(&Credential::new("u", "p")).unwrap();
        let parsed: Credential = serde_json::from_str(&secret).unwrap();
        assert_eq!(parsed, Credential::new("u", "p"));
    }
}
