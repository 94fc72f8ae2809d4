use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Once},
};

use super::{AuthKind, CredentialRecord};
use crate::{
    config::ConfigFile,
    error::{Error, Result},
};

/// Keyring service under which entries are filed.
pub const DEFAULT_SERVICE: &str = "io.depot.client";

pub const NO_KEYRING_MSG: &str = "could not access the local keyring: tokens and passwords \
     will be stored in clear text on this machine";

const KEY_SEP: &str = "::";
const VALUE_SEP: &str = "__//__";
const LEGACY_CLIENT_USER: &str = "ClientCredentials";
const LEGACY_TOKEN_USER: &str = "IdToken";
const SELF_TEST_URL: &str = "https://test.example.com";
const SELF_TEST_USER: &str = "john.doe";
const SELF_TEST_VALUE: &str = "A very complicated value !!#%<{}//\\q__//__::";

static NO_KEYRING_WARNING: Once = Once::new();

/// Flat key/value secret backend.
pub trait SecretStore: Send + Sync {
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// `Ok(None)` when no entry exists for `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// `Ok(false)` when there was nothing to delete.
    fn delete(&self, key: &str) -> Result<bool>;
}

impl<S: SecretStore + ?Sized> SecretStore for Arc<S> {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }
}

/// OS keyring (macOS Keychain, Windows Credential Manager, Linux kernel keyutils).
#[derive(Clone, Debug)]
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| Error::secret_store("keyring is not available", Some(Box::new(e))))
    }
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

impl SecretStore for KeyringSecretStore {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| Error::secret_store("failed to write keyring entry", Some(Box::new(e))))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::secret_store(
                "failed to read keyring entry",
                Some(Box::new(e)),
            )),
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(Error::secret_store(
                "failed to delete keyring entry",
                Some(Box::new(e)),
            )),
        }
    }
}

/// In-process secret map, for tests and hosts that opt out of the OS keyring.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
    unavailable: bool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails, like a host without a keyring daemon.
    pub fn unavailable() -> Self {
        Self {
            entries: Mutex::default(),
            unavailable: true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> Result<T> {
        if self.unavailable {
            return Err(Error::secret_store("secret store is unavailable", None));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::secret_store("secret store lock poisoned", None))?;
        Ok(f(&mut entries))
    }
}

impl SecretStore for MemorySecretStore {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(|e| {
            e.insert(key.to_string(), value.to_string());
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|e| e.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.with_entries(|e| e.remove(key).is_some())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// Found under an older key layout and rewritten; the config file should be saved.
    Migrated,
}

/// Encodes credential secrets into keyring entries.
#[derive(Debug)]
pub struct CredentialStore<S> {
    secrets: S,
}

impl<S: SecretStore> CredentialStore<S> {
    pub fn new(secrets: S) -> Self {
        Self { secrets }
    }

    pub fn secrets(&self) -> &S {
        &self.secrets
    }

    /// Writes the record's secrets to the keyring, then clears them from `record`.
    pub fn store(&self, record: &mut CredentialRecord) -> Result<()> {
        let value = encode_value(record).ok_or_else(|| {
            Error::invalid_config(format!(
                "{:?} record for {} has no secret to store",
                record.auth_kind, record.user
            ))
        })?;
        self.secrets.set(&entry_key(&record.url, &record.user), &value)?;
        record.clear_secrets();
        Ok(())
    }

    /// Fills the record's secrets from the keyring, migrating legacy entries on a miss.
    pub fn load(&self, record: &mut CredentialRecord) -> Result<LoadOutcome> {
        let key = entry_key(&record.url, &record.user);
        if let Some(value) = self.secrets.get(&key)? {
            populate(record, &value);
            return Ok(LoadOutcome::Loaded);
        }

        if self.migrate_legacy(record)? {
            return Ok(LoadOutcome::Migrated);
        }

        Err(Error::secret_store(
            format!("no keyring entry for {key}"),
            None,
        ))
    }

    /// Removes the record's entry. A missing entry is fine.
    pub fn clear(&self, record: &CredentialRecord) -> Result<()> {
        let key = entry_key(&record.url, &record.user);
        if !self.secrets.delete(&key)? {
            tracing::debug!(key = %key, "no keyring entry to clear");
        }
        Ok(())
    }

    /// Round-trips a throwaway entry to prove the backend works on this host.
    pub fn self_test(&self) -> Result<()> {
        let key = entry_key(SELF_TEST_URL, SELF_TEST_USER);
        self.secrets.set(&key, SELF_TEST_VALUE).map_err(|e| {
            Error::secret_store(
                "keyring self-test could not write an entry",
                Some(Box::new(e)),
            )
        })?;

        let read = self.secrets.get(&key);
        if let Err(e) = self.secrets.delete(&key) {
            tracing::debug!(error = %e, "keyring self-test cleanup failed");
        }

        match read {
            Ok(Some(value)) if value == SELF_TEST_VALUE => Ok(()),
            Ok(Some(value)) => Err(Error::secret_store(
                format!(
                    "keyring seems broken on this machine: read back {} bytes, stored {}",
                    value.len(),
                    SELF_TEST_VALUE.len()
                ),
                None,
            )),
            Ok(None) => Err(Error::secret_store(
                "keyring self-test entry vanished after writing it",
                None,
            )),
            Err(e) => Err(Error::secret_store(
                "keyring self-test could not read its entry",
                Some(Box::new(e)),
            )),
        }
    }

    fn migrate_legacy(&self, record: &mut CredentialRecord) -> Result<bool> {
        if !record.user.is_empty() && record.password.is_empty() {
            let legacy = entry_key(&record.url, LEGACY_CLIENT_USER);
            if let Some(value) = self.secrets.get(&legacy)? {
                let password = value
                    .split_once(VALUE_SEP)
                    .map_or(value.as_str(), |(_, password)| password);
                record.password = password.to_string();
                record.auth_kind = AuthKind::ClientPassword;
                self.finish_migration(record, &legacy)?;
                return Ok(true);
            }
        }

        if !record.has_secrets() {
            let legacy = entry_key(&record.url, LEGACY_TOKEN_USER);
            if let Some(value) = self.secrets.get(&legacy)? {
                record.auth_kind = AuthKind::OAuth;
                populate(record, &value);
                self.finish_migration(record, &legacy)?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn finish_migration(&self, record: &CredentialRecord, legacy_key: &str) -> Result<()> {
        if let Err(e) = self.secrets.delete(legacy_key) {
            tracing::warn!(key = legacy_key, error = %e, "could not delete legacy keyring entry");
        }
        if let Some(value) = encode_value(record) {
            self.secrets
                .set(&entry_key(&record.url, &record.user), &value)?;
        }
        tracing::info!(user = %record.user, url = %record.url, "migrated legacy keyring entry");
        Ok(())
    }
}

/// Saves `record` to disk, moving secrets to the keyring unless it is skipped.
///
/// When the keyring fails the record switches to clear-text storage (`skip_keyring`) and a
/// warning is logged once per process.
pub(crate) fn persist_record<S: SecretStore>(
    store: &CredentialStore<S>,
    file: Option<&ConfigFile>,
    record: &mut CredentialRecord,
) -> Result<()> {
    record.created_at_version = env!("CARGO_PKG_VERSION").to_string();
    let mut disk = record.clone();

    if !disk.skip_keyring
        && let Err(e) = store.store(&mut disk)
    {
        NO_KEYRING_WARNING.call_once(|| {
            tracing::warn!(error = %e, "{NO_KEYRING_MSG}");
        });
        record.skip_keyring = true;
        disk = record.clone();
    }

    if let Some(file) = file {
        file.save_record(&disk)?;
    }
    Ok(())
}

fn entry_key(url: &str, user: &str) -> String {
    format!("{url}{KEY_SEP}{user}")
}

fn encode_value(record: &CredentialRecord) -> Option<String> {
    let value = match record.auth_kind {
        AuthKind::PersonalAccessToken => record.id_token.clone(),
        AuthKind::OAuth => format!(
            "{}{VALUE_SEP}{}",
            record.id_token,
            record.refresh_token.as_deref().unwrap_or_default()
        ),
        AuthKind::ClientPassword => record.password.clone(),
    };
    let has_secret = match record.auth_kind {
        AuthKind::PersonalAccessToken => !record.id_token.is_empty(),
        AuthKind::OAuth => {
            !record.id_token.is_empty()
                || record.refresh_token.as_deref().is_some_and(|r| !r.is_empty())
        }
        AuthKind::ClientPassword => !record.password.is_empty(),
    };
    has_secret.then_some(value)
}

fn populate(record: &mut CredentialRecord, value: &str) {
    match record.auth_kind {
        AuthKind::PersonalAccessToken => record.id_token = value.to_string(),
        AuthKind::OAuth => {
            let (id, refresh) = value.split_once(VALUE_SEP).unwrap_or((value, ""));
            record.id_token = id.to_string();
            record.refresh_token = (!refresh.is_empty()).then(|| refresh.to_string());
        }
        AuthKind::ClientPassword => record.password = value.to_string(),
    }
}
