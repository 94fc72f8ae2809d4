use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use time::OffsetDateTime;

use super::{
    CredentialRecord, DEFAULT_REFRESH_SKEW, RefreshedToken,
    store::{CredentialStore, SecretStore, persist_record},
};
use crate::{
    config::ConfigFile,
    error::{Error, Result},
};

/// Exchanges a credential for a fresh bearer token.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, record: &CredentialRecord) -> Result<RefreshedToken>;
}

impl<T: TokenRefresher + ?Sized> TokenRefresher for Arc<T> {
    fn refresh(&self, record: &CredentialRecord) -> Result<RefreshedToken> {
        (**self).refresh(record)
    }
}

/// Copy of the guarded record at a given version.
#[derive(Clone, Debug)]
pub struct CredentialSnapshot {
    pub record: CredentialRecord,
    /// Bumped on every refresh or explicit update.
    pub version: u64,
}

struct GuardState {
    record: CredentialRecord,
    version: u64,
    poisoned: Option<String>,
}

/// Owns the process's credential and serializes every check-refresh-persist sequence.
///
/// Share one guard per process through `Arc`. Readers only ever get snapshots.
pub struct RefreshGuard<T, S> {
    state: Mutex<GuardState>,
    refresher: T,
    store: CredentialStore<S>,
    config_file: Option<ConfigFile>,
    skew: Duration,
}

impl<T, S> std::fmt::Debug for RefreshGuard<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshGuard")
            .field("config_file", &self.config_file)
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

impl<T: TokenRefresher, S: SecretStore> RefreshGuard<T, S> {
    pub fn new(
        record: CredentialRecord,
        refresher: T,
        store: CredentialStore<S>,
        config_file: Option<ConfigFile>,
    ) -> Self {
        Self {
            state: Mutex::new(GuardState {
                record,
                version: 0,
                poisoned: None,
            }),
            refresher,
            store,
            config_file,
            skew: DEFAULT_REFRESH_SKEW,
        }
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    pub fn store(&self) -> &CredentialStore<S> {
        &self.store
    }

    pub fn config_file(&self) -> Option<&ConfigFile> {
        self.config_file.as_ref()
    }

    pub fn snapshot(&self) -> Result<CredentialSnapshot> {
        let state = self.lock()?;
        Ok(CredentialSnapshot {
            record: state.record.clone(),
            version: state.version,
        })
    }

    pub fn is_poisoned(&self) -> bool {
        self.lock().map_or(true, |s| s.poisoned.is_some())
    }

    /// Renews the bearer token if it is about to expire, then persists it.
    ///
    /// Returns `Ok(true)` when a refresh happened so callers can rebuild clients holding
    /// the old token. A refresh failure poisons the guard: this and every later call fail
    /// with [`Error::CredentialRefresh`] without contacting the identity endpoint.
    pub fn refresh_and_persist_if_needed(&self) -> Result<bool> {
        let mut state = self.lock()?;
        if let Some(reason) = &state.poisoned {
            return Err(Error::credential_refresh(
                format!("an earlier refresh failed: {reason}"),
                None,
            ));
        }
        if !state
            .record
            .needs_refresh(OffsetDateTime::now_utc(), self.skew)
        {
            return Ok(false);
        }

        let _span = tracing::info_span!(
            "depot.refresh",
            user = %state.record.user,
            kind = ?state.record.auth_kind,
            version = state.version,
        )
        .entered();

        let token = match self.refresher.refresh(&state.record) {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "token refresh failed");
                #[cfg(feature = "metrics")]
                metrics::counter!("depot_token_refresh_failures_total").increment(1);
                state.poisoned = Some(e.to_string());
                return Err(Error::credential_refresh(
                    "identity endpoint refused the refresh",
                    Some(Box::new(e)),
                ));
            }
        };

        state.record.apply_token(token);
        state.version += 1;
        #[cfg(feature = "metrics")]
        metrics::counter!("depot_token_refreshes_total").increment(1);
        tracing::debug!(
            version = state.version,
            expires_at = ?state.record.token_expires_at,
            "token refreshed"
        );

        persist_record(&self.store, self.config_file.as_ref(), &mut state.record)?;
        Ok(true)
    }

    /// Applies `f` to the live record under the lock and bumps the version.
    pub fn update<R>(&self, f: impl FnOnce(&mut CredentialRecord) -> Result<R>) -> Result<R> {
        let mut state = self.lock()?;
        let out = f(&mut state.record)?;
        state.version += 1;
        Ok(out)
    }

    fn lock(&self) -> Result<MutexGuard<'_, GuardState>> {
        self.state
            .lock()
            .map_err(|_| Error::credential_refresh("credential lock poisoned", None))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::credentials::{AuthKind, MemorySecretStore};

    struct CountingRefresher {
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail,
            }
        }
    }

    impl TokenRefresher for CountingRefresher {
        fn refresh(&self, _record: &CredentialRecord) -> Result<RefreshedToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(Error::transport("identity endpoint down", None));
            }
            Ok(RefreshedToken {
                id_token: format!("id-{n}"),
                refresh_token: Some(format!("refresh-{n}")),
                expires_at: Some(OffsetDateTime::now_utc().unix_timestamp() + 3600),
            })
        }
    }

    fn expiring_record() -> CredentialRecord {
        let mut record =
            CredentialRecord::new("https://files.example.com", "alice", AuthKind::OAuth);
        record.id_token = "id-0".to_string();
        record.refresh_token = Some("refresh-0".to_string());
        record.token_expires_at = Some(OffsetDateTime::now_utc().unix_timestamp() - 1);
        record
    }

    #[test]
    fn second_call_sees_refreshed_token_and_skips_remote() {
        let guard = RefreshGuard::new(
            expiring_record(),
            CountingRefresher::new(false),
            CredentialStore::new(MemorySecretStore::new()),
            None,
        );

        assert!(guard.refresh_and_persist_if_needed().unwrap());
        assert!(!guard.refresh_and_persist_if_needed().unwrap());
        assert_eq!(guard.refresher.calls.load(Ordering::SeqCst), 1);

        let snap = guard.snapshot().unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.record.id_token, "id-1");
        assert_eq!(snap.record.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn failure_poisons_guard() {
        let guard = RefreshGuard::new(
            expiring_record(),
            CountingRefresher::new(true),
            CredentialStore::new(MemorySecretStore::new()),
            None,
        );

        let first = guard.refresh_and_persist_if_needed().unwrap_err();
        assert!(first.is_credential_fatal());
        let second = guard.refresh_and_persist_if_needed().unwrap_err();
        assert!(second.is_credential_fatal());
        assert_eq!(guard.refresher.calls.load(Ordering::SeqCst), 1);
        assert!(guard.is_poisoned());
    }

    #[test]
    fn refresh_persists_secrets_to_keyring_and_rest_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::new(dir.path().join("config.json"));
        let secrets = Arc::new(MemorySecretStore::new());
        let guard = RefreshGuard::new(
            expiring_record(),
            CountingRefresher::new(false),
            CredentialStore::new(Arc::clone(&secrets)),
            Some(file.clone()),
        );

        guard.refresh_and_persist_if_needed().unwrap();

        assert_eq!(
            secrets
                .get("https://files.example.com::alice")
                .unwrap()
                .as_deref(),
            Some("id-1__//__refresh-1")
        );
        let disk = file.load().unwrap();
        let saved = disk.active_record().unwrap();
        assert!(saved.id_token.is_empty());
        assert!(saved.token_expires_at.is_some());
        // in-memory copy keeps its secrets
        assert_eq!(guard.snapshot().unwrap().record.id_token, "id-1");
    }

    #[test]
    fn skip_keyring_writes_secrets_to_disk_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::new(dir.path().join("config.json"));
        let secrets = Arc::new(MemorySecretStore::new());
        let mut record = expiring_record();
        record.skip_keyring = true;
        let guard = RefreshGuard::new(
            record,
            CountingRefresher::new(false),
            CredentialStore::new(Arc::clone(&secrets)),
            Some(file.clone()),
        );

        guard.refresh_and_persist_if_needed().unwrap();

        assert!(secrets.is_empty());
        assert_eq!(file.load().unwrap().active_record().unwrap().id_token, "id-1");
    }

    #[test]
    fn concurrent_callers_refresh_once() {
        let guard = Arc::new(RefreshGuard::new(
            expiring_record(),
            CountingRefresher::new(false),
            CredentialStore::new(MemorySecretStore::new()),
            None,
        ));

        let refreshed: u32 = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let guard = Arc::clone(&guard);
                    scope.spawn(move || guard.refresh_and_persist_if_needed().unwrap())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| u32::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(refreshed, 1);
        assert_eq!(guard.refresher.calls.load(Ordering::SeqCst), 1);
    }
}
