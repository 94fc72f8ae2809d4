//! Entry point tying the credential guard, transfer engine and verifier together.

use std::{
    io::{Read, Seek, SeekFrom},
    sync::Arc,
};

use crate::{
    config::{ConfigFile, TransferConfig},
    credentials::{
        CredentialRecord, CredentialSnapshot, CredentialStore, KeyringSecretStore, LoadOutcome,
        OidcTokenClient, RefreshGuard, SecretStore, TokenRefresher, persist_record,
    },
    error::{Error, Result},
    transfer::{
        Download, GatewayConnector, MetadataLookup, RestMetadataClient, S3GatewayConnector,
        TransferEngine, UploadReport, Verifier,
    },
    transport::Transport,
};

/// Session wired to the real gateway, identity endpoint, keyring and REST index.
pub type DefaultSession = Session<
    S3GatewayConnector,
    OidcTokenClient,
    KeyringSecretStore,
    RestMetadataClient<OidcTokenClient, KeyringSecretStore>,
>;

/// One authenticated account, shareable across threads.
///
/// Every operation sees the same credential; refreshes made by one thread are visible to
/// all others through the shared guard.
#[derive(Debug)]
pub struct Session<C: GatewayConnector, T, S, M> {
    engine: TransferEngine<C, T, S>,
    verifier: Verifier<M>,
}

impl DefaultSession {
    /// Builds the production stack for `record`.
    ///
    /// Secrets are not loaded here; call [`Session::load_credential`] when `record` comes
    /// from the config file.
    pub fn open(
        record: CredentialRecord,
        config: TransferConfig,
        config_file: Option<ConfigFile>,
    ) -> Result<Self> {
        let mut options = config.transport.clone();
        options.skip_verify |= record.skip_verify;
        let transport = Transport::new(options)?;

        let store = CredentialStore::new(KeyringSecretStore::new(config.keyring_service.as_str()));
        let refresher = OidcTokenClient::new(transport.clone(), config.client_id.as_str());
        let connector = S3GatewayConnector::for_server(&record.url, transport.clone())?;
        let server_url = record.url.clone();

        let guard = Arc::new(
            RefreshGuard::new(record, refresher, store, config_file)
                .with_refresh_skew(config.refresh_skew),
        );
        let lookup = RestMetadataClient::new(&server_url, transport, Arc::clone(&guard))?;
        let verifier = Verifier::with_policy(lookup, config.verify_retry);

        Ok(Session::new(
            TransferEngine::new(connector, guard, config),
            verifier,
        ))
    }
}

impl<C, T, S, M> Session<C, T, S, M>
where
    C: GatewayConnector,
    T: TokenRefresher,
    S: SecretStore,
    M: MetadataLookup,
{
    pub fn new(engine: TransferEngine<C, T, S>, verifier: Verifier<M>) -> Self {
        Self { engine, verifier }
    }

    pub fn engine(&self) -> &TransferEngine<C, T, S> {
        &self.engine
    }

    pub fn credential(&self) -> Result<CredentialSnapshot> {
        self.guard().snapshot()
    }

    /// Uploads the whole of `reader` to `path`, optionally waiting until it is indexed.
    pub fn upload<R>(&self, path: &str, mut reader: R, verify: bool) -> Result<UploadReport>
    where
        R: Read + Seek + Send,
    {
        let size = reader
            .seek(SeekFrom::End(0))
            .and_then(|size| reader.rewind().map(|()| size))
            .map_err(|e| Error::io(format!("failed to size source for {path}"), e))?;

        let mut report = self.engine.upload(path, reader, size)?;
        if verify {
            report.verified = Some(self.verifier.confirm(&report.key)?);
        }
        Ok(report)
    }

    pub fn download(&self, path: &str) -> Result<Download> {
        self.engine.download(path)
    }

    /// See [`RefreshGuard::refresh_and_persist_if_needed`].
    pub fn refresh_and_persist_if_needed(&self) -> Result<bool> {
        self.guard().refresh_and_persist_if_needed()
    }

    /// Saves the current record: secrets to the keyring, the rest to the config file.
    pub fn store_credential(&self) -> Result<()> {
        let guard = self.guard();
        guard.update(|record| persist_record(guard.store(), guard.config_file(), record))
    }

    /// Fills the record's secrets from the keyring, migrating legacy entries.
    pub fn load_credential(&self) -> Result<LoadOutcome> {
        let guard = self.guard();
        guard.update(|record| {
            if record.skip_keyring {
                return Ok(LoadOutcome::Loaded);
            }
            let outcome = guard.store().load(record)?;
            if outcome == LoadOutcome::Migrated
                && let Some(file) = guard.config_file()
            {
                file.save_record(&record.without_secrets())?;
            }
            Ok(outcome)
        })
    }

    /// Logs out: removes the keyring entry and the config entry, and wipes the secrets.
    pub fn clear_credential(&self) -> Result<()> {
        let guard = self.guard();
        guard.update(|record| {
            if !record.skip_keyring {
                guard.store().clear(record)?;
            }
            if let Some(file) = guard.config_file() {
                file.remove_record(&record.id())?;
            }
            record.forget_secrets();
            tracing::info!(user = %record.user, url = %record.url, "credential cleared");
            Ok(())
        })
    }

    /// Checks that the keyring works on this host.
    pub fn check_secret_store(&self) -> Result<()> {
        self.guard().store().self_test()
    }

    fn guard(&self) -> &Arc<RefreshGuard<T, S>> {
        self.engine.guard()
    }
}
