use std::{
    io::{Read, Seek},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
};

use bytes::Bytes;

use super::{
    GatewayConnector, NodeDescriptor, ObjectGateway, PartReader, PartWindow, TransferDescriptor,
    TransferState,
};
use crate::{
    config::TransferConfig,
    credentials::{RefreshGuard, SecretStore, TokenRefresher},
    error::{Error, Result},
    retry::retry_if,
    types::{CompletedPart, ObjectBody},
    util::url::normalize_key,
};

/// What an upload did.
#[derive(Clone, Debug)]
pub struct UploadReport {
    pub key: String,
    pub size: u64,
    /// Zero for single-part uploads.
    pub parts: u32,
    pub upload_id: Option<String>,
    pub etag: Option<String>,
    /// Number of times the credential was renewed during the upload.
    pub refreshes: u32,
    /// Set when the upload was confirmed by the metadata index.
    pub verified: Option<NodeDescriptor>,
}

/// Object body plus its size from a HEAD.
#[derive(Debug)]
pub struct Download {
    pub body: ObjectBody,
    pub size: u64,
}

/// Drives uploads through a gateway, refreshing the credential between parts.
pub struct TransferEngine<C: GatewayConnector, T, S> {
    connector: C,
    guard: Arc<RefreshGuard<T, S>>,
    config: TransferConfig,
    gateway: Mutex<Option<(u64, Arc<C::Gateway>)>>,
}

impl<C: GatewayConnector, T, S> std::fmt::Debug for TransferEngine<C, T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C, T, S> TransferEngine<C, T, S>
where
    C: GatewayConnector,
    T: TokenRefresher,
    S: SecretStore,
{
    pub fn new(connector: C, guard: Arc<RefreshGuard<T, S>>, config: TransferConfig) -> Self {
        Self {
            connector,
            guard,
            config,
            gateway: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn guard(&self) -> &Arc<RefreshGuard<T, S>> {
        &self.guard
    }

    /// Uploads `size` bytes of `source` to `path`, single-part or multipart by size.
    pub fn upload<R>(&self, path: &str, source: R, size: u64) -> Result<UploadReport>
    where
        R: Read + Seek + Send,
    {
        if size <= self.config.multipart_threshold {
            self.upload_single(path, source, size)
        } else {
            self.upload_multipart(path, source, size)
        }
    }

    /// One PUT, retried as a whole.
    pub fn upload_single<R: Read>(&self, path: &str, source: R, size: u64) -> Result<UploadReport> {
        let key = normalize_key(path)?;
        let body = PartReader::new(source, size)
            .read_part()
            .map(Bytes::from)
            .map_err(|e| Error::io(format!("failed to read {key}"), e))?;

        let refreshes = AtomicU32::new(0);
        self.refresh(&refreshes)?;

        let retried = retry_if(&self.config.upload_retry, Error::is_retryable, |attempt| {
            tracing::debug!(key, attempt, size, "uploading single part");
            self.current_gateway()?.put_object(key, body.clone())
        });
        let attempts = retried.attempts();
        let output = retried.into_result()?;
        tracing::info!(key, size, attempts, "upload completed");

        Ok(UploadReport {
            key: key.to_string(),
            size,
            parts: 0,
            upload_id: None,
            etag: output.etag,
            refreshes: refreshes.into_inner(),
            verified: None,
        })
    }

    /// Runs a full multipart session; any failure after initiation aborts it.
    pub fn upload_multipart<R>(&self, path: &str, source: R, size: u64) -> Result<UploadReport>
    where
        R: Read + Seek + Send,
    {
        let key = normalize_key(path)?;
        let windows = TransferDescriptor::plan(size, self.config.part_size)?;
        let refreshes = AtomicU32::new(0);
        self.refresh(&refreshes)?;

        let upload_id = self.current_gateway()?.create_multipart_upload(key)?;
        let mut descriptor = TransferDescriptor::new(key, size, self.config.part_size, upload_id);
        log_state(&descriptor, TransferState::Initiated);

        log_state(&descriptor, TransferState::PartsInFlight);
        if let Err(cause) = self.upload_parts(&mut descriptor, source, &windows, &refreshes) {
            return Err(self.abort(&descriptor, cause));
        }

        log_state(&descriptor, TransferState::Completing);
        let completed = self.refresh(&refreshes).and_then(|()| {
            self.current_gateway()?.complete_multipart_upload(
                &descriptor.key,
                &descriptor.upload_id,
                &descriptor.parts,
            )
        });
        let output = match completed {
            Ok(output) => output,
            Err(cause) => return Err(self.abort(&descriptor, cause)),
        };
        log_state(&descriptor, TransferState::Completed);
        #[cfg(feature = "metrics")]
        metrics::counter!("depot_multipart_uploads_total", "outcome" => "completed").increment(1);

        Ok(UploadReport {
            key: descriptor.key,
            size,
            parts: windows.len() as u32,
            upload_id: Some(descriptor.upload_id),
            etag: output.etag,
            refreshes: refreshes.into_inner(),
            verified: None,
        })
    }

    /// HEAD for the size, then GET for the body.
    pub fn download(&self, path: &str) -> Result<Download> {
        let key = normalize_key(path)?;
        self.guard.refresh_and_persist_if_needed()?;
        let gateway = self.current_gateway()?;
        let size = gateway
            .head_object(key)?
            .content_length
            .ok_or_else(|| Error::decode(format!("no Content-Length for {key}"), None))?;
        let output = gateway.get_object(key)?;
        tracing::debug!(key, size, "download started");
        Ok(Download {
            body: output.body,
            size,
        })
    }

    fn upload_parts<R>(
        &self,
        descriptor: &mut TransferDescriptor,
        source: R,
        windows: &[PartWindow],
        refreshes: &AtomicU32,
    ) -> Result<()>
    where
        R: Read + Seek + Send,
    {
        let source = Mutex::new(source);
        let workers = self.config.concurrency.clamp(1, windows.len().max(1));
        let key = descriptor.key.as_str();
        let upload_id = descriptor.upload_id.as_str();

        if workers == 1 {
            let mut parts = Vec::with_capacity(windows.len());
            for window in windows {
                parts.push(self.upload_one_part(key, upload_id, &source, window, refreshes)?);
            }
            for part in parts {
                descriptor.record(part);
            }
            return Ok(());
        }

        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let done: Mutex<Vec<CompletedPart>> = Mutex::new(Vec::with_capacity(windows.len()));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while !stop.load(Ordering::SeqCst) {
                        let Some(window) = windows.get(next.fetch_add(1, Ordering::SeqCst)) else {
                            break;
                        };
                        match self.upload_one_part(key, upload_id, &source, window, refreshes) {
                            Ok(part) => done
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(part),
                            Err(e) => {
                                stop.store(true, Ordering::SeqCst);
                                let mut slot =
                                    first_error.lock().unwrap_or_else(PoisonError::into_inner);
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(e);
        }
        for part in done.into_inner().unwrap_or_else(PoisonError::into_inner) {
            descriptor.record(part);
        }
        if descriptor.parts.len() != windows.len() {
            return Err(Error::invalid_config(format!(
                "uploaded {} of {} parts",
                descriptor.parts.len(),
                windows.len()
            )));
        }
        Ok(())
    }

    fn upload_one_part<R: Read + Seek>(
        &self,
        key: &str,
        upload_id: &str,
        source: &Mutex<R>,
        window: &PartWindow,
        refreshes: &AtomicU32,
    ) -> Result<CompletedPart> {
        self.refresh(refreshes)?;
        let gateway = self.current_gateway()?;

        let body = {
            let mut source = source.lock().unwrap_or_else(PoisonError::into_inner);
            PartReader::window(&mut *source, window)
                .and_then(|mut reader| reader.read_part())
                .map_err(|e| Error::io(format!("failed to read part {}", window.number), e))?
        };

        tracing::debug!(
            key,
            part = window.number,
            offset = window.offset,
            length = window.length,
            "uploading part"
        );
        let etag = gateway.upload_part(key, upload_id, window.number, Bytes::from(body))?;
        #[cfg(feature = "metrics")]
        metrics::counter!("depot_parts_uploaded_total").increment(1);

        Ok(CompletedPart {
            part_number: window.number,
            etag,
        })
    }

    fn refresh(&self, refreshes: &AtomicU32) -> Result<()> {
        if self.guard.refresh_and_persist_if_needed()? {
            refreshes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Gateway signed with the guard's current token, rebuilt when the version moves.
    ///
    /// The snapshot is read under the cache lock so a stale token never replaces a newer
    /// cached gateway.
    fn current_gateway(&self) -> Result<Arc<C::Gateway>> {
        let mut cached = self.gateway.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.guard.snapshot()?;
        if let Some(gateway) = reusable(cached.as_ref(), snapshot.version) {
            return Ok(gateway);
        }

        tracing::debug!(version = snapshot.version, "connecting gateway");
        let gateway = Arc::new(self.connector.connect(&snapshot.record)?);
        *cached = Some((snapshot.version, Arc::clone(&gateway)));
        Ok(gateway)
    }

    fn abort(&self, descriptor: &TransferDescriptor, cause: Error) -> Error {
        log_state(descriptor, TransferState::Aborted);
        tracing::warn!(
            key = %descriptor.key,
            upload_id = %descriptor.upload_id,
            error = %cause,
            "multipart upload failed, aborting"
        );
        #[cfg(feature = "metrics")]
        metrics::counter!("depot_multipart_uploads_total", "outcome" => "aborted").increment(1);

        let abort_error = self
            .current_gateway()
            .and_then(|g| g.abort_multipart_upload(&descriptor.key, &descriptor.upload_id))
            .err();
        if let Some(e) = &abort_error {
            tracing::error!(upload_id = %descriptor.upload_id, error = %e, "abort failed");
        }

        Error::Aborted {
            upload_id: descriptor.upload_id.clone(),
            cause: Box::new(cause),
            abort_error: abort_error.map(Box::new),
        }
    }
}

/// The cached gateway, unless it was built from an older credential than `version`.
fn reusable<G>(cached: Option<&(u64, Arc<G>)>, version: u64) -> Option<Arc<G>> {
    cached
        .filter(|(built_at, _)| *built_at >= version)
        .map(|(_, gateway)| Arc::clone(gateway))
}

fn log_state(descriptor: &TransferDescriptor, state: TransferState) {
    tracing::debug!(
        key = %descriptor.key,
        upload_id = %descriptor.upload_id,
        parts = descriptor.parts.len(),
        state = ?state,
        "multipart state"
    );
}
