#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use bytes::Bytes;
use time::OffsetDateTime;

use depot::{
    AuthKind, ConfigFile, CredentialRecord, CredentialStore, Error, GatewayConnector,
    MemorySecretStore, MetadataLookup, NodeDescriptor, ObjectGateway, RefreshGuard,
    RefreshedToken, Result, RetryPolicy, Session, TokenRefresher, TransferConfig, TransferEngine,
    Verifier,
    types::{
        CompleteMultipartUploadOutput, CompletedPart, GetObjectOutput, HeadObjectOutput,
        ObjectBody, PutObjectOutput,
    },
};

pub(crate) const SERVER: &str = "https://files.example.com";

pub(crate) type TestSession =
    Session<FakeConnector, Arc<FakeRefresher>, Arc<MemorySecretStore>, Arc<FakeLookup>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Put { key: String, token: String },
    Head { key: String },
    Get { key: String },
    Create { key: String },
    UploadPart { number: u32, token: String, len: usize },
    Complete { upload_id: String, parts: Vec<u32> },
    Abort { upload_id: String },
}

/// Failure injection knobs, all off by default.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub(crate) fail_puts: AtomicU32,
    pub(crate) deny_puts: Mutex<bool>,
    pub(crate) fail_part: Mutex<Option<u32>>,
    pub(crate) fail_create: Mutex<bool>,
    pub(crate) fail_complete: Mutex<bool>,
    pub(crate) fail_abort: Mutex<bool>,
}

#[derive(Debug, Default)]
struct BackendState {
    objects: HashMap<String, Bytes>,
    uploads: HashMap<String, (String, BTreeMap<u32, Bytes>)>,
    calls: Vec<Call>,
    next_upload: u32,
}

/// In-memory gateway shared by every client a connector hands out.
#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    state: Mutex<BackendState>,
    pub(crate) faults: Faults,
}

impl FakeBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub(crate) fn open_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn injected(what: &str) -> Error {
    Error::transport(format!("injected {what} failure"), None)
}

pub(crate) struct FakeGateway {
    backend: Arc<FakeBackend>,
    token: String,
}

impl ObjectGateway for FakeGateway {
    fn put_object(&self, key: &str, body: Bytes) -> Result<PutObjectOutput> {
        self.backend.record(Call::Put {
            key: key.to_string(),
            token: self.token.clone(),
        });
        if *self.backend.faults.deny_puts.lock().unwrap() {
            return Err(Error::Api {
                status: http::StatusCode::FORBIDDEN,
                code: Some("AccessDenied".to_string()),
                message: Some("token rejected".to_string()),
                request_id: None,
                body_snippet: None,
            });
        }
        let remaining = self.backend.faults.fail_puts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.backend
                .faults
                .fail_puts
                .store(remaining - 1, Ordering::SeqCst);
            return Err(injected("put"));
        }
        self.backend
            .state
            .lock()
            .unwrap()
            .objects
            .insert(key.to_string(), body);
        Ok(PutObjectOutput {
            etag: Some("\"single\"".to_string()),
        })
    }

    fn head_object(&self, key: &str) -> Result<HeadObjectOutput> {
        self.backend.record(Call::Head {
            key: key.to_string(),
        });
        let len = self
            .backend
            .object(key)
            .map(|b| b.len() as u64)
            .ok_or_else(|| injected("head"))?;
        Ok(HeadObjectOutput {
            etag: None,
            content_length: Some(len),
            content_type: None,
        })
    }

    fn get_object(&self, key: &str) -> Result<GetObjectOutput> {
        self.backend.record(Call::Get {
            key: key.to_string(),
        });
        let body = self.backend.object(key).ok_or_else(|| injected("get"))?;
        Ok(GetObjectOutput {
            content_length: Some(body.len() as u64),
            body: ObjectBody::from_reader(Cursor::new(body.to_vec())),
            etag: None,
            content_type: None,
        })
    }

    fn create_multipart_upload(&self, key: &str) -> Result<String> {
        self.backend.record(Call::Create {
            key: key.to_string(),
        });
        if *self.backend.faults.fail_create.lock().unwrap() {
            return Err(injected("create"));
        }
        let mut state = self.backend.state.lock().unwrap();
        state.next_upload += 1;
        let id = format!("upload-{}", state.next_upload);
        state
            .uploads
            .insert(id.clone(), (key.to_string(), BTreeMap::new()));
        Ok(id)
    }

    fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String> {
        self.backend.record(Call::UploadPart {
            number: part_number,
            token: self.token.clone(),
            len: body.len(),
        });
        if *self.backend.faults.fail_part.lock().unwrap() == Some(part_number) {
            return Err(injected("part"));
        }
        let mut state = self.backend.state.lock().unwrap();
        let (_, parts) = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| injected("unknown upload"))?;
        parts.insert(part_number, body);
        Ok(format!("\"etag-{part_number}\""))
    }

    fn complete_multipart_upload(
        &self,
        _key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadOutput> {
        self.backend.record(Call::Complete {
            upload_id: upload_id.to_string(),
            parts: parts.iter().map(|p| p.part_number).collect(),
        });
        if *self.backend.faults.fail_complete.lock().unwrap() {
            return Err(injected("complete"));
        }
        let mut state = self.backend.state.lock().unwrap();
        let (key, stored) = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| injected("unknown upload"))?;
        let mut object = Vec::new();
        for part in parts {
            assert_eq!(part.etag, format!("\"etag-{}\"", part.part_number));
            object.extend_from_slice(&stored[&part.part_number]);
        }
        state.objects.insert(key.clone(), Bytes::from(object));
        Ok(CompleteMultipartUploadOutput {
            location: None,
            key: Some(key),
            etag: Some("\"multi\"".to_string()),
        })
    }

    fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.backend.record(Call::Abort {
            upload_id: upload_id.to_string(),
        });
        if *self.backend.faults.fail_abort.lock().unwrap() {
            return Err(injected("abort"));
        }
        self.backend.state.lock().unwrap().uploads.remove(upload_id);
        Ok(())
    }
}

pub(crate) struct FakeConnector {
    backend: Arc<FakeBackend>,
    pub(crate) connects: AtomicU32,
}

impl FakeConnector {
    pub(crate) fn new(backend: Arc<FakeBackend>) -> Self {
        Self {
            backend,
            connects: AtomicU32::new(0),
        }
    }
}

impl GatewayConnector for FakeConnector {
    type Gateway = FakeGateway;

    fn connect(&self, record: &CredentialRecord) -> Result<FakeGateway> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeGateway {
            backend: Arc::clone(&self.backend),
            token: record.id_token.clone(),
        })
    }
}

/// Hands out `token-1`, `token-2`, ... each valid for `lifetime` seconds.
pub(crate) struct FakeRefresher {
    pub(crate) calls: AtomicU32,
    lifetime: i64,
    fail: bool,
}

impl FakeRefresher {
    pub(crate) fn new(lifetime: i64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            lifetime,
            fail: false,
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            lifetime: 0,
            fail: true,
        })
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for FakeRefresher {
    fn refresh(&self, _record: &CredentialRecord) -> Result<RefreshedToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(Error::transport("identity endpoint unreachable", None));
        }
        Ok(RefreshedToken {
            id_token: format!("token-{n}"),
            refresh_token: Some(format!("refresh-{n}")),
            expires_at: Some(now() + self.lifetime),
        })
    }
}

/// Reports a path as indexed from the `found_after`-th lookup on.
pub(crate) struct FakeLookup {
    pub(crate) calls: AtomicU32,
    found_after: u32,
}

impl FakeLookup {
    pub(crate) fn new(found_after: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            found_after,
        })
    }
}

impl MetadataLookup for FakeLookup {
    fn lookup(&self, path: &str) -> Result<Option<NodeDescriptor>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((n >= self.found_after).then(|| NodeDescriptor {
            uuid: format!("node-{n}"),
            path: path.to_string(),
            ..NodeDescriptor::default()
        }))
    }
}

pub(crate) fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// OAuth record whose token is valid for another hour.
pub(crate) fn fresh_record() -> CredentialRecord {
    let mut record = CredentialRecord::new(SERVER, "alice", AuthKind::OAuth);
    record.id_token = "initial".to_string();
    record.refresh_token = Some("refresh-0".to_string());
    record.token_expires_at = Some(now() + 3600);
    record
}

/// OAuth record whose token already expired.
pub(crate) fn expired_record() -> CredentialRecord {
    let mut record = fresh_record();
    record.token_expires_at = Some(now() - 60);
    record
}

pub(crate) fn small_parts(part_size: u64) -> TransferConfig {
    TransferConfig::builder()
        .multipart_threshold(0)
        .part_size(part_size)
        .upload_retry(RetryPolicy::immediate(3))
        .verify_retry(RetryPolicy::immediate(3))
        .build()
        .unwrap()
}

pub(crate) struct Harness {
    pub(crate) backend: Arc<FakeBackend>,
    pub(crate) refresher: Arc<FakeRefresher>,
    pub(crate) secrets: Arc<MemorySecretStore>,
    pub(crate) lookup: Arc<FakeLookup>,
    pub(crate) session: TestSession,
}

pub(crate) struct HarnessBuilder {
    record: CredentialRecord,
    config: TransferConfig,
    refresher: Arc<FakeRefresher>,
    secrets: Arc<MemorySecretStore>,
    lookup: Arc<FakeLookup>,
    file: Option<ConfigFile>,
}

impl HarnessBuilder {
    pub(crate) fn new(record: CredentialRecord, config: TransferConfig) -> Self {
        Self {
            record,
            config,
            refresher: FakeRefresher::new(3600),
            secrets: Arc::new(MemorySecretStore::new()),
            lookup: FakeLookup::new(1),
            file: None,
        }
    }

    pub(crate) fn refresher(mut self, refresher: Arc<FakeRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    pub(crate) fn secrets(mut self, secrets: Arc<MemorySecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    pub(crate) fn lookup(mut self, lookup: Arc<FakeLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    pub(crate) fn file(mut self, file: ConfigFile) -> Self {
        self.file = Some(file);
        self
    }

    pub(crate) fn build(self) -> Harness {
        let backend = FakeBackend::new();
        let guard = Arc::new(
            RefreshGuard::new(
                self.record,
                Arc::clone(&self.refresher),
                CredentialStore::new(Arc::clone(&self.secrets)),
                self.file,
            )
            .with_refresh_skew(self.config.refresh_skew),
        );
        let verifier = Verifier::with_policy(Arc::clone(&self.lookup), self.config.verify_retry);
        let engine = TransferEngine::new(
            FakeConnector::new(Arc::clone(&backend)),
            guard,
            self.config,
        );
        Harness {
            backend,
            refresher: self.refresher,
            secrets: self.secrets,
            lookup: self.lookup,
            session: Session::new(engine, verifier),
        }
    }
}

pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
