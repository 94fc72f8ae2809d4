//! Multipart upload engine, part windows and post-upload verification.

mod engine;
mod part_reader;
mod verify;

use bytes::Bytes;

pub use engine::{Download, TransferEngine, UploadReport};
pub use part_reader::PartReader;
pub use verify::{MetadataLookup, NodeDescriptor, RestMetadataClient, Verifier};

use crate::{
    auth::{GatewayEndpoint, SigningKeys},
    client::GatewayClient,
    config::MAX_PARTS,
    credentials::CredentialRecord,
    error::{Error, Result},
    transport::Transport,
    types::{
        CompleteMultipartUploadOutput, CompletedPart, GetObjectOutput, HeadObjectOutput,
        PutObjectOutput,
    },
};

/// How parts are cut and how many are in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UploadVariant {
    /// 50 MiB parts, one at a time.
    #[default]
    Sequential,
    /// 5 MiB parts, several in flight.
    Managed,
}

impl UploadVariant {
    pub const DEFAULT_CONCURRENCY: usize = 3;

    pub const fn part_size(self) -> u64 {
        match self {
            Self::Sequential => 50 * 1024 * 1024,
            Self::Managed => 5 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    Initiated,
    PartsInFlight,
    Completing,
    Completed,
    Aborted,
}

/// Byte range of the source sent as one part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartWindow {
    /// 1-based.
    pub number: u32,
    pub offset: u64,
    pub length: u64,
}

/// In-memory bookkeeping for one multipart session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub key: String,
    pub total_size: u64,
    pub part_size: u64,
    pub upload_id: String,
    /// Kept sorted by part number.
    pub parts: Vec<CompletedPart>,
}

impl TransferDescriptor {
    pub fn new(
        key: impl Into<String>,
        total_size: u64,
        part_size: u64,
        upload_id: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            total_size,
            part_size,
            upload_id: upload_id.into(),
            parts: Vec::new(),
        }
    }

    /// Cuts `total_size` bytes into contiguous windows of `part_size`.
    ///
    /// Only the last window may be shorter. A zero-byte source has no windows.
    pub fn plan(total_size: u64, part_size: u64) -> Result<Vec<PartWindow>> {
        if part_size == 0 {
            return Err(Error::invalid_config("part size must be positive"));
        }
        let count = total_size.div_ceil(part_size);
        if count > MAX_PARTS {
            return Err(Error::invalid_config(format!(
                "{total_size} bytes in {part_size}-byte parts needs {count} parts, more than {MAX_PARTS}"
            )));
        }

        Ok((0..count)
            .map(|idx| {
                let offset = idx * part_size;
                PartWindow {
                    // count <= MAX_PARTS, which fits in u32
                    number: idx as u32 + 1,
                    offset,
                    length: part_size.min(total_size - offset),
                }
            })
            .collect())
    }

    /// Records an uploaded part, keeping part-number order.
    pub fn record(&mut self, part: CompletedPart) {
        let at = self
            .parts
            .partition_point(|p| p.part_number < part.part_number);
        if self
            .parts
            .get(at)
            .is_some_and(|p| p.part_number == part.part_number)
        {
            self.parts[at] = part;
        } else {
            self.parts.insert(at, part);
        }
    }
}

/// The object operations the engine needs from a storage gateway.
pub trait ObjectGateway: Send + Sync {
    fn put_object(&self, key: &str, body: Bytes) -> Result<PutObjectOutput>;

    fn head_object(&self, key: &str) -> Result<HeadObjectOutput>;

    fn get_object(&self, key: &str) -> Result<GetObjectOutput>;

    /// Returns the upload id.
    fn create_multipart_upload(&self, key: &str) -> Result<String>;

    /// Returns the part's integrity tag.
    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String>;

    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadOutput>;

    fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;
}

impl ObjectGateway for GatewayClient {
    fn put_object(&self, key: &str, body: Bytes) -> Result<PutObjectOutput> {
        self.objects().put(key).body_bytes(body).send()
    }

    fn head_object(&self, key: &str) -> Result<HeadObjectOutput> {
        self.objects().head(key).send()
    }

    fn get_object(&self, key: &str) -> Result<GetObjectOutput> {
        self.objects().get(key).send()
    }

    fn create_multipart_upload(&self, key: &str) -> Result<String> {
        Ok(self.objects().create_multipart_upload(key).send()?.upload_id)
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String> {
        self.objects()
            .upload_part(key, upload_id, part_number)
            .body_bytes(body)
            .send()?
            .etag
            .ok_or_else(|| Error::decode(format!("part {part_number} response has no ETag"), None))
    }

    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadOutput> {
        self.objects()
            .complete_multipart_upload(key, upload_id)
            .parts(parts.iter().cloned())
            .send()
    }

    fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.objects().abort_multipart_upload(key, upload_id).send()
    }
}

/// Builds a gateway client signed with a given credential.
///
/// Called again whenever the credential is refreshed.
pub trait GatewayConnector: Send + Sync {
    type Gateway: ObjectGateway;

    fn connect(&self, record: &CredentialRecord) -> Result<Self::Gateway>;
}

/// Connects to the file service's S3 gateway with the record's bearer token.
#[derive(Clone, Debug)]
pub struct S3GatewayConnector {
    endpoint: GatewayEndpoint,
    transport: Transport,
}

impl S3GatewayConnector {
    pub fn new(endpoint: GatewayEndpoint, transport: Transport) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    pub fn for_server(server_url: &str, transport: Transport) -> Result<Self> {
        Ok(Self::new(
            GatewayEndpoint::from_server_url(server_url)?,
            transport,
        ))
    }
}

impl GatewayConnector for S3GatewayConnector {
    type Gateway = GatewayClient;

    fn connect(&self, record: &CredentialRecord) -> Result<GatewayClient> {
        if record.id_token.is_empty() {
            return Err(Error::invalid_config(format!(
                "no bearer token loaded for {}",
                record.id()
            )));
        }
        GatewayClient::builder(self.endpoint.clone())
            .keys(SigningKeys::for_gateway(record.id_token.as_str())?)
            .transport(self.transport.clone())
            .build()
    }
}
