//! Gateway request and response types.

use bytes::Bytes;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Response body reader for object downloads.
pub struct ObjectBody {
    inner: Box<dyn std::io::Read + Send + 'static>,
}

impl ObjectBody {
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: std::io::Read + Send + 'static,
    {
        Self {
            inner: Box::new(reader),
        }
    }

    /// Reads the full body into memory.
    pub fn bytes(mut self) -> Result<Bytes> {
        use std::io::Read as _;

        let mut out = Vec::new();
        self.inner
            .read_to_end(&mut out)
            .map_err(|e| Error::transport("failed to read response body", Some(Box::new(e))))?;
        Ok(Bytes::from(out))
    }

    /// Streams the body into `writer`, returning the number of bytes copied.
    pub fn write_to<W>(mut self, writer: &mut W) -> Result<u64>
    where
        W: std::io::Write,
    {
        std::io::copy(&mut self.inner, writer)
            .map_err(|e| Error::transport("failed to write response body", Some(Box::new(e))))
    }
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("inner", &"<reader>")
            .finish()
    }
}

impl std::io::Read for ObjectBody {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Output from a GET object request.
#[derive(Debug)]
pub struct GetObjectOutput {
    pub body: ObjectBody,
    pub etag: Option<String>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

/// Output from a HEAD object request.
#[derive(Clone, Debug)]
pub struct HeadObjectOutput {
    pub etag: Option<String>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

/// Output from a single-part PUT.
#[derive(Clone, Debug)]
pub struct PutObjectOutput {
    pub etag: Option<String>,
}

/// Output from initiating a multipart upload.
#[derive(Clone, Debug)]
pub struct CreateMultipartUploadOutput {
    pub key: Option<String>,
    /// Upload id to use for part uploads, completion and abort.
    pub upload_id: String,
}

/// Output from uploading one part.
#[derive(Clone, Debug)]
pub struct UploadPartOutput {
    pub etag: Option<String>,
}

/// Integrity tag of an uploaded part, submitted at completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Output from completing a multipart upload.
#[derive(Clone, Debug)]
pub struct CompleteMultipartUploadOutput {
    pub location: Option<String>,
    pub key: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct XmlError {
    #[serde(rename = "Code")]
    pub(crate) code: Option<String>,
    #[serde(rename = "Message")]
    pub(crate) message: Option<String>,
    #[serde(rename = "RequestId")]
    pub(crate) request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct XmlInitiateMultipartUploadResult {
    #[serde(rename = "Key")]
    pub(crate) key: Option<String>,
    #[serde(rename = "UploadId")]
    pub(crate) upload_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct XmlCompleteMultipartUploadResult {
    #[serde(rename = "Location")]
    pub(crate) location: Option<String>,
    #[serde(rename = "Key")]
    pub(crate) key: Option<String>,
    #[serde(rename = "ETag")]
    pub(crate) etag: Option<String>,
}

impl From<XmlInitiateMultipartUploadResult> for CreateMultipartUploadOutput {
    fn from(value: XmlInitiateMultipartUploadResult) -> Self {
        Self {
            key: value.key,
            upload_id: value.upload_id,
        }
    }
}

impl From<XmlCompleteMultipartUploadResult> for CompleteMultipartUploadOutput {
    fn from(value: XmlCompleteMultipartUploadResult) -> Self {
        Self {
            location: value.location,
            key: value.key,
            etag: value.etag,
        }
    }
}
