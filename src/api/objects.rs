//! Object operations against the gateway bucket.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::{
    client::GatewayClient,
    error::{Error, Result},
    transport::{RequestBody, ensure_success, read_body_string},
    types::{
        CompleteMultipartUploadOutput, CompletedPart, CreateMultipartUploadOutput,
        GetObjectOutput, HeadObjectOutput, ObjectBody, PutObjectOutput, UploadPartOutput,
    },
    util::headers::{etag, header_string, header_u64},
};

/// Object operations service.
#[derive(Clone)]
pub struct ObjectsService {
    client: GatewayClient,
}

impl ObjectsService {
    pub(crate) fn new(client: GatewayClient) -> Self {
        Self { client }
    }

    /// Starts a request to GET an object.
    pub fn get(&self, key: impl Into<String>) -> GetObjectRequest {
        GetObjectRequest {
            client: self.client.clone(),
            key: key.into(),
        }
    }

    /// Starts a request to HEAD an object.
    pub fn head(&self, key: impl Into<String>) -> HeadObjectRequest {
        HeadObjectRequest {
            client: self.client.clone(),
            key: key.into(),
        }
    }

    /// Starts a single-part PUT.
    pub fn put(&self, key: impl Into<String>) -> PutObjectRequest {
        PutObjectRequest {
            client: self.client.clone(),
            key: key.into(),
            content_type: None,
            body: RequestBody::Empty,
        }
    }

    pub fn create_multipart_upload(&self, key: impl Into<String>) -> CreateMultipartUploadRequest {
        CreateMultipartUploadRequest {
            client: self.client.clone(),
            key: key.into(),
            content_type: None,
        }
    }

    pub fn upload_part(
        &self,
        key: impl Into<String>,
        upload_id: impl Into<String>,
        part_number: u32,
    ) -> UploadPartRequest {
        UploadPartRequest {
            client: self.client.clone(),
            key: key.into(),
            upload_id: upload_id.into(),
            part_number,
            body: RequestBody::Empty,
        }
    }

    pub fn complete_multipart_upload(
        &self,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> CompleteMultipartUploadRequest {
        CompleteMultipartUploadRequest {
            client: self.client.clone(),
            key: key.into(),
            upload_id: upload_id.into(),
            parts: Vec::new(),
        }
    }

    pub fn abort_multipart_upload(
        &self,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> AbortMultipartUploadRequest {
        AbortMultipartUploadRequest {
            client: self.client.clone(),
            key: key.into(),
            upload_id: upload_id.into(),
        }
    }
}

/// Request builder for fetching an object.
pub struct GetObjectRequest {
    client: GatewayClient,
    key: String,
}

impl GetObjectRequest {
    pub fn send(self) -> Result<GetObjectOutput> {
        let resp = self.client.execute(
            Method::GET,
            &self.key,
            Vec::new(),
            HeaderMap::new(),
            RequestBody::Empty,
        )?;

        let resp = ensure_success(resp)?;

        let etag = etag(resp.headers());
        let content_length = header_u64(resp.headers(), http::header::CONTENT_LENGTH);
        let content_type = header_string(resp.headers(), http::header::CONTENT_TYPE);

        Ok(GetObjectOutput {
            body: ObjectBody::from_reader(resp.into_body().into_reader()),
            etag,
            content_length,
            content_type,
        })
    }
}

/// Request builder for fetching object metadata via HEAD.
pub struct HeadObjectRequest {
    client: GatewayClient,
    key: String,
}

impl HeadObjectRequest {
    pub fn send(self) -> Result<HeadObjectOutput> {
        let resp = self.client.execute(
            Method::HEAD,
            &self.key,
            Vec::new(),
            HeaderMap::new(),
            RequestBody::Empty,
        )?;

        let resp = ensure_success(resp)?;

        Ok(HeadObjectOutput {
            etag: etag(resp.headers()),
            content_length: header_u64(resp.headers(), http::header::CONTENT_LENGTH),
            content_type: header_string(resp.headers(), http::header::CONTENT_TYPE),
        })
    }
}

/// Request builder for a single-part upload.
pub struct PutObjectRequest {
    client: GatewayClient,
    key: String,
    content_type: Option<String>,
    body: RequestBody,
}

impl PutObjectRequest {
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    /// Sets the request body. An empty body uploads a zero-byte object.
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self
    }

    pub fn send(self) -> Result<PutObjectOutput> {
        let mut headers = HeaderMap::new();
        if let Some(value) = self.content_type {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| Error::invalid_config("invalid Content-Type header"))?;
            headers.insert(http::header::CONTENT_TYPE, value);
        }

        let resp = self
            .client
            .execute(Method::PUT, &self.key, Vec::new(), headers, self.body)?;

        let resp = ensure_success(resp)?;

        Ok(PutObjectOutput {
            etag: etag(resp.headers()),
        })
    }
}

/// Request builder for initiating a multipart upload.
pub struct CreateMultipartUploadRequest {
    client: GatewayClient,
    key: String,
    content_type: Option<String>,
}

impl CreateMultipartUploadRequest {
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn send(self) -> Result<CreateMultipartUploadOutput> {
        let mut headers = HeaderMap::new();
        if let Some(value) = self.content_type {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| Error::invalid_config("invalid Content-Type header"))?;
            headers.insert(http::header::CONTENT_TYPE, value);
        }

        let resp = self.client.execute(
            Method::POST,
            &self.key,
            vec![("uploads".to_string(), String::new())],
            headers,
            RequestBody::Empty,
        )?;

        let resp = ensure_success(resp)?;

        let (_, body) = resp.into_parts();
        let xml = read_body_string(body)?;
        crate::util::xml::parse_create_multipart_upload(&xml)
    }
}

/// Request builder for uploading one part.
pub struct UploadPartRequest {
    client: GatewayClient,
    key: String,
    upload_id: String,
    part_number: u32,
    body: RequestBody,
}

impl UploadPartRequest {
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self
    }

    pub fn send(self) -> Result<UploadPartOutput> {
        if matches!(self.body, RequestBody::Empty) {
            return Err(Error::invalid_config("upload_part requires a request body"));
        }
        if self.part_number == 0 {
            return Err(Error::invalid_config("part numbers start at 1"));
        }

        let query = vec![
            ("partNumber".to_string(), self.part_number.to_string()),
            ("uploadId".to_string(), self.upload_id),
        ];

        let resp = self
            .client
            .execute(Method::PUT, &self.key, query, HeaderMap::new(), self.body)?;

        let resp = ensure_success(resp)?;

        Ok(UploadPartOutput {
            etag: etag(resp.headers()),
        })
    }
}

/// Request builder for completing a multipart upload.
pub struct CompleteMultipartUploadRequest {
    client: GatewayClient,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
}

impl CompleteMultipartUploadRequest {
    pub fn parts<I>(mut self, iter: I) -> Self
    where
        I: IntoIterator<Item = CompletedPart>,
    {
        self.parts.extend(iter);
        self
    }

    pub fn send(self) -> Result<CompleteMultipartUploadOutput> {
        let body = crate::util::xml::encode_complete_multipart_upload(&self.parts)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml"),
        );

        let resp = self.client.execute(
            Method::POST,
            &self.key,
            vec![("uploadId".to_string(), self.upload_id)],
            headers,
            RequestBody::Bytes(body),
        )?;

        let resp = ensure_success(resp)?;

        // The gateway may report a failed completion inside a 200 body.
        let (parts, body) = resp.into_parts();
        let xml = read_body_string(body)?;
        if let Some(err) = crate::util::xml::parse_error_xml(&xml)
            && err.code.is_some()
        {
            return Err(crate::transport::response_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &parts.headers,
                &xml,
            ));
        }
        crate::util::xml::parse_complete_multipart_upload(&xml)
    }
}

/// Request builder for aborting a multipart upload.
pub struct AbortMultipartUploadRequest {
    client: GatewayClient,
    key: String,
    upload_id: String,
}

impl AbortMultipartUploadRequest {
    pub fn send(self) -> Result<()> {
        let resp = self.client.execute(
            Method::DELETE,
            &self.key,
            vec![("uploadId".to_string(), self.upload_id)],
            HeaderMap::new(),
            RequestBody::Empty,
        )?;

        ensure_success(resp).map(drop)
    }
}
