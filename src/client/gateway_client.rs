use std::sync::Arc;

use http::{HeaderMap, Method};
use time::OffsetDateTime;

use crate::{
    api,
    auth::{GatewayEndpoint, SigningKeys},
    error::{Error, Result},
    transport::{RequestBody, Transport, TransportOptions},
    util,
};

/// SigV4-signing client for the file service's S3 gateway.
///
/// The signing keys are fixed for the client's lifetime; after a credential refresh a
/// new client is built from the fresh token.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

pub struct GatewayClientBuilder {
    endpoint: GatewayEndpoint,
    keys: Option<SigningKeys>,
    transport: Option<Transport>,
}

struct Inner {
    endpoint: GatewayEndpoint,
    keys: SigningKeys,
    transport: Transport,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("endpoint", &self.inner.endpoint)
            .field("keys", &self.inner.keys)
            .finish()
    }
}

impl GatewayClient {
    pub fn builder(endpoint: GatewayEndpoint) -> GatewayClientBuilder {
        GatewayClientBuilder {
            endpoint,
            keys: None,
            transport: None,
        }
    }

    pub fn objects(&self) -> api::ObjectsService {
        api::ObjectsService::new(self.clone())
    }

    pub fn bucket(&self) -> &str {
        &self.inner.endpoint.bucket
    }

    pub(crate) fn execute(
        &self,
        method: Method,
        key: &str,
        query_params: Vec<(String, String)>,
        mut headers: HeaderMap,
        body: RequestBody,
    ) -> Result<ureq::http::Response<ureq::Body>> {
        let endpoint = &self.inner.endpoint;
        let _guard = tracing::info_span!(
            "depot.request",
            method = %method,
            bucket = endpoint.bucket.as_str(),
            key,
            host = endpoint.endpoint.host_str().unwrap_or(""),
        )
        .entered();

        let resolved = util::url::resolve_url(
            &endpoint.endpoint,
            &endpoint.bucket,
            key,
            &query_params,
        )?;

        let payload_hash = match &body {
            RequestBody::Empty => util::signing::payload_hash_empty(),
            RequestBody::Bytes(b) => util::signing::payload_hash_bytes(b),
        };

        util::signing::sign_headers(
            &method,
            &resolved,
            &mut headers,
            &payload_hash,
            &endpoint.region,
            &self.inner.keys,
            OffsetDateTime::now_utc(),
        )?;

        self.inner
            .transport
            .send(method, resolved.url, headers, body)
    }
}

impl GatewayClientBuilder {
    pub fn keys(mut self, keys: SigningKeys) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Shares an existing transport (and its connection pool) with this client.
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<GatewayClient> {
        let keys = self
            .keys
            .ok_or_else(|| Error::invalid_config("gateway signing keys are required"))?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Transport::new(TransportOptions::default())?,
        };

        Ok(GatewayClient {
            inner: Arc::new(Inner {
                endpoint: self.endpoint,
                keys,
                transport,
            }),
        })
    }
}
