use std::sync::Arc;

use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::{
    credentials::{RefreshGuard, SecretStore, TokenRefresher},
    error::{Error, Result},
    retry::{RetryPolicy, retry},
    transport::{RequestBody, Transport, ensure_success, read_body_string},
};

const STAT_ROUTE: &str = "a/tree/stat";

/// Index entry of a stored file as reported by the metadata service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeDescriptor {
    #[serde(rename = "Uuid")]
    pub uuid: String,
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Type")]
    pub node_type: Option<String>,
    #[serde(rename = "Size", deserialize_with = "lenient_i64")]
    pub size: Option<i64>,
    #[serde(rename = "MTime", deserialize_with = "lenient_i64")]
    pub mtime: Option<i64>,
    #[serde(rename = "Etag")]
    pub etag: Option<String>,
}

/// Looks a path up in the metadata index.
pub trait MetadataLookup: Send + Sync {
    /// `Ok(None)` while the path is not indexed.
    fn lookup(&self, path: &str) -> Result<Option<NodeDescriptor>>;
}

impl<M: MetadataLookup + ?Sized> MetadataLookup for Arc<M> {
    fn lookup(&self, path: &str) -> Result<Option<NodeDescriptor>> {
        (**self).lookup(path)
    }
}

/// Polls the index until a freshly uploaded path shows up.
#[derive(Debug)]
pub struct Verifier<M> {
    lookup: M,
    policy: RetryPolicy,
}

impl<M: MetadataLookup> Verifier<M> {
    pub fn new(lookup: M) -> Self {
        Self::with_policy(lookup, RetryPolicy::verification())
    }

    pub fn with_policy(lookup: M, policy: RetryPolicy) -> Self {
        Self { lookup, policy }
    }

    /// Fails with [`Error::IndexingTimeout`] once the policy's attempts are used up.
    pub fn confirm(&self, path: &str) -> Result<NodeDescriptor> {
        let retried = retry(&self.policy, |attempt| match self.lookup.lookup(path)? {
            Some(node) => Ok(node),
            None => Err(Error::IndexingTimeout {
                path: path.to_string(),
                attempts: attempt,
            }),
        });
        let attempts = retried.attempts();

        match retried.into_result() {
            Ok(node) => {
                tracing::debug!(path, attempts, "upload indexed");
                Ok(node)
            }
            Err(e) if e.is_credential_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(path, attempts, error = %e, "upload not indexed");
                Err(Error::IndexingTimeout {
                    path: path.to_string(),
                    attempts,
                })
            }
        }
    }
}

/// Stats paths through the file service's REST API with the current bearer token.
pub struct RestMetadataClient<T, S> {
    base: Url,
    transport: Transport,
    guard: Arc<RefreshGuard<T, S>>,
}

impl<T, S> std::fmt::Debug for RestMetadataClient<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestMetadataClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl<T: TokenRefresher, S: SecretStore> RestMetadataClient<T, S> {
    pub fn new(
        server_url: &str,
        transport: Transport,
        guard: Arc<RefreshGuard<T, S>>,
    ) -> Result<Self> {
        let base = Url::parse(server_url.trim())
            .map_err(|_| Error::invalid_config("server URL must be a valid absolute URL"))?;
        Ok(Self {
            base,
            transport,
            guard,
        })
    }
}

impl<T: TokenRefresher, S: SecretStore> MetadataLookup for RestMetadataClient<T, S> {
    fn lookup(&self, path: &str) -> Result<Option<NodeDescriptor>> {
        #[derive(Deserialize)]
        struct StatResponse {
            #[serde(rename = "Node")]
            node: Option<NodeDescriptor>,
        }

        self.guard.refresh_and_persist_if_needed()?;
        let token = self.guard.snapshot()?.record.id_token;

        let url = crate::util::url::service_url(&self.base, STAT_ROUTE, path)?;
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::invalid_config("bearer token is not a valid header value"))?;
        headers.insert(http::header::AUTHORIZATION, bearer);
        headers.insert(http::header::ACCEPT, HeaderValue::from_static("application/json"));

        let resp = self
            .transport
            .send(Method::GET, url, headers, RequestBody::Empty)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp)?;

        let body = read_body_string(resp.into_body())?;
        let parsed = serde_json::from_str::<StatResponse>(&body)
            .map_err(|e| Error::decode("failed to parse stat response", Some(Box::new(e))))?;
        Ok(parsed.node)
    }
}

/// Accepts 64-bit integers encoded either as JSON numbers or strings.
fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}
