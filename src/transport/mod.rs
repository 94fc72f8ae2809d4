//! Blocking HTTP plumbing shared by the gateway, identity and metadata clients.

use std::{io::Read as _, time::Duration};

#[cfg(feature = "metrics")]
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::error::{Error, Result};

#[cfg(feature = "rustls")]
pub(crate) mod tls;

const ERROR_SNIPPET_LIMIT: usize = 4096;

pub(crate) enum RequestBody {
    Empty,
    Bytes(Bytes),
}

impl RequestBody {
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Bytes(b) => b.len(),
        }
    }
}

/// Connection settings for every outbound call.
#[derive(Clone, Debug)]
pub struct TransportOptions {
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    /// Accept any server certificate. Only for self-signed test deployments.
    pub skip_verify: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(300)),
            user_agent: None,
            skip_verify: false,
        }
    }
}

/// One blocking agent, cloned cheaply into every client that needs it.
///
/// Calls are single-shot: retries belong to [`crate::retry`] at the operation level.
#[derive(Clone)]
pub struct Transport {
    agent: ureq::Agent,
    timeout: Option<Duration>,
    user_agent: String,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Transport {
    pub fn new(options: TransportOptions) -> Result<Self> {
        #[cfg(feature = "rustls")]
        crate::transport::tls::ensure_rustls_crypto_provider();

        let tls = ureq::tls::TlsConfig::builder().disable_verification(options.skip_verify);
        #[cfg(all(feature = "native-tls", not(feature = "rustls")))]
        let tls = tls.provider(ureq::tls::TlsProvider::NativeTls);

        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .tls_config(tls.build())
            .build();

        if options.skip_verify {
            tracing::warn!("TLS certificate verification is disabled");
        }

        Ok(Self {
            agent: ureq::Agent::new_with_config(config),
            timeout: options.timeout,
            user_agent: options.user_agent.unwrap_or_else(default_user_agent),
        })
    }

    pub(crate) fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: RequestBody,
    ) -> Result<ureq::http::Response<ureq::Body>> {
        #[cfg(feature = "metrics")]
        metrics::counter!("depot_http_requests_total", "method" => method_label(&method))
            .increment(1);
        let _guard = tracing::debug_span!(
            "depot.http",
            method = %method,
            host = url.host_str().unwrap_or(""),
            path = url.path(),
            body_len = body.len(),
        )
        .entered();
        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let result = match method.as_str() {
            "GET" => {
                ensure_empty_body(&body)?;
                self.apply_headers(self.agent.get(url.as_str()), &headers)
                    .call()
            }
            "HEAD" => {
                ensure_empty_body(&body)?;
                self.apply_headers(self.agent.head(url.as_str()), &headers)
                    .call()
            }
            "DELETE" => {
                ensure_empty_body(&body)?;
                self.apply_headers(self.agent.delete(url.as_str()), &headers)
                    .call()
            }
            "PUT" => {
                let req = self.apply_headers(self.agent.put(url.as_str()), &headers);
                match body {
                    RequestBody::Empty => req.send_empty(),
                    RequestBody::Bytes(b) => req.send(b.as_ref()),
                }
            }
            "POST" => {
                let req = self.apply_headers(self.agent.post(url.as_str()), &headers);
                match body {
                    RequestBody::Empty => req.send_empty(),
                    RequestBody::Bytes(b) => req.send(b.as_ref()),
                }
            }
            _ => return Err(Error::invalid_config("unsupported HTTP method")),
        };

        let resp = result.map_err(|err| {
            #[cfg(feature = "metrics")]
            metrics::counter!(
                "depot_http_errors_total",
                "method" => method_label(&method),
                "kind" => "transport"
            )
            .increment(1);
            tracing::debug!(error = %err, "request failed before a response arrived");
            Error::transport(
                format!("request failed: {}", request_context(&method, &url)),
                Some(Box::new(err)),
            )
        })?;

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(
                "depot_http_responses_total",
                "method" => method_label(&method),
                "class" => status_class(resp.status()),
            )
            .increment(1);
            metrics::histogram!(
                "depot_http_request_duration_seconds",
                "method" => method_label(&method),
            )
            .record(start.elapsed().as_secs_f64());
        }

        tracing::debug!(status = %resp.status(), "response received");
        Ok(resp)
    }

    fn apply_headers<B>(
        &self,
        mut req: ureq::RequestBuilder<B>,
        headers: &HeaderMap,
    ) -> ureq::RequestBuilder<B> {
        req = req.header(http::header::USER_AGENT, self.user_agent.as_str());
        for (name, value) in headers.iter() {
            let Ok(value_str) = value.to_str() else {
                continue;
            };
            req = req.header(name.as_str(), value_str);
        }

        if let Some(timeout) = self.timeout {
            req = req.config().timeout_global(Some(timeout)).build();
        }

        req
    }
}

pub(crate) fn read_body_bytes(body: ureq::Body) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    body.into_reader()
        .read_to_end(&mut out)
        .map_err(|e| Error::transport("failed to read response body", Some(Box::new(e))))?;
    Ok(out)
}

pub(crate) fn read_body_string(body: ureq::Body) -> Result<String> {
    let bytes = read_body_bytes(body)?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// Passes a 2xx response through; anything else becomes an error.
pub(crate) fn ensure_success(
    resp: ureq::http::Response<ureq::Body>,
) -> Result<ureq::http::Response<ureq::Body>> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(error_from_response(resp))
    }
}

/// Turns a non-success response into an error, consuming its body.
pub(crate) fn error_from_response(resp: ureq::http::Response<ureq::Body>) -> Error {
    let (parts, body) = resp.into_parts();
    match read_body_string(body) {
        Ok(body) => response_error(parts.status, &parts.headers, &body),
        Err(_) => response_error(parts.status, &parts.headers, ""),
    }
}

pub(crate) fn response_error(status: StatusCode, headers: &HeaderMap, body: &str) -> Error {
    let request_id = headers
        .get("x-amz-request-id")
        .or_else(|| headers.get("x-request-id"))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(http::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        return Error::RateLimited {
            retry_after,
            request_id,
        };
    }

    let snippet = (!body.trim().is_empty())
        .then(|| crate::util::text::truncate_snippet(body, ERROR_SNIPPET_LIMIT));

    if let Some(parsed) = crate::util::xml::parse_error_xml(body) {
        return Error::Api {
            status,
            code: parsed.code,
            message: parsed.message,
            request_id: parsed.request_id.or(request_id),
            body_snippet: snippet,
        };
    }

    Error::Api {
        status,
        code: None,
        message: None,
        request_id,
        body_snippet: snippet,
    }
}

fn request_context(method: &Method, url: &Url) -> String {
    let authority = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };

    if authority.is_empty() {
        format!("{method} {}", url.path())
    } else {
        format!("{method} {authority}{}", url.path())
    }
}

fn ensure_empty_body(body: &RequestBody) -> Result<()> {
    match body {
        RequestBody::Empty => Ok(()),
        RequestBody::Bytes(_) => Err(Error::invalid_config(
            "this operation does not accept a request body",
        )),
    }
}

#[cfg(feature = "metrics")]
fn status_class(status: StatusCode) -> &'static str {
    if status.is_informational() {
        "1xx"
    } else if status.is_success() {
        "2xx"
    } else if status.is_redirection() {
        "3xx"
    } else if status.is_client_error() {
        "4xx"
    } else if status.is_server_error() {
        "5xx"
    } else {
        "other"
    }
}

#[cfg(feature = "metrics")]
fn method_label(method: &Method) -> &'static str {
    match method.as_str() {
        "GET" => "GET",
        "PUT" => "PUT",
        "HEAD" => "HEAD",
        "DELETE" => "DELETE",
        "POST" => "POST",
        _ => "OTHER",
    }
}

fn default_user_agent() -> String {
    format!("depot/{}", env!("CARGO_PKG_VERSION"))
}
