use std::{error::Error as StdError, fmt, time::Duration};

use http::StatusCode;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for configuration, credentials, transport and transfer failures.
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration or parameters.
    InvalidConfig { message: String },

    /// Request signing failed.
    Signing { message: String },

    /// Request was throttled by the service.
    RateLimited {
        retry_after: Option<Duration>,
        request_id: Option<String>,
    },

    /// Service returned an error response.
    Api {
        status: StatusCode,
        code: Option<String>,
        message: Option<String>,
        request_id: Option<String>,
        body_snippet: Option<String>,
    },

    /// Transport-level failure (HTTP client, TLS).
    Transport {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    },

    /// Response decode or parse failure.
    Decode {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    },

    /// Local I/O failure (source stream, config file).
    Io {
        message: String,
        source: std::io::Error,
    },

    /// The OS secret store is missing, broken or does not hold the entry.
    SecretStore {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    },

    /// The bearer credential could not be refreshed. Fatal for the process.
    CredentialRefresh {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    },

    /// A multipart session was cancelled after `cause`.
    Aborted {
        upload_id: String,
        cause: Box<Error>,
        abort_error: Option<Box<Error>>,
    },

    /// The object was stored but never showed up in the metadata index.
    IndexingTimeout { path: String, attempts: u32 },
}

impl Error {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a signing error.
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Creates a transport error with optional source.
    pub fn transport(
        message: impl Into<String>,
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source,
        }
    }

    /// Creates a decode error with optional source.
    pub fn decode(
        message: impl Into<String>,
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self::Decode {
            message: message.into(),
            source,
        }
    }

    /// Creates a local I/O error.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Creates a secret store error with optional source.
    pub fn secret_store(
        message: impl Into<String>,
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self::SecretStore {
            message: message.into(),
            source,
        }
    }

    /// Creates a credential refresh error with optional source.
    pub fn credential_refresh(
        message: impl Into<String>,
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self::CredentialRefresh {
            message: message.into(),
            source,
        }
    }

    /// Returns an HTTP status when available.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::Aborted { cause, .. } => cause.status(),
            _ => None,
        }
    }

    /// Returns the request id if reported by the service.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Api { request_id, .. } | Self::RateLimited { request_id, .. } => {
                request_id.as_deref()
            }
            _ => None,
        }
    }

    /// Delay the service asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns true if the error is safe to retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => status.is_server_error(),
            Self::Transport { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the process must stop using its credential.
    pub fn is_credential_fatal(&self) -> bool {
        match self {
            Self::CredentialRefresh { .. } => true,
            Self::Aborted { cause, .. } => cause.is_credential_fatal(),
            _ => false,
        }
    }
}

fn format_optional_field(label: &str, value: &Option<String>) -> String {
    match value.as_deref() {
        Some(v) if !v.is_empty() => format!(" {label}={v}"),
        _ => String::new(),
    }
}

fn format_optional_message(value: &Option<String>) -> String {
    match value.as_deref() {
        Some(v) if !v.is_empty() => format!(" ({v})"),
        _ => String::new(),
    }
}

impl Error {
    fn format_rate_limited_retry_after(retry_after: &Option<Duration>) -> String {
        match retry_after {
            Some(d) => format!(" (retry after {}s)", d.as_secs()),
            None => String::new(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { message } => write!(f, "invalid config: {message}"),
            Self::Signing { message } => write!(f, "signing error: {message}"),
            Self::RateLimited { retry_after, .. } => write!(
                f,
                "rate limited{}",
                Self::format_rate_limited_retry_after(retry_after)
            ),
            Self::Api {
                status,
                code,
                message,
                request_id,
                ..
            } => {
                let code = format_optional_field("code", code);
                let request_id = format_optional_field("request_id", request_id);
                let msg = format_optional_message(message);
                write!(f, "api error: {status}{code}{request_id}{msg}")
            }
            Self::Transport { message, .. } => write!(f, "transport error: {message}"),
            Self::Decode { message, .. } => write!(f, "decode error: {message}"),
            Self::Io { message, source } => write!(f, "io error: {message}: {source}"),
            Self::SecretStore { message, .. } => write!(f, "secret store error: {message}"),
            Self::CredentialRefresh { message, .. } => {
                write!(f, "could not refresh authentication token: {message}")
            }
            Self::Aborted {
                upload_id,
                cause,
                abort_error,
            } => {
                write!(f, "multipart upload {upload_id} aborted: {cause}")?;
                if let Some(abort_error) = abort_error {
                    write!(f, " (cancellation also failed: {abort_error})")?;
                }
                Ok(())
            }
            Self::IndexingTimeout { path, attempts } => write!(
                f,
                "{path} was stored but not indexed after {attempts} attempts"
            ),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Transport { source, .. }
            | Self::Decode { source, .. }
            | Self::SecretStore { source, .. }
            | Self::CredentialRefresh { source, .. } => {
                source.as_deref().map(|e| e as &(dyn StdError + 'static))
            }
            Self::Io { source, .. } => Some(source),
            Self::Aborted { cause, .. } => Some(cause.as_ref()),
            Self::InvalidConfig { .. }
            | Self::Signing { .. }
            | Self::RateLimited { .. }
            | Self::Api { .. }
            | Self::IndexingTimeout { .. } => None,
        }
    }
}
