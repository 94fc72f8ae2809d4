//! Authenticated transfer core for file services fronted by an S3-compatible gateway.
//!
//! Uploads and downloads are signed with the account's bearer token. The token is renewed
//! between parts when it is about to expire, and the renewed credential is written back
//! to the OS keyring and the config file exactly once, whatever the number of threads.
//!
//! ## Quick start
//!
//! ```no_run
//! # fn demo() -> Result<(), depot::Error> {
//! use depot::{ConfigFile, DefaultSession, TransferConfig};
//!
//! let file = ConfigFile::default_location()?;
//! let record = file
//!     .load()?
//!     .active_record()
//!     .cloned()
//!     .ok_or_else(|| depot::Error::invalid_config("not configured"))?;
//!
//! let session = DefaultSession::open(record, TransferConfig::default(), Some(file))?;
//! session.load_credential()?;
//!
//! let source = std::fs::File::open("report.pdf")
//!     .map_err(|e| depot::Error::io("failed to open report.pdf", e))?;
//! let report = session.upload("personal-files/report.pdf", source, true)?;
//! println!("{} bytes in {} parts", report.size, report.parts);
//! # Ok(())
//! # }
//! ```

#[cfg(all(
    feature = "rustls",
    feature = "native-tls",
    not(feature = "allow-both-tls")
))]
compile_error!("Enable only one of: rustls, native-tls.");

/// Gateway object operations and request builders.
pub mod api;
/// Shared request/response types.
pub mod types;

mod auth;
mod client;
mod config;
mod credentials;
mod error;
mod retry;
mod session;
mod transfer;
mod transport;
mod util;

pub use auth::{GatewayEndpoint, Region, SigningKeys};
pub use client::{GatewayClient, GatewayClientBuilder};
pub use config::{
    ConfigFile, ConfigList, DEFAULT_MULTIPART_THRESHOLD, MAX_PARTS, TransferConfig,
    TransferConfigBuilder,
};
pub use credentials::{
    AuthKind, CredentialRecord, CredentialSnapshot, CredentialStore, DEFAULT_CLIENT_ID,
    DEFAULT_REFRESH_SKEW, DEFAULT_SERVICE, KeyringSecretStore, LoadOutcome, MemorySecretStore,
    NO_KEYRING_MSG, OidcTokenClient, RefreshGuard, RefreshedToken, SecretStore, TokenRefresher,
};
pub use error::{Error, Result};
pub use retry::{FailedAttempt, Retried, RetryPolicy, retry, retry_if};
pub use session::{DefaultSession, Session};
pub use transfer::{
    Download, GatewayConnector, MetadataLookup, NodeDescriptor, ObjectGateway, PartReader,
    PartWindow, RestMetadataClient, S3GatewayConnector, TransferDescriptor, TransferEngine,
    TransferState, UploadReport, UploadVariant, Verifier,
};
pub use transport::{Transport, TransportOptions};
