//! Transfer tuning and the on-disk account list.

mod file;

use std::time::Duration;

pub use file::{ConfigFile, ConfigList};

use crate::{
    credentials::{DEFAULT_CLIENT_ID, DEFAULT_REFRESH_SKEW, DEFAULT_SERVICE},
    error::{Error, Result},
    retry::RetryPolicy,
    transfer::UploadVariant,
    transport::TransportOptions,
};

/// Sources up to this size go through a single PUT.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;
/// Gateways reject multipart sessions with more parts than this.
pub const MAX_PARTS: u64 = 10_000;

/// Explicit context threaded through every session operation.
#[derive(Clone, Debug)]
pub struct TransferConfig {
    pub multipart_threshold: u64,
    pub variant: UploadVariant,
    pub part_size: u64,
    pub concurrency: usize,
    pub upload_retry: RetryPolicy,
    pub verify_retry: RetryPolicy,
    pub refresh_skew: Duration,
    pub client_id: String,
    pub keyring_service: String,
    pub transport: TransportOptions,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            variant: UploadVariant::Sequential,
            part_size: UploadVariant::Sequential.part_size(),
            concurrency: 1,
            upload_retry: RetryPolicy::upload(),
            verify_retry: RetryPolicy::verification(),
            refresh_skew: DEFAULT_REFRESH_SKEW,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            keyring_service: DEFAULT_SERVICE.to_string(),
            transport: TransportOptions::default(),
        }
    }
}

impl TransferConfig {
    pub fn builder() -> TransferConfigBuilder {
        TransferConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct TransferConfigBuilder {
    multipart_threshold: Option<u64>,
    variant: Option<UploadVariant>,
    part_size: Option<u64>,
    concurrency: Option<usize>,
    upload_retry: Option<RetryPolicy>,
    verify_retry: Option<RetryPolicy>,
    refresh_skew: Option<Duration>,
    client_id: Option<String>,
    keyring_service: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    skip_verify: bool,
}

impl TransferConfigBuilder {
    pub fn multipart_threshold(mut self, bytes: u64) -> Self {
        self.multipart_threshold = Some(bytes);
        self
    }

    /// Selects the uploader; its part size applies unless [`Self::part_size`] is set.
    pub fn variant(mut self, variant: UploadVariant) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn part_size(mut self, bytes: u64) -> Self {
        self.part_size = Some(bytes);
        self
    }

    /// Parts in flight for the managed uploader.
    pub fn concurrency(mut self, parts: usize) -> Self {
        self.concurrency = Some(parts);
        self
    }

    pub fn upload_retry(mut self, policy: RetryPolicy) -> Self {
        self.upload_retry = Some(policy);
        self
    }

    pub fn verify_retry(mut self, policy: RetryPolicy) -> Self {
        self.verify_retry = Some(policy);
        self
    }

    pub fn refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = Some(skew);
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn keyring_service(mut self, service: impl Into<String>) -> Self {
        self.keyring_service = Some(service.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.skip_verify = skip;
        self
    }

    pub fn build(self) -> Result<TransferConfig> {
        let defaults = TransferConfig::default();
        let variant = self.variant.unwrap_or(defaults.variant);
        let part_size = self.part_size.unwrap_or_else(|| variant.part_size());
        if part_size == 0 {
            return Err(Error::invalid_config("part size must be positive"));
        }

        let concurrency = match variant {
            UploadVariant::Sequential => 1,
            UploadVariant::Managed => self
                .concurrency
                .unwrap_or(UploadVariant::DEFAULT_CONCURRENCY),
        };
        if concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }

        let client_id = self.client_id.unwrap_or(defaults.client_id);
        if client_id.trim().is_empty() {
            return Err(Error::invalid_config("client id must not be empty"));
        }
        let keyring_service = self.keyring_service.unwrap_or(defaults.keyring_service);
        if keyring_service.trim().is_empty() {
            return Err(Error::invalid_config("keyring service must not be empty"));
        }

        let mut transport = defaults.transport;
        if self.timeout.is_some() {
            transport.timeout = self.timeout;
        }
        transport.user_agent = self.user_agent;
        transport.skip_verify = self.skip_verify;

        Ok(TransferConfig {
            multipart_threshold: self
                .multipart_threshold
                .unwrap_or(defaults.multipart_threshold),
            variant,
            part_size,
            concurrency,
            upload_retry: self.upload_retry.unwrap_or(defaults.upload_retry),
            verify_retry: self.verify_retry.unwrap_or(defaults.verify_retry),
            refresh_skew: self.refresh_skew.unwrap_or(defaults.refresh_skew),
            client_id,
            keyring_service,
            transport,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_sequential_uploader() {
        let config = TransferConfig::builder().build().unwrap();
        assert_eq!(config.part_size, 50 * 1024 * 1024);
        assert_eq!(config.multipart_threshold, DEFAULT_MULTIPART_THRESHOLD);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.upload_retry, RetryPolicy::upload());
    }

    #[test]
    fn managed_variant_uses_small_parts_and_parallelism() {
        let config = TransferConfig::builder()
            .variant(UploadVariant::Managed)
            .build()
            .unwrap();
        assert_eq!(config.part_size, 5 * 1024 * 1024);
        assert_eq!(config.concurrency, UploadVariant::DEFAULT_CONCURRENCY);
    }

    #[test]
    fn rejects_zero_part_size_and_concurrency() {
        assert!(TransferConfig::builder().part_size(0).build().is_err());
        assert!(
            TransferConfig::builder()
                .variant(UploadVariant::Managed)
                .concurrency(0)
                .build()
                .is_err()
        );
    }
}
