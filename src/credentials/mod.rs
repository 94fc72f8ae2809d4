//! Bearer credential model, secret persistence and refresh.

mod guard;
mod oidc;
mod store;

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use zeroize::Zeroize as _;

pub use guard::{CredentialSnapshot, RefreshGuard, TokenRefresher};
pub use oidc::{DEFAULT_CLIENT_ID, OidcTokenClient};
pub use store::{
    CredentialStore, DEFAULT_SERVICE, KeyringSecretStore, LoadOutcome, MemorySecretStore,
    NO_KEYRING_MSG, SecretStore,
};

pub(crate) use store::persist_record;

/// Default margin before expiry at which a token is renewed.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthKind {
    /// Long-lived token issued by the server; never refreshed.
    #[default]
    #[serde(rename = "pat")]
    PersonalAccessToken,
    /// Short-lived id token renewed with a refresh token.
    #[serde(rename = "oauth")]
    OAuth,
    /// Login and password exchanged for a token.
    #[serde(rename = "client-auth")]
    ClientPassword,
}

/// Connection and authentication state for one server account.
///
/// Secret fields are empty on disk unless `skip_keyring` is set.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialRecord {
    pub url: String,
    pub user: String,
    pub auth_kind: AuthKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<i64>,
    pub skip_keyring: bool,
    pub use_token_cache: bool,
    pub skip_verify: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub created_at_version: String,
}

impl CredentialRecord {
    pub fn new(url: impl Into<String>, user: impl Into<String>, auth_kind: AuthKind) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            auth_kind,
            use_token_cache: true,
            ..Self::default()
        }
    }

    /// Identifier of the record inside the config list.
    pub fn id(&self) -> String {
        let host = url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.clone());
        format!("{}@{host}", self.user)
    }

    pub fn has_secrets(&self) -> bool {
        !self.id_token.is_empty()
            || self.refresh_token.as_deref().is_some_and(|r| !r.is_empty())
            || !self.password.is_empty()
    }

    /// Whether the bearer token must be renewed before the next call.
    pub fn needs_refresh(&self, now: OffsetDateTime, skew: Duration) -> bool {
        let skew = i64::try_from(skew.as_secs()).unwrap_or(i64::MAX);
        let expiring = |at: i64| at.saturating_sub(skew) <= now.unix_timestamp();
        match self.auth_kind {
            AuthKind::PersonalAccessToken => false,
            AuthKind::OAuth => match self.token_expires_at {
                Some(at) => expiring(at),
                None => self.refresh_token.as_deref().is_some_and(|r| !r.is_empty()),
            },
            AuthKind::ClientPassword => {
                !self.use_token_cache
                    || self.id_token.is_empty()
                    || self.token_expires_at.is_none_or(expiring)
            }
        }
    }

    /// Installs a freshly issued token. A missing refresh token keeps the current one.
    pub fn apply_token(&mut self, token: RefreshedToken) {
        self.id_token = token.id_token;
        if let Some(refresh) = token.refresh_token {
            self.refresh_token = Some(refresh);
        }
        self.token_expires_at = token.expires_at;
    }

    /// Zeroes every secret field in place.
    pub fn forget_secrets(&mut self) {
        self.id_token.zeroize();
        self.password.zeroize();
        if let Some(refresh) = self.refresh_token.as_mut() {
            refresh.zeroize();
        }
        self.refresh_token = None;
        self.token_expires_at = None;
    }

    /// Drops secret fields but keeps the expiry so the next process knows when to renew.
    pub(crate) fn clear_secrets(&mut self) {
        let expires_at = self.token_expires_at;
        self.forget_secrets();
        self.token_expires_at = expires_at;
    }

    pub(crate) fn without_secrets(&self) -> Self {
        let mut copy = self.clone();
        copy.clear_secrets();
        copy
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crate::util::redact::{redact_optional, redact_secret};

        f.debug_struct("CredentialRecord")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("auth_kind", &self.auth_kind)
            .field("id_token", &redact_secret(&self.id_token))
            .field("refresh_token", &redact_optional(&self.refresh_token))
            .field("password", &redact_secret(&self.password))
            .field("token_expires_at", &self.token_expires_at)
            .field("skip_keyring", &self.skip_keyring)
            .field("use_token_cache", &self.use_token_cache)
            .field("skip_verify", &self.skip_verify)
            .finish()
    }
}

/// Token material returned by the identity endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub id_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
}

impl fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("id_token", &crate::util::redact::redact_secret(&self.id_token))
            .field(
                "refresh_token",
                &crate::util::redact::redact_optional(&self.refresh_token),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    #[test]
    fn pat_never_needs_refresh() {
        let mut record = CredentialRecord::new("https://h", "u", AuthKind::PersonalAccessToken);
        record.token_expires_at = Some(0);
        assert!(!record.needs_refresh(at(1_000), DEFAULT_REFRESH_SKEW));
    }

    #[test]
    fn oauth_refreshes_within_skew() {
        let mut record = CredentialRecord::new("https://h", "u", AuthKind::OAuth);
        record.id_token = "id".to_string();
        record.refresh_token = Some("r".to_string());
        record.token_expires_at = Some(1_005);

        assert!(record.needs_refresh(at(1_000), DEFAULT_REFRESH_SKEW));
        assert!(!record.needs_refresh(at(900), DEFAULT_REFRESH_SKEW));
    }

    #[test]
    fn client_password_without_cache_always_refreshes() {
        let mut record = CredentialRecord::new("https://h", "u", AuthKind::ClientPassword);
        record.password = "pw".to_string();
        record.id_token = "id".to_string();
        record.token_expires_at = Some(10_000);
        assert!(!record.needs_refresh(at(1_000), DEFAULT_REFRESH_SKEW));

        record.use_token_cache = false;
        assert!(record.needs_refresh(at(1_000), DEFAULT_REFRESH_SKEW));
    }

    #[test]
    fn apply_token_keeps_refresh_token_when_not_rotated() {
        let mut record = CredentialRecord::new("https://h", "u", AuthKind::OAuth);
        record.refresh_token = Some("old".to_string());
        record.apply_token(RefreshedToken {
            id_token: "new-id".to_string(),
            refresh_token: None,
            expires_at: Some(42),
        });
        assert_eq!(record.id_token, "new-id");
        assert_eq!(record.refresh_token.as_deref(), Some("old"));
        assert_eq!(record.token_expires_at, Some(42));
    }

    #[test]
    fn serialized_copy_omits_secrets_and_debug_redacts() {
        let mut record =
            CredentialRecord::new("https://files.example.com", "alice", AuthKind::OAuth);
        record.id_token = "secret-id".to_string();
        record.refresh_token = Some("secret-refresh".to_string());
        record.token_expires_at = Some(7);

        let json = serde_json::to_string(&record.without_secrets()).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"auth_kind\":\"oauth\""));
        assert!(json.contains("\"token_expires_at\":7"));

        let dbg = format!("{record:?}");
        assert!(!dbg.contains("secret-id"));
        assert!(!dbg.contains("secret-refresh"));
    }

    #[test]
    fn id_uses_user_and_host() {
        let record = CredentialRecord::new("https://files.example.com/", "alice", AuthKind::OAuth);
        assert_eq!(record.id(), "alice@files.example.com");
    }
}
