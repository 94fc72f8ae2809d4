use std::fmt;

use url::Url;

use crate::error::Error;

/// Bucket exposed by the file service's S3 gateway.
pub const GATEWAY_BUCKET: &str = "io";
/// Region the gateway expects in SigV4 scopes.
pub const GATEWAY_REGION: &str = "us-east-1";
/// Well-known gateway secret; the bearer token travels as the access key id.
pub const GATEWAY_SECRET: &str = "gatewaysecret";

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Region(String);

impl Region {
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::invalid_config("region must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Region").field(&self.0).finish()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static SigV4 key pair used to sign gateway requests.
#[derive(Clone)]
pub struct SigningKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl SigningKeys {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Result<Self, Error> {
        let access_key_id = access_key_id.into();
        let secret_access_key = secret_access_key.into();

        if access_key_id.trim().is_empty() {
            return Err(Error::invalid_config("access_key_id must not be empty"));
        }
        if secret_access_key.trim().is_empty() {
            return Err(Error::invalid_config("secret_access_key must not be empty"));
        }

        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }

    /// Keys for the file service gateway: the bearer token signs as the access key.
    pub fn for_gateway(bearer_token: impl Into<String>) -> Result<Self, Error> {
        Self::new(bearer_token, GATEWAY_SECRET)
    }
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field(
                "access_key_id",
                &crate::util::redact::redact_value(&self.access_key_id),
            )
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Where to reach the S3 gateway of a file service. Objects are addressed path-style.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayEndpoint {
    pub endpoint: Url,
    pub bucket: String,
    pub region: Region,
}

impl GatewayEndpoint {
    /// Derives the gateway location from the file service's server URL.
    pub fn from_server_url(server_url: &str) -> Result<Self, Error> {
        let mut endpoint = Url::parse(server_url.trim())
            .map_err(|_| Error::invalid_config("server URL must be a valid absolute URL"))?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(Error::invalid_config(
                "server URL scheme must be http or https",
            ));
        }
        if endpoint.host_str().is_none() {
            return Err(Error::invalid_config("server URL must include host"));
        }
        endpoint.set_path("/");
        endpoint.set_query(None);
        endpoint.set_fragment(None);

        Ok(Self {
            endpoint,
            bucket: GATEWAY_BUCKET.to_string(),
            region: Region::new(GATEWAY_REGION)?,
        })
    }
}
