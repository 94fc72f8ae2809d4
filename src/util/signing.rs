use hmac::{Hmac, Mac as _};
use http::{HeaderMap, HeaderValue, Method};
use sha2::{Digest as _, Sha256};
use time::OffsetDateTime;

use crate::{
    auth::{Region, SigningKeys},
    error::Error,
    util::url::ResolvedUrl,
};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

pub(crate) fn payload_hash_bytes(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

pub(crate) fn payload_hash_empty() -> String {
    payload_hash_bytes(&[])
}

/// Adds `x-amz-*`, `host` and `authorization` headers for a SigV4 request.
pub(crate) fn sign_headers(
    method: &Method,
    resolved: &ResolvedUrl,
    headers: &mut HeaderMap,
    payload_hash: &str,
    region: &Region,
    keys: &SigningKeys,
    now: OffsetDateTime,
) -> Result<(), Error> {
    let scope = Scope::new(region, now);

    headers.insert("x-amz-date", header_value(&scope.timestamp, "x-amz-date")?);
    headers.insert(
        "x-amz-content-sha256",
        header_value(payload_hash, "x-amz-content-sha256")?,
    );
    headers.insert(http::header::HOST, header_value(&host(&resolved.url)?, "host")?);

    let (canonical_headers, signed_headers) = canonical_headers(headers);
    let canonical_request = [
        method.as_str(),
        &resolved.canonical_uri,
        &resolved.canonical_query_string,
        &canonical_headers,
        &signed_headers,
        payload_hash,
    ]
    .join("\n");

    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{}\n{}",
        scope.timestamp,
        scope.credential_scope(),
        payload_hash_bytes(canonical_request.as_bytes())
    );
    let signature = hex::encode(hmac(&scope.signing_key(keys)?, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{}, SignedHeaders={signed_headers}, Signature={signature}",
        keys.access_key_id,
        scope.credential_scope(),
    );
    headers.insert(
        http::header::AUTHORIZATION,
        header_value(&authorization, "authorization")?,
    );
    Ok(())
}

/// Date, region and service a signature is bound to.
struct Scope<'a> {
    region: &'a Region,
    date: String,
    timestamp: String,
}

impl<'a> Scope<'a> {
    fn new(region: &'a Region, now: OffsetDateTime) -> Self {
        let date = format!(
            "{:04}{:02}{:02}",
            now.year(),
            u8::from(now.month()),
            now.day()
        );
        let timestamp = format!(
            "{date}T{:02}{:02}{:02}Z",
            now.hour(),
            now.minute(),
            now.second()
        );
        Self {
            region,
            date,
            timestamp,
        }
    }

    fn credential_scope(&self) -> String {
        format!("{}/{}/{SERVICE}/aws4_request", self.date, self.region.as_str())
    }

    fn signing_key(&self, keys: &SigningKeys) -> Result<Vec<u8>, Error> {
        let secret = format!("AWS4{}", keys.secret_access_key);
        [
            self.date.as_bytes(),
            self.region.as_str().as_bytes(),
            SERVICE.as_bytes(),
            b"aws4_request",
        ]
        .into_iter()
        .try_fold(secret.into_bytes(), |key, data| hmac(&key, data))
    }
}

fn header_value(value: &str, name: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|_| Error::signing(format!("invalid {name} header value")))
}

/// `host[:port]`, the port only when it is not the scheme default.
fn host(url: &url::Url) -> Result<String, Error> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::invalid_config("endpoint must include host"))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Lowercased, sorted headers that take part in the signature.
fn canonical_headers(headers: &HeaderMap) -> (String, String) {
    let mut pairs = headers
        .iter()
        .filter(|(name, _)| is_signed(name.as_str()))
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_ascii_lowercase(), collapse_whitespace(value)))
        })
        .collect::<Vec<_>>();
    pairs.sort();

    let canonical = pairs
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect::<String>();
    let signed = pairs
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    (canonical, signed)
}

fn is_signed(name: &str) -> bool {
    matches!(name, "host" | "content-type" | "range") || name.starts_with("x-amz-")
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|_| Error::signing("invalid HMAC key"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
