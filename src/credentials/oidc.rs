use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::Deserialize;
use time::OffsetDateTime;

use super::{AuthKind, CredentialRecord, RefreshedToken, guard::TokenRefresher};
use crate::{
    error::{Error, Result},
    transport::{RequestBody, Transport},
};

/// OAuth client id the file service registers for command-line clients.
pub const DEFAULT_CLIENT_ID: &str = "cells-client";

const TOKEN_ROUTE: &str = "oidc/oauth2";
const ERROR_SNIPPET_LIMIT: usize = 4096;

/// Renews bearer tokens against the file service's OIDC token endpoint.
#[derive(Clone, Debug)]
pub struct OidcTokenClient {
    transport: Transport,
    client_id: String,
}

impl OidcTokenClient {
    pub fn new(transport: Transport, client_id: impl Into<String>) -> Self {
        Self {
            transport,
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl TokenRefresher for OidcTokenClient {
    fn refresh(&self, record: &CredentialRecord) -> Result<RefreshedToken> {
        let params = match record.auth_kind {
            AuthKind::PersonalAccessToken => {
                return Err(Error::invalid_config(
                    "personal access tokens cannot be refreshed",
                ));
            }
            AuthKind::OAuth => {
                let refresh_token = record
                    .refresh_token
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| Error::invalid_config("no refresh token available"))?;
                vec![
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", self.client_id.as_str()),
                ]
            }
            AuthKind::ClientPassword => {
                if record.password.is_empty() {
                    return Err(Error::invalid_config("no password available"));
                }
                vec![
                    ("grant_type", "password"),
                    ("username", record.user.as_str()),
                    ("password", record.password.as_str()),
                    ("client_id", self.client_id.as_str()),
                ]
            }
        };

        let base = url::Url::parse(&record.url)
            .map_err(|_| Error::invalid_config("server URL must be a valid absolute URL"))?;
        let url = crate::util::url::service_url(&base, TOKEN_ROUTE, "token")?;

        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(http::header::ACCEPT, HeaderValue::from_static("application/json"));

        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        let body = Bytes::from(body);
        let resp = self
            .transport
            .send(Method::POST, url, headers, RequestBody::Bytes(body))?;

        let status = resp.status();
        let text = crate::transport::read_body_string(resp.into_body())?;
        if !status.is_success() {
            return Err(token_error(status, &text));
        }

        parse_token_response(&text, OffsetDateTime::now_utc())
    }
}

fn token_error(status: StatusCode, body: &str) -> Error {
    #[derive(Deserialize)]
    struct OidcError {
        error: Option<String>,
        error_description: Option<String>,
    }

    let snippet = (!body.trim().is_empty())
        .then(|| crate::util::text::truncate_snippet(body, ERROR_SNIPPET_LIMIT));
    let (code, message) = match serde_json::from_str::<OidcError>(body) {
        Ok(parsed) => (parsed.error, parsed.error_description),
        Err(_) => (None, None),
    };

    Error::Api {
        status,
        code,
        message,
        request_id: None,
        body_snippet: snippet,
    }
}

fn parse_token_response(body: &str, now: OffsetDateTime) -> Result<RefreshedToken> {
    #[derive(Deserialize)]
    struct TokenResponse {
        #[serde(default)]
        id_token: Option<String>,
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        expires_in: Option<i64>,
    }

    let parsed = serde_json::from_str::<TokenResponse>(body)
        .map_err(|e| Error::decode("failed to parse token response", Some(Box::new(e))))?;

    let id_token = parsed
        .id_token
        .filter(|t| !t.is_empty())
        .unwrap_or(parsed.access_token);
    if id_token.is_empty() {
        return Err(Error::decode("token response carries no token", None));
    }

    Ok(RefreshedToken {
        id_token,
        refresh_token: parsed.refresh_token.filter(|r| !r.is_empty()),
        expires_at: parsed
            .expires_in
            .map(|secs| now.unix_timestamp().saturating_add(secs)),
    })
}
