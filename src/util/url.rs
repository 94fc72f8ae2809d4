use url::Url;

use crate::error::Error;

pub(crate) struct ResolvedUrl {
    pub(crate) url: Url,
    pub(crate) canonical_uri: String,
    pub(crate) canonical_query_string: String,
}

/// Object keys are workspace paths; a leading slash is not part of the key.
pub(crate) fn normalize_key(path: &str) -> Result<&str, Error> {
    let key = path.trim_start_matches('/');
    if key.trim().is_empty() {
        return Err(Error::invalid_config("object path must not be empty"));
    }
    Ok(key)
}

/// Path-style object URL: `<endpoint>/<bucket>/<key>?<sorted query>`.
pub(crate) fn resolve_url(
    base_url: &Url,
    bucket: &str,
    key: &str,
    query_params: &[(String, String)],
) -> Result<ResolvedUrl, Error> {
    if base_url.host_str().is_none() {
        return Err(Error::invalid_config("endpoint must include host"));
    }

    let canonical_query_string = crate::util::encode::canonical_query_string(query_params);
    let canonical_uri = crate::util::encode::percent_encode_path(&format!("/{bucket}/{key}"));

    let mut url = base_url.clone();
    url.set_path(&canonical_uri);
    url.set_query((!canonical_query_string.is_empty()).then_some(canonical_query_string.as_str()));

    Ok(ResolvedUrl {
        url,
        canonical_uri,
        canonical_query_string,
    })
}

/// Joins a REST route and a workspace path onto the service base URL.
pub(crate) fn service_url(base_url: &Url, route: &str, path: &str) -> Result<Url, Error> {
    let route = route.trim_matches('/');
    let path = crate::util::encode::percent_encode_path(path.trim_start_matches('/'));
    let mut url = base_url.clone();
    let prefix = base_url.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}/{route}/{path}"));
    url.set_query(None);
    url.set_fragment(None);
    if url.host_str().is_none() {
        return Err(Error::invalid_config("server URL must include host"));
    }
    Ok(url)
}
