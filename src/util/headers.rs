use http::{HeaderMap, header::AsHeaderName};

pub(crate) fn header_string<N>(headers: &HeaderMap, name: N) -> Option<String>
where
    N: AsHeaderName,
{
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

pub(crate) fn header_u64<N>(headers: &HeaderMap, name: N) -> Option<u64>
where
    N: AsHeaderName,
{
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Entity tag as the gateway sent it, empty when the header is missing.
pub(crate) fn etag(headers: &HeaderMap) -> Option<String> {
    header_string(headers, http::header::ETAG).filter(|v| !v.trim().is_empty())
}
