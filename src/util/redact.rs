pub(crate) fn redact_value(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return "<redacted>".to_string();
    }

    let head = value.chars().take(4).collect::<String>();
    let tail = value
        .chars()
        .rev()
        .take(4)
        .collect::<String>()
        .chars()
        .rev()
        .collect::<String>();

    if head.len() + tail.len() >= value.len() {
        return "<redacted>".to_string();
    }

    format!("{head}...{tail}")
}

/// Redacts an optional secret, keeping `None` and empty values distinguishable.
pub(crate) fn redact_optional(value: &Option<String>) -> &'static str {
    match value.as_deref() {
        None => "<none>",
        Some(v) if v.is_empty() => "<empty>",
        Some(_) => "<redacted>",
    }
}

pub(crate) fn redact_secret(value: &str) -> &'static str {
    if value.is_empty() { "<empty>" } else { "<redacted>" }
}
