/// Cuts `body` to at most `max_len` bytes on a char boundary, marking the cut with `...`.
pub(crate) fn truncate_snippet(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }
    let cut = (0..=max_len)
        .rev()
        .find(|&idx| body.is_char_boundary(idx))
        .unwrap_or(0);
    format!("{}...", &body[..cut])
}
