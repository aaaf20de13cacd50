//! Tag stripping shared by the search and caption adapters.

/// Drop `<...>` tags and trim the result.
///
/// Search snippets highlight matches with `<strong>`; caption cues carry
/// voice and timing tags such as `<c>` or `<00:00:01.000>`.
pub(crate) fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}
