//! Quoting for values embedded in `sh -c` command lines.

/// Punctuation that `sh` passes through unchanged outside quotes.
const SAFE_PUNCTUATION: &str = "/._-:=%@+,";

/// Returns true if `c` needs no quoting in a shell word.
pub fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || SAFE_PUNCTUATION.contains(c)
}

/// Quotes a value for `sh` when it contains anything beyond the safe charset.
///
/// Single quotes inside the value are closed, escaped and reopened.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_shell_safe) {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\"'\"'"))
    }
}
