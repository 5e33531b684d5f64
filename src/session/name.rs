//! Session identifier normalization.

/// Turn a display name into a session identifier.
///
/// Leading and trailing whitespace is dropped and every internal run of
/// whitespace becomes a single hyphen. Anything else is kept as-is, so
/// `"My   Cool Session"` becomes `"My-Cool-Session"`.
pub fn normalize_session_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("-")
}
