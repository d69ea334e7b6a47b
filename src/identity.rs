//! Server-side identity resolution for new connections

use chrono::NaiveTime;

/// Prefix for generated names
pub const ANON_PREFIX: &str = "Anon_";

/// Resolve the display name for a new session.
///
/// Uses the requested name if it is non-empty after trimming, otherwise
/// generates `Anon_HHMMSS` from the given wall-clock time.
pub fn resolve_identity(requested: Option<&str>, now: NaiveTime) -> String {
    match requested.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{}{}", ANON_PREFIX, now.format("%H%M%S")),
    }
}

/// Resolve using the server's local clock
pub fn resolve_identity_now(requested: Option<&str>) -> String {
    resolve_identity(requested, chrono::Local::now().time())
}
