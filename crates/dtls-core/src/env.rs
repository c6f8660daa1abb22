//! Environment variable utilities
//!
//! The server takes no command-line flags. Deployment overrides come from
//! `DTLS_*` environment variables parsed with these helpers.
//!
//! # Usage
//!
//! ```ignore
//! use dtls_core::env::{env_get, env_get_opt, env_get_str};
//!
//! let port: u16 = env_get("DTLS_PORT", 11111);
//! let ca: Option<String> = env_get_opt("DTLS_CA_FILE");
//! let level = env_get_str("DTLS_LOG_LEVEL", "info");
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
///
/// Unset and unparsable values both fall back to `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as optional value
///
/// Returns `Some(T)` if the variable is set and parses successfully,
/// `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
