//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `SchedulerConfig::from_env` and
//! the logging setup.
//!
//! ```ignore
//! use greenrt_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("GREENRT_NUM_WORKERS", 4);
//! let enabled = env_get_bool("GREENRT_ENABLED", true);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Boolean lookup
///
/// "1", "true", "yes", "on" (any case) are true; "0", "false", "no", "off"
/// are false. Anything else, including unset, yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// `Some(T)` when `key` is set and parses
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Milliseconds in `key` as a `Duration`
#[inline]
pub fn env_get_millis(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key).map(Duration::from_millis).unwrap_or(default)
}

/// Whether `key` is set at all
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names; the test harness runs them
    // on parallel threads sharing one environment.

    #[test]
    fn test_unset_falls_back() {
        let v: usize = env_get("__GREENRT_TEST_UNSET__", 42);
        assert_eq!(v, 42);
        assert!(env_get_bool("__GREENRT_TEST_UNSET__", true));
        assert_eq!(env_get_opt::<u32>("__GREENRT_TEST_UNSET__"), None);
        assert_eq!(env_get_str("__GREENRT_TEST_UNSET__", "x"), "x");
        assert!(!env_is_set("__GREENRT_TEST_UNSET__"));
    }

    #[test]
    fn test_parse_and_trim() {
        std::env::set_var("__GREENRT_TEST_NUM__", " 123 ");
        assert_eq!(env_get::<usize>("__GREENRT_TEST_NUM__", 0), 123);
        std::env::set_var("__GREENRT_TEST_NUM__", "nope");
        assert_eq!(env_get::<usize>("__GREENRT_TEST_NUM__", 9), 9);
        std::env::remove_var("__GREENRT_TEST_NUM__");
    }

    #[test]
    fn test_bool_variants() {
        let key = "__GREENRT_TEST_BOOL__";
        for yes in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var(key, yes);
            assert!(env_get_bool(key, false), "{}", yes);
        }
        for no in ["0", "false", "No", "off"] {
            std::env::set_var(key, no);
            assert!(!env_get_bool(key, true), "{}", no);
        }
        std::env::set_var(key, "garbage");
        assert!(env_get_bool(key, true));
        assert!(!env_get_bool(key, false));
        std::env::remove_var(key);
    }

    #[test]
    fn test_millis() {
        std::env::set_var("__GREENRT_TEST_MS__", "250");
        assert_eq!(
            env_get_millis("__GREENRT_TEST_MS__", Duration::ZERO),
            Duration::from_millis(250)
        );
        std::env::remove_var("__GREENRT_TEST_MS__");
    }
}
