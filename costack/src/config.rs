//! Engine configuration, read from the environment.
//!
//! - `COSTACK_GUARD_SIZE` - size in bytes of the guard stack used while restoring images
//!   (rounded up to whole pages, default 64 KiB)

use std::str::FromStr;

/// Default guard stack size. The copy routine itself needs very little, the rest covers a lazily
/// bound `memcpy` going through the dynamic linker on first use.
pub const DEFAULT_GUARD_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub guard_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            guard_size: DEFAULT_GUARD_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        EngineConfig {
            guard_size: env_get("COSTACK_GUARD_SIZE", DEFAULT_GUARD_SIZE),
        }
    }
}

/// Environment variable parsed as `T`, or `default` when unset or malformed.
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_get_falls_back_on_garbage() {
        std::env::set_var("COSTACK_TEST_GUARD", "lots");
        assert_eq!(env_get("COSTACK_TEST_GUARD", 4096usize), 4096);
        std::env::set_var("COSTACK_TEST_GUARD", " 8192 ");
        assert_eq!(env_get("COSTACK_TEST_GUARD", 4096usize), 8192);
        std::env::remove_var("COSTACK_TEST_GUARD");
    }

    #[test]
    fn env_get_bool_values() {
        std::env::set_var("COSTACK_TEST_FLAG", "On");
        assert!(env_get_bool("COSTACK_TEST_FLAG", false));
        std::env::set_var("COSTACK_TEST_FLAG", "0");
        assert!(!env_get_bool("COSTACK_TEST_FLAG", true));
        std::env::remove_var("COSTACK_TEST_FLAG");
        assert!(env_get_bool("COSTACK_TEST_FLAG", true));
    }

    #[test]
    fn default_guard_size() {
        assert_eq!(EngineConfig::default().guard_size, DEFAULT_GUARD_SIZE);
    }
}
