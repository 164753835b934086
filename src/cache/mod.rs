//! Key/value cache facade over the cluster router

pub mod client;
pub mod lock;

use std::time::Duration;

pub use client::ClusterCache;
pub use lock::{CacheLock, LockOptions};

/// Namespaced key: `prefix:version:key`
pub fn make_key(prefix: &str, version: i64, key: &str) -> String {
    format!("{}:{}:{}", prefix, version, key)
}

/// Expiry requested for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// The configured default timeout
    #[default]
    Default,
    /// No expiry
    Never,
    /// Expire after this many seconds; zero or negative removes the key
    Seconds(i64),
}

impl From<Duration> for Expiry {
    fn from(d: Duration) -> Self {
        Expiry::Seconds(i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }
}

/// What an `Expiry` means once the default is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    Persist,
    After(u64),
    Expired,
}

impl Expiry {
    pub(crate) fn resolve(self, default_secs: Option<u64>) -> Deadline {
        match self {
            Expiry::Default => default_secs.map_or(Deadline::Persist, Deadline::After),
            Expiry::Never => Deadline::Persist,
            Expiry::Seconds(n) if n <= 0 => Deadline::Expired,
            Expiry::Seconds(n) => Deadline::After(n as u64),
        }
    }
}

/// Conditional write flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// Only write if the key does not exist
    pub nx: bool,
    /// Only write if the key already exists
    pub xx: bool,
}

impl SetOptions {
    pub fn if_absent() -> Self {
        Self {
            nx: true,
            xx: false,
        }
    }

    pub fn if_present() -> Self {
        Self {
            nx: false,
            xx: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key() {
        assert_eq!(make_key("", 1, "user"), ":1:user");
        assert_eq!(make_key("app", -2, "{tag}x"), "app:-2:{tag}x");
    }

    #[test]
    fn test_resolve_expiry() {
        assert_eq!(Expiry::Default.resolve(Some(300)), Deadline::After(300));
        assert_eq!(Expiry::Default.resolve(None), Deadline::Persist);
        assert_eq!(Expiry::Never.resolve(Some(300)), Deadline::Persist);
        assert_eq!(Expiry::Seconds(5).resolve(None), Deadline::After(5));
        assert_eq!(Expiry::Seconds(0).resolve(Some(300)), Deadline::Expired);
        assert_eq!(Expiry::Seconds(-3).resolve(Some(300)), Deadline::Expired);
    }

    #[test]
    fn test_expiry_from_duration() {
        assert_eq!(Expiry::from(Duration::from_secs(90)), Expiry::Seconds(90));
        assert_eq!(Expiry::from(Duration::from_millis(10)), Expiry::Seconds(0));
    }
}
