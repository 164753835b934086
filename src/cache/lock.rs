//! Advisory locks stored as cache keys
//!
//! A lock is `SET key token NX PX ms` on the slot owner. Release deletes the
//! key only while it still holds our token, so a lock that expired and was
//! taken by someone else is left alone.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::client::unexpected;
use super::ClusterCache;
use crate::utils::{RespValue, Result};

/// GET + DEL in one round trip, only if the token still matches
const RELEASE_SCRIPT: &str = "if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else return 0 end";

/// How to acquire a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Key version; the configured one if `None`
    pub version: Option<i64>,
    /// Lifetime of the lock key; `None` holds it until released
    pub timeout: Option<Duration>,
    /// Pause between attempts while blocking
    pub sleep: Duration,
    /// Give up after this long; `None` waits forever, zero tries once
    pub blocking_timeout: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            version: None,
            timeout: None,
            sleep: Duration::from_millis(100),
            blocking_timeout: None,
        }
    }
}

impl LockOptions {
    /// One attempt, no waiting
    pub fn non_blocking() -> Self {
        Self {
            blocking_timeout: Some(Duration::ZERO),
            ..Self::default()
        }
    }
}

/// A held lock; released on drop if not released explicitly
pub struct CacheLock<'a> {
    cache: &'a ClusterCache,
    key: String,
    token: String,
    released: bool,
}

impl CacheLock<'_> {
    /// Namespaced key holding the lock
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns false if the lock had already expired or changed hands
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.cache.release_lock(&self.key, &self.token)
    }
}

impl fmt::Debug for CacheLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLock")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for CacheLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.cache.release_lock(&self.key, &self.token) {
            warn!("Failed to release lock {}: {}", self.key, e);
        }
    }
}

impl ClusterCache {
    /// Acquire the lock named `key`
    ///
    /// Returns `None` if `blocking_timeout` ran out before the lock was free.
    pub fn lock(&self, key: &str, options: LockOptions) -> Result<Option<CacheLock<'_>>> {
        let full = self.make_key(key, options.version);
        let token = format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..));
        let started = Instant::now();

        loop {
            if self.try_lock(&full, &token, options.timeout)? {
                debug!("Acquired lock {}", full);
                return Ok(Some(CacheLock {
                    cache: self,
                    key: full,
                    token,
                    released: false,
                }));
            }
            if let Some(limit) = options.blocking_timeout {
                if started.elapsed() >= limit {
                    debug!("Gave up on lock {} after {:?}", full, limit);
                    return Ok(None);
                }
            }
            thread::sleep(options.sleep);
        }
    }

    fn try_lock(&self, full: &str, token: &str, timeout: Option<Duration>) -> Result<bool> {
        let mut millis = itoa::Buffer::new();
        let mut args: Vec<&[u8]> = vec![b"SET", full.as_bytes(), token.as_bytes(), b"NX"];
        if let Some(timeout) = timeout {
            // PX 0 is rejected by the server
            let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
            args.push(b"PX");
            args.push(millis.format(ms).as_bytes());
        }

        match self.execute(full.as_bytes(), true, &args)? {
            RespValue::Null => Ok(false),
            reply if reply.is_ok() => Ok(true),
            other => Err(unexpected("OK", &other)),
        }
    }

    fn release_lock(&self, full: &str, token: &str) -> Result<bool> {
        let args: [&[u8]; 5] = [
            b"EVAL",
            RELEASE_SCRIPT.as_bytes(),
            b"1",
            full.as_bytes(),
            token.as_bytes(),
        ];
        match self.execute(full.as_bytes(), true, &args)? {
            RespValue::Integer(n) => Ok(n == 1),
            other => Err(unexpected("integer", &other)),
        }
    }
}
