//! Cluster cache client
//!
//! Every operation builds the namespaced key, asks the node manager for a
//! connection and runs one command on it. A MOVED/ASK reply means the
//! routing table is stale: the manager rebuilds and the command is retried
//! up to `redirect_retries` times.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{Deadline, Expiry, SetOptions};
use crate::client::ConnectionFactory;
use crate::cluster::{NodeManager, RouteTarget};
use crate::codec::ValueCodec;
use crate::config::CacheConfig;
use crate::utils::{CacheError, ProtocolError, RespValue, Result};

/// EXISTS + INCRBY in one round trip so an expiring key is never revived
const INCR_SCRIPT: &str = "local exists = redis.call('EXISTS', KEYS[1])
if (exists == 1) then
    return redis.call('INCRBY', KEYS[1], ARGV[1])
else return false end";

pub struct ClusterCache {
    manager: Arc<NodeManager>,
    codec: ValueCodec,
    key_prefix: String,
    key_version: i64,
    default_timeout_secs: Option<u64>,
    redirect_retries: usize,
}

impl ClusterCache {
    /// Connect to the cluster described by `config`, using its connector
    /// and pool scope
    pub fn connect(config: &CacheConfig) -> Result<Self> {
        config.validate().map_err(CacheError::Config)?;
        let factory = Arc::new(config.pool_scope.build(config));
        Self::with_factory(config, factory)
    }

    /// Connect using an existing factory, sharing its pool
    pub fn with_factory(config: &CacheConfig, factory: Arc<ConnectionFactory>) -> Result<Self> {
        let manager =
            NodeManager::initialize(config.seeds.clone(), factory, config.manager_options())?;
        Ok(Self::with_manager(config, manager))
    }

    /// Wrap an initialized node manager
    pub fn with_manager(config: &CacheConfig, manager: Arc<NodeManager>) -> Self {
        Self {
            manager,
            codec: ValueCodec::from_kinds(config.serializer, config.compressor),
            key_prefix: config.key_prefix.clone(),
            key_version: config.key_version,
            default_timeout_secs: config.default_timeout_secs,
            redirect_retries: config.redirect_retries,
        }
    }

    pub fn manager(&self) -> &Arc<NodeManager> {
        &self.manager
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// Namespaced key, using the configured version unless one is given
    pub fn make_key(&self, key: &str, version: Option<i64>) -> String {
        self.make_key_with(key, version, None)
    }

    /// Like `make_key`, with an optional prefix overriding the configured one
    pub fn make_key_with(&self, key: &str, version: Option<i64>, prefix: Option<&str>) -> String {
        super::make_key(
            prefix.unwrap_or(&self.key_prefix),
            version.unwrap_or(self.key_version),
            key,
        )
    }

    /// Hash slot the namespaced `key` maps to
    pub fn slot(&self, key: &str) -> u16 {
        self.manager.slot_for_key(self.make_key(key, None).as_bytes())
    }

    /// Decoded value, or `None` if the key is missing
    pub fn get(&self, key: &str, version: Option<i64>) -> Result<Option<Value>> {
        self.get_full(&self.make_key(key, version), false)
    }

    /// Decoded value, or `default` if the key is missing
    pub fn get_or(&self, key: &str, default: Value, version: Option<i64>) -> Result<Value> {
        Ok(self.get(key, version)?.unwrap_or(default))
    }

    /// Store `value`. Returns false if the expiry removed the key instead.
    pub fn set(
        &self,
        key: &str,
        value: &Value,
        expiry: Expiry,
        version: Option<i64>,
    ) -> Result<bool> {
        self.set_with(key, value, expiry, SetOptions::default(), version)
    }

    /// Store `value` subject to NX/XX. Returns false if the condition failed
    /// or the expiry removed the key.
    pub fn set_with(
        &self,
        key: &str,
        value: &Value,
        expiry: Expiry,
        options: SetOptions,
        version: Option<i64>,
    ) -> Result<bool> {
        self.set_full(&self.make_key(key, version), value, expiry, options)
    }

    /// Store `value` only if `key` does not exist yet
    pub fn add(
        &self,
        key: &str,
        value: &Value,
        expiry: Expiry,
        version: Option<i64>,
    ) -> Result<bool> {
        self.set_with(key, value, expiry, SetOptions::if_absent(), version)
    }

    /// Returns true if the key existed
    pub fn delete(&self, key: &str, version: Option<i64>) -> Result<bool> {
        self.delete_with_prefix(key, version, None)
    }

    /// Like `delete`, for a key written under another prefix
    pub fn delete_with_prefix(
        &self,
        key: &str,
        version: Option<i64>,
        prefix: Option<&str>,
    ) -> Result<bool> {
        self.delete_full(&self.make_key_with(key, version, prefix))
    }

    pub fn exists(&self, key: &str, version: Option<i64>) -> Result<bool> {
        self.exists_full(&self.make_key(key, version), false)
    }

    /// Change the expiry of an existing key. Returns false if the key is
    /// missing or the expiry removed it.
    pub fn expire(&self, key: &str, expiry: Expiry, version: Option<i64>) -> Result<bool> {
        let full = self.make_key(key, version);
        match expiry.resolve(self.default_timeout_secs) {
            Deadline::Expired => {
                self.delete_full(&full)?;
                Ok(false)
            }
            Deadline::After(secs) => {
                let mut buf = itoa::Buffer::new();
                let args: [&[u8]; 3] = [b"EXPIRE", full.as_bytes(), buf.format(secs).as_bytes()];
                let reply = self.execute(full.as_bytes(), true, &args)?;
                Ok(expect_integer(reply)? == 1)
            }
            Deadline::Persist => {
                if !self.exists_full(&full, true)? {
                    return Ok(false);
                }
                let args: [&[u8]; 2] = [b"PERSIST", full.as_bytes()];
                expect_integer(self.execute(full.as_bytes(), true, &args)?)?;
                Ok(true)
            }
        }
    }

    /// Same as `expire`
    pub fn touch(&self, key: &str, expiry: Expiry, version: Option<i64>) -> Result<bool> {
        self.expire(key, expiry, version)
    }

    /// Remaining lifetime in seconds
    ///
    /// `None` means the key never expires, `Some(0)` that it does not exist.
    pub fn ttl(&self, key: &str, version: Option<i64>) -> Result<Option<u64>> {
        match self.raw_ttl(&self.make_key(key, version), false)? {
            -2 => Ok(Some(0)),
            secs if secs < 0 => Ok(None),
            secs => Ok(Some(secs as u64)),
        }
    }

    /// Add `delta` to an integer value; fails with `KeyNotFound` if missing
    pub fn incr(&self, key: &str, delta: i64, version: Option<i64>) -> Result<i64> {
        let full = self.make_key(key, version);
        let mut buf = itoa::Buffer::new();
        let args: [&[u8]; 5] = [
            b"EVAL",
            INCR_SCRIPT.as_bytes(),
            b"1",
            full.as_bytes(),
            buf.format(delta).as_bytes(),
        ];

        match self.execute(full.as_bytes(), true, &args)? {
            RespValue::Integer(n) => Ok(n),
            RespValue::Null => Err(CacheError::KeyNotFound(key.to_string())),
            // The stored text is not something INCRBY accepts
            RespValue::Error(e) => {
                debug!("Server-side increment of {} failed: {}", full, e);
                self.incr_fallback(key, &full, delta)
            }
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Subtract `delta`; see `incr`
    pub fn decr(&self, key: &str, delta: i64, version: Option<i64>) -> Result<i64> {
        let delta = delta.checked_neg().ok_or_else(|| {
            CacheError::Config(format!("Cannot negate decrement {}", delta))
        })?;
        self.incr(key, delta, version)
    }

    /// Read, add and write back, keeping the remaining TTL
    fn incr_fallback(&self, key: &str, full: &str, delta: i64) -> Result<i64> {
        let ttl = self.raw_ttl(full, true)?;
        // -2: expired since the script ran
        if ttl == -2 {
            return Err(CacheError::KeyNotFound(key.to_string()));
        }
        let current = self
            .get_full(full, true)?
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))?;
        let current = current.as_i64().ok_or_else(|| ProtocolError::UnexpectedResponse {
            expected: "integer value".to_string(),
            actual: current.to_string(),
        })?;
        let next = current.checked_add(delta).ok_or_else(|| {
            ProtocolError::ServerError("increment or decrement would overflow".to_string())
        })?;

        self.set_full(full, &Value::from(next), expiry_from_ttl(ttl), SetOptions::default())?;
        Ok(next)
    }

    /// Move a key to `version + delta` (default version if `None`),
    /// keeping its value and TTL. Returns the new version.
    pub fn incr_version(&self, key: &str, delta: i64, version: Option<i64>) -> Result<i64> {
        let version = version.unwrap_or(self.key_version);
        let new_version = version.checked_add(delta).ok_or_else(|| {
            CacheError::Config(format!("Version {} + {} overflows", version, delta))
        })?;

        let old_key = self.make_key(key, Some(version));
        let value = self
            .get_full(&old_key, true)?
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))?;
        let ttl = self.raw_ttl(&old_key, true)?;
        if ttl == -2 {
            return Err(CacheError::KeyNotFound(key.to_string()));
        }

        let new_key = self.make_key(key, Some(new_version));
        self.set_full(&new_key, &value, expiry_from_ttl(ttl), SetOptions::default())?;
        self.delete_full(&old_key)?;
        Ok(new_version)
    }

    /// FLUSHALL on every slot owner
    ///
    /// Every owner is attempted; the first failure is returned.
    pub fn clear(&self) -> Result<()> {
        let mut first_err = None;
        for conn in self.manager.owner_connections() {
            let result = conn
                .execute(&["FLUSHALL"])
                .map_err(|source| CacheError::ConnectionInterrupted {
                    endpoint: conn.endpoint().clone(),
                    source,
                })
                .and_then(|reply| match reply {
                    RespValue::Error(e) => Err(ProtocolError::ServerError(e).into()),
                    _ => Ok(()),
                });
            if let Err(e) = result {
                warn!("FLUSHALL on {} failed: {}", conn.endpoint(), e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Stop topology refresh and release connections
    pub fn close(&self) {
        self.manager.close();
    }

    fn get_full(&self, full: &str, for_write: bool) -> Result<Option<Value>> {
        let args: [&[u8]; 2] = [b"GET", full.as_bytes()];
        match self.execute(full.as_bytes(), for_write, &args)? {
            RespValue::Null => Ok(None),
            RespValue::BulkString(data) => Ok(Some(self.codec.decode(&data)?)),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    fn set_full(
        &self,
        full: &str,
        value: &Value,
        expiry: Expiry,
        options: SetOptions,
    ) -> Result<bool> {
        if options.nx && options.xx {
            return Err(CacheError::Config(
                "NX and XX are mutually exclusive".to_string(),
            ));
        }

        let deadline = expiry.resolve(self.default_timeout_secs);
        if deadline == Deadline::Expired {
            self.delete_full(full)?;
            return Ok(false);
        }

        let payload = self.codec.encode(value)?;
        let mut secs = itoa::Buffer::new();
        let mut args: Vec<&[u8]> = Vec::with_capacity(6);
        args.push(b"SET");
        args.push(full.as_bytes());
        args.push(&payload);
        if let Deadline::After(n) = deadline {
            args.push(b"EX");
            args.push(secs.format(n).as_bytes());
        }
        if options.nx {
            args.push(b"NX");
        } else if options.xx {
            args.push(b"XX");
        }

        match self.execute(full.as_bytes(), true, &args)? {
            // NX/XX condition not met
            RespValue::Null => Ok(false),
            reply if reply.is_ok() => Ok(true),
            other => Err(unexpected("OK", &other)),
        }
    }

    fn delete_full(&self, full: &str) -> Result<bool> {
        let args: [&[u8]; 2] = [b"DEL", full.as_bytes()];
        Ok(expect_integer(self.execute(full.as_bytes(), true, &args)?)? > 0)
    }

    fn exists_full(&self, full: &str, for_write: bool) -> Result<bool> {
        let args: [&[u8]; 2] = [b"EXISTS", full.as_bytes()];
        Ok(expect_integer(self.execute(full.as_bytes(), for_write, &args)?)? > 0)
    }

    /// TTL reply as sent by the server (-2 missing, -1 no expiry)
    fn raw_ttl(&self, full: &str, for_write: bool) -> Result<i64> {
        let args: [&[u8]; 2] = [b"TTL", full.as_bytes()];
        expect_integer(self.execute(full.as_bytes(), for_write, &args)?)
    }

    /// Run one command on the connection routed for `key`
    ///
    /// Redirect replies trigger a rebuild and a retry; any other reply,
    /// including server errors, is returned as is.
    pub(super) fn execute(&self, key: &[u8], for_write: bool, args: &[&[u8]]) -> Result<RespValue> {
        let mut redirects = 0;
        loop {
            let RouteTarget {
                version,
                connection,
                ..
            } = self.manager.lookup(key, for_write)?;

            let reply = connection.execute_binary(args).map_err(|source| {
                CacheError::ConnectionInterrupted {
                    endpoint: connection.endpoint().clone(),
                    source,
                }
            })?;

            let Some(redirect) = reply.parse_redirect() else {
                return Ok(reply);
            };

            warn!(
                "Slot {} redirected from {} to {}:{} (table version {}), rebuilding topology",
                redirect.slot,
                connection.endpoint(),
                redirect.host,
                redirect.port,
                version
            );
            if let Err(e) = self.manager.rebuild() {
                warn!("Topology rebuild after redirect failed: {}", e);
            }

            if redirects >= self.redirect_retries {
                return Err(CacheError::Redirect {
                    endpoint: connection.endpoint().clone(),
                    redirect,
                });
            }
            redirects += 1;
        }
    }
}

fn expiry_from_ttl(ttl: i64) -> Expiry {
    if ttl < 0 {
        Expiry::Never
    } else {
        // TTL rounds down; a key about to expire still gets a second
        Expiry::Seconds(ttl.max(1))
    }
}

fn expect_integer(reply: RespValue) -> Result<i64> {
    match reply {
        RespValue::Integer(n) => Ok(n),
        other => Err(unexpected("integer", &other)),
    }
}

pub(super) fn unexpected(expected: &str, reply: &RespValue) -> CacheError {
    match reply {
        RespValue::Error(e) => ProtocolError::ServerError(e.clone()).into(),
        other => ProtocolError::UnexpectedResponse {
            expected: expected.to_string(),
            actual: other.type_name().to_string(),
        }
        .into(),
    }
}
