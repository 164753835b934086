//! Named transport and pool choices
//!
//! Configuration picks how node connections are opened and whether their
//! pool belongs to one cache or is shared across the process.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use clap::ValueEnum;
use parking_lot::Mutex;
use tracing::debug;

use super::pool::{ConnectionFactory, ConnectionPool, Connector};
use crate::config::{AuthConfig, CacheConfig};

/// How node connections are opened
#[derive(Clone, Default)]
pub enum ConnectorKind {
    /// Plain TCP with the configured timeouts and credentials
    #[default]
    Tcp,
    /// Caller-supplied transport
    Custom(Arc<dyn Connector>),
}

impl ConnectorKind {
    pub fn build(&self, config: &CacheConfig) -> Arc<dyn Connector> {
        match self {
            ConnectorKind::Tcp => Arc::new(config.tcp_connector()),
            ConnectorKind::Custom(connector) => Arc::clone(connector),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Tcp => "tcp",
            ConnectorKind::Custom(_) => "custom",
        }
    }
}

/// Custom connectors compare by identity
impl PartialEq for ConnectorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConnectorKind::Tcp, ConnectorKind::Tcp) => true,
            (ConnectorKind::Custom(a), ConnectorKind::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for ConnectorKind {}

impl Hash for ConnectorKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ConnectorKind::Tcp => 0usize.hash(state),
            ConnectorKind::Custom(connector) => {
                (Arc::as_ptr(connector) as *const () as usize).hash(state)
            }
        }
    }
}

impl fmt::Debug for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorKind {
    type Err = String;

    /// Only named transports parse; custom ones are set in code
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ConnectorKind::Tcp),
            other => Err(format!("Unknown connector: {}", other)),
        }
    }
}

/// Who owns the connection pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum PoolScope {
    /// One pool per cache, dropped when the cache closes
    #[default]
    Private,
    /// One pool per connector and credentials for the whole process
    Shared,
}

/// Holding the connector keeps a custom one's address from being reused
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    connector: ConnectorKind,
    auth: Option<AuthConfig>,
}

fn shared_pools() -> &'static Mutex<HashMap<PoolKey, Arc<ConnectionPool>>> {
    static POOLS: OnceLock<Mutex<HashMap<PoolKey, Arc<ConnectionPool>>>> = OnceLock::new();
    POOLS.get_or_init(|| Mutex::new(HashMap::new()))
}

impl PoolScope {
    /// Connection factory for `config` with a pool of this scope
    pub fn build(self, config: &CacheConfig) -> ConnectionFactory {
        let connector = config.connector.build(config);
        match self {
            PoolScope::Private => {
                ConnectionFactory::new(connector, Arc::new(ConnectionPool::new()))
            }
            PoolScope::Shared => {
                let key = PoolKey {
                    connector: config.connector.clone(),
                    auth: config.auth.clone(),
                };
                let pool = {
                    let mut pools = shared_pools().lock();
                    Arc::clone(pools.entry(key).or_insert_with(|| {
                        debug!("Creating shared {} pool", config.connector);
                        Arc::new(ConnectionPool::new())
                    }))
                };
                ConnectionFactory::shared(connector, pool)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PoolScope::Private => "private",
            PoolScope::Shared => "shared",
        }
    }
}

impl fmt::Display for PoolScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "private" => Ok(PoolScope::Private),
            "shared" => Ok(PoolScope::Shared),
            other => Err(format!("Unknown pool scope: {}", other)),
        }
    }
}
