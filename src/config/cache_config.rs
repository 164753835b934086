//! Cache client configuration derived from CLI arguments or built in code

use std::time::Duration;

use super::cli::CliArgs;
use crate::client::{ConnectorKind, PoolScope, TcpConnector};
use crate::cluster::{Endpoint, ManagerOptions};
use crate::codec::{CompressorKind, SerializerKind};

/// Authentication configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthConfig {
    pub password: String,
    pub username: Option<String>,
}

/// Complete cache client configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    // Connection
    pub seeds: Vec<Endpoint>,
    pub auth: Option<AuthConfig>,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub connector: ConnectorKind,
    pub pool_scope: PoolScope,

    // Topology
    pub refresh_interval: Duration,
    pub redirect_retries: usize,
    pub slot_cache_capacity: usize,

    // Values
    pub serializer: SerializerKind,
    pub compressor: CompressorKind,
    pub key_prefix: String,
    pub key_version: i64,
    /// Expiry applied by `Expiry::Default`; `None` stores without expiry
    pub default_timeout_secs: Option<u64>,
}

impl CacheConfig {
    /// Library defaults for the given seed nodes
    pub fn new(seeds: Vec<Endpoint>) -> Self {
        Self {
            seeds,
            auth: None,
            connect_timeout: Duration::from_secs(10),
            socket_timeout: Duration::from_secs(5),
            connector: ConnectorKind::default(),
            pool_scope: PoolScope::default(),
            refresh_interval: Duration::from_secs(300),
            redirect_retries: 1,
            slot_cache_capacity: 4096,
            serializer: SerializerKind::default(),
            compressor: CompressorKind::default(),
            key_prefix: String::new(),
            key_version: 1,
            default_timeout_secs: Some(300),
        }
    }

    /// Parse a comma separated `host:port` list
    pub fn from_servers(servers: &str) -> Result<Self, String> {
        let seeds = servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<Endpoint>)
            .collect::<Result<Vec<_>, _>>()?;
        let config = Self::new(seeds);
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        // Validate first
        args.validate()?;

        let seeds = args
            .hosts
            .iter()
            .map(|h| h.parse::<Endpoint>())
            .collect::<Result<Vec<_>, _>>()?;

        // Build auth config
        let auth = args.password.as_ref().map(|p| AuthConfig {
            password: p.clone(),
            username: args.username.clone(),
        });

        let config = Self {
            seeds,
            auth,
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            socket_timeout: Duration::from_millis(args.socket_timeout_ms),
            connector: args.connector.clone(),
            pool_scope: args.pool_scope,
            refresh_interval: Duration::from_secs(args.refresh_interval_secs),
            redirect_retries: args.redirect_retries,
            slot_cache_capacity: args.slot_cache_capacity,
            serializer: args.serializer,
            compressor: args.compressor,
            key_prefix: args.key_prefix.clone(),
            key_version: args.key_version,
            default_timeout_secs: match args.default_ttl_secs {
                0 => None,
                secs => Some(secs),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.seeds.is_empty() {
            return Err("At least one seed node is required".to_string());
        }
        if self.connect_timeout.is_zero() || self.socket_timeout.is_zero() {
            return Err("Connect and socket timeouts must be positive".to_string());
        }
        if self.refresh_interval.is_zero() {
            return Err("Refresh interval must be positive".to_string());
        }
        if self.default_timeout_secs == Some(0) {
            return Err("Default timeout must be positive (use None for no expiry)".to_string());
        }
        Ok(())
    }

    /// TCP connector with this configuration's timeouts and credentials
    pub fn tcp_connector(&self) -> TcpConnector {
        TcpConnector {
            connect_timeout: self.connect_timeout,
            socket_timeout: self.socket_timeout,
            auth: self.auth.clone(),
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            refresh_interval: self.refresh_interval,
            slot_cache_capacity: self.slot_cache_capacity,
        }
    }
}
