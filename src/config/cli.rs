//! Command-line argument parsing
//!
//! Connection options mirror the cache configuration; the subcommand picks
//! the single operation to run.

use clap::{Parser, Subcommand};

use crate::client::{ConnectorKind, PoolScope};
use crate::codec::{CompressorKind, SerializerKind};

/// Slot-aware cache client for Valkey clusters
#[derive(Parser, Debug, Clone)]
#[command(name = "cluster-cache")]
#[command(version, about, long_about = None)]
#[command(disable_help_flag = true)]
#[allow(clippy::manual_non_exhaustive)]
pub struct CliArgs {
    /// Print help information
    #[arg(long = "help", action = clap::ArgAction::Help)]
    help: (),

    // ===== Connection Options =====
    /// Seed node as host:port (can be specified multiple times)
    #[arg(short = 'h', long = "host", default_value = "127.0.0.1:7000", action = clap::ArgAction::Append)]
    pub hosts: Vec<String>,

    /// Password for AUTH command
    #[arg(short = 'a', long = "auth")]
    pub password: Option<String>,

    /// Username for ACL AUTH (requires --auth)
    #[arg(long = "user")]
    pub username: Option<String>,

    /// Connection timeout in milliseconds
    #[arg(long = "connect-timeout", default_value_t = 10_000)]
    pub connect_timeout_ms: u64,

    /// Socket read/write timeout in milliseconds
    #[arg(long = "socket-timeout", default_value_t = 5_000)]
    pub socket_timeout_ms: u64,

    /// Transport used to reach nodes
    #[arg(long = "connector", default_value = "tcp")]
    pub connector: ConnectorKind,

    /// Whether the connection pool is private to this client or shared
    #[arg(long = "pool", value_enum, default_value_t = PoolScope::Private)]
    pub pool_scope: PoolScope,

    /// Seconds between reachability checks of cluster nodes
    #[arg(long = "refresh-interval", default_value_t = 300)]
    pub refresh_interval_secs: u64,

    /// Times a MOVED/ASK reply is retried after rebuilding topology
    #[arg(long = "redirect-retries", default_value_t = 1)]
    pub redirect_retries: usize,

    /// Memoized key → slot entries (0 disables)
    #[arg(long = "slot-cache", default_value_t = 4096)]
    pub slot_cache_capacity: usize,

    // ===== Value Options =====
    /// Value serializer
    #[arg(long = "serializer", value_enum, default_value_t = SerializerKind::Json)]
    pub serializer: SerializerKind,

    /// Value compressor
    #[arg(long = "compressor", value_enum, default_value_t = CompressorKind::Identity)]
    pub compressor: CompressorKind,

    /// Key namespace prefix
    #[arg(long = "key-prefix", default_value = "")]
    pub key_prefix: String,

    /// Key version
    #[arg(long = "key-version", default_value_t = 1, allow_hyphen_values = true)]
    pub key_version: i64,

    /// Default expiry in seconds for `set` without --ttl (0 = never expire)
    #[arg(long = "default-ttl", default_value_t = 300)]
    pub default_ttl_secs: u64,

    // ===== Output Options =====
    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Operation to run
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the decoded value of a key
    Get { key: String },

    /// Store a value (parsed as JSON, otherwise stored as a string)
    Set {
        key: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
        /// Expiry in seconds; 0 or negative deletes the key
        #[arg(long = "ttl", allow_hyphen_values = true)]
        ttl: Option<i64>,
        /// Never expire
        #[arg(long = "persist", conflicts_with = "ttl")]
        persist: bool,
        /// Only set if the key does not exist
        #[arg(long = "nx", conflicts_with = "xx")]
        nx: bool,
        /// Only set if the key already exists
        #[arg(long = "xx")]
        xx: bool,
    },

    /// Delete a key
    Del { key: String },

    /// Add delta to an integer value
    Incr {
        key: String,
        #[arg(default_value_t = 1, allow_hyphen_values = true)]
        delta: i64,
    },

    /// Remaining time to live of a key
    Ttl { key: String },

    /// Hash slot of each key (no server needed)
    Slot {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Print the slot ranges reported by the cluster
    Topology {
        /// Emit JSON instead of text
        #[arg(long = "json")]
        json: bool,
    },
}

impl Command {
    /// Whether this command needs a cluster connection
    pub fn needs_cluster(&self) -> bool {
        !matches!(self, Command::Slot { .. })
    }
}

impl CliArgs {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        // Username requires password
        if self.username.is_some() && self.password.is_none() {
            return Err("--user requires --auth to be set".to_string());
        }

        if self.hosts.is_empty() {
            return Err("At least one --host is required".to_string());
        }

        if self.connect_timeout_ms == 0 || self.socket_timeout_ms == 0 {
            return Err("--connect-timeout and --socket-timeout must be positive".to_string());
        }

        if self.refresh_interval_secs == 0 {
            return Err("--refresh-interval must be at least 1 second".to_string());
        }

        if self.quiet && self.verbose {
            return Err("--quiet and --verbose are mutually exclusive".to_string());
        }

        Ok(())
    }
}
