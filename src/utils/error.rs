//! Error types for valkey-cluster-cache

use std::io;
use thiserror::Error;

use crate::cluster::{Endpoint, RedirectInfo};

/// Top-level client error
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O failure on a routed connection
    #[error("Connection to {endpoint} interrupted: {source}")]
    ConnectionInterrupted {
        endpoint: Endpoint,
        #[source]
        source: ConnectionError,
    },

    /// The node answered MOVED/ASK; topology has been scheduled for rebuild
    #[error("Request for slot {} redirected from {endpoint} to {}:{}", .redirect.slot, .redirect.host, .redirect.port)]
    Redirect {
        endpoint: Endpoint,
        redirect: RedirectInfo,
    },

    #[error("Key '{0}' not found")]
    KeyNotFound(String),
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Connection closed unexpectedly")]
    Closed,

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Classify an I/O failure seen on an established connection
    pub fn from_io(err: io::Error, timeout_ms: u64) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectionError::Timeout(timeout_ms),
            io::ErrorKind::UnexpectedEof => ConnectionError::Closed,
            _ => ConnectionError::Io(err),
        }
    }
}

/// RESP protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    #[error("Server error: {0}")]
    ServerError(String),
}

/// Cluster-related errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to parse CLUSTER SLOTS response: {0}")]
    ParseFailed(String),

    #[error("Topology response contains no routable slot range")]
    EmptyTopology,

    #[error("Slot {0} has no assigned node")]
    UnassignedSlot(u16),

    #[error("No seed endpoints configured")]
    NoSeeds,

    #[error("No reachable endpoint answered the topology query (tried {0})")]
    NoReachableEndpoint(usize),

    #[error("Node manager is closed")]
    Closed,
}

/// Serializer/compressor errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("Deserialization failed: {0}")]
    Deserialize(String),

    #[error("Compression failed: {0}")]
    Compress(String),

    /// Payload is not in the compressor's format
    #[error("Decompression failed: {0}")]
    Decompress(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
