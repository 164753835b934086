//! Per-endpoint connection pooling
//!
//! One live `NodeConnection` per endpoint, shared by every slot routed to
//! that endpoint and by all concurrent callers. The pool is an explicit
//! object: managers that should share connections share the `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::control_plane::ControlPlane;
use crate::cluster::Endpoint;
use crate::utils::{ConnectionError, RespValue};

/// Opens new single-node channels
pub trait Connector: Send + Sync {
    fn open(&self, endpoint: &Endpoint)
        -> Result<Box<dyn ControlPlane + Send>, ConnectionError>;

    /// Socket timeout used when classifying I/O failures
    fn timeout_ms(&self) -> u64 {
        0
    }
}

/// A pooled channel to one endpoint
///
/// Commands are serialized through an internal mutex. Any transport
/// failure marks the connection broken so the pool replaces it.
pub struct NodeConnection {
    endpoint: Endpoint,
    channel: Mutex<Box<dyn ControlPlane + Send>>,
    broken: AtomicBool,
    timeout_ms: u64,
}

impl NodeConnection {
    pub fn new(endpoint: Endpoint, channel: Box<dyn ControlPlane + Send>, timeout_ms: u64) -> Self {
        Self {
            endpoint,
            channel: Mutex::new(channel),
            broken: AtomicBool::new(false),
            timeout_ms,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_usable(&self) -> bool {
        !self.broken.load(Ordering::Acquire)
    }

    pub fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::AcqRel) {
            debug!("Connection to {} marked broken", self.endpoint);
        }
    }

    /// Execute a command with binary arguments
    pub fn execute_binary(&self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        if !self.is_usable() {
            return Err(ConnectionError::Closed);
        }
        let result = self.channel.lock().execute_binary(args);
        result.map_err(|e| self.fail(e))
    }

    /// Execute a command with string arguments
    pub fn execute(&self, args: &[&str]) -> Result<RespValue, ConnectionError> {
        let byte_args: Vec<&[u8]> = args.iter().map(|s| s.as_bytes()).collect();
        self.execute_binary(&byte_args)
    }

    /// Run several commands without interleaving other callers
    pub fn with_channel<T>(
        &self,
        f: impl FnOnce(&mut dyn ControlPlane) -> io::Result<T>,
    ) -> Result<T, ConnectionError> {
        if !self.is_usable() {
            return Err(ConnectionError::Closed);
        }
        let mut channel = self.channel.lock();
        let result = f(channel.as_mut());
        drop(channel);
        result.map_err(|e| self.fail(e))
    }

    fn fail(&self, err: io::Error) -> ConnectionError {
        self.mark_broken();
        ConnectionError::from_io(err, self.timeout_ms)
    }
}

impl fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConnection")
            .field("endpoint", &self.endpoint)
            .field("usable", &self.is_usable())
            .finish()
    }
}

type Cell = Arc<Mutex<Option<Arc<NodeConnection>>>>;

/// Connections keyed by endpoint
///
/// The map lock is only held to find or create an endpoint's cell; opening
/// a connection holds that endpoint's cell lock, so slow connects to one
/// node never block lookups for another.
#[derive(Default)]
pub struct ConnectionPool {
    cells: Mutex<HashMap<Endpoint, Cell>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pooled connection or open and insert a new one
    pub fn get_or_open(
        &self,
        endpoint: &Endpoint,
        open: impl FnOnce() -> Result<NodeConnection, ConnectionError>,
    ) -> Result<Arc<NodeConnection>, ConnectionError> {
        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(cells.entry(endpoint.clone()).or_default())
        };

        let mut slot = cell.lock();
        if let Some(conn) = slot.as_ref() {
            if conn.is_usable() {
                return Ok(Arc::clone(conn));
            }
            debug!("Replacing broken connection to {}", endpoint);
        }

        let conn = Arc::new(open()?);
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Pooled connection without opening one
    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<NodeConnection>> {
        let cell = self.cells.lock().get(endpoint).cloned()?;
        let slot = cell.lock();
        slot.as_ref().filter(|c| c.is_usable()).cloned()
    }

    /// Number of live pooled connections
    pub fn len(&self) -> usize {
        let cells: Vec<Cell> = self.cells.lock().values().cloned().collect();
        cells
            .iter()
            .filter(|cell| cell.lock().as_ref().map_or(false, |c| c.is_usable()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pooled connection
    ///
    /// Holders of an `Arc<NodeConnection>` see it as broken afterwards.
    pub fn clear(&self) {
        let cells: Vec<Cell> = self.cells.lock().drain().map(|(_, cell)| cell).collect();
        for cell in cells {
            if let Some(conn) = cell.lock().take() {
                conn.mark_broken();
            }
        }
    }
}

/// Opens connections through a `Connector` and pools them
pub struct ConnectionFactory {
    connector: Arc<dyn Connector>,
    pool: Arc<ConnectionPool>,
    /// Other factories use the pool too; closing leaves it alone
    shared: bool,
}

impl ConnectionFactory {
    pub fn new(connector: Arc<dyn Connector>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            connector,
            pool,
            shared: false,
        }
    }

    /// Factory over a pool other caches also draw from
    pub fn shared(connector: Arc<dyn Connector>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            connector,
            pool,
            shared: true,
        }
    }

    /// Pooled connection for `endpoint`, opening one if needed
    pub fn connect(&self, endpoint: &Endpoint) -> Result<Arc<NodeConnection>, ConnectionError> {
        self.pool.get_or_open(endpoint, || {
            let channel = self.connector.open(endpoint).map_err(|e| {
                warn!("Failed to connect to {}: {}", endpoint, e);
                e
            })?;
            Ok(NodeConnection::new(
                endpoint.clone(),
                channel,
                self.connector.timeout_ms(),
            ))
        })
    }

    /// Release every pooled connection, unless the pool is shared
    pub fn close_all(&self) {
        if self.shared {
            debug!("Leaving shared pool of {} connections open", self.pool.len());
            return;
        }
        self.pool.clear();
    }

    /// Live connections currently pooled
    pub fn pooled_count(&self) -> usize {
        self.pool.len()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}
