//! Cluster node manager
//!
//! Owns the current routing table and keeps it in line with the cluster.
//! Readers clone the table `Arc` under a short read lock; a rebuild queries
//! topology and connects every owner before taking the write lock for the
//! swap, so a lookup always sees one complete table.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::node::Endpoint;
use super::refresh::{IntervalTicker, StopSignal, Ticker};
use super::routing_table::RoutingTable;
use super::slot::SlotCache;
use super::topology::ClusterTopology;
use crate::client::{ConnectionFactory, ControlPlaneExt, NodeConnection};
use crate::utils::{CacheError, ClusterError, RespValue, Result};

/// Redirect information parsed from MOVED/ASK error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectInfo {
    /// Target slot
    pub slot: u16,
    /// Target host
    pub host: String,
    /// Target port
    pub port: u16,
    /// Whether this is an ASK redirect (requires ASKING prefix)
    pub is_ask: bool,
}

impl RedirectInfo {
    /// Parse from error message like "MOVED 3999 127.0.0.1:7001" or "ASK 3999 127.0.0.1:7001"
    pub fn parse(error_msg: &str) -> Option<Self> {
        let parts: Vec<&str> = error_msg.split_whitespace().collect();
        if parts.len() < 3 {
            return None;
        }

        let is_ask = parts[0] == "ASK";
        let is_moved = parts[0] == "MOVED";

        if !is_ask && !is_moved {
            return None;
        }

        let slot: u16 = parts[1].parse().ok()?;
        // rsplit keeps IPv6 hosts intact
        let (host, port) = parts[2].rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.parse().ok()?;

        Some(Self {
            slot,
            host: host.to_string(),
            port,
            is_ask,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.as_str(), self.port)
    }
}

/// Lifecycle of a `NodeManager`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Ready,
    Refreshing,
    Closed,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Uninitialized => "uninitialized",
            ManagerState::Ready => "ready",
            ManagerState::Refreshing => "refreshing",
            ManagerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tuning for a `NodeManager`
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Pause between reachability checks of known endpoints
    pub refresh_interval: Duration,
    /// Maximum memoized key → slot entries (0 disables the cache)
    pub slot_cache_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            slot_cache_capacity: 4096,
        }
    }
}

/// Result of a lookup, tagged with the table version that served it
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub slot: u16,
    pub version: u64,
    pub connection: Arc<NodeConnection>,
}

/// Published routing state; replaced only under the write lock
struct Routing {
    table: Arc<RoutingTable>,
    /// Seeds plus every endpoint any topology reported. Grows only.
    known: Vec<Endpoint>,
}

struct Refresher {
    stop: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

pub struct NodeManager {
    seeds: Vec<Endpoint>,
    factory: Arc<ConnectionFactory>,
    routing: RwLock<Routing>,
    slot_cache: SlotCache,
    state: Mutex<ManagerState>,
    /// Whether a rebuild is in progress (prevents concurrent rebuilds)
    is_refreshing: AtomicBool,
    /// Signalled when a rebuild finishes
    rebuild_wait: Mutex<()>,
    rebuild_done: Condvar,
    refresher: Mutex<Option<Refresher>>,
}

impl NodeManager {
    /// Discover the cluster from `seeds` and start the refresh loop
    ///
    /// Seeds are queried in order; unreachable ones are skipped. Fails if
    /// no seed yields a usable topology.
    pub fn initialize(
        seeds: Vec<Endpoint>,
        factory: Arc<ConnectionFactory>,
        options: ManagerOptions,
    ) -> Result<Arc<Self>> {
        let ticker = Arc::new(IntervalTicker::new(options.refresh_interval));
        Self::initialize_with_ticker(seeds, factory, options, ticker)
    }

    /// Like `initialize`, with the refresh loop paced by `ticker`
    pub fn initialize_with_ticker(
        seeds: Vec<Endpoint>,
        factory: Arc<ConnectionFactory>,
        options: ManagerOptions,
        ticker: Arc<dyn Ticker>,
    ) -> Result<Arc<Self>> {
        if seeds.is_empty() {
            return Err(ClusterError::NoSeeds.into());
        }

        let table = query_candidates(&seeds, &factory, 1)?;
        let mut known = seeds.clone();
        merge_endpoints(&mut known, table.topology());
        info!(
            "Cluster topology loaded: {} ranges, {}/{} slots covered, {} endpoints",
            table.topology().ranges().len(),
            table.topology().covered_slots(),
            super::slot::SLOT_COUNT,
            known.len()
        );

        let manager = Arc::new(Self {
            seeds,
            factory,
            routing: RwLock::new(Routing {
                table: Arc::new(table),
                known,
            }),
            slot_cache: SlotCache::new(options.slot_cache_capacity),
            state: Mutex::new(ManagerState::Ready),
            is_refreshing: AtomicBool::new(false),
            rebuild_wait: Mutex::new(()),
            rebuild_done: Condvar::new(),
            refresher: Mutex::new(None),
        });
        manager.start_refresher(ticker)?;
        Ok(manager)
    }

    fn start_refresher(self: &Arc<Self>, ticker: Arc<dyn Ticker>) -> Result<()> {
        let stop = Arc::new(StopSignal::new());
        let weak = Arc::downgrade(self);
        let loop_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("cluster-refresh".to_string())
            .spawn(move || refresh_loop(weak, ticker, loop_stop))
            .map_err(|e| CacheError::Config(format!("Failed to spawn refresh thread: {}", e)))?;

        *self.refresher.lock() = Some(Refresher {
            stop,
            handle: Some(handle),
        });
        Ok(())
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    /// Slot for `key`, memoized
    pub fn slot_for_key(&self, key: &[u8]) -> u16 {
        self.slot_cache.slot(key)
    }

    /// Connection for `key`: the owner for writes, possibly a replica for reads
    pub fn route(&self, key: &[u8], for_write: bool) -> Result<Arc<NodeConnection>> {
        self.lookup(key, for_write).map(|target| target.connection)
    }

    /// Like `route`, also reporting the slot and table version used
    pub fn lookup(&self, key: &[u8], for_write: bool) -> Result<RouteTarget> {
        if self.state() == ManagerState::Closed {
            return Err(ClusterError::Closed.into());
        }

        let slot = self.slot_for_key(key);
        let table = self.table();
        let conns = table.connections(slot)?;

        let connection = if for_write || conns.len() == 1 {
            self.refreshed(&conns[0])
        } else {
            let replica = self.refreshed(&conns[fastrand::usize(1..conns.len())]);
            match replica.with_channel(|c| c.readonly()) {
                Ok(true) => replica,
                Ok(false) => {
                    warn!(
                        "Replica {} refused READONLY, reading from owner",
                        replica.endpoint()
                    );
                    self.refreshed(&conns[0])
                }
                Err(e) => {
                    warn!(
                        "Replica {} unavailable ({}), reading from owner",
                        replica.endpoint(),
                        e
                    );
                    self.refreshed(&conns[0])
                }
            }
        };

        Ok(RouteTarget {
            slot,
            version: table.version(),
            connection,
        })
    }

    /// Swap a broken table connection for the pool's current one
    ///
    /// The table keeps the connection it was built with; if that one has
    /// failed since and the endpoint is reachable again, the pool holds a
    /// replacement. Falls back to the table's connection otherwise.
    fn refreshed(&self, conn: &Arc<NodeConnection>) -> Arc<NodeConnection> {
        if conn.is_usable() {
            return Arc::clone(conn);
        }
        match self.factory.connect(conn.endpoint()) {
            Ok(fresh) => fresh,
            Err(e) => {
                debug!("Reconnect to {} failed: {}", conn.endpoint(), e);
                Arc::clone(conn)
            }
        }
    }

    /// Current routing table snapshot
    pub fn table(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.routing.read().table)
    }

    pub fn topology_version(&self) -> u64 {
        self.routing.read().table.version()
    }

    pub fn known_endpoints(&self) -> Vec<Endpoint> {
        self.routing.read().known.clone()
    }

    /// One connection per distinct slot owner
    pub fn owner_connections(&self) -> Vec<Arc<NodeConnection>> {
        self.table()
            .owners()
            .iter()
            .map(|conn| self.refreshed(conn))
            .collect()
    }

    /// Re-query topology and swap in a new table
    ///
    /// If another rebuild is in flight, waits for it to finish and returns
    /// `Ok(false)`; the caller then sees whatever table it installed. On
    /// failure the previous table stays in place.
    pub fn rebuild(&self) -> Result<bool> {
        if self.state() == ManagerState::Closed {
            return Err(ClusterError::Closed.into());
        }

        // Try to acquire refresh lock
        if self
            .is_refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Topology rebuild already in progress, waiting for it");
            self.wait_for_rebuild();
            return Ok(false);
        }

        self.transition(ManagerState::Ready, ManagerState::Refreshing);
        let result = self.do_rebuild();
        self.transition(ManagerState::Refreshing, ManagerState::Ready);

        // Release refresh lock
        self.is_refreshing.store(false, Ordering::SeqCst);
        {
            let _guard = self.rebuild_wait.lock();
            self.rebuild_done.notify_all();
        }

        result.map(|()| true)
    }

    fn wait_for_rebuild(&self) {
        let mut guard = self.rebuild_wait.lock();
        while self.is_refreshing.load(Ordering::SeqCst) {
            self.rebuild_done.wait_for(&mut guard, REBUILD_POLL);
        }
    }

    fn transition(&self, from: ManagerState, to: ManagerState) {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
        }
    }

    fn do_rebuild(&self) -> Result<()> {
        let candidates = self.candidates();
        // Rebuilds are serialized by `is_refreshing`
        let version = self.topology_version() + 1;
        let table = query_candidates(&candidates, &self.factory, version)?;

        if self.state() == ManagerState::Closed {
            return Err(ClusterError::Closed.into());
        }

        let mut routing = self.routing.write();
        merge_endpoints(&mut routing.known, table.topology());
        let previous = routing.table.version();
        routing.table = Arc::new(table);
        drop(routing);

        info!(
            "Cluster topology refreshed: version {} -> {}",
            previous, version
        );
        Ok(())
    }

    /// Seeds first, then learned endpoints that are not seeds
    fn candidates(&self) -> Vec<Endpoint> {
        let known = self.known_endpoints();
        let mut out = self.seeds.clone();
        out.extend(known.into_iter().filter(|ep| !self.seeds.contains(ep)));
        out
    }

    /// PING every known endpoint; rebuild if any of them fails
    ///
    /// Errors are logged, never returned. Returns true if every PING
    /// succeeded.
    pub fn check_endpoints(&self) -> bool {
        let mut healthy = true;
        for endpoint in self.known_endpoints() {
            let pinged = self
                .factory
                .connect(&endpoint)
                .and_then(|conn| conn.with_channel(|c| c.ping()));
            match pinged {
                Ok(true) => debug!("PING to {} succeeded", endpoint),
                Ok(false) => {
                    debug!("PING to {} got an unexpected reply", endpoint);
                    healthy = false;
                }
                Err(e) => {
                    debug!("PING to {} failed: {}", endpoint, e);
                    healthy = false;
                }
            }
        }

        if !healthy {
            warn!("Unreachable cluster endpoint detected, rebuilding topology");
            match self.rebuild() {
                Ok(true) => {}
                Ok(false) => debug!("Another rebuild ran concurrently"),
                Err(e) => warn!(
                    "Topology rebuild failed, keeping version {}: {}",
                    self.topology_version(),
                    e
                ),
            }
        }
        healthy
    }

    /// Stop the refresh loop and release pooled connections. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ManagerState::Closed {
                return;
            }
            *state = ManagerState::Closed;
        }

        let refresher = self.refresher.lock().take();
        if let Some(mut refresher) = refresher {
            refresher.stop.stop();
            if let Some(handle) = refresher.handle.take() {
                // The loop itself may drop the last reference
                if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                    warn!("Refresh thread panicked");
                }
            }
        }

        self.factory.close_all();
        info!("Node manager closed");
    }
}

impl Drop for NodeManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Upper bound on one condvar wait while another rebuild runs
const REBUILD_POLL: Duration = Duration::from_millis(10);

fn refresh_loop(manager: Weak<NodeManager>, ticker: Arc<dyn Ticker>, stop: Arc<StopSignal>) {
    while ticker.wait(&stop) {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        if manager.state() == ManagerState::Closed {
            break;
        }
        manager.check_endpoints();
    }
    debug!("Refresh loop stopped");
}

fn merge_endpoints(known: &mut Vec<Endpoint>, topology: &ClusterTopology) {
    for endpoint in topology.endpoints() {
        if !known.contains(&endpoint) {
            known.push(endpoint);
        }
    }
}

/// Build a table from the first candidate that answers
fn query_candidates(
    candidates: &[Endpoint],
    factory: &ConnectionFactory,
    version: u64,
) -> Result<RoutingTable> {
    // A node mid-failover can report a partial map; keep the widest one in
    // case nobody reports every slot
    let mut partial: Option<RoutingTable> = None;
    for endpoint in candidates {
        match fetch_table(endpoint, factory, version) {
            Ok(table) if table.topology().is_complete() => return Ok(table),
            Ok(table) => {
                debug!(
                    "{} reported {} of {} slots, trying other endpoints",
                    endpoint,
                    table.topology().covered_slots(),
                    super::slot::SLOT_COUNT
                );
                let wider = partial.as_ref().map_or(true, |best| {
                    table.topology().covered_slots() > best.topology().covered_slots()
                });
                if wider {
                    partial = Some(table);
                }
            }
            Err(e) => {
                warn!("Failed to fetch topology from {}: {}", endpoint, e);
                continue;
            }
        }
    }

    if let Some(table) = partial {
        warn!(
            "No endpoint reported every slot, using a map covering {} of {}",
            table.topology().covered_slots(),
            super::slot::SLOT_COUNT
        );
        return Ok(table);
    }

    warn!("Failed to load cluster topology from any endpoint");
    Err(ClusterError::NoReachableEndpoint(candidates.len()).into())
}

fn fetch_table(endpoint: &Endpoint, factory: &ConnectionFactory, version: u64) -> Result<RoutingTable> {
    let conn = factory.connect(endpoint)?;
    let reply: RespValue = conn.with_channel(|c| c.cluster_slots())?;
    let topology = ClusterTopology::from_cluster_slots(&reply, endpoint)?;
    RoutingTable::build(topology, version, factory)
}
