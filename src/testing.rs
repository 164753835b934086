//! In-memory cluster used by unit tests
//!
//! Nodes share one keyspace but only answer keyed commands for slots they
//! serve under the current topology; anything else gets a MOVED reply,
//! the way a real node reacts to a stale client. `ManualTicker` drives the
//! refresh loop one check at a time.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::client::{ControlPlane, Connector};
use crate::cluster::topology::slots_reply;
use crate::cluster::{slot_for_key, Endpoint, StopSignal, Ticker};
use crate::utils::{ConnectionError, RespValue};

type Ranges = Vec<(u16, u16, Vec<Endpoint>)>;

#[derive(Default)]
struct NodeState {
    reachable: bool,
    commands: Vec<String>,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    nodes: Mutex<HashMap<Endpoint, NodeState>>,
    topology: Mutex<Ranges>,
    /// CLUSTER SLOTS replies that differ from the shared topology
    node_topology: Mutex<HashMap<Endpoint, Ranges>>,
    data: Mutex<HashMap<Vec<u8>, Entry>>,
    opened: AtomicUsize,
    slots_delay: Mutex<Option<Duration>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeCluster {
    state: Arc<State>,
}

impl FakeCluster {
    /// 127.0.0.1:7000..7002 with the standard three-way slot split
    pub fn three_masters() -> Self {
        let cluster = FakeCluster::default();
        let [a, b, c] = cluster.masters();
        for ep in [&a, &b, &c] {
            cluster.add_node(ep);
        }
        cluster.set_topology(vec![
            (0, 5460, vec![a]),
            (5461, 10922, vec![b]),
            (10923, 16383, vec![c]),
        ]);
        cluster
    }

    pub fn masters(&self) -> [Endpoint; 3] {
        [
            Endpoint::new("127.0.0.1", 7000),
            Endpoint::new("127.0.0.1", 7001),
            Endpoint::new("127.0.0.1", 7002),
        ]
    }

    pub fn add_node(&self, endpoint: &Endpoint) {
        self.state.nodes.lock().insert(
            endpoint.clone(),
            NodeState {
                reachable: true,
                commands: Vec::new(),
            },
        );
    }

    pub fn set_reachable(&self, endpoint: &Endpoint, reachable: bool) {
        if let Some(node) = self.state.nodes.lock().get_mut(endpoint) {
            node.reachable = reachable;
        }
    }

    pub fn set_topology(&self, ranges: Ranges) {
        *self.state.topology.lock() = ranges;
    }

    /// Make `endpoint` report `ranges` instead of the shared topology
    pub fn set_node_topology(&self, endpoint: &Endpoint, ranges: Ranges) {
        self.state.node_topology.lock().insert(endpoint.clone(), ranges);
    }

    /// Hold every CLUSTER SLOTS reply for `delay`
    pub fn set_slots_delay(&self, delay: Option<Duration>) {
        *self.state.slots_delay.lock() = delay;
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Connections opened so far
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// How many times `command` reached `endpoint`
    pub fn command_count(&self, endpoint: &Endpoint, command: &str) -> usize {
        self.state
            .nodes
            .lock()
            .get(endpoint)
            .map_or(0, |n| n.commands.iter().filter(|c| c.as_str() == command).count())
    }

    /// Raw stored bytes, bypassing routing
    pub fn raw_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.state.data.lock().get(key).map(|e| e.value.clone())
    }

    /// Store raw bytes, bypassing routing and codecs
    pub fn insert_raw(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) {
        self.state.data.lock().insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    /// Whether `key` carries an expiry
    pub fn has_expiry(&self, key: &[u8]) -> bool {
        self.state
            .data
            .lock()
            .get(key)
            .map_or(false, |e| e.expires_at.is_some())
    }
}

impl Connector for FakeCluster {
    fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn ControlPlane + Send>, ConnectionError> {
        let reachable = self
            .state
            .nodes
            .lock()
            .get(endpoint)
            .map_or(false, |n| n.reachable);
        if !reachable {
            return Err(ConnectionError::ConnectFailed {
                host: endpoint.host.clone(),
                port: endpoint.port,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            });
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
            endpoint: endpoint.clone(),
            readonly: false,
        }))
    }

    fn timeout_ms(&self) -> u64 {
        100
    }
}

struct FakeConnection {
    state: Arc<State>,
    endpoint: Endpoint,
    readonly: bool,
}

impl FakeConnection {
    /// MOVED/CLUSTERDOWN reply if this node does not serve `key`
    fn check_slot(&self, key: &[u8], write: bool) -> Option<RespValue> {
        let slot = slot_for_key(key);
        let topology = self.state.topology.lock();
        let range = topology.iter().find(|(s, e, _)| (*s..=*e).contains(&slot));
        match range {
            None => Some(RespValue::Error(
                "CLUSTERDOWN Hash slot not served".to_string(),
            )),
            Some((_, _, nodes)) => {
                let owner = &nodes[0];
                let serves = owner == &self.endpoint
                    || (!write && self.readonly && nodes[1..].contains(&self.endpoint));
                if serves {
                    None
                } else {
                    Some(RespValue::Error(format!("MOVED {} {}", slot, owner)))
                }
            }
        }
    }

    fn live_entry<'a>(
        data: &'a mut HashMap<Vec<u8>, Entry>,
        key: &[u8],
    ) -> Option<&'a mut Entry> {
        let expired = data
            .get(key)
            .map_or(false, |e| e.expires_at.map_or(false, |t| t <= Instant::now()));
        if expired {
            data.remove(key);
        }
        data.get_mut(key)
    }

    fn keyed(&mut self, cmd: &str, args: &[&[u8]]) -> RespValue {
        let key = args[1];
        let write = !matches!(cmd, "GET" | "EXISTS" | "TTL");
        if let Some(redirect) = self.check_slot(key, write) {
            return redirect;
        }

        let mut data = self.state.data.lock();
        match cmd {
            "GET" => match Self::live_entry(&mut data, key) {
                Some(e) => RespValue::BulkString(e.value.clone()),
                None => RespValue::Null,
            },
            "EXISTS" => RespValue::Integer(Self::live_entry(&mut data, key).is_some() as i64),
            "DEL" => RespValue::Integer(data.remove(key).is_some() as i64),
            "PERSIST" => match Self::live_entry(&mut data, key) {
                Some(e) => RespValue::Integer(e.expires_at.take().is_some() as i64),
                None => RespValue::Integer(0),
            },
            "TTL" => match Self::live_entry(&mut data, key) {
                None => RespValue::Integer(-2),
                Some(Entry {
                    expires_at: None, ..
                }) => RespValue::Integer(-1),
                Some(Entry {
                    expires_at: Some(t),
                    ..
                }) => RespValue::Integer(
                    t.saturating_duration_since(Instant::now()).as_secs_f64().ceil() as i64,
                ),
            },
            "EXPIRE" => {
                let secs = parse_int(args[2]);
                match Self::live_entry(&mut data, key) {
                    Some(e) => {
                        e.expires_at = Some(Instant::now() + Duration::from_secs(secs as u64));
                        RespValue::Integer(1)
                    }
                    None => RespValue::Integer(0),
                }
            }
            "SET" => {
                let mut expires_at = None;
                let (mut nx, mut xx) = (false, false);
                let mut i = 3;
                while i < args.len() {
                    match args[i].to_ascii_uppercase().as_slice() {
                        b"EX" => {
                            let secs = parse_int(args[i + 1]);
                            if secs <= 0 {
                                return RespValue::Error(
                                    "ERR invalid expire time in 'set' command".to_string(),
                                );
                            }
                            expires_at = Some(Instant::now() + Duration::from_secs(secs as u64));
                            i += 1;
                        }
                        b"PX" => {
                            let millis = parse_int(args[i + 1]);
                            if millis <= 0 {
                                return RespValue::Error(
                                    "ERR invalid expire time in 'set' command".to_string(),
                                );
                            }
                            expires_at =
                                Some(Instant::now() + Duration::from_millis(millis as u64));
                            i += 1;
                        }
                        b"NX" => nx = true,
                        b"XX" => xx = true,
                        _ => return RespValue::Error("ERR syntax error".to_string()),
                    }
                    i += 1;
                }
                let exists = Self::live_entry(&mut data, key).is_some();
                if (nx && exists) || (xx && !exists) {
                    return RespValue::Null;
                }
                data.insert(
                    key.to_vec(),
                    Entry {
                        value: args[2].to_vec(),
                        expires_at,
                    },
                );
                RespValue::SimpleString("OK".to_string())
            }
            "INCRBY" => incr_by(&mut data, key, parse_int(args[2])),
            _ => RespValue::Error(format!("ERR unknown command '{}'", cmd)),
        }
    }
}

fn parse_int(arg: &[u8]) -> i64 {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn incr_by(data: &mut HashMap<Vec<u8>, Entry>, key: &[u8], delta: i64) -> RespValue {
    let entry = data.entry(key.to_vec()).or_insert_with(|| Entry {
        value: b"0".to_vec(),
        expires_at: None,
    });
    // Canonical decimal only, like the server: no sign prefix or leading zeros
    let current = std::str::from_utf8(&entry.value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok().filter(|n| n.to_string() == s));
    match current.and_then(|c| c.checked_add(delta)) {
        Some(next) => {
            entry.value = next.to_string().into_bytes();
            RespValue::Integer(next)
        }
        None => RespValue::Error("ERR value is not an integer or out of range".to_string()),
    }
}

impl ControlPlane for FakeConnection {
    fn execute_binary(&mut self, args: &[&[u8]]) -> io::Result<RespValue> {
        let cmd = String::from_utf8_lossy(args[0]).to_ascii_uppercase();
        {
            let mut nodes = self.state.nodes.lock();
            let node = nodes
                .get_mut(&self.endpoint)
                .filter(|n| n.reachable)
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))?;
            node.commands.push(cmd.clone());
        }

        let reply = match cmd.as_str() {
            "PING" => RespValue::SimpleString("PONG".to_string()),
            "AUTH" => RespValue::SimpleString("OK".to_string()),
            "READONLY" => {
                self.readonly = true;
                RespValue::SimpleString("OK".to_string())
            }
            "CLUSTER" => {
                let delay = *self.state.slots_delay.lock();
                if let Some(delay) = delay {
                    thread::sleep(delay);
                }
                let own = self.state.node_topology.lock().get(&self.endpoint).cloned();
                match own {
                    Some(ranges) => slots_reply(&ranges),
                    None => slots_reply(&self.state.topology.lock()),
                }
            }
            "FLUSHALL" => {
                self.state.data.lock().clear();
                RespValue::SimpleString("OK".to_string())
            }
            // EVAL <script> 1 <key> <arg>, told apart by what the script calls
            "EVAL" => {
                let key = args[3];
                if let Some(redirect) = self.check_slot(key, true) {
                    return Ok(redirect);
                }
                let script = String::from_utf8_lossy(args[1]);
                let mut data = self.state.data.lock();
                if script.contains("INCRBY") {
                    // EXISTS + INCRBY
                    if Self::live_entry(&mut data, key).is_none() {
                        RespValue::Null
                    } else {
                        incr_by(&mut data, key, parse_int(args[4]))
                    }
                } else {
                    // GET + DEL if the value matches
                    let matches =
                        Self::live_entry(&mut data, key).map_or(false, |e| e.value == args[4]);
                    if matches {
                        data.remove(key);
                    }
                    RespValue::Integer(matches as i64)
                }
            }
            _ => self.keyed(&cmd, args),
        };
        Ok(reply)
    }
}

#[derive(Default)]
struct ManualState {
    pending: u64,
    idle: bool,
}

/// Fires only when `tick()` is called
#[derive(Default)]
pub(crate) struct ManualTicker {
    state: Mutex<ManualState>,
    cond: Condvar,
}

const STOP_POLL: Duration = Duration::from_millis(5);

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule one check
    pub fn tick(&self) {
        let mut state = self.state.lock();
        state.pending += 1;
        state.idle = false;
        self.cond.notify_all();
    }

    /// Wait until every scheduled check has run and the loop is waiting
    /// again. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !(state.pending == 0 && state.idle) {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.pending == 0 && state.idle;
            }
        }
        true
    }
}

impl Ticker for ManualTicker {
    fn wait(&self, stop: &StopSignal) -> bool {
        let mut state = self.state.lock();
        state.idle = true;
        self.cond.notify_all();
        loop {
            if stop.is_stopped() {
                return false;
            }
            if state.pending > 0 {
                state.pending -= 1;
                state.idle = false;
                return true;
            }
            self.cond.wait_for(&mut state, STOP_POLL);
        }
    }
}
