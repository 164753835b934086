//! Cluster topology and node management
//!
//! This module provides cluster support including:
//! - Slot hashing (CRC16 with hash tags)
//! - Topology discovery via CLUSTER SLOTS
//! - Immutable slot → connection routing tables
//! - The node manager that swaps tables on rebuild and pings endpoints

pub mod node;
pub mod node_manager;
pub mod refresh;
pub mod routing_table;
pub mod slot;
pub mod topology;

pub use node::Endpoint;
pub use node_manager::{ManagerOptions, ManagerState, NodeManager, RedirectInfo, RouteTarget};
pub use refresh::{IntervalTicker, StopSignal, Ticker};
pub use routing_table::{RoutingTable, SlotConnections};
pub use slot::{crc16, hash_tag, slot_for_key, SlotCache, SLOT_COUNT};
pub use topology::{ClusterTopology, SlotRange};
