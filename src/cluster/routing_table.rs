//! Slot → connection routing table
//!
//! A table is built completely from a topology snapshot before anyone can
//! see it and is never modified afterwards; the node manager publishes a
//! new table by swapping an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::node::Endpoint;
use super::slot::SLOT_COUNT;
use super::topology::ClusterTopology;
use crate::client::{ConnectionFactory, NodeConnection};
use crate::utils::{CacheError, ClusterError};

/// Ordered connections for a slot: owner first, replicas after
pub type SlotConnections = Arc<[Arc<NodeConnection>]>;

pub struct RoutingTable {
    version: u64,
    slots: Box<[SlotConnections]>,
    topology: ClusterTopology,
}

impl RoutingTable {
    /// Resolve every range of `topology` into pooled connections
    ///
    /// Fails as a whole if any owner cannot be connected, so a table never
    /// routes writes to something other than the reported owner. An
    /// unreachable replica is left out of its range's list.
    pub fn build(
        topology: ClusterTopology,
        version: u64,
        factory: &ConnectionFactory,
    ) -> Result<Self, CacheError> {
        let mut resolved: HashMap<&Endpoint, Option<Arc<NodeConnection>>> = HashMap::new();
        let empty: SlotConnections = Arc::from(Vec::new());
        let mut slots = vec![empty; SLOT_COUNT];

        for range in topology.ranges() {
            let owner = match resolved.get(range.owner()) {
                Some(Some(conn)) => Arc::clone(conn),
                _ => {
                    let conn = factory.connect(range.owner())?;
                    resolved.insert(range.owner(), Some(Arc::clone(&conn)));
                    conn
                }
            };

            let mut conns = vec![owner];
            for replica in range.replicas() {
                let conn = resolved
                    .entry(replica)
                    .or_insert_with(|| match factory.connect(replica) {
                        Ok(conn) => Some(conn),
                        Err(e) => {
                            warn!("Skipping unreachable replica {}: {}", replica, e);
                            None
                        }
                    });
                if let Some(conn) = conn {
                    conns.push(Arc::clone(conn));
                }
            }

            let conns: SlotConnections = Arc::from(conns);
            for slot in range.start..=range.end {
                slots[slot as usize] = Arc::clone(&conns);
            }
        }
        drop(resolved);

        Ok(Self {
            version,
            slots: slots.into_boxed_slice(),
            topology,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    /// Connections serving `slot`, owner first
    pub fn connections(&self, slot: u16) -> Result<&SlotConnections, ClusterError> {
        match self.slots.get(slot as usize) {
            Some(conns) if !conns.is_empty() => Ok(conns),
            _ => Err(ClusterError::UnassignedSlot(slot)),
        }
    }

    /// Distinct owner connections
    pub fn owners(&self) -> Vec<Arc<NodeConnection>> {
        let mut out: Vec<Arc<NodeConnection>> = Vec::new();
        for range in self.topology.ranges() {
            if let Ok(conns) = self.connections(range.start) {
                if !out.iter().any(|c| Arc::ptr_eq(c, &conns[0])) {
                    out.push(Arc::clone(&conns[0]));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnectionPool;
    use crate::cluster::topology::SlotRange;
    use crate::testing::FakeCluster;

    fn range(start: u16, end: u16, nodes: &[&Endpoint]) -> SlotRange {
        SlotRange {
            start,
            end,
            nodes: nodes.iter().map(|&e| e.clone()).collect(),
        }
    }

    #[test]
    fn test_every_slot_resolves_to_range_owner() {
        let cluster = FakeCluster::three_masters();
        let [a, b, c] = cluster.masters();
        let factory = ConnectionFactory::new(cluster.connector(), Arc::new(ConnectionPool::new()));
        let topology = ClusterTopology::from_ranges(vec![
            range(0, 5460, &[&a]),
            range(5461, 10922, &[&b]),
            range(10923, 16383, &[&c]),
        ])
        .unwrap();

        let table = RoutingTable::build(topology, 7, &factory).unwrap();
        assert_eq!(table.version(), 7);
        for slot in 0..SLOT_COUNT as u16 {
            let owner = table.connections(slot).unwrap()[0].endpoint().clone();
            let expected = match slot {
                0..=5460 => &a,
                5461..=10922 => &b,
                _ => &c,
            };
            assert_eq!(&owner, expected);
        }
        assert_eq!(table.owners().len(), 3);
        // Connections are shared per endpoint, not per slot
        assert_eq!(factory.pool().len(), 3);
        assert!(Arc::ptr_eq(
            &table.connections(0).unwrap()[0],
            &table.connections(5460).unwrap()[0]
        ));
    }

    #[test]
    fn test_unreachable_owner_rejects_build() {
        let cluster = FakeCluster::three_masters();
        let [a, b, _] = cluster.masters();
        cluster.set_reachable(&b, false);
        let factory = ConnectionFactory::new(cluster.connector(), Arc::new(ConnectionPool::new()));
        let topology =
            ClusterTopology::from_ranges(vec![range(0, 8191, &[&a]), range(8192, 16383, &[&b])])
                .unwrap();

        assert!(RoutingTable::build(topology, 1, &factory).is_err());
    }

    #[test]
    fn test_unreachable_replica_is_dropped() {
        let cluster = FakeCluster::three_masters();
        let [a, _, _] = cluster.masters();
        let replica = Endpoint::new("127.0.0.1", 7100);
        let gone = Endpoint::new("127.0.0.1", 7101);
        cluster.add_node(&replica);
        cluster.add_node(&gone);
        cluster.set_reachable(&gone, false);
        let factory = ConnectionFactory::new(cluster.connector(), Arc::new(ConnectionPool::new()));
        let topology =
            ClusterTopology::from_ranges(vec![range(0, 16383, &[&a, &replica, &gone])]).unwrap();

        let table = RoutingTable::build(topology, 1, &factory).unwrap();
        let conns = table.connections(42).unwrap();
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[1].endpoint(), &replica);
    }

    #[test]
    fn test_uncovered_slot_is_unassigned() {
        let cluster = FakeCluster::three_masters();
        let [a, _, _] = cluster.masters();
        let factory = ConnectionFactory::new(cluster.connector(), Arc::new(ConnectionPool::new()));
        let topology = ClusterTopology::from_ranges(vec![range(0, 99, &[&a])]).unwrap();

        let table = RoutingTable::build(topology, 1, &factory).unwrap();
        assert!(table.connections(99).is_ok());
        assert!(matches!(
            table.connections(100),
            Err(ClusterError::UnassignedSlot(100))
        ));
    }
}
