//! Cluster topology snapshot parsed from CLUSTER SLOTS

use std::collections::BTreeSet;

use tracing::warn;

use super::node::Endpoint;
use super::slot::SLOT_COUNT;
use crate::utils::{ClusterError, RespValue};

/// A contiguous slot range and the endpoints serving it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    /// First slot (inclusive)
    pub start: u16,
    /// Last slot (inclusive)
    pub end: u16,
    /// Owner first, replicas after
    pub nodes: Vec<Endpoint>,
}

impl SlotRange {
    /// Endpoint accepting writes for this range
    pub fn owner(&self) -> &Endpoint {
        &self.nodes[0]
    }

    pub fn replicas(&self) -> &[Endpoint] {
        &self.nodes[1..]
    }

    pub fn slot_count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }
}

/// Immutable slot-range assignment set
///
/// A refresh produces a new snapshot; snapshots are never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    ranges: Vec<SlotRange>,
}

impl ClusterTopology {
    /// Build from already-validated ranges
    pub fn from_ranges(mut ranges: Vec<SlotRange>) -> Result<Self, ClusterError> {
        ranges.retain(|r| !r.nodes.is_empty());
        if ranges.is_empty() {
            return Err(ClusterError::EmptyTopology);
        }
        for r in &ranges {
            if r.start > r.end || r.end as usize >= SLOT_COUNT {
                return Err(ClusterError::ParseFailed(format!(
                    "invalid slot range {}-{}",
                    r.start, r.end
                )));
            }
        }
        ranges.sort_by_key(|r| r.start);
        Ok(Self { ranges })
    }

    /// Parse a CLUSTER SLOTS reply
    ///
    /// Each entry is `[start, end, [host, port, id?], [host, port, id?]...]`.
    /// Entries without an owner are skipped and leave their slots
    /// unassigned. An empty host means "the node that answered".
    pub fn from_cluster_slots(
        response: &RespValue,
        answered_by: &Endpoint,
    ) -> Result<Self, ClusterError> {
        let entries = response.as_array().ok_or_else(|| {
            ClusterError::ParseFailed(format!("expected array, got {}", response.type_name()))
        })?;

        let mut ranges = Vec::with_capacity(entries.len());
        for entry in entries {
            let items = match entry.as_array() {
                Some(items) if items.len() >= 3 => items,
                _ => continue,
            };

            let start = parse_slot(&items[0])?;
            let end = parse_slot(&items[1])?;

            let owner = match parse_node(&items[2], answered_by) {
                Some(owner) => owner,
                None => {
                    warn!("Slot range {}-{} has no owner, leaving it unassigned", start, end);
                    continue;
                }
            };

            let mut nodes = vec![owner];
            nodes.extend(items[3..].iter().filter_map(|n| parse_node(n, answered_by)));

            ranges.push(SlotRange { start, end, nodes });
        }

        Self::from_ranges(ranges)
    }

    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }

    /// Distinct endpoints mentioned by the topology, owners first
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let owners = self.ranges.iter().map(|r| r.owner());
        let replicas = self.ranges.iter().flat_map(|r| r.replicas());
        for ep in owners.chain(replicas) {
            if seen.insert(ep.clone()) {
                out.push(ep.clone());
            }
        }
        out
    }

    /// Number of slots with an owner
    pub fn covered_slots(&self) -> usize {
        let mut covered = vec![false; SLOT_COUNT];
        for r in &self.ranges {
            for slot in r.start..=r.end {
                covered[slot as usize] = true;
            }
        }
        covered.iter().filter(|&&c| c).count()
    }

    pub fn is_complete(&self) -> bool {
        self.covered_slots() == SLOT_COUNT
    }
}

fn parse_slot(value: &RespValue) -> Result<u16, ClusterError> {
    value
        .as_i64()
        .filter(|&s| (0..SLOT_COUNT as i64).contains(&s))
        .map(|s| s as u16)
        .ok_or_else(|| ClusterError::ParseFailed(format!("invalid slot number {:?}", value)))
}

/// Parse a `[host, port, ...]` node entry
fn parse_node(value: &RespValue, answered_by: &Endpoint) -> Option<Endpoint> {
    let items = value.as_array()?;
    if items.len() < 2 {
        return None;
    }
    let host = items[0].as_str()?;
    let port = items[1].as_i64().filter(|p| (1..=u16::MAX as i64).contains(p))? as u16;

    let host = if host.is_empty() || host == "?" {
        answered_by.host.as_str()
    } else {
        host
    };
    Some(Endpoint::new(host, port))
}

#[cfg(test)]
pub(crate) fn slots_reply(ranges: &[(u16, u16, Vec<Endpoint>)]) -> RespValue {
    RespValue::Array(
        ranges
            .iter()
            .map(|(start, end, nodes)| {
                let mut items = vec![
                    RespValue::Integer(*start as i64),
                    RespValue::Integer(*end as i64),
                ];
                items.extend(nodes.iter().map(|ep| {
                    RespValue::Array(vec![
                        RespValue::BulkString(ep.host.as_bytes().to_vec()),
                        RespValue::Integer(ep.port as i64),
                        RespValue::BulkString(format!("id-{}", ep.port).into_bytes()),
                    ])
                }));
                RespValue::Array(items)
            })
            .collect(),
    )
}
