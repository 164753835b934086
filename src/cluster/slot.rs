//! Key to hash-slot mapping
//!
//! Slots are CRC16/XMODEM of the key (or of its `{hash tag}`) modulo 16384,
//! matching the server's own assignment bit for bit.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

/// Number of hash slots in the keyspace
pub const SLOT_COUNT: usize = 16384;

const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC16 (XMODEM polynomial 0x1021, initial value 0)
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        (crc << 8) ^ CRC16_TABLE[((crc >> 8) as u8 ^ byte) as usize]
    })
}

/// The bytes that participate in hashing
///
/// If the key contains `{` and a later `}` with at least one byte between
/// them, only those bytes are hashed. Only the first `{` and the first `}`
/// after it are considered.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[start + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[start + 1..start + 1 + len];
            }
        }
    }
    key
}

/// Calculate the slot for a key
pub fn slot_for_key(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT as u16
}

/// Memoized slot lookups for hot keys
///
/// Purely an optimization: results are identical with or without it.
/// When the cache reaches capacity it is cleared wholesale.
pub struct SlotCache {
    entries: RwLock<HashMap<Vec<u8>, u16>>,
    capacity: usize,
}

impl SlotCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn slot(&self, key: &[u8]) -> u16 {
        if self.capacity == 0 {
            return slot_for_key(key);
        }

        if let Some(&slot) = self.entries.read().get(key) {
            return slot;
        }

        let slot = slot_for_key(key);
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            debug!("Slot cache full ({} keys), clearing", entries.len());
            entries.clear();
        }
        entries.insert(key.to_vec(), slot);
        slot
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
