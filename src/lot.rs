//! Lot and sequence number allocation.
//!
//! Order-sensitive: must only be driven from the sequential reassembly stage,
//! in the order records are written.

use std::collections::HashMap;

/// Largest sequence number a 6-digit header field can hold.
pub const MAX_SEQUENCE: u32 = 999_999;

/// Composite key grouping related accounting entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LotKey {
    /// Issuing application (3 bytes of the operation reference).
    pub issuer: Vec<u8>,
    /// Operation date, classification flags and entry number.
    pub lot_id: Vec<u8>,
}

/// Numbers stamped into one record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotAssignment {
    pub lot: u64,
    pub sequence: u32,
}

/// Assigns lot numbers and per-lot sequence numbers.
///
/// # Invariants
///
/// - Lot numbers are handed out in first-seen order starting at 1
/// - A key keeps its lot number for the whole run
/// - Sequence numbers start at 1 and wrap back to 1 after [`MAX_SEQUENCE`]
#[derive(Debug, Default)]
pub struct LotAllocator {
    lots: HashMap<LotKey, LotAssignment>,
    last_lot: u64,
}

impl LotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the numbers for the next record carrying `key`.
    pub fn assign(&mut self, key: &LotKey) -> LotAssignment {
        if let Some(current) = self.lots.get_mut(key) {
            current.sequence = if current.sequence >= MAX_SEQUENCE {
                1
            } else {
                current.sequence + 1
            };
            return *current;
        }

        self.last_lot += 1;
        let assignment = LotAssignment {
            lot: self.last_lot,
            sequence: 1,
        };
        self.lots.insert(key.clone(), assignment);
        assignment
    }

    /// Number of distinct lots seen so far.
    pub fn lot_count(&self) -> usize {
        self.lots.len()
    }
}
