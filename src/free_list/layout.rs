//! In-region layout of the free list
//!
//! ```text
//! offset 0    QueueHeader (192 bytes: metadata line, enqueue line, dequeue line)
//! offset 192  Cell[capacity]      { sequence: u64, value: u64 }
//! ...         AtomicU32[slot_count]  per-slot state word
//! ```

use std::{
    mem::size_of,
    sync::atomic::{AtomicU32, AtomicU64},
};

use crate::error::{Result, ShmPoolError};

/// "SHMFREEQ"
pub(crate) const QUEUE_MAGIC: u64 = u64::from_le_bytes(*b"SHMFREEQ");
pub(crate) const QUEUE_VERSION: u32 = 1;

/// Slot is in the ring
pub(crate) const SLOT_FREE: u32 = 0;
/// Slot is held by a consumer (or by the creator before seeding)
pub(crate) const SLOT_CHECKED_OUT: u32 = 1;

/// A cursor on its own cache line.
#[repr(C, align(64))]
pub(crate) struct Cursor {
    pub pos: AtomicU64,
    _pad: [u8; 56],
}

impl Cursor {
    fn new() -> Self {
        Self {
            pos: AtomicU64::new(0),
            _pad: [0; 56],
        }
    }
}

#[repr(C, align(64))]
pub(crate) struct QueueHeader {
    pub magic: u64,
    pub version: u32,
    _reserved: u32,
    pub capacity: u64,
    pub slot_count: u64,
    _pad: [u8; 32],
    pub enqueue: Cursor,
    pub dequeue: Cursor,
}

const _: () = assert!(size_of::<QueueHeader>() == 192);

impl QueueHeader {
    pub(crate) fn new(capacity: u64, slot_count: u64) -> Self {
        Self {
            magic: QUEUE_MAGIC,
            version: QUEUE_VERSION,
            _reserved: 0,
            capacity,
            slot_count,
            _pad: [0; 32],
            enqueue: Cursor::new(),
            dequeue: Cursor::new(),
        }
    }
}

/// One ring position. `sequence` tells producers and consumers whose turn it is.
#[repr(C)]
pub(crate) struct Cell {
    pub sequence: AtomicU64,
    pub value: AtomicU64,
}

const _: () = assert!(size_of::<Cell>() == 16);

/// Offsets of each part of the free list inside its region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueLayout {
    pub capacity: usize,
    pub slot_count: usize,
    pub cells_offset: usize,
    pub states_offset: usize,
    pub total_size: usize,
}

impl QueueLayout {
    /// Layout for a ring holding up to `slot_count` ids
    pub(crate) fn for_slots(slot_count: usize) -> Result<Self> {
        if slot_count == 0 || slot_count > u32::MAX as usize {
            return Err(ShmPoolError::invalid_parameter(
                "slot_count",
                format!("slot count must be in 1..={}, got {}", u32::MAX, slot_count),
            ));
        }
        let capacity = slot_count.next_power_of_two();
        let cells_offset = size_of::<QueueHeader>();
        let states_offset = cells_offset + capacity * size_of::<Cell>();
        let total_size = states_offset + slot_count * size_of::<AtomicU32>();
        Ok(Self {
            capacity,
            slot_count,
            cells_offset,
            states_offset,
            total_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_rounds_capacity() {
        let layout = QueueLayout::for_slots(5).unwrap();
        assert_eq!(layout.capacity, 8);
        assert_eq!(layout.cells_offset, 192);
        assert_eq!(layout.states_offset, 192 + 8 * 16);
        assert_eq!(layout.total_size, 192 + 8 * 16 + 5 * 4);
    }

    #[test]
    fn test_layout_rejects_zero() {
        assert!(QueueLayout::for_slots(0).is_err());
    }
}
