//! Free list of pool slots
//!
//! The allocator for pool slots: a lock-free, bounded FIFO of slot ids that
//! several processes can map at once. It is the only synchronization in the
//! crate; buffers themselves carry no locks.

mod layout;
pub mod queue;

pub use queue::{FreeListQueue, QueueHandle, SlotId};
