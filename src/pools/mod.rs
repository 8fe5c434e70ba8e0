//! Slot pools built on the free list
//!
//! [`BufferManager`] hands out whole buffers of one shape;
//! [`BufferedDictManager`] hands out named records, optionally cut to a
//! requested length. Both are created in one call by the factories.

pub mod dict;
pub mod factory;
pub mod manager;
pub mod record;
pub mod stats;

pub use dict::{BufferedDictManager, DictPoolHandles, NamedViews};
pub use factory::{
    create_buffers, create_dict_buffers, create_managed_buffers, create_managed_dict_buffers,
    create_shared_dict, create_shared_dict_with_shapes, PoolFactory,
};
pub use manager::{BufferManager, PoolHandles};
pub use record::{reconstruct_named_views, BufferRecord, RecordHandle, SharedDict, SharedDictHandle};
pub use stats::{AtomicPoolStats, PoolStats};
