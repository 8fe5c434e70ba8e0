//! # shmpool - Shared-Memory Buffer Pools
//!
//! shmpool keeps a fixed set of pre-allocated numeric arrays in shared memory
//! and hands them out to cooperating processes through a lock-free FIFO free
//! list, so large arrays move between workers without being copied.
//!
//! ## Features
//!
//! - **Typed views**: reinterpret raw shared storage as shaped `f32`/`f64` arrays, row- or column-major
//! - **Buffer pools**: N identically shaped buffers behind `get_buffer` / `reclaim`
//! - **Record pools**: N named groups of independently shaped buffers with length-truncated checkout
//! - **Cross-process free list**: bounded MPMC ring in shared memory, double frees rejected
//! - **Process handoff**: serialisable handles, re-attached with memfd inheritance or by file path
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  Factories: create_buffers, create_dict_buffers  │
//! ├────────────────────────┬─────────────────────────┤
//! │  BufferManager         │  BufferedDictManager    │
//! │  - one shape per slot  │  - named fields         │
//! │  - index projection    │  - length truncation    │
//! ├────────────────────────┴─────────────────────────┤
//! │  FreeListQueue (slot ids, own shared region)     │
//! ├──────────────────────────────────────────────────┤
//! │  SharedBuffer + View  │  DType table, Shape      │
//! ├──────────────────────────────────────────────────┤
//! │  SharedMemoryRegion (memfd or file-backed mmap)  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use shmpool::{create_managed_buffers, Shape};
//!
//! let pool = create_managed_buffers::<f64>(4, &Shape::from([128, 3]))?;
//! let (slot, mut view) = pool.get_buffer(None)?;
//! view.fill(0.0);
//! pool.reclaim(slot)?;
//! # Ok::<(), shmpool::ShmPoolError>(())
//! ```

pub mod buffers;
pub mod dtype;
pub mod error;
pub mod free_list;
pub mod memory;
pub mod pools;
pub mod shape;

pub use buffers::{
    allocate, allocate_scalar, as_view, AllocatorConfig, AxisSlice, BufferHandle,
    RegionAllocator, SharedBuffer, View,
};
pub use dtype::{DType, Element, StorageWord};
pub use error::{Result, ShmPoolError};
pub use free_list::{FreeListQueue, QueueHandle, SlotId};
pub use memory::{BackingType, RegionConfig, RegionHandle, SharedMemoryRegion};
pub use pools::{
    create_buffers, create_dict_buffers, create_managed_buffers, create_managed_dict_buffers,
    create_shared_dict, create_shared_dict_with_shapes, reconstruct_named_views,
    BufferRecord, BufferedDictManager, BufferManager, DictPoolHandles, NamedViews, PoolFactory,
    PoolHandles, PoolStats, SharedDict,
};
pub use shape::{Order, Shape, ShapeSpec};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
