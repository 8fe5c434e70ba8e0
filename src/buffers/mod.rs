//! Shared buffers, their allocator, and the views mapped over them

pub mod config;
pub mod shared;
pub mod view;

pub use config::AllocatorConfig;
pub use shared::{allocate, allocate_scalar, BufferHandle, RegionAllocator, SharedBuffer};
pub use view::{as_view, AxisSlice, View};
pub(crate) use view::RawView;
