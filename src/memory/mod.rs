//! Shared memory regions backing every buffer and free list

pub mod config;
pub mod regions;

pub use config::{BackingType, RegionConfig};
pub use regions::{RegionHandle, RegionMetadata, SharedMemoryRegion};
