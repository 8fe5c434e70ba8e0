//! Shared buffers and the allocator that creates them

use std::{
    ptr::NonNull,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    dtype::{DType, Element},
    error::{Result, ShmPoolError},
    memory::{BackingType, RegionConfig, RegionHandle, SharedMemoryRegion},
    shape::Shape,
};

use super::config::AllocatorConfig;

/// A fixed-length block of elements in storage every cooperating process can map.
///
/// Cloning a `SharedBuffer` clones the local handle to the mapping, not the
/// data. The element dtype and length never change after allocation.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    region: Arc<SharedMemoryRegion>,
    dtype: DType,
    len: usize,
}

/// Raw, process-independent description of a [`SharedBuffer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferHandle {
    pub region: RegionHandle,
    pub dtype: DType,
    pub len: usize,
}

impl SharedBuffer {
    /// Element type
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty buffers cannot be allocated
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes occupied by the elements
    pub fn size_bytes(&self) -> usize {
        self.len * self.dtype.size_bytes()
    }

    /// Region holding the elements
    pub fn region(&self) -> &Arc<SharedMemoryRegion> {
        &self.region
    }

    /// Handle for re-attaching this buffer in another process
    pub fn handle(&self) -> BufferHandle {
        BufferHandle {
            region: self.region.handle(),
            dtype: self.dtype,
            len: self.len,
        }
    }

    /// Map a buffer described by `handle`.
    ///
    /// # Safety
    /// Same contract as [`SharedMemoryRegion::attach`].
    pub unsafe fn attach(handle: &BufferHandle) -> Result<Self> {
        let needed = byte_len(handle.len, handle.dtype)?;
        if needed > handle.region.size {
            return Err(ShmPoolError::memory(format!(
                "buffer of {} x {} needs {} bytes, region '{}' has {}",
                handle.len, handle.dtype, needed, handle.region.name, handle.region.size
            )));
        }
        let region = SharedMemoryRegion::attach(&handle.region)?;
        Ok(Self {
            region: Arc::new(region),
            dtype: handle.dtype,
            len: handle.len,
        })
    }

    /// Typed pointer to the first element; fails unless `T` matches the dtype
    pub fn typed_ptr<T: Element>(&self) -> Result<NonNull<T>> {
        if T::DTYPE != self.dtype {
            return Err(ShmPoolError::DtypeMismatch {
                expected: T::DTYPE,
                actual: self.dtype,
            });
        }
        // Mappings are page aligned, which satisfies every registered word.
        let ptr = unsafe { self.region.as_mut_ptr_unsafe::<T>() };
        NonNull::new(ptr).ok_or_else(|| ShmPoolError::memory("shared mapping has a null base"))
    }
}

/// Creates shared buffers according to an [`AllocatorConfig`]
#[derive(Debug, Clone, Default)]
pub struct RegionAllocator {
    config: AllocatorConfig,
}

impl RegionAllocator {
    /// Create an allocator, validating `config`
    pub fn new(config: AllocatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Allocator configuration
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocate a buffer of `product(shape)` elements of `dtype`
    pub fn allocate(&self, shape: &Shape, dtype: DType) -> Result<SharedBuffer> {
        let len = shape.num_elements().ok_or_else(|| {
            ShmPoolError::invalid_parameter(
                "shape",
                format!("shape {} overflows the element count", shape),
            )
        })?;
        if len == 0 {
            return Err(ShmPoolError::invalid_parameter(
                "shape",
                format!("shape {} holds no elements", shape),
            ));
        }
        let size = byte_len(len, dtype)?;
        let region = self.region(size, "buf")?;
        Ok(SharedBuffer {
            region,
            dtype,
            len,
        })
    }

    /// Allocate a one-element buffer for a control value
    pub fn allocate_scalar(&self, dtype: DType) -> Result<SharedBuffer> {
        self.allocate(&Shape::scalar(), dtype)
    }

    /// Create a fresh region of `size` bytes with a generated name
    pub(crate) fn region(&self, size: usize, kind: &str) -> Result<Arc<SharedMemoryRegion>> {
        let name = format!(
            "{}-{}-{}-{}",
            self.config.name_prefix,
            kind,
            std::process::id(),
            next_region_sequence()
        );
        let mut config = RegionConfig::new(name, size)
            .with_backing_type(self.config.backing_type)
            .with_permissions(self.config.permissions);
        if self.config.backing_type == BackingType::FileBacked {
            if let Some(directory) = &self.config.directory {
                let path = directory.join(&config.name);
                config = config.with_file_path(path);
            }
        }
        Ok(Arc::new(SharedMemoryRegion::new(config)?))
    }
}

/// Allocate a buffer with the default allocator
pub fn allocate(shape: &Shape, dtype: DType) -> Result<SharedBuffer> {
    RegionAllocator::default().allocate(shape, dtype)
}

/// Allocate a one-element buffer with the default allocator
pub fn allocate_scalar(dtype: DType) -> Result<SharedBuffer> {
    RegionAllocator::default().allocate_scalar(dtype)
}

fn byte_len(len: usize, dtype: DType) -> Result<usize> {
    len.checked_mul(dtype.size_bytes())
        .ok_or_else(|| ShmPoolError::invalid_parameter("shape", "buffer size overflows usize"))
}

/// Process-wide counter keeping generated region names unique
fn next_region_sequence() -> u64 {
    static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(1);
    SEQUENCE_COUNTER.fetch_add(1, Ordering::Relaxed)
}
