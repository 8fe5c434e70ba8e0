//! Shared memory region implementation

use std::{
    fs::{File, OpenOptions},
    os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd},
    os::unix::fs::OpenOptionsExt,
    path::PathBuf,
    time::SystemTime,
};

use memmap2::{MmapMut, MmapOptions};
#[cfg(target_os = "linux")]
use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::ftruncate,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShmPoolError};

use super::config::{BackingType, RegionConfig};

/// Metadata for a shared memory region
#[derive(Debug, Clone)]
pub struct RegionMetadata {
    /// Name of the region
    pub name: String,
    /// Size in bytes
    pub size: usize,
    /// Type of backing storage
    pub backing_type: BackingType,
    /// Backing file for file-backed regions
    pub path: Option<PathBuf>,
    /// When this process created or attached the mapping
    pub created_at: SystemTime,
}

/// Everything another process needs to map the same region.
///
/// A memfd region is named by its descriptor number, which stays valid in
/// children that inherit it across `fork`. A file-backed region is named by
/// its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionHandle {
    pub name: String,
    pub size: usize,
    pub backing_type: BackingType,
    pub fd: RawFd,
    pub path: Option<PathBuf>,
}

/// A memory-mapped region visible to every process that maps the same backing
#[derive(Debug)]
pub struct SharedMemoryRegion {
    /// Region metadata
    metadata: RegionMetadata,
    /// Memory-mapped region
    mmap: MmapMut,
    /// Optional file handle for file-backed regions
    _file: Option<File>,
    /// Owned file descriptor for memfd regions
    _owned_fd: Option<OwnedFd>,
    /// Raw file descriptor of whichever of the above is present
    fd: RawFd,
}

impl SharedMemoryRegion {
    /// Create a new shared memory region
    pub fn new(config: RegionConfig) -> Result<Self> {
        config.validate()?;

        let (file, owned_fd, fd) = Self::create_backing(&config)?;
        let mmap = Self::create_mapping(&file, &owned_fd, config.size)?;

        let path = match config.backing_type {
            BackingType::FileBacked => Some(config.backing_path()),
            BackingType::MemFd => None,
        };

        log::debug!(
            "created {} region '{}' ({} bytes, fd {})",
            config.backing_type.name(),
            config.name,
            config.size,
            fd
        );

        let metadata = RegionMetadata {
            name: config.name,
            size: config.size,
            backing_type: config.backing_type,
            path,
            created_at: SystemTime::now(),
        };

        Ok(Self {
            metadata,
            mmap,
            _file: file,
            _owned_fd: owned_fd,
            fd,
        })
    }

    /// Map a region created elsewhere.
    ///
    /// memfd regions are re-mapped through a duplicate of the descriptor, so
    /// the new mapping stays valid even if the creator closes its own copy.
    ///
    /// # Safety
    /// `handle` must describe a live region created by a cooperating process:
    /// for memfd backing, `handle.fd` must be an open descriptor in this
    /// process referring to that region's memfd.
    pub unsafe fn attach(handle: &RegionHandle) -> Result<Self> {
        if handle.size == 0 {
            return Err(ShmPoolError::invalid_parameter(
                "size",
                "Region size must be greater than 0",
            ));
        }

        let file = match handle.backing_type {
            BackingType::FileBacked => {
                let path = handle.path.as_ref().ok_or_else(|| {
                    ShmPoolError::invalid_parameter(
                        "path",
                        "File-backed handle carries no path",
                    )
                })?;
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(path)
                    .map_err(|e| ShmPoolError::from_io(e, "Failed to open region file"))?
            }
            BackingType::MemFd => {
                let owned = BorrowedFd::borrow_raw(handle.fd)
                    .try_clone_to_owned()
                    .map_err(|e| ShmPoolError::from_io(e, "Failed to duplicate memfd"))?;
                File::from(owned)
            }
        };

        let actual = file
            .metadata()
            .map_err(|e| ShmPoolError::from_io(e, "Failed to stat region backing"))?
            .len() as usize;
        if actual < handle.size {
            return Err(ShmPoolError::memory(format!(
                "region '{}' backing holds {} bytes, handle expects {}",
                handle.name, actual, handle.size
            )));
        }

        let file = Some(file);
        let mmap = Self::create_mapping(&file, &None, handle.size)?;
        let fd = file.as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1);

        log::debug!(
            "attached {} region '{}' ({} bytes, fd {})",
            handle.backing_type.name(),
            handle.name,
            handle.size,
            fd
        );

        Ok(Self {
            metadata: RegionMetadata {
                name: handle.name.clone(),
                size: handle.size,
                backing_type: handle.backing_type,
                path: handle.path.clone(),
                created_at: SystemTime::now(),
            },
            mmap,
            _file: file,
            _owned_fd: None,
            fd,
        })
    }

    /// Create the backing storage for the region
    fn create_backing(config: &RegionConfig) -> Result<(Option<File>, Option<OwnedFd>, RawFd)> {
        match config.backing_type {
            BackingType::FileBacked => Self::create_file_backing(config),
            BackingType::MemFd => Self::create_memfd_backing(config),
        }
    }

    /// Create file-backed storage
    fn create_file_backing(config: &RegionConfig) -> Result<(Option<File>, Option<OwnedFd>, RawFd)> {
        let path = config.backing_path();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(config.permissions)
            .open(&path)
            .map_err(|e| ShmPoolError::from_io(e, "Failed to create region file"))?;
        file.set_len(config.size as u64)
            .map_err(|e| ShmPoolError::from_io(e, "Failed to set file size"))?;

        let fd = file.as_raw_fd();
        Ok((Some(file), None, fd))
    }

    /// Create memfd-backed storage
    #[cfg(target_os = "linux")]
    fn create_memfd_backing(config: &RegionConfig) -> Result<(Option<File>, Option<OwnedFd>, RawFd)> {
        let name_cstr = std::ffi::CString::new(config.name.clone())
            .map_err(|_| ShmPoolError::invalid_parameter("name", "Name contains null bytes"))?;

        let owned_fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| ShmPoolError::platform(format!("Failed to create memfd: {}", e)))?;

        let raw_fd = owned_fd.as_raw_fd();

        ftruncate(&owned_fd, config.size as i64)
            .map_err(|e| ShmPoolError::platform(format!("Failed to set memfd size: {}", e)))?;

        Ok((None, Some(owned_fd), raw_fd))
    }

    #[cfg(not(target_os = "linux"))]
    fn create_memfd_backing(_config: &RegionConfig) -> Result<(Option<File>, Option<OwnedFd>, RawFd)> {
        Err(ShmPoolError::platform("memfd backing requires Linux"))
    }

    /// Create memory mapping for the backing storage
    fn create_mapping(file: &Option<File>, owned_fd: &Option<OwnedFd>, size: usize) -> Result<MmapMut> {
        match (file, owned_fd) {
            (Some(f), _) => unsafe {
                MmapOptions::new()
                    .len(size)
                    .map_mut(f)
                    .map_err(|e| ShmPoolError::from_io(e, "Failed to create memory mapping"))
            },
            (None, Some(owned_fd)) => unsafe {
                MmapOptions::new()
                    .len(size)
                    .map_mut(owned_fd)
                    .map_err(|e| ShmPoolError::from_io(e, "Failed to create memory mapping"))
            },
            (None, None) => Err(ShmPoolError::platform(
                "No file or owned fd available for mapping",
            )),
        }
    }

    /// Get the region metadata
    pub fn metadata(&self) -> &RegionMetadata {
        &self.metadata
    }

    /// Handle another process can pass to [`SharedMemoryRegion::attach`]
    pub fn handle(&self) -> RegionHandle {
        RegionHandle {
            name: self.metadata.name.clone(),
            size: self.metadata.size,
            backing_type: self.metadata.backing_type,
            fd: self.fd,
            path: self.metadata.path.clone(),
        }
    }

    /// Get the raw memory slice (read-only)
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Get the raw memory slice (mutable)
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Get a typed pointer to the start of the region
    pub fn as_ptr<T>(&self) -> *const T {
        self.mmap.as_ptr() as *const T
    }

    /// Get a mutable typed pointer through a shared reference.
    ///
    /// The mapping is shared with other processes, so exclusive access can
    /// never be proven locally; writers coordinate through the free list.
    ///
    /// # Safety
    /// Caller must ensure no conflicting access to the bytes it writes
    pub unsafe fn as_mut_ptr_unsafe<T>(&self) -> *mut T {
        self.mmap.as_ptr() as *mut T
    }

    /// Get the size of the region
    pub fn size(&self) -> usize {
        self.metadata.size
    }

    /// Get the name of the region
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Get the file descriptor
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Check if the region is file-backed
    pub fn is_file_backed(&self) -> bool {
        matches!(self.metadata.backing_type, BackingType::FileBacked)
    }

    /// Check if the region is memfd-backed
    pub fn is_memfd_backed(&self) -> bool {
        matches!(self.metadata.backing_type, BackingType::MemFd)
    }
}

unsafe impl Send for SharedMemoryRegion {}
unsafe impl Sync for SharedMemoryRegion {}
