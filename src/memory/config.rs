//! Where a region's bytes live and how a new region is named

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, ShmPoolError};

/// Storage behind a shared region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingType {
    /// A file on disk, shareable by path
    FileBacked,
    /// An anonymous memfd, shareable by inherited descriptor (Linux only)
    MemFd,
}

impl Default for BackingType {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            Self::MemFd
        } else {
            Self::FileBacked
        }
    }
}

impl BackingType {
    /// Whether this platform can create the backing
    pub fn is_supported(&self) -> bool {
        match self {
            BackingType::FileBacked => true,
            BackingType::MemFd => cfg!(target_os = "linux"),
        }
    }

    /// Short label used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::FileBacked => "file-backed",
            BackingType::MemFd => "memfd",
        }
    }
}

/// Parameters for a freshly created region.
///
/// Regions are always created new; a region made elsewhere is mapped through
/// its [`RegionHandle`](super::RegionHandle) instead.
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Region name; the memfd label, or the file name under the temp directory
    pub name: String,
    /// Size in bytes
    pub size: usize,
    pub backing_type: BackingType,
    /// Explicit backing file, overriding the temp-directory default
    pub file_path: Option<PathBuf>,
    /// Mode bits for a new backing file
    pub permissions: u32,
}

impl RegionConfig {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            backing_type: BackingType::default(),
            file_path: None,
            permissions: 0o600,
        }
    }

    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Reject configurations no backing could be created from
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ShmPoolError::invalid_parameter(
                "name",
                "Region name cannot be empty",
            ));
        }
        if self.name.contains('\0') {
            return Err(ShmPoolError::invalid_parameter(
                "name",
                "Region name cannot contain NUL bytes",
            ));
        }
        if self.size == 0 {
            return Err(ShmPoolError::invalid_parameter(
                "size",
                "Region size must be greater than 0",
            ));
        }
        if !self.backing_type.is_supported() {
            return Err(ShmPoolError::invalid_parameter(
                "backing_type",
                format!(
                    "Backing type {} is not supported on this platform",
                    self.backing_type.name()
                ),
            ));
        }
        if self.backing_type == BackingType::FileBacked {
            // The name becomes a file name only without an explicit path.
            if self.file_path.is_none() && self.name.contains('/') {
                return Err(ShmPoolError::invalid_parameter(
                    "name",
                    format!("Region name '{}' is not a valid file name", self.name),
                ));
            }
            if self.permissions & !0o777 != 0 {
                return Err(ShmPoolError::invalid_parameter(
                    "permissions",
                    format!("{:o} is not a file mode", self.permissions),
                ));
            }
        }
        Ok(())
    }

    /// Backing file: `file_path`, else `shmpool_<name>` in the temp directory
    pub fn backing_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("shmpool_{}", self.name)))
    }
}
