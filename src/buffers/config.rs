//! Allocator configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::memory::BackingType;

/// Where and how shared buffers and free lists get their storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Backing for every region the allocator creates
    pub backing_type: BackingType,
    /// Prefix of generated region names
    pub name_prefix: String,
    /// Directory for file-backed regions; the temp directory when unset
    pub directory: Option<PathBuf>,
    /// Unix permissions of backing files
    pub permissions: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            backing_type: BackingType::default(),
            name_prefix: "shmpool".to_string(),
            directory: None,
            permissions: 0o600,
        }
    }
}

impl AllocatorConfig {
    /// Create a configuration with the default backing
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the region name prefix
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Place file-backed regions in `directory`
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Set backing file permissions
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::ShmPoolError;

        if self.name_prefix.is_empty() {
            return Err(ShmPoolError::invalid_parameter(
                "name_prefix",
                "Name prefix cannot be empty",
            ));
        }

        if self.name_prefix.contains(['/', '\0']) {
            return Err(ShmPoolError::invalid_parameter(
                "name_prefix",
                "Name prefix cannot contain '/' or NUL",
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

        Ok(())
    }
}
