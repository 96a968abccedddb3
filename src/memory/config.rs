//! Configuration types for shared memory regions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::layout::constants::{DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};

/// Types of shared memory backing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingType {
    /// File-backed shared memory, typically on hugetlbfs or `/dev/shm`
    FileBacked,
    /// Anonymous memory file descriptor, optionally hugetlb-backed
    MemFd,
}

impl Default for BackingType {
    fn default() -> Self {
        Self::FileBacked
    }
}

impl BackingType {
    /// Get a human-readable name for the backing type
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::FileBacked => "file-backed",
            BackingType::MemFd => "memfd",
        }
    }
}

/// Configuration for creating or attaching to a shared memory region
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Name of the shared memory region
    pub name: String,
    /// Total size of the region in bytes (0 when attaching adopts the file size)
    pub size: usize,
    /// Backing type for the shared memory
    pub backing_type: BackingType,
    /// Optional file path for file-backed regions
    pub file_path: Option<PathBuf>,
    /// Whether to create the region if it doesn't exist
    pub create: bool,
    /// Permissions for the region (Unix permissions)
    pub permissions: u32,
    /// Translation page size of the arena
    pub page_size: usize,
    /// Request `MFD_HUGETLB` for memfd regions
    pub huge_pages: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: 0,
            backing_type: BackingType::default(),
            file_path: None,
            create: true,
            permissions: 0o600,
            page_size: DEFAULT_PAGE_SIZE,
            huge_pages: false,
        }
    }
}

impl RegionConfig {
    /// Create a new region configuration
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Configuration for attaching to a region another process created
    pub fn attach(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            file_path: Some(path.into()),
            create: false,
            ..Default::default()
        }
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the file path for file-backed regions
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set whether to create the region if it doesn't exist
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Set the permissions for the region
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the arena page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Request hugetlb pages for memfd regions
    pub fn with_huge_pages(mut self, huge_pages: bool) -> Self {
        self.huge_pages = huge_pages;
        self
    }

    /// Number of low bits covering an offset inside one page
    pub fn page_shift(&self) -> u32 {
        self.page_size.trailing_zeros()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::HugelinkError;

        if self.name.is_empty() {
            return Err(HugelinkError::invalid_parameter(
                "name",
                "Region name cannot be empty",
            ));
        }

        if self.create && self.size == 0 {
            return Err(HugelinkError::invalid_parameter(
                "size",
                "Region size must be greater than 0",
            ));
        }

        if !self.page_size.is_power_of_two() || self.page_size < MIN_PAGE_SIZE {
            return Err(HugelinkError::invalid_parameter(
                "page_size",
                format!(
                    "Page size {} must be a power of two of at least {}",
                    self.page_size, MIN_PAGE_SIZE
                ),
            ));
        }

        if self.create && self.size % self.page_size != 0 {
            return Err(HugelinkError::invalid_parameter(
                "size",
                format!(
                    "Region size {} is not a multiple of the page size {}",
                    self.size, self.page_size
                ),
            ));
        }

        if self.backing_type == BackingType::MemFd && !self.create {
            return Err(HugelinkError::invalid_parameter(
                "backing_type",
                "memfd regions cannot be attached by path",
            ));
        }

        if self.backing_type == BackingType::FileBacked && !self.create && self.file_path.is_none()
        {
            return Err(HugelinkError::invalid_parameter(
                "file_path",
                "File path must be specified for existing file-backed regions",
            ));
        }

        Ok(())
    }

    /// Get the default file path for this region
    pub fn default_file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/dev/shm/hugelink_{}", self.name)))
    }
}
