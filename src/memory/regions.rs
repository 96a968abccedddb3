//! Shared memory region implementation

use std::{
    ffi::CString,
    fs::{File, OpenOptions},
    os::fd::{AsRawFd, OwnedFd, RawFd},
    os::unix::fs::OpenOptionsExt,
    time::SystemTime,
};

use log::debug;
use memmap2::{MmapMut, MmapOptions};
use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::ftruncate,
};

use crate::error::{HugelinkError, Result};

use super::config::{BackingType, RegionConfig};

/// Identity of a mapped region
#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub name: String,
    pub size: usize,
    pub page_size: usize,
    pub backing_type: BackingType,
    pub created: bool,
    pub mapped_at: SystemTime,
}

/// A mapping of the memory both peers share
#[derive(Debug)]
pub struct SharedMemoryRegion {
    info: RegionInfo,
    mmap: MmapMut,
    _file: Option<File>,
    _owned_fd: Option<OwnedFd>,
    fd: RawFd,
}

impl SharedMemoryRegion {
    /// Create or open a shared memory region
    pub fn new(config: RegionConfig) -> Result<Self> {
        config.validate()?;

        let (file, owned_fd, size) = match config.backing_type {
            BackingType::FileBacked => Self::file_backing(&config)?,
            BackingType::MemFd => Self::memfd_backing(&config)?,
        };

        let mmap = match (&file, &owned_fd) {
            (Some(f), _) => unsafe { MmapOptions::new().len(size).map_mut(f) },
            (None, Some(fd)) => unsafe { MmapOptions::new().len(size).map_mut(fd) },
            (None, None) => {
                return Err(HugelinkError::platform(
                    "No file or owned fd available for mapping",
                ))
            }
        }
        .map_err(|e| HugelinkError::from_io(e, "Failed to create memory mapping"))?;

        let fd = match (&file, &owned_fd) {
            (Some(f), _) => f.as_raw_fd(),
            (None, Some(o)) => o.as_raw_fd(),
            (None, None) => -1,
        };

        debug!(
            "mapped region '{}' ({} bytes, {}) at {:p}",
            config.name,
            size,
            config.backing_type.name(),
            mmap.as_ptr()
        );

        Ok(Self {
            info: RegionInfo {
                name: config.name,
                size,
                page_size: config.page_size,
                backing_type: config.backing_type,
                created: config.create,
                mapped_at: SystemTime::now(),
            },
            mmap,
            _file: file,
            _owned_fd: owned_fd,
            fd,
        })
    }

    fn file_backing(config: &RegionConfig) -> Result<(Option<File>, Option<OwnedFd>, usize)> {
        let path = config.default_file_path();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(config.create)
            .truncate(false)
            .mode(config.permissions)
            .open(&path)
            .map_err(|e| {
                HugelinkError::from_io(e, &format!("Failed to open {}", path.display()))
            })?;

        let size = if config.create {
            file.set_len(config.size as u64)
                .map_err(|e| HugelinkError::from_io(e, "Failed to set file size"))?;
            config.size
        } else {
            let len = file
                .metadata()
                .map_err(|e| HugelinkError::from_io(e, "Failed to stat region file"))?
                .len() as usize;
            if len == 0 {
                return Err(HugelinkError::invalid_parameter(
                    "file_path",
                    format!("{} is empty", path.display()),
                ));
            }
            if config.size != 0 && config.size > len {
                return Err(HugelinkError::invalid_parameter(
                    "size",
                    format!("requested {} bytes but {} holds {}", config.size, path.display(), len),
                ));
            }
            len
        };

        Ok((Some(file), None, size))
    }

    fn memfd_backing(config: &RegionConfig) -> Result<(Option<File>, Option<OwnedFd>, usize)> {
        let name_cstr = CString::new(config.name.clone())
            .map_err(|_| HugelinkError::invalid_parameter("name", "Name contains null bytes"))?;

        let mut flags = MemFdCreateFlag::MFD_CLOEXEC;
        if config.huge_pages {
            flags |= MemFdCreateFlag::MFD_HUGETLB;
        }

        let owned_fd = memfd_create(&name_cstr, flags)
            .map_err(|e| HugelinkError::platform(format!("Failed to create memfd: {}", e)))?;

        ftruncate(&owned_fd, config.size as i64)
            .map_err(|e| HugelinkError::platform(format!("Failed to set memfd size: {}", e)))?;

        Ok((None, Some(owned_fd), config.size))
    }

    /// Get the region info
    pub fn info(&self) -> &RegionInfo {
        &self.info
    }

    /// Base address of the mapping in this process
    pub fn base_addr(&self) -> usize {
        self.mmap.as_ptr() as usize
    }

    /// Get a typed pointer to the start of the region
    pub fn as_ptr<T>(&self) -> *const T {
        self.mmap.as_ptr() as *const T
    }

    /// Get a mutable typed pointer through a shared reference
    ///
    /// # Safety
    /// Every access through the pointer must follow the synchronization
    /// protocol of the structure stored at that location.
    pub unsafe fn as_mut_ptr_unsafe<T>(&self) -> *mut T {
        self.mmap.as_ptr() as *mut T
    }

    /// Get the size of the region
    pub fn size(&self) -> usize {
        self.info.size
    }

    /// Get the arena page size
    pub fn page_size(&self) -> usize {
        self.info.page_size
    }

    /// Get the name of the region
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Whether this mapping created the backing storage
    pub fn created(&self) -> bool {
        self.info.created
    }

    /// Flush changes to persistent storage (for file-backed regions)
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| HugelinkError::from_io(e, "Failed to flush memory mapping"))
    }

    /// Get the file descriptor
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

unsafe impl Send for SharedMemoryRegion {}
unsafe impl Sync for SharedMemoryRegion {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memfd_region() {
        let config = RegionConfig::new("unit_memfd", 256 * 1024)
            .with_backing_type(BackingType::MemFd)
            .with_page_size(64 * 1024);
        let region = SharedMemoryRegion::new(config).unwrap();
        assert_eq!(region.size(), 256 * 1024);
        assert_eq!(region.page_size(), 64 * 1024);
        assert!(region.created());
        assert!(region.fd() >= 0);
        assert_ne!(region.base_addr(), 0);
    }

    #[test]
    fn test_file_region_shared_between_mappings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("arena");

        let config = RegionConfig::new("unit_file", 128 * 1024)
            .with_file_path(&path)
            .with_page_size(64 * 1024);
        let first = SharedMemoryRegion::new(config).unwrap();

        let attach = RegionConfig::attach("unit_file", &path).with_page_size(64 * 1024);
        let second = SharedMemoryRegion::new(attach).unwrap();
        assert_eq!(second.size(), 128 * 1024);
        assert!(!second.created());
        assert_ne!(first.base_addr(), second.base_addr());

        unsafe {
            first.as_mut_ptr_unsafe::<u8>().add(4096).write_volatile(0xA5);
            assert_eq!(second.as_ptr::<u8>().add(4096).read_volatile(), 0xA5);
        }
    }

    #[test]
    fn test_attach_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = RegionConfig::attach("missing", dir.path().join("nope"));
        assert!(matches!(
            SharedMemoryRegion::new(config),
            Err(HugelinkError::Io { .. })
        ));
    }
}
