//! POSIX named shared memory with owned mapping lifetime.
//!
//! A [`ShmRegion`] opens the named object with `shm_open`, maps it with
//! `memmap2` and keeps both the file handle and the mapping alive for the
//! lifetime of the value. The creating side owns the OS object and unlinks
//! it on drop; attaching sides only unmap.

use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::ffi::CString;
use std::fs::File;
use std::io;

/// A mapped POSIX shared memory object.
#[derive(Debug)]
pub struct ShmRegion {
    name: String,
    /// Raw pointer to the start of the mapped region.
    base: *mut u8,
    len: usize,
    /// Memory map kept alive but not directly accessed after init.
    _mmap: MmapMut,
    /// File handle kept alive to maintain the memory map validity.
    _file: File,
    /// Creator unlinks the OS object on drop; attachers leave it alone.
    owner: bool,
}

// Safety: the region is plain bytes; all synchronization over its contents
// is the caller's responsibility (the ring header provides it).
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

fn shm_name(name: &str) -> io::Result<CString> {
    CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "shm name contains NUL"))
}

impl ShmRegion {
    /// Creates (or replaces) the named object, sizes it to `len` bytes and
    /// maps it read-write. The returned region owns the OS object.
    pub fn create(name: &str, len: usize) -> io::Result<Self> {
        let cname = shm_name(name)?;
        // O_TRUNC replaces a region left behind by a hard-killed session;
        // ftruncate then gives back zeroed pages.
        let owned_fd = shm_open(
            cname.as_c_str(),
            OFlag::O_CREAT | OFlag::O_TRUNC | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        ftruncate(&owned_fd, len as i64)?;
        let file = File::from(owned_fd);
        Self::map(name, file, true)
    }

    /// Attaches to an existing named object and maps its full extent.
    pub fn open(name: &str) -> io::Result<Self> {
        let cname = shm_name(name)?;
        let owned_fd = shm_open(cname.as_c_str(), OFlag::O_RDWR, Mode::empty())?;
        let file = File::from(owned_fd);
        Self::map(name, file, false)
    }

    fn map(name: &str, file: File, owner: bool) -> io::Result<Self> {
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        let len = mmap.len();
        Ok(Self {
            name: name.to_owned(),
            base,
            len,
            _mmap: mmap,
            _file: file,
            owner,
        })
    }

    /// Removes the named object without mapping it. Attaching afterwards
    /// fails; existing mappings stay valid until unmapped.
    pub fn unlink(name: &str) -> io::Result<()> {
        let cname = shm_name(name)?;
        shm_unlink(cname.as_c_str())?;
        Ok(())
    }

    /// OS-global name of the region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw pointer to the start of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.base
    }

    /// Mutable raw pointer to the start of the mapping.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // The mapping and file handle unmap/close themselves; only the OS
        // name needs explicit cleanup, and only by its creator.
        if self.owner {
            let _ = Self::unlink(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/framering_shm_{tag}_{}", std::process::id())
    }

    #[test]
    fn test_create_open_roundtrip() {
        let name = unique_name("roundtrip");
        let created = ShmRegion::create(&name, 4096).unwrap();
        unsafe {
            *created.as_mut_ptr() = 0xAB;
            *created.as_mut_ptr().add(4095) = 0xCD;
        }

        let opened = ShmRegion::open(&name).unwrap();
        assert_eq!(opened.len(), 4096);
        unsafe {
            assert_eq!(*opened.as_ptr(), 0xAB);
            assert_eq!(*opened.as_ptr().add(4095), 0xCD);
        }
    }

    #[test]
    fn test_owner_unlinks_on_drop() {
        let name = unique_name("unlink");
        {
            let _region = ShmRegion::create(&name, 1024).unwrap();
            assert!(ShmRegion::open(&name).is_ok());
        }
        assert!(ShmRegion::open(&name).is_err());
    }

    #[test]
    fn test_open_missing_fails() {
        assert!(ShmRegion::open("/framering_shm_missing_region").is_err());
    }
}
