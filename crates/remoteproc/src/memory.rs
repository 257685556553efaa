//! Host-visible physical memory access
//!
//! The section loader and the resource interpreter need temporary mappings of
//! host physical memory at addresses the firmware names. [`PhysMemory`] is
//! the seam: [`DevMem`] backs it with `/dev/mem` on real platforms, tests
//! back it with plain RAM.

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::fs::OpenOptions;
use std::io;
use std::num::NonZeroUsize;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::ptr::NonNull;

/// A host-visible mapping of a physical address range
///
/// Dropped regions release their mapping. Accesses are offset-based rather
/// than slice-based so implementations can guard bounds and aliasing.
pub trait MappedRegion: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `buf.len()` bytes out of the region starting at `offset`
    fn read(&self, offset: usize, buf: &mut [u8]) -> io::Result<()>;

    /// Copy `data` into the region starting at `offset`
    fn write(&mut self, offset: usize, data: &[u8]) -> io::Result<()>;
}

/// Provider of temporary mappings of host physical memory
pub trait PhysMemory: Send + Sync {
    fn map(&self, pa: u64, len: usize) -> io::Result<Box<dyn MappedRegion>>;
}

/// Physical memory access through `/dev/mem`
///
/// Opens the device with `O_SYNC` so mappings are uncached, as the loader
/// requires. An alternate path supports platform-specific carveout devices
/// (and regular files in tests).
#[derive(Debug, Clone)]
pub struct DevMem {
    path: PathBuf,
}

impl DevMem {
    pub fn new() -> Self {
        Self::with_path("/dev/mem")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for DevMem {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysMemory for DevMem {
    fn map(&self, pa: u64, len: usize) -> io::Result<Box<dyn MappedRegion>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&self.path)?;

        // mmap offsets must be page-aligned; map from the page below and
        // remember the slack.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        let slack = (pa % page) as usize;
        let map_start = pa - slack as u64;
        let map_len = NonZeroUsize::new(len + slack).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "zero-length mapping")
        })?;
        let offset = libc::off_t::try_from(map_start)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "address beyond mmap range"))?;

        let ptr = unsafe {
            mmap(
                None,
                map_len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                offset,
            )
        }
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

        Ok(Box::new(DevMemRegion {
            ptr,
            map_len: map_len.get(),
            slack,
            len,
        }))
    }
}

struct DevMemRegion {
    ptr: NonNull<c_void>,
    map_len: usize,
    slack: usize,
    len: usize,
}

// The mapping is exclusively owned and only touched through &self/&mut self.
unsafe impl Send for DevMemRegion {}
unsafe impl Sync for DevMemRegion {}

impl DevMemRegion {
    fn check_bounds(&self, offset: usize, count: usize) -> io::Result<()> {
        if offset.checked_add(count).is_some_and(|end| end <= self.len) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "access outside mapped region",
            ))
        }
    }

    fn base(&self) -> *mut u8 {
        self.ptr.as_ptr().cast::<u8>().wrapping_add(self.slack)
    }
}

impl MappedRegion for DevMemRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        self.check_bounds(offset, buf.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.base().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> io::Result<()> {
        self.check_bounds(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(offset), data.len());
        }
        Ok(())
    }
}

impl Drop for DevMemRegion {
    fn drop(&mut self) {
        let _ = unsafe { munmap(self.ptr, self.map_len) };
    }
}
