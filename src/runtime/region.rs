// This module manages the executable memory that compiled functions run from. A region is
// mapped private and anonymous with read/write access, rounded up to whole pages, filled with
// the assembled bytes and then switched to read/execute with mprotect. It is never writable
// and executable at the same time: once finalized, further writes are refused. The mapping is
// released when the region is dropped. Only Unix targets have an implementation; elsewhere
// every mapping attempt reports an ExecutableMemory error.

//! Page-granular W^X memory for generated code.

use crate::core::error::{CompileError, CompileResult};

/// Protection state of an [`ExecutableRegion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadWrite,
    ReadExecute,
}

/// An anonymous mapping that holds one compiled function.
#[derive(Debug)]
pub struct ExecutableRegion {
    ptr: *mut u8,
    capacity: usize,
    len: usize,
    protection: Protection,
}

// SAFETY: the region exclusively owns its mapping. The only mutation happens through
// `&mut self` while it is writable, and a finalized region is immutable code.
unsafe impl Send for ExecutableRegion {}
unsafe impl Sync for ExecutableRegion {}

impl ExecutableRegion {
    /// Map a writable region of at least `size` bytes.
    pub fn new(size: usize) -> CompileResult<Self> {
        let page = sys::page_size()?;
        let capacity = size.max(1).div_ceil(page) * page;
        let ptr = sys::map(capacity)?;
        log::debug!("🗺️  Mapped {capacity} bytes at {ptr:p}");
        Ok(Self {
            ptr,
            capacity,
            len: 0,
            protection: Protection::ReadWrite,
        })
    }

    /// Map a region sized for `bytes`, copy them in and make it executable.
    pub fn with_code(bytes: &[u8]) -> CompileResult<Self> {
        let mut region = Self::new(bytes.len())?;
        region.write(bytes)?;
        region.finalize()?;
        Ok(region)
    }

    /// Copy `bytes` to the start of the region.
    pub fn write(&mut self, bytes: &[u8]) -> CompileResult<()> {
        if self.protection != Protection::ReadWrite {
            return Err(CompileError::ExecutableMemory {
                reason: "region is already executable".to_string(),
            });
        }
        if bytes.len() > self.capacity {
            return Err(CompileError::BufferOverflow {
                requested: bytes.len(),
                capacity: self.capacity,
            });
        }
        // SAFETY: the mapping is writable and at least `bytes.len()` long.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr, bytes.len()) };
        self.len = bytes.len();
        Ok(())
    }

    /// Switch the region to read/execute.
    pub fn finalize(&mut self) -> CompileResult<()> {
        if self.protection == Protection::ReadExecute {
            return Ok(());
        }
        sys::protect_exec(self.ptr, self.capacity)?;
        self.protection = Protection::ReadExecute;
        log::trace!("🔒 Region at {:p} is now read/execute", self.ptr);
        Ok(())
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn is_executable(&self) -> bool {
        self.protection == Protection::ReadExecute
    }

    /// Start of the code.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mapped size, a multiple of the page size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The written bytes.
    pub fn code(&self) -> &[u8] {
        // SAFETY: the first `len` bytes were initialized by `write`, and every
        // protection state the region can be in allows reading.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for ExecutableRegion {
    fn drop(&mut self) {
        if let Err(err) = sys::unmap(self.ptr, self.capacity) {
            log::warn!("⚠️  {err}");
        }
    }
}

#[cfg(unix)]
mod sys {
    use crate::core::error::{CompileError, CompileResult};
    use std::io;

    fn os_error(call: &str) -> CompileError {
        CompileError::ExecutableMemory {
            reason: format!("{call} failed: {}", io::Error::last_os_error()),
        }
    }

    pub(super) fn page_size() -> CompileResult<usize> {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 {
            return Err(os_error("sysconf"));
        }
        Ok(size as usize)
    }

    pub(super) fn map(len: usize) -> CompileResult<*mut u8> {
        // SAFETY: anonymous private mapping with no address hint.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(os_error("mmap"));
        }
        Ok(ptr.cast())
    }

    pub(super) fn protect_exec(ptr: *mut u8, len: usize) -> CompileResult<()> {
        // SAFETY: `ptr..ptr+len` is a mapping created by `map`.
        let rc = unsafe { libc::mprotect(ptr.cast(), len, libc::PROT_READ | libc::PROT_EXEC) };
        if rc != 0 {
            return Err(os_error("mprotect"));
        }
        Ok(())
    }

    pub(super) fn unmap(ptr: *mut u8, len: usize) -> CompileResult<()> {
        // SAFETY: the mapping is owned by the region being dropped.
        let rc = unsafe { libc::munmap(ptr.cast(), len) };
        if rc != 0 {
            return Err(os_error("munmap"));
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod sys {
    use crate::core::error::{CompileError, CompileResult};

    fn unsupported() -> CompileError {
        CompileError::ExecutableMemory {
            reason: "executable memory is only implemented for Unix targets".to_string(),
        }
    }

    pub(super) fn page_size() -> CompileResult<usize> {
        Err(unsupported())
    }

    pub(super) fn map(_len: usize) -> CompileResult<*mut u8> {
        Err(unsupported())
    }

    pub(super) fn protect_exec(_ptr: *mut u8, _len: usize) -> CompileResult<()> {
        Err(unsupported())
    }

    pub(super) fn unmap(_ptr: *mut u8, _len: usize) -> CompileResult<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_size_rounds_up_to_pages() {
        let page = sys::page_size().unwrap();
        let region = ExecutableRegion::new(1).unwrap();
        assert_eq!(region.capacity(), page);
        let region = ExecutableRegion::new(page + 1).unwrap();
        assert_eq!(region.capacity(), 2 * page);
        assert!(region.is_empty());
    }

    #[test]
    fn test_write_then_finalize() {
        let mut region = ExecutableRegion::new(16).unwrap();
        assert_eq!(region.protection(), Protection::ReadWrite);
        region.write(&[0xC3]).unwrap();
        region.finalize().unwrap();
        assert!(region.is_executable());
        assert_eq!(region.code(), &[0xC3]);
    }

    #[test]
    fn test_write_after_finalize_is_refused() {
        let mut region = ExecutableRegion::with_code(&[0x90, 0xC3]).unwrap();
        let err = region.write(&[0xC3]).unwrap_err();
        assert!(matches!(err, CompileError::ExecutableMemory { .. }));
        assert_eq!(region.len(), 2);
    }

    #[test]
    fn test_write_beyond_capacity() {
        let mut region = ExecutableRegion::new(1).unwrap();
        let too_big = vec![0x90; region.capacity() + 1];
        assert!(matches!(
            region.write(&too_big),
            Err(CompileError::BufferOverflow { .. })
        ));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_executes_hand_written_code() {
        // mov eax, 42; ret
        let region = ExecutableRegion::with_code(&[0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]).unwrap();
        // SAFETY: the region holds a complete function with this signature.
        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(region.as_ptr()) };
        assert_eq!(f(), 42);
    }
}
