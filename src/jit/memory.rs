//! Executable memory management using mmap.
//!
//! A region starts life as [`WritableMemory`] and is turned into
//! [`ExecutableMemory`] exactly once by [`WritableMemory::finalize`]. The
//! conversion consumes the writable handle, so no write can follow it.

use std::ptr::NonNull;

/// Error type for memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    AllocationFailed,
    ProtectionFailed,
    InvalidSize,
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "memory allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "memory protection change failed"),
            MemoryError::InvalidSize => write!(f, "invalid memory size"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// An anonymous private mapping, unmapped on drop.
struct Mapping {
    ptr: NonNull<u8>,
    size: usize,
}

impl Mapping {
    fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        // Round up to page size
        let page_size = page_size();
        let aligned_size = size
            .checked_add(page_size - 1)
            .ok_or(MemoryError::InvalidSize)?
            & !(page_size - 1);

        let ptr = mmap_alloc(aligned_size)?;
        Ok(Self {
            ptr,
            size: aligned_size,
        })
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            }
        }
    }
}

/// Get the page size for the current system.
fn page_size() -> usize {
    #[cfg(unix)]
    {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 { size as usize } else { 4096 }
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

/// Map zero-initialized read+write memory.
#[cfg(unix)]
fn mmap_alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(MemoryError::AllocationFailed);
    }

    NonNull::new(ptr as *mut u8).ok_or(MemoryError::AllocationFailed)
}

#[cfg(not(unix))]
fn mmap_alloc(_size: usize) -> Result<NonNull<u8>, MemoryError> {
    Err(MemoryError::AllocationFailed)
}

/// A block of memory that can be written but not executed.
pub struct WritableMemory {
    map: Mapping,
}

impl WritableMemory {
    /// Allocate a new block of at least `size` bytes.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        Ok(Self {
            map: Mapping::new(size)?,
        })
    }

    /// View the whole mapping.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is readable, initialized (zero-filled) and
        // exclusively owned by `self`.
        unsafe { std::slice::from_raw_parts(self.map.ptr.as_ptr(), self.map.size) }
    }

    /// Mutably view the whole mapping.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees no other view exists.
        unsafe { std::slice::from_raw_parts_mut(self.map.ptr.as_ptr(), self.map.size) }
    }

    /// Make the memory execute-only.
    /// Consumes the writable handle; on failure the mapping is released.
    #[cfg(unix)]
    pub fn finalize(self) -> Result<ExecutableMemory, MemoryError> {
        let result = unsafe {
            libc::mprotect(
                self.map.ptr.as_ptr() as *mut libc::c_void,
                self.map.size,
                libc::PROT_EXEC,
            )
        };

        if result != 0 {
            return Err(MemoryError::ProtectionFailed);
        }

        Ok(ExecutableMemory { map: self.map })
    }

    #[cfg(not(unix))]
    pub fn finalize(self) -> Result<ExecutableMemory, MemoryError> {
        Err(MemoryError::ProtectionFailed)
    }
}

/// A block of memory holding finished machine code.
pub struct ExecutableMemory {
    map: Mapping,
}

impl ExecutableMemory {
    /// Get a pointer to the memory.
    pub fn as_ptr(&self) -> *const u8 {
        self.map.ptr.as_ptr()
    }

    /// Get the size of the mapping.
    pub fn size(&self) -> usize {
        self.map.size
    }

    /// Get a function pointer to the start of the memory.
    ///
    /// # Safety
    /// The memory must hold a valid function for the target architecture
    /// with the signature `F`, and the pointer must not be used after
    /// `self` is dropped.
    pub unsafe fn as_fn<F>(&self) -> Option<F>
    where
        F: Copy,
    {
        // Verify that F is a function pointer type
        if std::mem::size_of::<F>() != std::mem::size_of::<fn()>() {
            return None;
        }

        // SAFETY: Caller guarantees the memory contains valid code
        Some(unsafe { std::mem::transmute_copy(&self.as_ptr()) })
    }
}

// The mapping is owned exclusively and, once executable, never written.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_memory() {
        let mem = WritableMemory::new(4096).unwrap();
        assert!(mem.as_slice().len() >= 4096);
        assert!(mem.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_size_rounds_to_page() {
        let mem = WritableMemory::new(1).unwrap();
        assert_eq!(mem.as_slice().len(), page_size());
    }

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(WritableMemory::new(0).err(), Some(MemoryError::InvalidSize));
    }

    #[test]
    fn test_page_rounding_overflow_rejected() {
        assert_eq!(
            WritableMemory::new(usize::MAX).err(),
            Some(MemoryError::InvalidSize)
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_huge_mapping_fails() {
        // Far beyond any user address space
        assert_eq!(
            WritableMemory::new(1 << 62).err(),
            Some(MemoryError::AllocationFailed)
        );
    }

    #[test]
    fn test_write_memory() {
        let mut mem = WritableMemory::new(4096).unwrap();
        let data = [0x90, 0x90, 0x90, 0x90]; // NOP instructions
        mem.as_mut_slice()[..4].copy_from_slice(&data);
        assert_eq!(&mem.as_slice()[..4], &data);
    }

    #[test]
    fn test_finalize() {
        let mem = WritableMemory::new(4096).unwrap();
        let exec = mem.finalize().unwrap();
        assert!(exec.size() >= 4096);
        assert!(!exec.as_ptr().is_null());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_call_finalized_code() {
        let mut mem = WritableMemory::new(64).unwrap();
        // mov eax, 42; ret
        mem.as_mut_slice()[..6].copy_from_slice(&[0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]);
        let exec = mem.finalize().unwrap();

        let f: extern "C" fn() -> i32 = unsafe { exec.as_fn().unwrap() };
        assert_eq!(f(), 42);
    }

    #[test]
    fn test_as_fn_rejects_wide_types() {
        let exec = WritableMemory::new(64).unwrap().finalize().unwrap();
        let f: Option<[usize; 2]> = unsafe { exec.as_fn() };
        assert!(f.is_none());
    }
}
