//! Executable code regions
//!
//! A [`CodeRegion`] is a bump arena over an anonymous writable+executable
//! mapping. The protection is fixed when the mapping is created and the base
//! address never moves, since translated code embeds absolute addresses.

use crate::pages::{align_up, PageFlags};
use rg_core::error::{FatalError, MemoryError};
use std::ptr::NonNull;

/// Source of the guest code a region holds translations for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Game-pak ROM
    Rom,
    /// Internal and external work RAM
    Ram,
    /// System BIOS
    Bios,
}

impl RegionKind {
    /// All region kinds, in allocation order
    pub const ALL: [RegionKind; 3] = [RegionKind::Rom, RegionKind::Ram, RegionKind::Bios];

    /// Get the region name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rom => "rom",
            Self::Ram => "ram",
            Self::Bios => "bios",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Rom => 0,
            Self::Ram => 1,
            Self::Bios => 2,
        }
    }
}

impl std::fmt::Display for RegionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Writable+executable arena for translated code
pub struct CodeRegion {
    kind: RegionKind,
    base: NonNull<u8>,
    /// Usable bytes
    capacity: usize,
    /// Bytes actually mapped (page aligned)
    mapped: usize,
    /// Write cursor
    offset: usize,
    flags: PageFlags,
    flush_count: u64,
}

// Safety: the mapping is exclusively owned and only reached through &mut self.
unsafe impl Send for CodeRegion {}

impl CodeRegion {
    /// Map a new region of `capacity` bytes
    pub fn allocate(kind: RegionKind, capacity: usize) -> Result<Self, FatalError> {
        let mapped = align_up(capacity);
        let base = Self::map_executable(mapped).ok_or(FatalError::ExecutableAllocation {
            region: kind.name(),
            size: capacity,
        })?;

        tracing::debug!(
            "Mapped {} translation cache: {:#x} bytes at {:p}",
            kind,
            capacity,
            base.as_ptr()
        );

        Ok(Self {
            kind,
            base,
            capacity,
            mapped,
            offset: 0,
            flags: PageFlags::RWX,
            flush_count: 0,
        })
    }

    #[cfg(unix)]
    fn map_executable(size: usize) -> Option<NonNull<u8>> {
        use libc::{mmap, MAP_ANONYMOUS, MAP_PRIVATE, PROT_EXEC, PROT_READ, PROT_WRITE};

        if size == 0 {
            return None;
        }

        #[allow(unused_mut)]
        let mut map_flags = MAP_PRIVATE | MAP_ANONYMOUS;
        #[cfg(target_os = "macos")]
        {
            map_flags |= libc::MAP_JIT;
        }

        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                PROT_READ | PROT_WRITE | PROT_EXEC,
                map_flags,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return None;
        }

        NonNull::new(ptr as *mut u8)
    }

    #[cfg(windows)]
    fn map_executable(size: usize) -> Option<NonNull<u8>> {
        use windows_sys::Win32::System::Memory::*;

        if size == 0 {
            return None;
        }

        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                size,
                MEM_RESERVE | MEM_COMMIT,
                PAGE_EXECUTE_READWRITE,
            )
        };

        NonNull::new(ptr as *mut u8)
    }

    /// Which guest code this region translates
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Stable base address of the mapping
    pub fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Usable capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current write offset
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left before the region is full
    pub fn remaining(&self) -> usize {
        self.capacity - self.offset
    }

    /// Protection the region was mapped with
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    /// Number of times the region has been reset
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// Bump-allocate `len` bytes and return them for writing
    pub fn reserve(&mut self, len: usize) -> Result<&mut [u8], MemoryError> {
        if len > self.remaining() {
            return Err(MemoryError::RegionFull {
                region: self.kind.name(),
                requested: len,
                available: self.remaining(),
            });
        }

        let start = self.offset;
        self.offset += len;

        // Safety: start + len <= capacity <= mapped, and &mut self guarantees
        // no other view of these bytes is alive.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr().add(start), len) })
    }

    /// Append `code` and return the offset it was placed at
    pub fn emit(&mut self, code: &[u8]) -> Result<usize, MemoryError> {
        let start = self.offset;
        self.reserve(code.len())?.copy_from_slice(code);
        Ok(start)
    }

    /// Everything written since the last reset
    pub fn code(&self) -> &[u8] {
        // Safety: [0, offset) lies inside the mapping; anonymous mappings
        // start zeroed so every byte is initialized.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.offset) }
    }

    /// Discard all translations in this region
    pub fn reset(&mut self) {
        if self.offset != 0 {
            self.flush_count += 1;
        }
        self.offset = 0;
    }
}

impl Drop for CodeRegion {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.mapped);
        }

        #[cfg(windows)]
        unsafe {
            use windows_sys::Win32::System::Memory::*;
            VirtualFree(self.base.as_ptr() as *mut _, 0, MEM_RELEASE);
        }

        tracing::trace!("Unmapped {} translation cache", self.kind);
    }
}

impl std::fmt::Debug for CodeRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeRegion")
            .field("kind", &self.kind)
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_allocation() {
        let region = CodeRegion::allocate(RegionKind::Bios, 0x8000).unwrap();
        assert_eq!(region.kind(), RegionKind::Bios);
        assert_eq!(region.capacity(), 0x8000);
        assert_eq!(region.offset(), 0);
        assert!(region.flags().is_executable());
        assert_ne!(region.base_address(), 0);
    }

    #[test]
    fn test_zero_sized_region_fails() {
        let err = CodeRegion::allocate(RegionKind::Ram, 0).unwrap_err();
        assert!(matches!(
            err,
            FatalError::ExecutableAllocation { region: "ram", size: 0 }
        ));
    }

    #[test]
    fn test_emit_advances_offset() {
        let mut region = CodeRegion::allocate(RegionKind::Rom, 0x1000).unwrap();
        let base = region.base_address();

        assert_eq!(region.emit(&[0x90, 0x90, 0xC3]).unwrap(), 0);
        assert_eq!(region.emit(&[0xC3]).unwrap(), 3);
        assert_eq!(region.offset(), 4);
        assert_eq!(region.code(), &[0x90, 0x90, 0xC3, 0xC3]);
        assert_eq!(region.base_address(), base);
    }

    #[test]
    fn test_region_full() {
        let mut region = CodeRegion::allocate(RegionKind::Ram, 16).unwrap();
        region.reserve(12).unwrap();

        let err = region.reserve(8).unwrap_err();
        assert_eq!(
            err,
            MemoryError::RegionFull {
                region: "ram",
                requested: 8,
                available: 4,
            }
        );
        assert_eq!(region.offset(), 12);

        region.reserve(4).unwrap();
        assert_eq!(region.remaining(), 0);
    }

    #[test]
    fn test_reset_keeps_base() {
        let mut region = CodeRegion::allocate(RegionKind::Rom, 0x1000).unwrap();
        let base = region.base_address();
        region.emit(&[1, 2, 3]).unwrap();

        region.reset();
        assert_eq!(region.offset(), 0);
        assert_eq!(region.flush_count(), 1);
        assert_eq!(region.base_address(), base);

        region.reset();
        assert_eq!(region.flush_count(), 1);
    }
}
