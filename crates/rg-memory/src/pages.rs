//! Page protection flags

use bitflags::bitflags;

/// Host page size assumed for region rounding
pub const HOST_PAGE_SIZE: usize = 0x1000;

bitflags! {
    /// Page protection and attribute flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// Page is readable
        const READ    = 0b0000_0001;
        /// Page is writable
        const WRITE   = 0b0000_0010;
        /// Page is executable
        const EXECUTE = 0b0000_0100;

        /// Read and write access
        const RW  = Self::READ.bits() | Self::WRITE.bits();
        /// Read, write, and execute access
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl PageFlags {
    /// Check if code placed in these pages may run
    pub fn is_executable(&self) -> bool {
        self.contains(PageFlags::EXECUTE)
    }

    /// Check if these pages may be written
    pub fn is_writable(&self) -> bool {
        self.contains(PageFlags::WRITE)
    }
}

/// Round `size` up to a whole number of host pages
pub fn align_up(size: usize) -> usize {
    (size + HOST_PAGE_SIZE - 1) & !(HOST_PAGE_SIZE - 1)
}
