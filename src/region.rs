use std::ptr::NonNull;

use crate::{
    block::Block,
    error::AllocError,
    kernel::{page_size, request_memory, return_memory},
    utils::checked_align,
};

/// A page-aligned span of memory obtained from the kernel in one request.
///
/// [`crate::kernel::request_memory`] gives us memory regions aligned with the
/// computer page size, but we cannot assume those regions are adjacent. So
/// every region starts with its first [`Block`], and every block knows the
/// first block of its region. The blocks of all regions are chained in one
/// list, region after region:
///
/// ```text
/// +------------------------------------------+      +------------------------------------------+
/// | +-------+    +-------+    +-------+      |      | +-------+    +-------+                   |
/// | | Block | -> | Block | -> | Block | -----|----> | | Block | -> | Block | -> None           |
/// | +-------+    +-------+    +-------+      |      | +-------+    +-------+                   |
/// +------------------------------------------+      +------------------------------------------+
///   Region                                            Region
/// ```
///
/// A `Region` value is only a description (base and size). The memory itself
/// is owned by the directory through the blocks written into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Region {
    base: NonNull<u8>,
    size: usize,
}

impl Region {
    /// Maps a new region of the smallest page multiple that holds `len` bytes.
    pub fn acquire(len: usize) -> Result<Self, AllocError> {
        let size = checked_align(len, page_size()).ok_or(AllocError::SizeOverflow { size: len })?;

        let base = unsafe { request_memory(size) }.ok_or(AllocError::OutOfMemory { len: size })?;

        Ok(Self { base, size })
    }

    /// Describes the region whose first block is `start`.
    ///
    /// **SAFETY**: `start` must be the first block of a live region.
    pub unsafe fn of(start: NonNull<Block>) -> Self {
        Self {
            base: start.cast(),
            size: unsafe { start.as_ref().region_size },
        }
    }

    /// Returns the region to the kernel.
    ///
    /// **SAFETY**: no block of this region may be reachable afterwards.
    pub unsafe fn release(self) -> Result<(), AllocError> {
        if unsafe { return_memory(self.base, self.size) } {
            Ok(())
        } else {
            Err(AllocError::Unmap { addr: self.base.as_ptr() as usize, len: self.size })
        }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// One past the last byte of the region.
    #[inline]
    pub fn end(&self) -> *const u8 {
        self.base.as_ptr().wrapping_add(self.size)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}
