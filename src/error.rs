use derive_more::{Display, Error};

/// Reasons an allocation-family operation did not complete.
///
/// None of these cross the C-style surface of [`crate::MemAlloc`]: there they
/// turn into a null pointer. [`crate::MemAlloc::try_allocate`] hands them out
/// as they are.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Zero bytes were requested.
    #[display("requested size must be greater than zero")]
    ZeroSize,

    /// The request plus its header does not fit in the address space.
    #[display("requested size {size} overflows the address space")]
    SizeOverflow { size: usize },

    /// The alignment is not a power of two, or exceeds the page size.
    #[display("alignment {align} is not a power of two up to the page size")]
    Alignment { align: usize },

    /// The kernel refused to map a new region.
    #[display("kernel refused to map a region of {len} bytes")]
    OutOfMemory { len: usize },

    /// The kernel refused to unmap an empty region.
    #[display("kernel refused to unmap the region at {addr:#x} ({len} bytes)")]
    Unmap { addr: usize, len: usize },
}

/// A placement policy name that is not one of `first_fit`, `best_fit` or
/// `worst_fit`.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
#[display("unknown placement policy")]
pub struct UnknownPolicy;
