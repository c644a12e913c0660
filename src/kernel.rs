//! Where regions come from. Everything above this module only sees
//! page-aligned spans handed out and taken back by the kernel.

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Cached page size, `0` until the first query. The kernel answers the same
/// thing every time, so racing writers store the same value.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

pub(crate) struct Kernel;

/// Mapping and unmapping anonymous read-write memory, one implementation per
/// platform.
trait PlatformMemory {
    /// Maps `len` bytes of zeroed read-write memory, `None` if refused.
    unsafe fn map(len: usize) -> Option<NonNull<u8>>;

    /// Unmaps a span obtained from [`PlatformMemory::map`]. `false` if refused.
    unsafe fn unmap(addr: NonNull<u8>, len: usize) -> bool;

    unsafe fn query_page_size() -> usize;
}

/// Page size in bytes, the granularity of every region.
#[inline]
pub(crate) fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let size = unsafe { Kernel::query_page_size() };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// **SAFETY**: `len` must be a non-zero multiple of [`page_size`].
#[inline]
pub(crate) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
    unsafe { Kernel::map(len) }
}

/// **SAFETY**: `addr` and `len` must describe exactly one span obtained from
/// [`request_memory`], and nothing may touch it afterwards.
#[inline]
pub(crate) unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> bool {
    unsafe { Kernel::unmap(addr, len) }
}

#[cfg(unix)]
mod unix {
    use std::{ffi::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    impl PlatformMemory for Kernel {
        unsafe fn map(len: usize) -> Option<NonNull<u8>> {
            let addr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };

            if addr == libc::MAP_FAILED {
                return None;
            }

            NonNull::new(addr.cast())
        }

        unsafe fn unmap(addr: NonNull<u8>, len: usize) -> bool {
            unsafe { libc::munmap(addr.as_ptr().cast::<c_void>(), len) == 0 }
        }

        unsafe fn query_page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{ffi::c_void, mem::MaybeUninit, ptr::NonNull};

    use windows::Win32::System::{
        Memory::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAlloc, VirtualFree},
        SystemInformation::GetSystemInfo,
    };

    use super::{Kernel, PlatformMemory};

    impl PlatformMemory for Kernel {
        unsafe fn map(len: usize) -> Option<NonNull<u8>> {
            let addr = unsafe { VirtualAlloc(None, len, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE) };

            NonNull::new(addr.cast())
        }

        // MEM_RELEASE frees the whole reservation and wants a size of zero.
        unsafe fn unmap(addr: NonNull<u8>, _len: usize) -> bool {
            unsafe { VirtualFree(addr.as_ptr().cast::<c_void>(), 0, MEM_RELEASE).is_ok() }
        }

        unsafe fn query_page_size() -> usize {
            let mut info = MaybeUninit::uninit();

            unsafe {
                GetSystemInfo(info.as_mut_ptr());
                info.assume_init().dwPageSize as usize
            }
        }
    }
}
