//! A region-based general purpose allocator.
//!
//! Memory comes from the kernel in page-aligned regions (`mmap` on unix,
//! `VirtualAlloc` on windows). Each region is cut into blocks whose headers
//! live right before the memory handed out, and all blocks of all regions sit
//! in one list. A request reuses a block with enough room, picked by the
//! configured [`Policy`], or maps a new region. A region goes back to the
//! kernel as soon as every block inside it is free.
//!
//! Adjacent free blocks are never merged and a region is never grown: this is
//! a small allocator meant to be read and poked at, not a production one.
//!
//! ```no_run
//! use fitalloc::MemAlloc;
//!
//! let allocator = MemAlloc::new();
//!
//! let ptr = allocator.named_allocate(64, "scratch");
//! assert!(!ptr.is_null());
//!
//! let mut state = String::new();
//! allocator.dump_state(&mut state).unwrap();
//! print!("{state}");
//!
//! unsafe { allocator.release(ptr) };
//! ```
//!
//! It can also stand in for the global allocator, reading its configuration
//! from `ALLOCATOR_ALGORITHM` and `ALLOCATOR_SCRIBBLE`:
//!
//! ```no_run
//! use fitalloc::MemAlloc;
//!
//! #[global_allocator]
//! static ALLOCATOR: MemAlloc = MemAlloc::from_env();
//! ```

mod block;
pub mod config;
mod directory;
pub mod error;
mod heap;
mod introspect;
mod kernel;
mod placement;
mod region;
mod split;
mod utils;

use std::{
    alloc::{GlobalAlloc, Layout},
    cell::Cell,
    fmt,
    ptr::{self, NonNull},
};

use spin::{Mutex, Once};

use crate::{
    block::{ALIGNMENT, Block},
    heap::{Heap, Resized},
};
pub use crate::{
    config::{Config, DebugFill, Policy},
    error::{AllocError, UnknownPolicy},
};

/// The allocator.
///
/// Every operation takes one lock around the whole heap for as long as it
/// walks or changes it, kernel calls included. Instances are independent: each
/// one owns its own regions and numbers its own blocks.
pub struct MemAlloc {
    heap: Mutex<Heap>,
    config: Once<Config>,
}

impl MemAlloc {
    /// An allocator with the default [`Config`].
    #[inline]
    pub const fn new() -> Self {
        Self::with_config(Config::DEFAULT)
    }

    #[inline]
    pub const fn with_config(config: Config) -> Self {
        Self {
            heap: Mutex::new(Heap::new()),
            config: Once::initialized(config),
        }
    }

    /// An allocator that reads its [`Config`] from the environment the first
    /// time it is used. See [`Config::from_env`].
    #[inline]
    pub const fn from_env() -> Self {
        Self {
            heap: Mutex::new(Heap::new()),
            config: Once::new(),
        }
    }

    pub fn config(&self) -> Config {
        *self.config.call_once(Config::from_env)
    }

    /// Allocates `size` bytes, scribbling them when the config asks for it.
    /// Returns null for a zero size or when the kernel has no memory left.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.allocate_with(size, self.config().debug_fill)
    }

    /// Same as [`MemAlloc::allocate`] with the debug fill chosen by the caller.
    pub fn allocate_with(&self, size: usize, fill: DebugFill) -> *mut u8 {
        self.try_allocate(size, fill).map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Same as [`MemAlloc::allocate`] with the returned pointer a multiple of
    /// `align`, a power of two no larger than the page size. Alignments past
    /// 16 bytes take a region of their own.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        self.try_allocate_aligned(size, align, self.config().debug_fill)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Allocates `size` bytes, telling why when it can't.
    pub fn try_allocate(&self, size: usize, fill: DebugFill) -> Result<NonNull<u8>, AllocError> {
        self.try_allocate_aligned(size, ALIGNMENT, fill)
    }

    pub fn try_allocate_aligned(&self, size: usize, align: usize, fill: DebugFill) -> Result<NonNull<u8>, AllocError> {
        let policy = self.config().policy;

        let result = self
            .heap
            .lock()
            .allocate_aligned(size, align, policy, fill)
            .map(Block::payload);

        match result {
            Ok(ptr) => report(|| log::trace!("allocate({size}, {align}) -> {ptr:p}")),
            Err(err) => report(|| log::debug!("allocate({size}, {align}) failed: {err}")),
        }

        result
    }

    /// Same as [`MemAlloc::allocate`] but labels the block, which shows up in
    /// [`MemAlloc::dump_state`].
    pub fn named_allocate(&self, size: usize, label: &str) -> *mut u8 {
        let config = self.config();

        let mut heap = self.heap.lock();
        let result = heap.allocate(size, config.policy, config.debug_fill).map(|block| {
            unsafe { heap.rename(block, label) };
            Block::payload(block)
        });
        drop(heap);

        match result {
            Ok(ptr) => {
                report(|| log::trace!("named_allocate({size}, {label:?}) -> {ptr:p}"));
                ptr.as_ptr()
            }
            Err(err) => {
                report(|| log::debug!("named_allocate({size}, {label:?}) failed: {err}"));
                ptr::null_mut()
            }
        }
    }

    /// Allocates room for `count` elements of `size` bytes, all zero.
    pub fn zero_allocate(&self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            report(|| log::debug!("zero_allocate({count}, {size}) overflows"));
            return ptr::null_mut();
        };

        zeroed(self.allocate(total), total)
    }

    /// Gives `ptr` back. Null is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this allocator.
    pub unsafe fn release(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        let result = unsafe { self.heap.lock().release(Block::from_payload(ptr)) };

        match result {
            Ok(()) => report(|| log::trace!("release({ptr:p})")),
            Err(err) => report(|| log::error!("release({ptr:p}): {err}")),
        }
    }

    /// Makes the allocation at `ptr` hold `new_size` bytes, moving it when it
    /// has to grow past its block. A null `ptr` allocates; a zero `new_size`
    /// releases `ptr` and returns null. On failure null is returned and `ptr`
    /// is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this allocator. When
    /// the returned pointer is not null, `ptr` must no longer be used.
    pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        unsafe { self.resize_aligned(ptr, new_size, ALIGNMENT) }
    }

    /// [`MemAlloc::resize`] keeping the pointer a multiple of `align` when the
    /// allocation moves.
    ///
    /// # Safety
    ///
    /// Same as [`MemAlloc::resize`].
    unsafe fn resize_aligned(&self, ptr: *mut u8, new_size: usize, align: usize) -> *mut u8 {
        let Some(old) = NonNull::new(ptr) else {
            return self.allocate_aligned(new_size, align);
        };

        if new_size == 0 {
            unsafe { self.release(ptr) };
            return ptr::null_mut();
        }

        let config = self.config();
        let result = unsafe {
            self.heap
                .lock()
                .resize(Block::from_payload(old), new_size, align, config.policy, config.debug_fill)
        };

        match result {
            Ok(Resized { block, stale }) => {
                let new = Block::payload(block);
                report(|| log::trace!("resize({old:p}, {new_size}) -> {new:p}"));
                if let Some(err) = stale {
                    report(|| log::error!("resize({old:p}, {new_size}): releasing the old block: {err}"));
                }
                new.as_ptr()
            }
            Err(err) => {
                report(|| log::debug!("resize({old:p}, {new_size}) failed: {err}"));
                ptr::null_mut()
            }
        }
    }

    /// Writes every region and block to `sink`, in list order.
    pub fn dump_state<W: fmt::Write>(&self, sink: &mut W) -> fmt::Result {
        self.heap.lock().dump(sink)
    }

    /// [`MemAlloc::dump_state`] to standard output.
    pub fn dump_state_stdout(&self) {
        let _ = self.dump_state(&mut introspect::Stdout);
    }
}

impl Default for MemAlloc {
    fn default() -> Self {
        Self::new()
    }
}

fn zeroed(ptr: *mut u8, len: usize) -> *mut u8 {
    if !ptr.is_null() {
        unsafe { ptr.write_bytes(0, len) };
    }

    ptr
}

thread_local! {
    /// Set while this thread is inside a log call made by the allocator.
    static REPORTING: Cell<bool> = const { Cell::new(false) };
}

/// Runs `log` unless this thread is already logging for the allocator. A
/// logger that allocates comes back here through the allocator and is skipped
/// instead of recursing.
fn report(emit: impl FnOnce()) {
    let entered = REPORTING
        .try_with(|reporting| !reporting.replace(true))
        .unwrap_or(false);
    if !entered {
        return;
    }

    emit();

    let _ = REPORTING.try_with(|reporting| reporting.set(false));
}

/// Any power-of-two alignment up to the page size is served. Alignments past
/// 16 bytes take a region of their own.
unsafe impl GlobalAlloc for MemAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate_aligned(layout.size(), layout.align())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        zeroed(self.allocate_aligned(layout.size(), layout.align()), layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.release(ptr) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        unsafe { self.resize_aligned(ptr, new_size, layout.align()) }
    }
}
