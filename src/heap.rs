use std::{fmt, ptr::NonNull};

use crate::{
    block::{ALIGNMENT, Block, HEADER_SIZE, Header, Label},
    config::{DebugFill, Policy},
    directory::Directory,
    error::AllocError,
    introspect,
    kernel::page_size,
    region::Region,
    split,
    utils::{align, checked_align},
};

/// The internal data structure of the allocator: the directory of every
/// block plus the operations that change it. Everything in here assumes the
/// caller holds the allocator lock, so operations freely call each other
/// without ever locking again.
pub(crate) struct Heap {
    directory: Directory,
}

// The heap exclusively owns every region reachable from its directory, so it
// can move to whichever thread takes the lock.
unsafe impl Send for Heap {}

/// What [`Heap::resize`] hands back.
pub(crate) struct Resized {
    pub block: NonNull<Block>,
    /// Set when the payload moved out and the old block's region, empty
    /// afterwards, could not be given back to the kernel.
    pub stale: Option<AllocError>,
}

/// Bytes a block needs to hold `size` payload bytes: header included, rounded
/// to [`ALIGNMENT`].
fn block_size(size: usize) -> Result<usize, AllocError> {
    size.checked_add(HEADER_SIZE)
        .and_then(|total| checked_align(total, ALIGNMENT))
        .filter(|total| *total <= isize::MAX as usize)
        .ok_or(AllocError::SizeOverflow { size })
}

/// Bytes kept in front of a block whose payload must sit on `alignment`, at
/// the start of a fresh region. When they are not zero they hold a free block
/// of at least a header.
fn front_padding(alignment: usize) -> usize {
    if HEADER_SIZE % alignment == 0 {
        0
    } else {
        align(2 * HEADER_SIZE, alignment) - HEADER_SIZE
    }
}

impl Heap {
    pub const fn new() -> Self {
        Self { directory: Directory::new() }
    }

    /// Finds room for `size` payload bytes, splitting a block with enough free
    /// capacity or mapping a new region when `policy` finds none.
    pub fn allocate(&mut self, size: usize, policy: Policy, fill: DebugFill) -> Result<NonNull<Block>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let request = block_size(size)?;

        let block = match policy.select(self.directory.nodes(), request) {
            Some(block) => unsafe { split::place(&mut self.directory, block, request) },
            None => self.map_region(request)?,
        };

        unsafe { scribble(block, fill) };

        Ok(block)
    }

    /// Same as [`Heap::allocate`] with the payload aligned to `alignment`.
    ///
    /// Every block already satisfies [`ALIGNMENT`]. Stricter requests get a
    /// region of their own, with a free block padding its front when the
    /// header alone would not put the payload on the boundary.
    pub fn allocate_aligned(
        &mut self,
        size: usize,
        alignment: usize,
        policy: Policy,
        fill: DebugFill,
    ) -> Result<NonNull<Block>, AllocError> {
        if !alignment.is_power_of_two() || alignment > page_size() {
            return Err(AllocError::Alignment { align: alignment });
        }
        if alignment <= ALIGNMENT {
            return self.allocate(size, policy, fill);
        }
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let request = block_size(size)?;
        let padding = front_padding(alignment);
        let total = request.checked_add(padding).ok_or(AllocError::SizeOverflow { size })?;

        let region = Region::acquire(total)?;

        let block = unsafe {
            if padding == 0 {
                self.first_block(&region, request)
            } else {
                let mut front = self.first_block(&region, 0);
                front.as_mut().size = padding;

                let block = self.directory.create(region.base().add(padding), Header {
                    id: 0,
                    size: region.size() - padding,
                    usage: request,
                    region: Some(front),
                    region_size: region.size(),
                });
                self.directory.insert_after(front, block);

                block
            }
        };

        unsafe { scribble(block, fill) };

        Ok(block)
    }

    /// Maps a region that fits `request` and makes its first block, spanning the
    /// whole region, the occupant's.
    fn map_region(&mut self, request: usize) -> Result<NonNull<Block>, AllocError> {
        let region = Region::acquire(request)?;

        Ok(unsafe { self.first_block(&region, request) })
    }

    /// **SAFETY**: `region` must be freshly mapped and not yet in the directory.
    unsafe fn first_block(&mut self, region: &Region, usage: usize) -> NonNull<Block> {
        unsafe {
            let block = self.directory.create(region.base(), Header {
                id: 0,
                size: region.size(),
                usage,
                region: None,
                region_size: region.size(),
            });
            self.directory.append_to_end(block);

            block
        }
    }

    /// Renames `block`.
    ///
    /// **SAFETY**: `block` must be live in this heap.
    pub unsafe fn rename(&mut self, mut block: NonNull<Block>, label: &str) {
        unsafe { block.as_mut().label = Label::new(label) };
    }

    /// Marks `block` free and gives its region back to the kernel when nothing
    /// else in it is in use.
    ///
    /// If the kernel refuses the region, the directory is left as it was (the
    /// region stays linked with all of its blocks free) and the error is
    /// returned.
    ///
    /// **SAFETY**: `block` must be live in this heap.
    pub unsafe fn release(&mut self, mut block: NonNull<Block>) -> Result<(), AllocError> {
        unsafe {
            block.as_mut().usage = 0;

            let start = Directory::region_start(block);
            if !self.directory.is_region_empty(start) {
                return Ok(());
            }

            let links = self.directory.region_links(start);
            Region::of(start).release()?;
            self.directory.unlink_region(links);
        }

        Ok(())
    }

    /// Makes `block` hold `new_size` payload bytes.
    ///
    /// When the block is already big enough only its usage changes, even when
    /// shrinking. Otherwise the payload moves to a fresh allocation aligned to
    /// `alignment`, as much of it as fits, and `block` is released. The move
    /// stands even if that release fails; the failure comes back in
    /// [`Resized::stale`].
    ///
    /// **SAFETY**: `block` must be live in this heap.
    pub unsafe fn resize(
        &mut self,
        mut block: NonNull<Block>,
        new_size: usize,
        alignment: usize,
        policy: Policy,
        fill: DebugFill,
    ) -> Result<Resized, AllocError> {
        let request = block_size(new_size)?;

        let header = unsafe { block.as_mut() };
        if header.size >= request {
            header.usage = request;
            return Ok(Resized { block, stale: None });
        }
        let keep = header.payload_in_use().min(new_size);

        let moved = self.allocate_aligned(new_size, alignment, policy, fill)?;

        let stale = unsafe {
            Block::payload(block).copy_to_nonoverlapping(Block::payload(moved), keep);
            self.release(block).err()
        };

        Ok(Resized { block: moved, stale })
    }

    /// Writes one line per region and per block, in directory order.
    pub fn dump<W: fmt::Write>(&self, sink: &mut W) -> fmt::Result {
        introspect::write_state(&self.directory, sink)
    }
}

/// Overwrites the whole payload capacity of `block` when `fill` asks for it.
///
/// **SAFETY**: `block` must be live and owned by the caller.
unsafe fn scribble(block: NonNull<Block>, fill: DebugFill) {
    if fill == DebugFill::Sentinel {
        unsafe {
            let capacity = block.as_ref().payload_capacity();
            Block::payload(block).write_bytes(DebugFill::SENTINEL, capacity);
        }
    }
}
