use std::{marker::PhantomData, ptr::NonNull};

use crate::block::{Block, Header, Link};

/// The single ordered list of every [`Block`] of every region.
///
/// Blocks are linked in creation order: the first block of a new region goes
/// to the end of the list and a block carved off by the splitter goes right
/// after the block it was carved from. As a consequence the blocks of one
/// region always form one contiguous run of the list, in address order.
///
/// It is very important for us that, because we are the actual memory
/// allocator, the directory can not make allocations itself. Every node lives
/// in the memory it describes, so callers hand over the address where each
/// header has to be written.
pub(crate) struct Directory {
    head: Link,
    /// Identifier for the next block written.
    next_id: u64,
}

/// Where a region sits in the list, captured before its memory goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegionLinks {
    /// Last block of the region just before, `None` when the region is first.
    pub predecessor: Link,
    /// First block of the region just after, `None` when the region is last.
    pub successor: Link,
}

pub(crate) struct Nodes<'a> {
    current: Link,
    marker: PhantomData<&'a Block>,
}

pub(crate) struct Iter<'a> {
    nodes: Nodes<'a>,
}

impl Directory {
    pub const fn new() -> Self {
        Self { head: None, next_id: 0 }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Writes a new header at `addr`, stamping it with the next identifier.
    /// The block is not linked yet.
    ///
    /// **SAFETY**: see [`Block::write`].
    pub unsafe fn create(&mut self, addr: NonNull<u8>, header: Header) -> NonNull<Block> {
        let id = self.next_id;
        self.next_id += 1;

        unsafe { Block::write(addr, Header { id, ..header }) }
    }

    /// Links `block`, the first block of a fresh region, at the end of the list.
    ///
    /// **SAFETY**: `block` must be a valid, unlinked header.
    pub unsafe fn append_to_end(&mut self, block: NonNull<Block>) {
        match self.last() {
            Some(mut last) => unsafe { last.as_mut().next = Some(block) },
            None => self.head = Some(block),
        }
    }

    /// Links `new` right after `block`.
    ///
    /// **SAFETY**: `block` must be linked in this directory and `new` must be a
    /// valid, unlinked header.
    pub unsafe fn insert_after(&mut self, mut block: NonNull<Block>, mut new: NonNull<Block>) {
        unsafe {
            new.as_mut().next = block.as_ref().next;
            block.as_mut().next = Some(new);
        }
    }

    /// Returns the first block of the region `block` belongs to.
    ///
    /// **SAFETY**: `block` must be linked in this directory.
    #[inline]
    pub unsafe fn region_start(block: NonNull<Block>) -> NonNull<Block> {
        unsafe { block.as_ref().region }
    }

    /// Tells whether every block of the region starting at `start` is free.
    /// Only the run of blocks that share `start` is visited.
    ///
    /// **SAFETY**: `start` must be the first block of a region linked in this
    /// directory.
    pub unsafe fn is_region_empty(&self, start: NonNull<Block>) -> bool {
        let mut current = Some(start);

        while let Some(node) = current {
            let block = unsafe { node.as_ref() };
            if block.region != start {
                break;
            }
            if !block.is_free() {
                return false;
            }
            current = block.next;
        }

        true
    }

    /// Finds the neighbours of the region starting at `start`. This has to run
    /// while the region is still mapped, since it walks the region's blocks.
    ///
    /// **SAFETY**: `start` must be the first block of a region linked in this
    /// directory.
    pub unsafe fn region_links(&self, start: NonNull<Block>) -> RegionLinks {
        let mut successor = Some(start);
        while let Some(node) = successor {
            let block = unsafe { node.as_ref() };
            if block.region != start {
                break;
            }
            successor = block.next;
        }

        let mut predecessor = None;
        if self.head != Some(start) {
            let mut current = self.head;
            while let Some(node) = current {
                let next = unsafe { node.as_ref().next };
                if next == Some(start) {
                    predecessor = Some(node);
                    break;
                }
                current = next;
            }
        }

        RegionLinks { predecessor, successor }
    }

    /// Drops a whole region from the list. After this no block of that region
    /// is reachable, so its memory can go back to the kernel (or already has).
    ///
    /// **SAFETY**: `links` must come from [`Directory::region_links`] with no
    /// other change to the list in between.
    pub unsafe fn unlink_region(&mut self, links: RegionLinks) {
        match (links.predecessor, links.successor) {
            // The only region left.
            (None, None) => self.head = None,
            // First region, others follow.
            (None, Some(next)) => self.head = Some(next),
            // Last region, others precede.
            (Some(mut prev), None) => unsafe { prev.as_mut().next = None },
            // Somewhere in the middle.
            (Some(mut prev), Some(next)) => unsafe { prev.as_mut().next = Some(next) },
        }
    }

    fn last(&self) -> Link {
        let mut last = self.head?;

        while let Some(next) = unsafe { last.as_ref().next } {
            last = next;
        }

        Some(last)
    }

    /// Walks the list yielding the raw block pointers.
    pub fn nodes(&self) -> Nodes<'_> {
        Nodes { current: self.head, marker: PhantomData }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { nodes: self.nodes() }
    }
}

impl<'a> Iterator for Nodes<'a> {
    type Item = NonNull<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }

        Some(node)
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Block;

    fn next(&mut self) -> Option<Self::Item> {
        self.nodes.next().map(|node| unsafe { node.as_ref() })
    }
}

impl<'a> IntoIterator for &'a Directory {
    type Item = &'a Block;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
