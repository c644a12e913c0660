use std::ptr::NonNull;

use crate::{
    block::{Block, Header},
    directory::Directory,
};

/// Hands `request` bytes (header included) of `block` to a new occupant and
/// returns the block that now holds it.
///
/// A wholly free block is reused as is: its usage becomes `request` and no
/// new block appears, whatever is left over stays inside it for later.
///
/// Otherwise the block keeps its occupant and shrinks to what that occupant
/// uses. The bytes past it become a new block, linked right after, that holds
/// the request:
///
/// ```text
/// before:  | occupant | ........ free ........ |
/// after:   | occupant | request | .. free .. |
///          ^ block    ^ new block
/// ```
///
/// Blocks are never merged back together.
///
/// **SAFETY**: `block` must be linked in `directory` with
/// `block.free_capacity() >= request`, and `request` must cover at least a
/// header and be a multiple of [`crate::block::ALIGNMENT`].
pub(crate) unsafe fn place(directory: &mut Directory, mut block: NonNull<Block>, request: usize) -> NonNull<Block> {
    let header = unsafe { block.as_mut() };
    debug_assert!(header.free_capacity() >= request);

    if header.is_free() {
        header.usage = request;
        return block;
    }

    let kept = header.usage;
    let remainder = header.size - kept;
    header.size = kept;
    let region = header.region;
    let region_size = header.region_size;

    unsafe {
        let addr = block.cast::<u8>().add(kept);
        let tail = directory.create(addr, Header {
            id: 0,
            size: remainder,
            usage: request,
            region: Some(region),
            region_size,
        });
        directory.insert_after(block, tail);

        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::HEADER_SIZE,
        directory::tests::{FAKE_REGION_SIZE, add_region, fake_region},
    };

    const REGION: usize = FAKE_REGION_SIZE;

    #[test]
    fn free_block_is_taken_without_splitting() {
        let mut directory = Directory::new();
        let mut memory = fake_region();
        let block = add_region(&mut directory, &mut memory, 0);

        let placed = unsafe { place(&mut directory, block, HEADER_SIZE + 32) };

        assert_eq!(block, placed);
        assert_eq!(1, directory.iter().count());
        unsafe {
            assert_eq!(REGION, placed.as_ref().size);
            assert_eq!(HEADER_SIZE + 32, placed.as_ref().usage);
        }
    }

    #[test]
    fn occupied_block_gives_up_its_tail() {
        let mut directory = Directory::new();
        let mut memory = fake_region();
        let block = add_region(&mut directory, &mut memory, HEADER_SIZE + 16);

        let placed = unsafe { place(&mut directory, block, HEADER_SIZE + 32) };

        assert_ne!(block, placed);
        unsafe {
            let (head, tail) = (block.as_ref(), placed.as_ref());

            assert_eq!(HEADER_SIZE + 16, head.size);
            assert_eq!(HEADER_SIZE + 16, head.usage);
            assert_eq!(Some(placed), head.next);

            assert_eq!(1, tail.id);
            assert_eq!(REGION - HEADER_SIZE - 16, tail.size);
            assert_eq!(HEADER_SIZE + 32, tail.usage);
            assert_eq!(block, tail.region);
            assert_eq!(REGION, tail.region_size);
            assert_eq!(block.cast::<u8>().add(HEADER_SIZE + 16), placed.cast::<u8>());
        }
    }

    #[test]
    fn split_lands_between_its_neighbours() {
        let mut directory = Directory::new();
        let mut memory = fake_region();
        let block = add_region(&mut directory, &mut memory, HEADER_SIZE + 16);

        unsafe {
            let mut wide = place(&mut directory, block, 3 * HEADER_SIZE);
            let last = place(&mut directory, wide, HEADER_SIZE + 16);

            // The occupant of `wide` shrinks in place, freeing room behind it.
            wide.as_mut().usage = HEADER_SIZE + 16;
            let inner = place(&mut directory, wide, HEADER_SIZE + 16);

            let order: Vec<u64> = directory.iter().map(|block| block.id).collect();
            assert_eq!(vec![0, 1, 3, 2], order);

            assert_eq!(Some(inner), wide.as_ref().next);
            assert_eq!(Some(last), inner.as_ref().next);
            assert_eq!(2 * HEADER_SIZE - 16, inner.as_ref().size);
            assert_eq!(inner.cast::<u8>().add(inner.as_ref().size), last.cast::<u8>());
        }
    }
}
