use std::{fmt, mem, ptr::NonNull, str};

use crate::utils::align;

/// Every block starts on, and every block size is a multiple of, this many
/// bytes. Sixteen covers every primitive type and what `std` collections ask
/// of a global allocator.
pub(crate) const ALIGNMENT: usize = 16;

/// Bytes reserved inline in each header for the diagnostic label.
pub(crate) const LABEL_CAPACITY: usize = 32;

/// Header size of a block, padded so the payload that follows stays aligned.
/// A payload pointer is always exactly this many bytes past its header.
pub(crate) const HEADER_SIZE: usize = align(mem::size_of::<Block>(), ALIGNMENT);

const _: () = assert!(mem::align_of::<Block>() <= ALIGNMENT);

/// Non-null pointer to the next [`Block`] in the list.
pub(crate) type Link = Option<NonNull<Block>>;

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed after this header.
///
/// ```text
/// +---------------------+ <------+
/// |         id          |        |
/// +---------------------+        |
/// |        size         |        |
/// +---------------------+        |
/// |        usage        |        |
/// +---------------------+        |
/// |       region        |        | -> Header (HEADER_SIZE bytes)
/// +---------------------+        |
/// |     region_size     |        |
/// +---------------------+        |
/// |        next         |        |
/// +---------------------+        |
/// |        label        |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Payload (size - HEADER_SIZE bytes)
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// `size` covers header and payload. `usage` is `0` for a free block, otherwise
/// the header plus the aligned bytes the occupant asked for, so an occupied
/// block always satisfies `HEADER_SIZE < usage <= size`. Whatever lies between
/// `usage` and `size` can still be carved off by the splitter.
#[repr(C)]
pub(crate) struct Block {
    /// Identifier handed out when the header was written. Never reused.
    pub id: u64,
    /// Size of the block, header included.
    pub size: usize,
    /// Bytes taken by the current occupant, header included. `0` when free.
    pub usage: usize,
    /// First block of the region this block lives in. Points to itself for
    /// that first block.
    pub region: NonNull<Block>,
    /// Size of the whole mapped region.
    pub region_size: usize,
    /// Next block in the directory.
    pub next: Link,
    pub label: Label,
}

impl Block {
    /// Writes `header` at `addr` and returns the new block. When
    /// `header.region` is `None` the block becomes the first block of its
    /// region and points to itself.
    ///
    /// **SAFETY**: `addr` must be aligned to [`ALIGNMENT`] and valid for
    /// `HEADER_SIZE` bytes of writes.
    pub unsafe fn write(addr: NonNull<u8>, header: Header) -> NonNull<Block> {
        let block = addr.cast::<Block>();

        unsafe {
            block.as_ptr().write(Block {
                id: header.id,
                size: header.size,
                usage: header.usage,
                region: header.region.unwrap_or(block),
                region_size: header.region_size,
                next: None,
                label: Label::numbered(header.id),
            });
        }

        block
    }

    /// Returns the payload that follows the header of `block`.
    #[inline]
    pub fn payload(block: NonNull<Block>) -> NonNull<u8> {
        unsafe { block.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Recovers the header from a payload pointer.
    ///
    /// **SAFETY**: `payload` must have come from [`Block::payload`].
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Block> {
        unsafe { payload.sub(HEADER_SIZE).cast() }
    }

    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.size - self.usage
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.usage == 0
    }

    /// Payload bytes the occupant owns.
    #[inline]
    pub fn payload_in_use(&self) -> usize {
        if self.is_free() { 0 } else { self.usage - HEADER_SIZE }
    }

    /// Payload bytes the block could hold.
    #[inline]
    pub fn payload_capacity(&self) -> usize {
        self.size - HEADER_SIZE
    }
}

/// Values for a header about to be written with [`Block::write`].
pub(crate) struct Header {
    pub id: u64,
    pub size: usize,
    pub usage: usize,
    pub region: Link,
    pub region_size: usize,
}

/// Short name stored inline in the header, so naming a block never allocates.
#[derive(Clone, Copy)]
pub(crate) struct Label {
    bytes: [u8; LABEL_CAPACITY],
    len: u8,
}

impl Label {
    pub const fn empty() -> Self {
        Self { bytes: [0; LABEL_CAPACITY], len: 0 }
    }

    /// The label a block gets when it is created: `Allocation <id>`.
    pub fn numbered(id: u64) -> Self {
        let mut label = Self::empty();
        let _ = fmt::Write::write_fmt(&mut label, format_args!("Allocation {id}"));
        label
    }

    /// Builds a label from `text`, cut at the last whole character that fits.
    pub fn new(text: &str) -> Self {
        let mut label = Self::empty();
        label.push_str(text);
        label
    }

    pub fn as_str(&self) -> &str {
        // Only whole characters are ever pushed.
        str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    fn push_str(&mut self, text: &str) {
        for ch in text.chars() {
            let start = self.len as usize;
            let end = start + ch.len_utf8();
            if end > LABEL_CAPACITY {
                return;
            }

            ch.encode_utf8(&mut self.bytes[start..end]);
            self.len = end as u8;
        }
    }
}

impl fmt::Write for Label {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}
