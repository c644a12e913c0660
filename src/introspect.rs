//! Text snapshot of the directory.
//!
//! One line per region, right before the first block inside it, then one line
//! per block, in directory order:
//!
//! ```text
//! [REGION] <start>-<end> <size>
//! [BLOCK]  <start>-<end> (<id>) '<label>' <size> <usage> <payload in use>
//! ```

use std::fmt::{self, Write};

use crate::{directory::Directory, region::Region};

pub(crate) fn write_state<W: Write>(directory: &Directory, sink: &mut W) -> fmt::Result {
    let mut current_region = None;

    for node in directory.nodes() {
        let block = unsafe { node.as_ref() };

        if current_region != Some(block.region) {
            current_region = Some(block.region);

            let region = unsafe { Region::of(block.region) };
            writeln!(sink, "[REGION] {:p}-{:p} {}", region.base(), region.end(), region.size())?;
        }

        writeln!(
            sink,
            "[BLOCK]  {:p}-{:p} ({}) '{}' {} {} {}",
            node,
            node.cast::<u8>().as_ptr().wrapping_add(block.size),
            block.id,
            block.label,
            block.size,
            block.usage,
            block.payload_in_use(),
        )?;
    }

    Ok(())
}

/// Writes straight to the standard output file descriptor without buffering,
/// so dumping the state of the global allocator never allocates.
#[cfg(unix)]
pub(crate) struct Stdout;

#[cfg(unix)]
impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut bytes = s.as_bytes();

        while !bytes.is_empty() {
            let written = unsafe { libc::write(libc::STDOUT_FILENO, bytes.as_ptr().cast(), bytes.len()) };
            if written <= 0 {
                return Err(fmt::Error);
            }
            bytes = &bytes[written as usize..];
        }

        Ok(())
    }
}

/// Standard output through `std`. It buffers, so it may allocate.
#[cfg(not(unix))]
pub(crate) struct Stdout;

#[cfg(not(unix))]
impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        use std::io::Write as _;

        std::io::stdout().write_all(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;
    use crate::{
        block::HEADER_SIZE,
        directory::tests::{FAKE_REGION_SIZE, add_region, carve, fake_region},
    };

    #[test]
    fn empty_directory_writes_nothing() {
        let mut out = String::new();

        write_state(&Directory::new(), &mut out).unwrap();

        assert!(out.is_empty());
    }

    #[test]
    fn regions_precede_their_blocks() {
        let mut directory = Directory::new();
        let (mut a, mut b) = (fake_region(), fake_region());
        let size = FAKE_REGION_SIZE;

        let first = add_region(&mut directory, &mut a, HEADER_SIZE + 16);
        let tail = carve(&mut directory, first, HEADER_SIZE + 16, 0);
        let second = add_region(&mut directory, &mut b, HEADER_SIZE + 32);
        unsafe { (*second.as_ptr()).label = crate::block::Label::new("named") };

        let mut out = String::new();
        write_state(&directory, &mut out).unwrap();

        let at = |block: NonNull<_>, len: usize| {
            let start = block.cast::<u8>().as_ptr();
            format!("{:p}-{:p}", start, start.wrapping_add(len))
        };
        let tail_size = size - HEADER_SIZE - 16;
        let expected = [
            format!("[REGION] {} {size}", at(first, size)),
            format!("[BLOCK]  {} (0) 'Allocation 0' {} {} 16", at(first, HEADER_SIZE + 16), HEADER_SIZE + 16, HEADER_SIZE + 16),
            format!("[BLOCK]  {} (1) 'Allocation 1' {tail_size} 0 0", at(tail, tail_size)),
            format!("[REGION] {} {size}", at(second, size)),
            format!("[BLOCK]  {} (2) 'named' {size} {} 32", at(second, size), HEADER_SIZE + 32),
        ];
        assert_eq!(expected.join("\n") + "\n", out);
    }

    #[test]
    fn dumping_twice_gives_the_same_text() {
        let mut directory = Directory::new();
        let mut a = fake_region();
        let first = add_region(&mut directory, &mut a, HEADER_SIZE + 16);
        carve(&mut directory, first, HEADER_SIZE + 16, HEADER_SIZE + 48);

        let (mut once, mut twice) = (String::new(), String::new());
        write_state(&directory, &mut once).unwrap();
        write_state(&directory, &mut twice).unwrap();

        assert_eq!(once, twice);
    }
}
