//! Size arithmetic shared by blocks and regions.

/// Rounds `value` up to a multiple of `to`, which must be a power of two.
/// Wraps on overflow; see [`checked_align`] for sizes that come from callers.
pub const fn align(value: usize, to: usize) -> usize {
    (value + to - 1) & !(to - 1)
}

/// Same as [`align`] but `None` when the rounded value does not fit in a
/// `usize`.
pub fn checked_align(value: usize, to: usize) -> Option<usize> {
    value.checked_add(to - 1).map(|value| value & !(to - 1))
}
