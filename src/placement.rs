//! Picking the block that receives a request.
//!
//! Every [`Policy`] walks all candidates once, in directory order, and only
//! looks at how many bytes each one has left (`size - usage`). A candidate
//! qualifies when that free capacity covers the request. Because the
//! directory is ordered by creation and split time, "first seen wins" is a
//! deterministic tie-break.

use std::ptr::NonNull;

use crate::{block::Block, config::Policy};

/// Anything placement can weigh: a size and how much of it is taken.
pub(crate) trait Fit {
    fn size(&self) -> usize;
    fn usage(&self) -> usize;

    fn free_capacity(&self) -> usize {
        self.size() - self.usage()
    }
}

// Only pointers walked out of the directory reach placement, and the
// directory is locked for as long as they are looked at.
impl Fit for NonNull<Block> {
    fn size(&self) -> usize {
        unsafe { self.as_ref().size }
    }

    fn usage(&self) -> usize {
        unsafe { self.as_ref().usage }
    }
}

impl<T: Fit> Fit for &T {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn usage(&self) -> usize {
        (**self).usage()
    }
}

impl Policy {
    /// Returns the candidate that should take `request` bytes, or `None` when
    /// no candidate has room.
    pub(crate) fn select<T, I>(self, candidates: I, request: usize) -> Option<T>
    where
        T: Fit,
        I: IntoIterator<Item = T>,
    {
        match self {
            Self::FirstFit => first_fit(candidates, request),
            Self::BestFit => best_fit(candidates, request),
            Self::WorstFit => worst_fit(candidates, request),
        }
    }
}

fn first_fit<T: Fit>(candidates: impl IntoIterator<Item = T>, request: usize) -> Option<T> {
    candidates
        .into_iter()
        .find(|candidate| candidate.free_capacity() >= request)
}

fn best_fit<T: Fit>(candidates: impl IntoIterator<Item = T>, request: usize) -> Option<T> {
    let mut best: Option<(T, usize)> = None;

    for candidate in candidates {
        let free = candidate.free_capacity();

        if free == request {
            // Can't do better than an exact match.
            return Some(candidate);
        }

        if free > request && best.as_ref().is_none_or(|(_, smallest)| free < *smallest) {
            best = Some((candidate, free));
        }
    }

    best.map(|(candidate, _)| candidate)
}

fn worst_fit<T: Fit>(candidates: impl IntoIterator<Item = T>, request: usize) -> Option<T> {
    let mut worst: Option<(T, usize)> = None;

    for candidate in candidates {
        let free = candidate.free_capacity();

        if free >= request && worst.as_ref().is_none_or(|(_, largest)| free > *largest) {
            worst = Some((candidate, free));
        }
    }

    worst.map(|(candidate, _)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Hole {
        name: &'static str,
        size: usize,
        usage: usize,
    }

    impl Fit for Hole {
        fn size(&self) -> usize {
            self.size
        }

        fn usage(&self) -> usize {
            self.usage
        }
    }

    fn free(name: &'static str, size: usize) -> Hole {
        Hole { name, size, usage: 0 }
    }

    fn pick(policy: Policy, holes: &[Hole], request: usize) -> Option<&'static str> {
        policy.select(holes, request).map(|hole| hole.name)
    }

    #[test]
    fn first_fit_takes_the_first_that_fits() {
        let holes = [free("a", 16), free("b", 50), free("c", 30)];

        assert_eq!(Some("b"), pick(Policy::FirstFit, &holes, 20));
        assert_eq!(Some("a"), pick(Policy::FirstFit, &holes, 16));
        assert_eq!(None, pick(Policy::FirstFit, &holes, 51));
    }

    #[test]
    fn best_fit_takes_the_smallest_leftover() {
        let holes = [free("fifty", 50), free("thirty", 30)];

        assert_eq!(Some("thirty"), pick(Policy::BestFit, &holes, 20));
    }

    #[test]
    fn best_fit_stops_at_an_exact_match() {
        let holes = [free("big", 64), free("exact", 24), free("also_exact", 24)];

        assert_eq!(Some("exact"), pick(Policy::BestFit, &holes, 24));
    }

    #[test]
    fn best_fit_keeps_the_first_of_equal_leftovers() {
        let holes = [free("x", 100), free("first", 40), free("second", 40)];

        assert_eq!(Some("first"), pick(Policy::BestFit, &holes, 20));
    }

    #[test]
    fn worst_fit_takes_the_largest_capacity() {
        let holes = [free("thirty", 30), free("fifty", 50)];

        assert_eq!(Some("fifty"), pick(Policy::WorstFit, &holes, 20));
    }

    #[test]
    fn worst_fit_keeps_the_first_of_equal_capacities() {
        let holes = [free("first", 50), free("small", 25), free("second", 50)];

        assert_eq!(Some("first"), pick(Policy::WorstFit, &holes, 20));
        assert_eq!(Some("first"), pick(Policy::WorstFit, &holes, 50));
    }

    #[test]
    fn partially_used_blocks_count_their_free_capacity() {
        let holes = [
            Hole { name: "busy", size: 100, usage: 100 },
            Hole { name: "half", size: 100, usage: 40 },
            Hole { name: "free", size: 80, usage: 0 },
        ];

        assert_eq!(Some("half"), pick(Policy::FirstFit, &holes, 60));
        assert_eq!(Some("half"), pick(Policy::BestFit, &holes, 50));
        assert_eq!(Some("free"), pick(Policy::WorstFit, &holes, 50));
    }

    #[test]
    fn full_blocks_never_qualify() {
        let holes = [Hole { name: "busy", size: 64, usage: 64 }];

        for policy in [Policy::FirstFit, Policy::BestFit, Policy::WorstFit] {
            assert_eq!(None, pick(policy, &holes, 8));
        }
    }

    #[test]
    fn nothing_to_pick_from() {
        for policy in [Policy::FirstFit, Policy::BestFit, Policy::WorstFit] {
            assert_eq!(None, pick(policy, &[], 8));
        }
    }
}
