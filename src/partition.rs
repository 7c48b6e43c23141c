//! Row partitioning and ring arithmetic.
//!
//! The same plan slices the world across workers at the broker and slices a
//! worker's rows across its compute tasks.

use std::ops::Range;

use crate::error::{Error, Result};

/// Splits `[0, height)` into `parts` contiguous ranges of `height / parts`
/// rows each; the last range absorbs the remainder.
pub fn plan(height: usize, parts: usize) -> Result<Vec<Range<usize>>> {
    if parts == 0 || parts > height {
        return Err(Error::Bounds(format!(
            "cannot split {} rows into {} partitions",
            height, parts
        )));
    }
    let slice_height = height / parts;
    Ok((0..parts)
        .map(|i| {
            let start = i * slice_height;
            let end = if i == parts - 1 {
                height
            } else {
                (i + 1) * slice_height
            };
            start..end
        })
        .collect())
}

/// Like [`plan`], over the rows of `range`.
pub fn plan_within(
    range: Range<usize>,
    parts: usize,
) -> Result<Vec<Range<usize>>> {
    let offset = range.start;
    Ok(plan(range.len(), parts)?
        .into_iter()
        .map(|r| r.start + offset..r.end + offset)
        .collect())
}

/// Indices of the previous and next members of a ring of `n`.
pub fn ring_neighbours(i: usize, n: usize) -> (usize, usize) {
    ((i + n - 1) % n, (i + 1) % n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_every_row_exactly_once() {
        for height in 1..=40 {
            for parts in 1..=height {
                let ranges = plan(height, parts).unwrap();
                assert_eq!(ranges.len(), parts);
                let mut next = 0;
                for range in &ranges {
                    assert_eq!(range.start, next, "gap or overlap");
                    assert!(range.end > range.start, "empty partition");
                    next = range.end;
                }
                assert_eq!(next, height);
            }
        }
    }

    #[test]
    fn remainder_goes_to_the_last_partition() {
        assert_eq!(plan(10, 4).unwrap(), vec![0..2, 2..4, 4..6, 6..10]);
        assert_eq!(plan(5, 2).unwrap(), vec![0..2, 2..5]);
    }

    #[test]
    fn impossible_plans_are_rejected() {
        assert!(matches!(plan(3, 0), Err(Error::Bounds(_))));
        assert!(matches!(plan(3, 4), Err(Error::Bounds(_))));
    }

    #[test]
    fn plans_within_a_range() {
        assert_eq!(plan_within(4..10, 2).unwrap(), vec![4..7, 7..10]);
    }

    #[test]
    fn ring_closes() {
        for n in 1..10 {
            assert_eq!(ring_neighbours(0, n).0, n - 1);
            assert_eq!(ring_neighbours(n - 1, n).1, 0);
        }
        assert_eq!(ring_neighbours(2, 5), (1, 3));
    }
}
