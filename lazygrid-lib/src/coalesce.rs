//! Row index coalescing.
//!
//! A sort or filter scatters the logically "next" rows across arbitrary
//! underlying positions. Coalescing the required indices into contiguous
//! ranges lets the engine issue one I/O call per range instead of one per
//! row.

use std::ops::Range;

/// Merges ascending row indices into ascending half-open ranges.
///
/// A range is extended while the next index equals its exclusive end;
/// otherwise it is closed and a new one starts. Repeated indices are
/// absorbed into the current range.
///
/// # Example
///
/// ```
/// use lazygrid_lib::coalesce::coalesce;
///
/// assert_eq!(coalesce([1, 2, 3, 7, 8, 10]), vec![1..4, 7..9, 10..11]);
/// ```
pub fn coalesce<I>(indices: I) -> Vec<Range<usize>>
where
    I: IntoIterator<Item = usize>,
{
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for index in indices {
        match ranges.last_mut() {
            Some(current) if index == current.end => current.end += 1,
            Some(current) if current.contains(&index) => {}
            _ => ranges.push(index..index + 1),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert!(coalesce(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_single_run() {
        assert_eq!(coalesce(0..5), vec![0..5]);
    }

    #[test]
    fn test_gaps_split_ranges() {
        assert_eq!(coalesce([0, 2, 4, 5]), vec![0..1, 2..3, 4..6]);
    }

    #[test]
    fn test_repeats_are_absorbed() {
        assert_eq!(coalesce([3, 3, 4, 4, 9]), vec![3..5, 9..10]);
    }
}
