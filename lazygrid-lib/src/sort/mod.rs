//! Rank-based sorting
//!
//! Sorting a remote table should not require pulling every row across the
//! wire first. Each sorted column is fetched on its own and turned into a
//! rank vector: `ranks[row]` is the position of the row's value in the
//! column's ascending order, with equal values sharing the rank of the first
//! of them. A multi-column order then compares ranks clause by clause and
//! never touches the values again.
//!
//! Sources that cannot fetch single columns fall back to
//! [`materialized_order`], which sorts whole rows by their cells.

mod frame;

pub use frame::*;

use std::cmp::Ordering;

use crate::model::Direction;
use crate::model::Value;

/// Computes the tie-aware rank vector of `values`.
///
/// # Example
///
/// ```
/// use lazygrid_lib::sort::compute_ranks;
///
/// assert_eq!(compute_ranks(&[3, 1, 2, 4]), vec![2, 0, 1, 3]);
/// assert_eq!(compute_ranks(&[25, 30, 20, 20]), vec![2, 3, 0, 0]);
/// ```
pub fn compute_ranks<T: Ord>(values: &[T]) -> Vec<usize> {
    compute_ranks_by(values, T::cmp)
}

/// Computes the rank vector of `values` under `compare`.
///
/// Used with [`Value::compare`] for cell values, which have no `Ord`.
pub fn compute_ranks_by<T, F>(values: &[T], mut compare: F) -> Vec<usize>
where
    F: FnMut(&T, &T) -> Ordering,
{
    let mut indices: Vec<usize> = (0..values.len()).collect();
    // Stable: equal values keep their original relative order.
    indices.sort_by(|&a, &b| compare(&values[a], &values[b]));

    let mut ranks = vec![0; values.len()];
    let mut run_start = 0;
    for (position, &index) in indices.iter().enumerate() {
        if position > 0 && compare(&values[indices[position - 1]], &values[index]) != Ordering::Equal {
            run_start = position;
        }
        ranks[index] = run_start;
    }
    ranks
}

/// Composes per-column rank vectors into a permutation.
///
/// Returns `sorted position -> original row`. Rows are compared by the
/// rank of each clause in turn, reversed for descending clauses, and by
/// original index when every rank ties. Every rank vector must hold at
/// least `num_rows` entries.
///
/// # Example
///
/// ```
/// use lazygrid_lib::model::Direction;
/// use lazygrid_lib::sort::{compute_ranks, sort_indexes};
///
/// let team = compute_ranks(&["b", "a", "b", "a"]);
/// let score = compute_ranks(&[10, 30, 20, 30]);
///
/// let order = sort_indexes(&[(&team, Direction::Asc), (&score, Direction::Desc)], 4);
/// assert_eq!(order, vec![1, 3, 2, 0]);
/// ```
pub fn sort_indexes(ranks: &[(&[usize], Direction)], num_rows: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..num_rows).collect();
    indices.sort_by(|&a, &b| {
        ranks
            .iter()
            .map(|(column, direction)| direction.apply(column[a].cmp(&column[b])))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.cmp(&b))
    });
    indices
}

/// Sorts materialized rows directly by cell comparison.
///
/// `keys` holds `(position within a row, direction)` pairs in priority
/// order. Produces the same permutation as ranking each key column and
/// calling [`sort_indexes`].
pub fn materialized_order(rows: &[Vec<Value>], keys: &[(usize, Direction)]) -> Vec<usize> {
    let mut tagged: Vec<(usize, &Vec<Value>)> = rows.iter().enumerate().collect();
    tagged.sort_by(|(a, left), (b, right)| {
        keys.iter()
            .map(|&(position, direction)| {
                let ordering = match (left.get(position), right.get(position)) {
                    (Some(l), Some(r)) => l.compare(r),
                    (l, r) => l.is_some().cmp(&r.is_some()),
                };
                direction.apply(ordering)
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.cmp(b))
    });
    tagged.into_iter().map(|(index, _)| index).collect()
}
