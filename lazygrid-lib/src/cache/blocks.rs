//! Contiguous row blocks per key.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Range;

use crate::error::Error;
use crate::model::AsyncValue;

/// A cached, contiguous span of rows. `range` is half-open.
#[derive(Debug, Clone)]
pub struct Block<T> {
    /// Rows covered by this block.
    pub range: Range<usize>,
    /// The rows, in order. Resolved for settled blocks, pending while in
    /// flight.
    pub rows: AsyncValue<Vec<T>>,
}

impl<T> Block<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The rows for `range`, as a future that settles with this block.
    fn slice(&self, range: Range<usize>) -> AsyncValue<Vec<T>> {
        let from = range.start - self.range.start;
        let to = range.end - self.range.start;
        self.rows
            .map(move |rows| rows.get(from..to).map(<[T]>::to_vec).unwrap_or_default())
    }

    fn settled_rows(&self, within: Range<usize>) -> Vec<T> {
        self.rows.with(|state| {
            state
                .as_resolved()
                .and_then(|rows| rows.get(within))
                .map(<[T]>::to_vec)
                .unwrap_or_default()
        })
    }
}

/// What a request needs, as decided by [`BlockCache::plan`].
#[derive(Debug)]
pub enum Plan<T> {
    /// A settled block covers the whole request.
    Covered(AsyncValue<Vec<T>>),
    /// The uncovered part is already being fetched; wait for these, then
    /// plan again.
    InFlight(Vec<AsyncValue<Vec<T>>>),
    /// The caller must fetch `range`, then report back with
    /// [`BlockCache::complete`] or [`BlockCache::abort`]. `waits` are the
    /// in-flight fetches the range was trimmed against.
    Dispatch {
        range: Range<usize>,
        waits: Vec<AsyncValue<Vec<T>>>,
    },
}

/// Settled and in-flight row blocks, per key.
///
/// Settled blocks of one key are kept ascending and non-overlapping;
/// adjacent or overlapping blocks are merged when a fetch completes. A
/// failed fetch leaves no trace, so its range stays eligible for retry.
/// Blocks are never evicted.
///
/// # Example
///
/// ```
/// use lazygrid_lib::cache::{BlockCache, Plan};
///
/// let mut cache: BlockCache<String, u32> = BlockCache::new();
/// let key = "price".to_string();
///
/// let Plan::Dispatch { range, .. } = cache.plan(&key, 0..3) else { unreachable!() };
/// cache.complete(&key, range, vec![10, 11, 12]);
///
/// assert!(matches!(cache.plan(&key, 1..3), Plan::Covered(_)));
/// assert_eq!(cache.get("price", 2), Some(12));
/// ```
#[derive(Debug)]
pub struct BlockCache<K, T> {
    settled: HashMap<K, Vec<Block<T>>>,
    in_flight: HashMap<K, Vec<Block<T>>>,
}

impl<K, T> Default for BlockCache<K, T> {
    fn default() -> Self {
        Self {
            settled: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }
}

impl<K, T> BlockCache<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides what `range` still needs.
    ///
    /// The block starting at or before `range.start` supplies a covered
    /// prefix and the block holding `range.end - 1` a covered suffix; only
    /// the part in between is dispatched, in one piece. That part is then
    /// trimmed the same way against fetches already in flight, which the
    /// caller waits for. A returned [`Plan::Dispatch`] is registered as in
    /// flight.
    pub fn plan(&mut self, key: &K, range: Range<usize>) -> Plan<T> {
        if range.is_empty() {
            return Plan::Covered(AsyncValue::resolved(Vec::new()));
        }

        let blocks = self.settled.get(key).map(Vec::as_slice).unwrap_or_default();
        let preceding = blocks
            .partition_point(|b| b.range.start <= range.start)
            .checked_sub(1)
            .and_then(|i| blocks.get(i));
        if let Some(block) = preceding
            && block.range.end >= range.end
        {
            return Plan::Covered(block.slice(range));
        }

        let mut start = range.start;
        if let Some(block) = preceding
            && block.range.end > start
        {
            start = block.range.end;
        }
        let mut end = range.end;
        let following = blocks
            .partition_point(|b| b.range.start < range.end)
            .checked_sub(1)
            .and_then(|i| blocks.get(i));
        if let Some(block) = following
            && block.range.start > start
            && block.range.end >= range.end
        {
            end = block.range.start;
        }

        let in_flight = self.in_flight.entry(key.clone()).or_default();
        let mut waits = Vec::new();
        let mut trimmed = true;
        while trimmed && start < end {
            trimmed = false;
            for block in in_flight.iter() {
                if block.range.start <= start && block.range.end > start {
                    start = block.range.end;
                } else if block.range.start > start
                    && block.range.start < end
                    && block.range.end >= end
                {
                    end = block.range.start;
                } else {
                    continue;
                }
                waits.push(block.rows.clone());
                trimmed = true;
                if start >= end {
                    break;
                }
            }
        }
        if start >= end {
            return Plan::InFlight(waits);
        }

        in_flight.push(Block {
            range: start..end,
            rows: AsyncValue::pending(),
        });
        Plan::Dispatch {
            range: start..end,
            waits,
        }
    }

    /// Stores the rows of a dispatched range and merges it with its
    /// neighbours.
    ///
    /// `rows` must hold exactly one entry per index of `range`; otherwise
    /// the dispatch is aborted instead.
    pub fn complete(&mut self, key: &K, range: Range<usize>, rows: Vec<T>) {
        if rows.len() != range.len() {
            let error = Error::fetch(format!(
                "got {} rows for range {}..{}",
                rows.len(),
                range.start,
                range.end
            ));
            self.abort(key, &range, error);
            return;
        }
        if let Some(block) = self.take_in_flight(key, &range) {
            block.rows.resolve(rows.clone());
        }

        let blocks = self.settled.entry(key.clone()).or_default();
        let mut start = range.start;
        let mut end = range.end;
        let mut merged = rows;

        let first = blocks.partition_point(|b| b.range.end < start);
        let last = blocks.partition_point(|b| b.range.start <= end);
        if first < last {
            let touching: Vec<Block<T>> = blocks.drain(first..last).collect();
            if let Some(head) = touching.first()
                && head.range.start < start
            {
                let mut prefix = head.settled_rows(0..start - head.range.start);
                prefix.append(&mut merged);
                merged = prefix;
                start = head.range.start;
            }
            if let Some(tail) = touching.last()
                && tail.range.end > end
            {
                merged.extend(tail.settled_rows(end - tail.range.start..tail.range.len()));
                end = tail.range.end;
            }
        }

        blocks.insert(
            first,
            Block {
                range: start..end,
                rows: AsyncValue::resolved(merged),
            },
        );
    }

    /// Forgets a dispatched range that failed; waiters see `error`.
    pub fn abort(&mut self, key: &K, range: &Range<usize>, error: Error) {
        if let Some(block) = self.take_in_flight(key, range) {
            block.rows.reject(error);
        }
    }

    fn take_in_flight(&mut self, key: &K, range: &Range<usize>) -> Option<Block<T>> {
        let blocks = self.in_flight.get_mut(key)?;
        let position = blocks.iter().position(|b| b.range == *range)?;
        Some(blocks.remove(position))
    }

    /// Reads one settled row.
    pub fn get<Q>(&self, key: &Q, index: usize) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let blocks = self.settled.get(key)?;
        let block = blocks
            .partition_point(|b| b.range.start <= index)
            .checked_sub(1)
            .and_then(|i| blocks.get(i))?;
        if index >= block.range.end {
            return None;
        }
        block.rows.with(|state| {
            state
                .as_resolved()
                .and_then(|rows| rows.get(index - block.range.start))
                .cloned()
        })
    }

    /// Reads a settled range, if a single block covers it.
    pub fn read<Q>(&self, key: &Q, range: Range<usize>) -> Option<AsyncValue<Vec<T>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let blocks = self.settled.get(key)?;
        blocks
            .iter()
            .find(|b| b.range.start <= range.start && b.range.end >= range.end)
            .map(|b| b.slice(range))
    }

    /// The settled ranges of a key, ascending.
    pub fn ranges<Q>(&self, key: &Q) -> Vec<Range<usize>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.settled
            .get(key)
            .map(|blocks| blocks.iter().map(|b| b.range.clone()).collect())
            .unwrap_or_default()
    }
}
