//! Caching wrapper for data frames.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::frame::DataFrame;
use crate::frame::EventBus;
use crate::frame::FetchRequest;
use crate::frame::FrameEvent;
use crate::frame::Subscription;
use crate::frame::forward;
use crate::frame::validate_fetch;
use crate::frame::validate_get_cell;
use crate::frame::validate_get_row_number;
use crate::model::Columns;
use crate::model::OrderBy;
use crate::model::Settlement;
use crate::model::Value;
use crate::model::ValueBox;

use super::BlockCache;
use super::CacheStats;
use super::Plan;

type ColumnBlocks = BlockCache<String, Settlement<Value>>;

/// Memoizes the row ranges fetched from an inner frame.
///
/// One [`BlockCache`] per sort order, keyed by column. A fetch plans every
/// requested column, groups the columns whose uncovered ranges agree, and
/// sends one inner fetch per group. Repeating a fetch, or fetching a range
/// that is already in flight, does no new I/O. Cells are then served from
/// the cached blocks, falling back to the inner frame for anything the
/// blocks do not hold.
///
/// # Example
///
/// ```
/// use lazygrid_lib::cache::CachedFrame;
/// use lazygrid_lib::frame::{DataFrame, FetchRequest, InMemoryFrame};
/// use lazygrid_lib::model::Value;
///
/// # tokio_test_block(async {
/// let base = InMemoryFrame::new(["n"], (0..10).map(|i| vec![Value::from(i as i64)]).collect())?;
/// let frame = CachedFrame::new(base);
///
/// frame.fetch(FetchRequest::new(0..5)).await?;
/// frame.fetch(FetchRequest::new(0..5)).await?;
/// assert_eq!(frame.stats().hits(), 1);
/// # Ok::<(), lazygrid_lib::error::Error>(())
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct CachedFrame<F> {
    inner: F,
    caches: Mutex<HashMap<OrderBy, ColumnBlocks>>,
    stats: CacheStats,
    events: EventBus,
    _forwarding: Vec<Subscription>,
}

impl<F: DataFrame> CachedFrame<F> {
    /// Wraps a frame. Its events are re-emitted by the wrapper.
    pub fn new(inner: F) -> Self {
        let events = EventBus::new();
        let forwarding = forward(inner.events(), &events);
        Self {
            inner,
            caches: Mutex::new(HashMap::new()),
            stats: CacheStats::new(),
            events,
            _forwarding: forwarding,
        }
    }

    /// Returns the wrapped frame.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Returns the hit/miss counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// The cached row ranges of one column under one sort order.
    pub fn cached_ranges(&self, order_by: &OrderBy, column: &str) -> Vec<Range<usize>> {
        self.caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(order_by)
            .map(|cache| cache.ranges(column))
            .unwrap_or_default()
    }

    async fn dispatch(&self, mut dispatch: InFlight<'_, F>, cancel: &CancellationToken) -> Result<(), Error> {
        let rows = dispatch.rows.clone();
        let order_by = dispatch.order_by;
        log::debug!(
            "Cache dispatch: rows {}..{} of {:?} (order: '{}')",
            rows.start,
            rows.end,
            dispatch.columns,
            order_by
        );
        let request = FetchRequest {
            rows: rows.clone(),
            columns: Some(dispatch.columns.clone()),
            order_by: order_by.clone(),
            cancel: cancel.clone(),
        };

        match self.inner.fetch(request).await {
            Ok(()) => {
                let fetched: Vec<(String, Vec<Settlement<Value>>)> = std::mem::take(&mut dispatch.columns)
                    .into_iter()
                    .map(|column| {
                        let values = rows
                            .clone()
                            .map(|row| Settlement::from(self.inner.get_cell(row, &column, order_by)))
                            .collect();
                        (column, values)
                    })
                    .collect();
                let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
                let cache = caches.entry(order_by.clone()).or_default();
                for (column, values) in fetched {
                    cache.complete(&column, rows.clone(), values);
                }
                Ok(())
            }
            Err(error) => {
                if !error.is_cancelled() {
                    log::warn!("Cache dispatch for rows {}..{} failed: {}", rows.start, rows.end, error);
                }
                dispatch.abort(error.clone());
                Err(error)
            }
        }
    }
}

impl<F> CachedFrame<F> {
    fn abort_columns(&self, order_by: &OrderBy, rows: &Range<usize>, columns: &[String], error: Error) {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        let cache = caches.entry(order_by.clone()).or_default();
        for column in columns {
            cache.abort(column, rows, error.clone());
        }
    }
}

/// A range registered as in flight for some columns.
///
/// Dropping it before it is reported back aborts the range with
/// [`Error::Cancelled`], and waiters take the range over. Columns are
/// taken out once reported.
struct InFlight<'a, F> {
    frame: &'a CachedFrame<F>,
    order_by: &'a OrderBy,
    rows: Range<usize>,
    columns: Vec<String>,
}

impl<F> InFlight<'_, F> {
    fn abort(&mut self, error: Error) {
        let columns = std::mem::take(&mut self.columns);
        self.frame.abort_columns(self.order_by, &self.rows, &columns, error);
    }
}

impl<F> Drop for InFlight<'_, F> {
    fn drop(&mut self) {
        if !self.columns.is_empty() {
            log::debug!("Cache dispatch for rows {}..{} dropped", self.rows.start, self.rows.end);
            self.abort(Error::Cancelled);
        }
    }
}

#[async_trait]
impl<F: DataFrame> DataFrame for CachedFrame<F> {
    fn columns(&self) -> &Columns {
        self.inner.columns()
    }

    fn num_rows(&self) -> usize {
        self.inner.num_rows()
    }

    fn sortable(&self) -> bool {
        self.inner.sortable()
    }

    fn supports_column_subsets(&self) -> bool {
        self.inner.supports_column_subsets()
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn get_row_number(&self, row: usize, order_by: &OrderBy) -> Result<Option<ValueBox<usize>>, Error> {
        validate_get_row_number(self, row, order_by)?;
        self.inner.get_row_number(row, order_by)
    }

    fn get_cell(&self, row: usize, column: &str, order_by: &OrderBy) -> Result<Option<ValueBox<Value>>, Error> {
        validate_get_cell(self, row, column, order_by)?;
        let cached = self
            .caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(order_by)
            .and_then(|cache| cache.get(column, row));
        match cached {
            Some(Settlement::Resolved(value)) => Ok(Some(ValueBox::new(value))),
            Some(Settlement::Rejected(error)) => Err(error),
            // The inner frame did not deliver this cell with its range; it
            // may still arrive there.
            Some(Settlement::Pending) | None => self.inner.get_cell(row, column, order_by),
        }
    }

    async fn fetch(&self, request: FetchRequest) -> Result<(), Error> {
        validate_fetch(self, &request)?;
        request.check_cancelled()?;
        let columns = request.column_names(self.inner.columns());

        let mut first_round = true;
        loop {
            request.check_cancelled()?;

            let mut dispatches: BTreeMap<(usize, usize), Vec<String>> = BTreeMap::new();
            let mut waits = Vec::new();
            {
                let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
                let cache = caches.entry(request.order_by.clone()).or_default();
                for column in &columns {
                    match cache.plan(column, request.rows.clone()) {
                        Plan::Covered(_) => {}
                        Plan::InFlight(rows) => waits.extend(rows),
                        Plan::Dispatch { range, waits: rows } => {
                            waits.extend(rows);
                            dispatches
                                .entry((range.start, range.end))
                                .or_default()
                                .push(column.clone());
                        }
                    }
                }
            }
            let dispatches: Vec<InFlight<'_, F>> = dispatches
                .into_iter()
                .map(|((start, end), group)| InFlight {
                    frame: self,
                    order_by: &request.order_by,
                    rows: start..end,
                    columns: group,
                })
                .collect();

            if first_round {
                first_round = false;
                if dispatches.is_empty() && waits.is_empty() {
                    log::debug!(
                        "Cache hit: rows {}..{} (order: '{}')",
                        request.rows.start,
                        request.rows.end,
                        request.order_by
                    );
                    self.stats.record_hit();
                } else {
                    self.stats.record_miss();
                }
            }
            if dispatches.is_empty() && waits.is_empty() {
                break;
            }

            // Every dispatch must report back to the cache, so all of them
            // run to completion before the first error is returned.
            let outcomes = join_all(
                dispatches
                    .into_iter()
                    .map(|dispatch| self.dispatch(dispatch, &request.cancel)),
            )
            .await;
            outcomes.into_iter().collect::<Result<Vec<()>, Error>>()?;

            for rows in waits {
                let outcome = tokio::select! {
                    outcome = rows.wait() => outcome,
                    _ = request.cancel.cancelled() => return Err(Error::Cancelled),
                };
                match outcome {
                    // Cancelled by whoever owned that dispatch, not by us:
                    // plan again and take it over.
                    Ok(_) | Err(Error::Cancelled) => {}
                    Err(error) => return Err(error),
                }
            }
        }

        self.events.emit(&FrameEvent::Resolve);
        Ok(())
    }
}

impl<F> std::fmt::Debug for CachedFrame<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFrame")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::frame::InMemoryFrame;

    /// Records every fetch and can hold fetches at a gate.
    struct Recording {
        base: InMemoryFrame,
        calls: Mutex<Vec<(Range<usize>, Vec<String>)>>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    impl Recording {
        fn new(num_rows: usize) -> Self {
            let rows = (0..num_rows)
                .map(|i| vec![Value::from(i as i64), Value::from(format!("row {i}"))])
                .collect();
            Self {
                base: InMemoryFrame::new(["id", "label"], rows).unwrap(),
                calls: Mutex::new(Vec::new()),
                gate: None,
                fail: false,
            }
        }

        fn ranges(&self) -> Vec<Range<usize>> {
            self.calls.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
        }
    }

    #[async_trait]
    impl DataFrame for Recording {
        fn columns(&self) -> &Columns {
            self.base.columns()
        }

        fn num_rows(&self) -> usize {
            self.base.num_rows()
        }

        fn events(&self) -> &EventBus {
            self.base.events()
        }

        fn get_row_number(&self, row: usize, order_by: &OrderBy) -> Result<Option<ValueBox<usize>>, Error> {
            self.base.get_row_number(row, order_by)
        }

        fn get_cell(&self, row: usize, column: &str, order_by: &OrderBy) -> Result<Option<ValueBox<Value>>, Error> {
            self.base.get_cell(row, column, order_by)
        }

        async fn fetch(&self, request: FetchRequest) -> Result<(), Error> {
            let columns = request.column_names(self.columns());
            self.calls.lock().unwrap().push((request.rows.clone(), columns));
            if let Some(gate) = &self.gate {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = request.cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
            if self.fail {
                return Err(Error::fetch("offline"));
            }
            self.base.fetch(request).await
        }
    }

    #[tokio::test]
    async fn test_repeated_fetch_dispatches_once() {
        let frame = CachedFrame::new(Recording::new(20));
        frame.fetch(FetchRequest::new(2..8)).await.unwrap();
        frame.fetch(FetchRequest::new(2..8)).await.unwrap();
        frame.fetch(FetchRequest::new(3..5)).await.unwrap();

        assert_eq!(frame.inner().ranges(), vec![2..8]);
        assert_eq!(frame.stats().hits(), 2);
        assert_eq!(frame.stats().misses(), 1);
    }

    #[tokio::test]
    async fn test_columns_with_same_gap_share_one_dispatch() {
        let frame = CachedFrame::new(Recording::new(20));
        frame.fetch(FetchRequest::new(0..4)).await.unwrap();

        let calls = frame.inner().calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(0..4, vec!["id".to_string(), "label".to_string()])]);
    }

    #[tokio::test]
    async fn test_columns_with_different_gaps_dispatch_separately() {
        let frame = CachedFrame::new(Recording::new(20));
        frame
            .fetch(FetchRequest::new(0..4).with_columns(["id"]))
            .await
            .unwrap();
        frame.fetch(FetchRequest::new(0..6)).await.unwrap();

        let calls = frame.inner().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert!(calls.contains(&(4..6, vec!["id".to_string()])));
        assert!(calls.contains(&(0..6, vec!["label".to_string()])));
    }

    #[tokio::test]
    async fn test_cells_served_from_blocks() {
        let frame = CachedFrame::new(Recording::new(10));
        frame.fetch(FetchRequest::new(0..3)).await.unwrap();
        assert_eq!(
            frame.get_cell(2, "label", &OrderBy::none()),
            Ok(Some(ValueBox::new(Value::from("row 2"))))
        );
        assert_eq!(frame.cached_ranges(&OrderBy::none(), "label"), vec![0..3]);
    }

    #[tokio::test]
    async fn test_failed_fetch_does_not_poison() {
        let mut recording = Recording::new(10);
        recording.fail = true;
        let frame = CachedFrame::new(recording);

        assert_eq!(
            frame.fetch(FetchRequest::new(0..3)).await,
            Err(Error::fetch("offline"))
        );
        assert!(frame.cached_ranges(&OrderBy::none(), "id").is_empty());
        frame.fetch(FetchRequest::new(0..3)).await.unwrap_err();
        assert_eq!(frame.inner().ranges(), vec![0..3, 0..3]);
    }

    #[tokio::test]
    async fn test_invalid_requests_fail_before_io() {
        let frame = CachedFrame::new(Recording::new(10));
        assert!(frame.fetch(FetchRequest::new(5..11)).await.unwrap_err().is_validation());
        assert!(
            frame
                .fetch(FetchRequest::new(0..1).with_columns(["nope"]))
                .await
                .unwrap_err()
                .is_validation()
        );
        assert!(
            frame
                .fetch(FetchRequest::new(0..1).with_order_by(OrderBy::asc("id")))
                .await
                .unwrap_err()
                .is_validation()
        );
        assert!(frame.inner().ranges().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_waits_for_in_flight() {
        let gate = Arc::new(Notify::new());
        let mut recording = Recording::new(10);
        recording.gate = Some(Arc::clone(&gate));
        let frame = Arc::new(CachedFrame::new(recording));

        let first = {
            let frame = Arc::clone(&frame);
            tokio::spawn(async move { frame.fetch(FetchRequest::new(0..5)).await })
        };
        let second = {
            let frame = Arc::clone(&frame);
            tokio::spawn(async move { frame.fetch(FetchRequest::new(1..4)).await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        gate.notify_one();

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(frame.inner().ranges(), vec![0..5]);
    }

    fn gated(num_rows: usize) -> (Arc<Notify>, Arc<CachedFrame<Recording>>) {
        let gate = Arc::new(Notify::new());
        let mut recording = Recording::new(num_rows);
        recording.gate = Some(Arc::clone(&gate));
        (gate, Arc::new(CachedFrame::new(recording)))
    }

    fn ids(frame: &CachedFrame<Recording>, rows: Range<usize>) -> Vec<Value> {
        rows.map(|row| frame.get_cell(row, "id", &OrderBy::none()).unwrap().unwrap().value)
            .collect()
    }

    #[tokio::test]
    async fn test_gap_between_cached_ranges_is_fetched_alone() {
        let frame = CachedFrame::new(Recording::new(10));
        frame.fetch(FetchRequest::new(0..3)).await.unwrap();
        frame.fetch(FetchRequest::new(4..6)).await.unwrap();
        frame.fetch(FetchRequest::new(0..6)).await.unwrap();

        assert_eq!(frame.inner().ranges(), vec![0..3, 4..6, 3..4]);
        assert_eq!(frame.cached_ranges(&OrderBy::none(), "id"), vec![0..6]);
        assert_eq!(ids(&frame, 0..6), (0..6i64).map(Value::from).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_tail_overlap_fetches_only_the_tail() {
        let frame = CachedFrame::new(Recording::new(12));
        frame.fetch(FetchRequest::new(6..9)).await.unwrap();
        frame.fetch(FetchRequest::new(8..11)).await.unwrap();

        assert_eq!(frame.inner().ranges(), vec![6..9, 9..11]);
        assert_eq!(frame.cached_ranges(&OrderBy::none(), "label"), vec![6..11]);
        assert_eq!(ids(&frame, 6..11), (6..11i64).map(Value::from).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_overlap_with_in_flight_fetches_the_rest() {
        let (gate, frame) = gated(20);

        let first = {
            let frame = Arc::clone(&frame);
            tokio::spawn(async move { frame.fetch(FetchRequest::new(0..10)).await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        let second = {
            let frame = Arc::clone(&frame);
            tokio::spawn(async move { frame.fetch(FetchRequest::new(5..15)).await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(frame.inner().ranges(), vec![0..10, 10..15]);

        gate.notify_one();
        gate.notify_one();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(frame.inner().ranges(), vec![0..10, 10..15]);
        assert_eq!(ids(&frame, 0..15), (0..15i64).map(Value::from).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_dropped_fetch_releases_its_dispatch() {
        let (gate, frame) = gated(10);

        let dropped = tokio::time::timeout(Duration::from_millis(10), frame.fetch(FetchRequest::new(0..5))).await;
        assert!(dropped.is_err());

        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(5), frame.fetch(FetchRequest::new(0..5)))
            .await
            .expect("refetch must not wait on the dropped dispatch")
            .unwrap();

        assert_eq!(frame.inner().ranges(), vec![0..5, 0..5]);
        assert_eq!(frame.cached_ranges(&OrderBy::none(), "id"), vec![0..5]);
    }

    #[tokio::test]
    async fn test_waiter_takes_over_cancelled_dispatch() {
        let gate = Arc::new(Notify::new());
        let mut recording = Recording::new(10);
        recording.gate = Some(Arc::clone(&gate));
        let frame = Arc::new(CachedFrame::new(recording));

        let stale_token = CancellationToken::new();
        let stale = {
            let frame = Arc::clone(&frame);
            let request = FetchRequest::new(0..5).with_cancel(stale_token.clone());
            tokio::spawn(async move { frame.fetch(request).await })
        };
        let fresh = {
            let frame = Arc::clone(&frame);
            tokio::spawn(async move { frame.fetch(FetchRequest::new(0..5)).await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        stale_token.cancel();
        assert_eq!(stale.await.unwrap(), Err(Error::Cancelled));
        tokio::task::yield_now().await;
        gate.notify_one();
        fresh.await.unwrap().unwrap();

        assert_eq!(frame.inner().ranges(), vec![0..5, 0..5]);
        assert!(frame.get_cell(4, "id", &OrderBy::none()).unwrap().is_some());
    }
}
