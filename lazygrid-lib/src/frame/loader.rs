//! Lazily loaded data frame

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::coalesce::coalesce;
use crate::error::Error;
use crate::error::ValidationError;
use crate::model::AsyncValue;
use crate::model::Columns;
use crate::model::OrderBy;
use crate::model::Row;
use crate::model::Value;
use crate::model::ValueBox;

use super::DataFrame;
use super::EventBus;
use super::FetchRequest;
use super::FrameEvent;
use super::validate_fetch;
use super::validate_get_cell;
use super::validate_get_row_number;

/// Outcome of loading one cell.
pub type CellResult = Result<Value, Error>;

/// The I/O behind a [`LoaderFrame`].
///
/// Implementations talk to whatever holds the data (a file, a service, a
/// database) and return one row per index of `rows`, with one entry per
/// name in `columns`, in that order.
#[async_trait]
pub trait RowLoader: Send + Sync {
    /// Loads a contiguous range of rows.
    ///
    /// A top-level error fails the whole range. A per-cell error fails only
    /// that cell.
    async fn load(&self, rows: Range<usize>, columns: &[String]) -> Result<Vec<Vec<CellResult>>, Error>;
}

type Claim = (String, AsyncValue<Value>);

/// A frame that loads rows on demand through a [`RowLoader`].
///
/// Cells are [`AsyncValue`]s created the first time they are requested.
/// Rows still missing for a request are coalesced into ranges and loaded
/// with one loader call per range. Requests for cells already in flight
/// wait for them instead of loading again.
///
/// A range that fails as a whole, or whose fetch is cancelled, has its
/// pending cells removed so the next request loads it again. Ranges that
/// completed are kept.
pub struct LoaderFrame<L> {
    columns: Columns,
    num_rows: AtomicUsize,
    rows: Mutex<HashMap<usize, Row>>,
    loader: L,
    events: EventBus,
}

impl<L: RowLoader> LoaderFrame<L> {
    /// Creates a frame over `num_rows` rows served by `loader`.
    pub fn new<I, C>(columns: I, num_rows: usize, loader: L) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = C>,
        C: Into<crate::model::ColumnDescriptor>,
    {
        Ok(Self {
            columns: Columns::new(columns)?,
            num_rows: AtomicUsize::new(num_rows),
            rows: Mutex::new(HashMap::new()),
            loader,
            events: EventBus::new(),
        })
    }

    /// Returns the loader.
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Updates the row count and announces it.
    pub fn set_num_rows(&self, num_rows: usize) {
        let previous = self.num_rows.swap(num_rows, Ordering::SeqCst);
        if previous != num_rows {
            self.events.emit(&FrameEvent::NumRowsChange { num_rows });
        }
    }

    /// Returns a snapshot of a row, if any of its cells has been requested.
    pub fn row(&self, index: usize) -> Option<Row> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned()
    }

    /// Registers pending cells for everything in `rows` nobody has asked for
    /// yet. Returns those claims by row, plus cells already in flight.
    fn claim(
        &self,
        rows: &Range<usize>,
        columns: &[String],
    ) -> (BTreeMap<usize, Vec<Claim>>, Vec<(usize, Claim)>) {
        let mut claimed: BTreeMap<usize, Vec<Claim>> = BTreeMap::new();
        let mut waits = Vec::new();
        let mut guard = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        for index in rows.clone() {
            let row = guard.entry(index).or_insert_with(|| Row::new(index));
            for column in columns {
                match row.cells.get(column) {
                    None => {
                        let cell = AsyncValue::pending();
                        row.cells.insert(column.clone(), cell.clone());
                        claimed.entry(index).or_default().push((column.clone(), cell));
                    }
                    Some(cell) if cell.is_pending() => {
                        waits.push((index, (column.clone(), cell.clone())));
                    }
                    Some(_) => {}
                }
            }
        }
        (claimed, waits)
    }

    async fn load_range(
        &self,
        range: Range<usize>,
        columns: &[String],
        mut claims: Claims<'_, L>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        log::debug!("Loading rows {}..{} ({} columns)", range.start, range.end, columns.len());
        let loaded = tokio::select! {
            result = self.loader.load(range.clone(), columns) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };
        let loaded = loaded.and_then(|rows| {
            if rows.len() == range.len() && rows.iter().all(|r| r.len() == columns.len()) {
                Ok(rows)
            } else {
                Err(Error::fetch(format!(
                    "loader returned {} rows for range {}..{}",
                    rows.len(),
                    range.start,
                    range.end
                )))
            }
        });

        let rows = match loaded {
            Ok(rows) => rows,
            Err(error) => {
                if !error.is_cancelled() {
                    log::warn!("Loading rows {}..{} failed: {}", range.start, range.end, error);
                }
                claims.release(&error);
                return Err(error);
            }
        };

        let guard = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        for (index, values) in range.zip(rows) {
            let Some(row) = guard.get(&index) else {
                continue;
            };
            row.number.resolve(index);
            for (column, value) in columns.iter().zip(values) {
                if let Some(cell) = row.cells.get(column) {
                    match value {
                        Ok(value) => cell.resolve(value),
                        Err(error) => cell.reject(error),
                    };
                }
            }
        }
        claims.claims.clear();
        Ok(())
    }
}

impl<L> LoaderFrame<L> {
    /// Drops our pending cells for a range that did not load.
    fn release(&self, claims: &[(usize, Claim)], error: &Error) {
        let mut guard = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        for (index, (column, cell)) in claims {
            if let Some(row) = guard.get_mut(index)
                && row.cells.get(column).is_some_and(|c| c.ptr_eq(cell))
            {
                row.cells.remove(column);
            }
            cell.reject(error.clone());
        }
    }

    fn holds(&self, index: usize, column: &str, cell: &AsyncValue<Value>) -> bool {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .and_then(|row| row.cells.get(column))
            .is_some_and(|c| c.ptr_eq(cell))
    }
}

/// Pending cells claimed for one load.
///
/// Released with [`Error::Cancelled`] if dropped while still held, so the
/// next request loads them again.
struct Claims<'a, L> {
    frame: &'a LoaderFrame<L>,
    claims: Vec<(usize, Claim)>,
}

impl<L> Claims<'_, L> {
    fn release(&mut self, error: &Error) {
        let claims = std::mem::take(&mut self.claims);
        self.frame.release(&claims, error);
    }
}

impl<L> Drop for Claims<'_, L> {
    fn drop(&mut self) {
        if !self.claims.is_empty() {
            log::debug!("Dropped load released {} pending cells", self.claims.len());
            self.release(&Error::Cancelled);
        }
    }
}

#[async_trait]
impl<L: RowLoader> DataFrame for LoaderFrame<L> {
    fn columns(&self) -> &Columns {
        &self.columns
    }

    fn num_rows(&self) -> usize {
        self.num_rows.load(Ordering::SeqCst)
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn get_row_number(&self, row: usize, order_by: &OrderBy) -> Result<Option<ValueBox<usize>>, Error> {
        validate_get_row_number(self, row, order_by)?;
        let guard = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.get(&row) {
            Some(entry) => entry.number.peek().into_read(),
            None => Ok(None),
        }
    }

    fn get_cell(&self, row: usize, column: &str, order_by: &OrderBy) -> Result<Option<ValueBox<Value>>, Error> {
        validate_get_cell(self, row, column, order_by)?;
        let guard = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.get(&row).and_then(|entry| entry.cell(column)) {
            Some(cell) => cell.peek().into_read(),
            None => Ok(None),
        }
    }

    async fn fetch(&self, request: FetchRequest) -> Result<(), Error> {
        validate_fetch(self, &request)?;
        request.check_cancelled()?;
        let columns = request.column_names(&self.columns);

        loop {
            request.check_cancelled()?;
            let (claimed, waits) = self.claim(&request.rows, &columns);
            if claimed.is_empty() && waits.is_empty() {
                break;
            }

            let loads: Vec<(Range<usize>, Claims<'_, L>)> = coalesce(claimed.keys().copied())
                .into_iter()
                .map(|range| {
                    let claims = claimed
                        .range(range.clone())
                        .flat_map(|(index, claims)| claims.iter().map(|claim| (*index, claim.clone())))
                        .collect();
                    (range, Claims { frame: self, claims })
                })
                .collect();
            join_all(
                loads
                    .into_iter()
                    .map(|(range, claims)| self.load_range(range, &columns, claims, &request.cancel)),
            )
            .await
            .into_iter()
            .collect::<Result<Vec<()>, Error>>()?;

            for (index, (column, cell)) in waits {
                let outcome = tokio::select! {
                    outcome = cell.wait() => outcome,
                    _ = request.cancel.cancelled() => return Err(Error::Cancelled),
                };
                match outcome {
                    Ok(_) | Err(Error::Cancelled) => {}
                    // Still held: the loader reported a failure for this one
                    // cell, which is its settled value.
                    Err(_) if self.holds(index, &column, &cell) => {}
                    Err(error) => return Err(error),
                }
            }
        }

        self.events.emit(&FrameEvent::Resolve);
        Ok(())
    }
}

impl<L> std::fmt::Debug for LoaderFrame<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderFrame")
            .field("columns", &self.columns)
            .field("num_rows", &self.num_rows)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    /// Serves `row * 10 + column` and records every call.
    #[derive(Default)]
    struct Numbers {
        calls: Mutex<Vec<(Range<usize>, Vec<String>)>>,
        gate: Option<Arc<Notify>>,
        fail_cell: Option<(usize, String)>,
        fail_range: bool,
    }

    #[async_trait]
    impl RowLoader for Numbers {
        async fn load(&self, rows: Range<usize>, columns: &[String]) -> Result<Vec<Vec<CellResult>>, Error> {
            self.calls.lock().unwrap().push((rows.clone(), columns.to_vec()));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_range {
                return Err(Error::fetch("backend down"));
            }
            Ok(rows
                .map(|row| {
                    columns
                        .iter()
                        .enumerate()
                        .map(|(i, column)| {
                            if self.fail_cell.as_ref() == Some(&(row, column.clone())) {
                                Err(Error::fetch("bad cell"))
                            } else {
                                Ok(Value::from((row * 10 + i) as i64))
                            }
                        })
                        .collect()
                })
                .collect())
        }
    }

    fn frame(loader: Numbers) -> LoaderFrame<Numbers> {
        LoaderFrame::new(["a", "b"], 100, loader).unwrap()
    }

    #[tokio::test]
    async fn test_cells_resolve_after_fetch() {
        let frame = frame(Numbers::default());
        let none = OrderBy::none();
        assert_eq!(frame.get_cell(3, "b", &none), Ok(None));

        frame.fetch(FetchRequest::new(2..5)).await.unwrap();
        assert_eq!(frame.get_cell(3, "b", &none), Ok(Some(ValueBox::new(Value::from(31i64)))));
        assert_eq!(frame.get_row_number(4, &none), Ok(Some(ValueBox::new(4))));
        assert_eq!(frame.get_cell(5, "a", &none), Ok(None));
    }

    #[tokio::test]
    async fn test_only_missing_rows_are_loaded() {
        let frame = frame(Numbers::default());
        frame.fetch(FetchRequest::new(2..4)).await.unwrap();
        frame.fetch(FetchRequest::new(6..8)).await.unwrap();
        frame.fetch(FetchRequest::new(0..10)).await.unwrap();

        let calls = frame.loader().calls.lock().unwrap();
        let ranges: Vec<Range<usize>> = calls.iter().map(|(r, _)| r.clone()).collect();
        assert_eq!(ranges, vec![2..4, 6..8, 0..2, 4..6, 8..10]);
    }

    #[tokio::test]
    async fn test_partial_cell_failure() {
        let frame = frame(Numbers {
            fail_cell: Some((1, "a".to_string())),
            ..Default::default()
        });
        frame.fetch(FetchRequest::new(0..2)).await.unwrap();

        let none = OrderBy::none();
        assert_eq!(frame.get_cell(1, "a", &none), Err(Error::fetch("bad cell")));
        assert_eq!(frame.get_cell(1, "b", &none), Ok(Some(ValueBox::new(Value::from(11i64)))));
        assert!(frame.get_cell(0, "a", &none).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_range_stays_retryable() {
        let frame = frame(Numbers {
            fail_range: true,
            ..Default::default()
        });
        let none = OrderBy::none();
        assert_eq!(
            frame.fetch(FetchRequest::new(0..2)).await,
            Err(Error::fetch("backend down"))
        );
        assert_eq!(frame.get_cell(0, "a", &none), Ok(None));

        frame.fetch(FetchRequest::new(0..2)).await.unwrap_err();
        assert_eq!(frame.loader().calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_mid_flight_keeps_nothing_and_allows_refetch() {
        let gate = Arc::new(Notify::new());
        let frame = Arc::new(frame(Numbers {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        }));

        let token = CancellationToken::new();
        let stale = {
            let frame = Arc::clone(&frame);
            let request = FetchRequest::new(0..3).with_cancel(token.clone());
            tokio::spawn(async move { frame.fetch(request).await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        assert_eq!(stale.await.unwrap(), Err(Error::Cancelled));
        assert_eq!(frame.get_cell(0, "a", &OrderBy::none()), Ok(None));

        // A later release of the gate must not leak the stale load.
        gate.notify_waiters();
        tokio::task::yield_now().await;
        assert_eq!(frame.get_cell(0, "a", &OrderBy::none()), Ok(None));

        let fresh = {
            let frame = Arc::clone(&frame);
            tokio::spawn(async move { frame.fetch(FetchRequest::new(0..3)).await })
        };
        tokio::task::yield_now().await;
        gate.notify_one();
        fresh.await.unwrap().unwrap();
        assert!(frame.get_cell(2, "b", &OrderBy::none()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dropped_fetch_releases_its_cells() {
        let gate = Arc::new(Notify::new());
        let frame = frame(Numbers {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });

        let dropped = tokio::time::timeout(Duration::from_millis(10), frame.fetch(FetchRequest::new(0..3))).await;
        assert!(dropped.is_err());
        assert!(frame.row(1).is_some_and(|row| row.cell("a").is_none()));

        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(5), frame.fetch(FetchRequest::new(0..3)))
            .await
            .expect("refetch must not wait on the dropped load")
            .unwrap();
        assert_eq!(frame.loader().calls.lock().unwrap().len(), 2);
        assert_eq!(
            frame.get_cell(2, "b", &OrderBy::none()),
            Ok(Some(ValueBox::new(Value::from(21i64))))
        );
    }

    #[tokio::test]
    async fn test_duplicate_requests_share_one_load() {
        let gate = Arc::new(Notify::new());
        let frame = Arc::new(frame(Numbers {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        }));

        let first = {
            let frame = Arc::clone(&frame);
            tokio::spawn(async move { frame.fetch(FetchRequest::new(0..4)).await })
        };
        let second = {
            let frame = Arc::clone(&frame);
            tokio::spawn(async move { frame.fetch(FetchRequest::new(1..3)).await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        gate.notify_one();

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(frame.loader().calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_set_num_rows_validates_reads() {
        let frame = frame(Numbers::default());
        frame.set_num_rows(2);
        assert!(frame.get_cell(2, "a", &OrderBy::none()).unwrap_err().is_validation());
    }
}
