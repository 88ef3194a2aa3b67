//! Sorting wrapper for frames that cannot sort

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::coalesce::coalesce;
use crate::error::Error;
use crate::error::ValidationError;
use crate::frame::DataFrame;
use crate::frame::EventBus;
use crate::frame::EventKind;
use crate::frame::FetchRequest;
use crate::frame::FrameEvent;
use crate::frame::Subscription;
use crate::frame::forward;
use crate::frame::validate_fetch;
use crate::frame::validate_get_cell;
use crate::frame::validate_get_row_number;
use crate::model::Columns;
use crate::model::OrderBy;
use crate::model::Value;
use crate::model::ValueBox;

use super::compute_ranks_by;
use super::materialized_order;
use super::sort_indexes;

#[derive(Debug, Default)]
struct SortState {
    /// Bumped whenever the inner row count changes.
    generation: u64,
    ranks: HashMap<String, Arc<Vec<usize>>>,
    permutations: HashMap<OrderBy, Arc<Vec<usize>>>,
}

impl SortState {
    fn invalidate(&mut self) {
        self.generation += 1;
        self.ranks.clear();
        self.permutations.clear();
    }
}

/// Adds sorting to a frame that only serves its natural order.
///
/// For a sorted fetch the wrapper first computes the permutation of the
/// order: each sorted column is fetched over the whole frame and ranked
/// once, and the rank vectors are composed with [`sort_indexes`]. The
/// displayed window is then mapped to inner rows, which are fetched as
/// coalesced ranges in natural order. Reads map displayed rows through the
/// cached permutation.
///
/// Inner frames that cannot fetch single columns are sorted by
/// materializing every row instead.
///
/// Rank vectors are kept per column and permutations per order. Both are
/// discarded when the inner row count changes.
///
/// # Example
///
/// ```
/// use lazygrid_lib::frame::{DataFrame, FetchRequest, InMemoryFrame};
/// use lazygrid_lib::model::{OrderBy, Value};
/// use lazygrid_lib::sort::SortableFrame;
///
/// # tokio_test_block(async {
/// let base = InMemoryFrame::new(
///     ["age"],
///     vec![vec![Value::from(25)], vec![Value::from(30)], vec![Value::from(20)]],
/// )?;
/// let frame = SortableFrame::new(base);
/// let order = OrderBy::desc("age");
///
/// frame.fetch(FetchRequest::new(0..3).with_order_by(order.clone())).await?;
/// assert_eq!(frame.get_row_number(0, &order)?.map(|b| b.value), Some(1));
/// # Ok::<(), lazygrid_lib::error::Error>(())
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct SortableFrame<F> {
    inner: F,
    state: Arc<Mutex<SortState>>,
    events: EventBus,
    _subscriptions: Vec<Subscription>,
}

impl<F: DataFrame> SortableFrame<F> {
    /// Wraps a frame.
    pub fn new(inner: F) -> Self {
        let state = Arc::new(Mutex::new(SortState::default()));
        let events = EventBus::new();

        // Registered before forwarding so listeners of this frame never see
        // the new row count with the old permutations.
        let invalidation = {
            let state = Arc::clone(&state);
            inner.events().subscribe(EventKind::NumRowsChange, move |event| {
                if let FrameEvent::NumRowsChange { num_rows } = event {
                    log::debug!("Row count changed to {}; dropping sort caches", num_rows);
                }
                state.lock().unwrap_or_else(PoisonError::into_inner).invalidate();
            })
        };
        let mut subscriptions = vec![invalidation];
        subscriptions.extend(forward(inner.events(), &events));

        Self {
            inner,
            state,
            events,
            _subscriptions: subscriptions,
        }
    }

    /// Returns the wrapped frame.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// The cached permutation of an order, if computed.
    ///
    /// Maps sorted position to inner row.
    pub fn permutation(&self, order_by: &OrderBy) -> Option<Arc<Vec<usize>>> {
        self.lock().permutations.get(order_by).cloned()
    }

    /// The cached rank vector of a column, if computed.
    pub fn ranks(&self, column: &str) -> Option<Arc<Vec<usize>>> {
        self.lock().ranks.get(column).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SortState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maps a displayed row to its inner row.
    fn inner_row(&self, row: usize, order_by: &OrderBy) -> Option<usize> {
        if order_by.is_empty() {
            return Some(row);
        }
        self.lock()
            .permutations
            .get(order_by)
            .and_then(|permutation| permutation.get(row).copied())
    }

    /// Reads a fetched column in natural order.
    ///
    /// Cells that are unreadable, because they failed to load, sort as
    /// `Null`.
    fn column_values(&self, column: &str, num_rows: usize) -> Result<Vec<Value>, Error> {
        let natural = OrderBy::none();
        let mut values = Vec::with_capacity(num_rows);
        let mut unreadable = 0usize;
        for row in 0..num_rows {
            match self.inner.get_cell(row, column, &natural) {
                Ok(Some(boxed)) => values.push(boxed.value),
                Ok(None) | Err(Error::Fetch(_)) => {
                    unreadable += 1;
                    values.push(Value::Null);
                }
                Err(error) => return Err(error),
            }
        }
        if unreadable > 0 {
            log::debug!("Column '{}': {} unreadable cells sort as null", column, unreadable);
        }
        Ok(values)
    }

    async fn column_ranks(
        &self,
        column: &str,
        num_rows: usize,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<usize>>, Error> {
        if let Some(ranks) = self.ranks(column) {
            return Ok(ranks);
        }

        let request = FetchRequest::new(0..num_rows)
            .with_columns([column])
            .with_cancel(cancel.clone());
        self.inner.fetch(request).await?;

        let values = self.column_values(column, num_rows)?;
        let ranks = Arc::new(compute_ranks_by(&values, Value::compare));
        log::debug!("Ranked column '{}' over {} rows", column, num_rows);

        let mut state = self.lock();
        if state.generation == generation {
            state.ranks.insert(column.to_string(), Arc::clone(&ranks));
        }
        Ok(ranks)
    }

    async fn materialize(
        &self,
        order_by: &OrderBy,
        num_rows: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<usize>, Error> {
        log::debug!("Materializing {} rows to sort by '{}'", num_rows, order_by);
        self.inner
            .fetch(FetchRequest::new(0..num_rows).with_cancel(cancel.clone()))
            .await?;

        let keys: Vec<Vec<Value>> = order_by
            .columns()
            .map(|column| self.column_values(column, num_rows))
            .collect::<Result<_, _>>()?;
        let rows: Vec<Vec<Value>> = (0..num_rows)
            .map(|row| keys.iter().map(|column| column[row].clone()).collect())
            .collect();
        let positions: Vec<_> = order_by
            .clauses()
            .iter()
            .enumerate()
            .map(|(position, clause)| (position, clause.direction))
            .collect();
        Ok(materialized_order(&rows, &positions))
    }

    /// Returns the permutation of an order, computing it if needed.
    ///
    /// `None` means the row count changed while computing; the result was
    /// dropped and the caller should start over.
    async fn compute_permutation(
        &self,
        order_by: &OrderBy,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<Vec<usize>>>, Error> {
        let generation = {
            let state = self.lock();
            if let Some(permutation) = state.permutations.get(order_by) {
                return Ok(Some(Arc::clone(permutation)));
            }
            state.generation
        };
        let num_rows = self.inner.num_rows();

        let permutation = if self.inner.supports_column_subsets() {
            let mut ranks = Vec::with_capacity(order_by.clauses().len());
            for clause in order_by.clauses() {
                let column = self.column_ranks(&clause.column, num_rows, generation, cancel).await?;
                ranks.push((column, clause.direction));
            }
            let borrowed: Vec<(&[usize], _)> = ranks
                .iter()
                .map(|(column, direction)| (column.as_slice(), *direction))
                .collect();
            sort_indexes(&borrowed, num_rows)
        } else {
            self.materialize(order_by, num_rows, cancel).await?
        };

        let mut state = self.lock();
        if state.generation != generation {
            return Ok(None);
        }
        let permutation = Arc::new(permutation);
        state
            .permutations
            .insert(order_by.clone(), Arc::clone(&permutation));
        Ok(Some(permutation))
    }
}

#[async_trait]
impl<F: DataFrame> DataFrame for SortableFrame<F> {
    fn columns(&self) -> &Columns {
        self.inner.columns()
    }

    fn num_rows(&self) -> usize {
        self.inner.num_rows()
    }

    fn sortable(&self) -> bool {
        true
    }

    fn supports_column_subsets(&self) -> bool {
        self.inner.supports_column_subsets()
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn get_row_number(&self, row: usize, order_by: &OrderBy) -> Result<Option<ValueBox<usize>>, Error> {
        validate_get_row_number(self, row, order_by)?;
        match self.inner_row(row, order_by) {
            Some(inner_row) => self.inner.get_row_number(inner_row, &OrderBy::none()),
            None => Ok(None),
        }
    }

    fn get_cell(&self, row: usize, column: &str, order_by: &OrderBy) -> Result<Option<ValueBox<Value>>, Error> {
        validate_get_cell(self, row, column, order_by)?;
        match self.inner_row(row, order_by) {
            Some(inner_row) => self.inner.get_cell(inner_row, column, &OrderBy::none()),
            None => Ok(None),
        }
    }

    async fn fetch(&self, request: FetchRequest) -> Result<(), Error> {
        validate_fetch(self, &request)?;
        request.check_cancelled()?;
        if request.order_by.is_empty() {
            return self.inner.fetch(request).await;
        }

        let permutation = loop {
            if let Some(permutation) = self.compute_permutation(&request.order_by, &request.cancel).await? {
                break permutation;
            }
            log::debug!("Row count changed while sorting by '{}'; retrying", request.order_by);
            request.check_cancelled()?;
            validate_fetch(self, &request)?;
        };

        let mut inner_rows: Vec<usize> = permutation
            .get(request.rows.clone())
            .ok_or(ValidationError::InvalidRange {
                start: request.rows.start,
                end: request.rows.end,
                num_rows: permutation.len(),
            })?
            .to_vec();
        inner_rows.sort_unstable();

        // Frames without column subsets are always asked for whole rows.
        let columns = if self.inner.supports_column_subsets() {
            request.columns.clone()
        } else {
            None
        };
        try_join_all(coalesce(inner_rows).into_iter().map(|rows| {
            let mut inner_request = FetchRequest::new(rows).with_cancel(request.cancel.clone());
            inner_request.columns = columns.clone();
            self.inner.fetch(inner_request)
        }))
        .await?;

        self.events.emit(&FrameEvent::Resolve);
        Ok(())
    }
}

impl<F> std::fmt::Debug for SortableFrame<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortableFrame").finish_non_exhaustive()
    }
}
