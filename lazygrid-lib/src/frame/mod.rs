//! The data frame contract.
//!
//! A [`DataFrame`] exposes a fixed header, a row count, synchronous
//! best-effort readers and an asynchronous [`fetch`](DataFrame::fetch) that
//! makes a window of cells readable. Readers never do I/O: they return
//! `Ok(None)` until a fetch has settled the requested cells.
//!
//! Wrappers stack on top of a base frame:
//!
//! - [`CachedFrame`](crate::cache::CachedFrame) memoizes fetched row ranges.
//! - [`SortableFrame`](crate::sort::SortableFrame) adds sorting to frames
//!   that cannot sort by themselves.

mod events;
mod loader;
mod memory;

pub use events::*;
pub use loader::*;
pub use memory::*;

use std::ops::Range;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::error::ValidationError;
use crate::model::Columns;
use crate::model::OrderBy;
use crate::model::Value;
use crate::model::ValueBox;

/// A request to make a window of cells readable.
///
/// # Example
///
/// ```
/// use lazygrid_lib::frame::FetchRequest;
/// use lazygrid_lib::model::OrderBy;
/// use tokio_util::sync::CancellationToken;
///
/// let token = CancellationToken::new();
/// let request = FetchRequest::new(0..50)
///     .with_columns(["name", "age"])
///     .with_order_by(OrderBy::desc("age"))
///     .with_cancel(token.clone());
/// ```
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Half-open row range, in the order given by `order_by`.
    pub rows: Range<usize>,
    /// Columns to fetch. `None` means every column.
    pub columns: Option<Vec<String>>,
    /// Order the row range refers to.
    pub order_by: OrderBy,
    /// Cancelled when the request is superseded.
    pub cancel: CancellationToken,
}

impl FetchRequest {
    /// Creates a request for all columns in natural order.
    pub fn new(rows: Range<usize>) -> Self {
        Self {
            rows,
            columns: None,
            order_by: OrderBy::none(),
            cancel: CancellationToken::new(),
        }
    }

    /// Restricts the request to some columns.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the order the row range refers to.
    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    /// Sets the cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the requested columns, expanding `None` to the full header.
    pub fn column_names(&self, columns: &Columns) -> Vec<String> {
        match &self.columns {
            Some(names) => names.clone(),
            None => columns.to_names(),
        }
    }

    /// Fails with [`Error::Cancelled`] if the token is already cancelled.
    pub fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// An unbounded, possibly remote, possibly sortable tabular source.
///
/// # Contract
///
/// - The header never changes for the lifetime of the frame.
/// - The row count may change; the frame then emits
///   [`FrameEvent::NumRowsChange`].
/// - Every reader validates its arguments and fails with a
///   [`ValidationError`] on bad input.
/// - A value, once readable for a `(row, column, order_by)` triple, stays
///   readable.
/// - `fetch` validates before any I/O, fails immediately on a cancelled
///   token, and emits [`FrameEvent::Resolve`] on success.
#[async_trait]
pub trait DataFrame: Send + Sync {
    /// The header.
    fn columns(&self) -> &Columns;

    /// Current number of rows.
    fn num_rows(&self) -> usize;

    /// Whether this frame can honour a non-empty order-by itself.
    fn sortable(&self) -> bool {
        false
    }

    /// Whether [`fetch`](Self::fetch) can load a subset of columns without
    /// loading whole rows.
    fn supports_column_subsets(&self) -> bool {
        true
    }

    /// Change notifications.
    fn events(&self) -> &EventBus;

    /// The underlying row number of a displayed row.
    ///
    /// Returns `Ok(None)` while the mapping is unknown, for instance before
    /// the sort permutation has been computed.
    fn get_row_number(&self, row: usize, order_by: &OrderBy) -> Result<Option<ValueBox<usize>>, Error>;

    /// The value of one cell, if already fetched. Never does I/O.
    fn get_cell(&self, row: usize, column: &str, order_by: &OrderBy) -> Result<Option<ValueBox<Value>>, Error>;

    /// Makes the requested cells readable.
    ///
    /// The default is for static frames where everything is readable up
    /// front.
    async fn fetch(&self, request: FetchRequest) -> Result<(), Error> {
        validate_fetch(self, &request)?;
        request.check_cancelled()?;
        Ok(())
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Checks `0 <= row < num_rows`.
pub fn validate_row(row: usize, num_rows: usize) -> Result<(), ValidationError> {
    if row < num_rows {
        Ok(())
    } else {
        Err(ValidationError::RowOutOfRange { row, num_rows })
    }
}

/// Checks `start <= end <= num_rows`.
pub fn validate_range(rows: &Range<usize>, num_rows: usize) -> Result<(), ValidationError> {
    if rows.start <= rows.end && rows.end <= num_rows {
        Ok(())
    } else {
        Err(ValidationError::InvalidRange {
            start: rows.start,
            end: rows.end,
            num_rows,
        })
    }
}

/// Checks that the header contains the column.
pub fn validate_column(column: &str, columns: &Columns) -> Result<(), ValidationError> {
    if columns.contains(column) {
        Ok(())
    } else {
        Err(ValidationError::unknown_column(column))
    }
}

/// Checks that every order-by column exists and is sortable.
///
/// Does not check whether the frame itself can sort; see
/// [`validate_frame_order_by`].
pub fn validate_order_by(order_by: &OrderBy, columns: &Columns) -> Result<(), ValidationError> {
    for column in order_by.columns() {
        match columns.get(column) {
            None => return Err(ValidationError::unknown_column(column)),
            Some(descriptor) if !descriptor.sortable => {
                return Err(ValidationError::unsortable_column(column));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Checks an order-by against a frame, including whether the frame sorts.
pub fn validate_frame_order_by<F>(frame: &F, order_by: &OrderBy) -> Result<(), ValidationError>
where
    F: DataFrame + ?Sized,
{
    if order_by.is_empty() {
        return Ok(());
    }
    if !frame.sortable() {
        return Err(ValidationError::SortingUnsupported);
    }
    validate_order_by(order_by, frame.columns())
}

/// Validates a `get_row_number` call.
pub fn validate_get_row_number<F>(frame: &F, row: usize, order_by: &OrderBy) -> Result<(), ValidationError>
where
    F: DataFrame + ?Sized,
{
    validate_row(row, frame.num_rows())?;
    validate_frame_order_by(frame, order_by)
}

/// Validates a `get_cell` call.
pub fn validate_get_cell<F>(
    frame: &F,
    row: usize,
    column: &str,
    order_by: &OrderBy,
) -> Result<(), ValidationError>
where
    F: DataFrame + ?Sized,
{
    validate_row(row, frame.num_rows())?;
    validate_column(column, frame.columns())?;
    validate_frame_order_by(frame, order_by)
}

/// Validates a `fetch` call.
pub fn validate_fetch<F>(frame: &F, request: &FetchRequest) -> Result<(), ValidationError>
where
    F: DataFrame + ?Sized,
{
    validate_range(&request.rows, frame.num_rows())?;
    if let Some(columns) = &request.columns {
        for column in columns {
            validate_column(column, frame.columns())?;
        }
    }
    validate_frame_order_by(frame, &request.order_by)
}
