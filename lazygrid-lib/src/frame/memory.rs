//! In-memory data frame

use std::sync::PoisonError;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Error;
use crate::error::ValidationError;
use crate::model::Columns;
use crate::model::OrderBy;
use crate::model::Value;
use crate::model::ValueBox;

use super::DataFrame;
use super::EventBus;
use super::FrameEvent;
use super::validate_get_cell;
use super::validate_get_row_number;

/// A static frame whose rows all live in memory.
///
/// Every cell is readable immediately, so [`fetch`](DataFrame::fetch) only
/// validates. It does not sort; wrap it in a
/// [`SortableFrame`](crate::sort::SortableFrame) for that.
///
/// # Example
///
/// ```
/// use lazygrid_lib::frame::{DataFrame, InMemoryFrame};
/// use lazygrid_lib::model::{OrderBy, Value};
///
/// let frame = InMemoryFrame::new(
///     ["name", "age"],
///     vec![
///         vec![Value::from("Ada"), Value::from(36i64)],
///         vec![Value::from("Alan"), Value::Null],
///     ],
/// )?;
///
/// let age = frame.get_cell(1, "age", &OrderBy::none())?;
/// assert_eq!(age.map(|b| b.value), Some(Value::Null));
/// # Ok::<(), lazygrid_lib::error::Error>(())
/// ```
#[derive(Debug)]
pub struct InMemoryFrame {
    columns: Columns,
    rows: RwLock<Vec<Vec<Value>>>,
    events: EventBus,
}

impl InMemoryFrame {
    /// Creates a frame from a header and row-major values.
    ///
    /// Rows shorter than the header are padded with `Null`; longer rows
    /// are truncated.
    pub fn new<I, C>(columns: I, rows: Vec<Vec<Value>>) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = C>,
        C: Into<crate::model::ColumnDescriptor>,
    {
        let columns = Columns::new(columns)?;
        let width = columns.len();
        let rows = rows.into_iter().map(|row| fit_row(row, width)).collect();
        Ok(Self {
            columns,
            rows: RwLock::new(rows),
            events: EventBus::new(),
        })
    }

    /// Appends rows and announces the new row count.
    pub fn append_rows(&self, rows: Vec<Vec<Value>>) {
        let width = self.columns.len();
        let num_rows = {
            let mut guard = self.rows.write().unwrap_or_else(PoisonError::into_inner);
            guard.extend(rows.into_iter().map(|row| fit_row(row, width)));
            guard.len()
        };
        self.events.emit(&FrameEvent::NumRowsChange { num_rows });
    }
}

fn fit_row(mut row: Vec<Value>, width: usize) -> Vec<Value> {
    row.resize(width, Value::Null);
    row
}

#[async_trait]
impl DataFrame for InMemoryFrame {
    fn columns(&self) -> &Columns {
        &self.columns
    }

    fn num_rows(&self) -> usize {
        self.rows
            .read()
            .map(|g| g.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn get_row_number(&self, row: usize, order_by: &OrderBy) -> Result<Option<ValueBox<usize>>, Error> {
        validate_get_row_number(self, row, order_by)?;
        Ok(Some(ValueBox::new(row)))
    }

    fn get_cell(&self, row: usize, column: &str, order_by: &OrderBy) -> Result<Option<ValueBox<Value>>, Error> {
        validate_get_cell(self, row, column, order_by)?;
        let position = self
            .columns
            .position(column)
            .ok_or_else(|| ValidationError::unknown_column(column))?;
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .get(row)
            .and_then(|values| values.get(position))
            .cloned()
            .map(ValueBox::new))
    }
}
