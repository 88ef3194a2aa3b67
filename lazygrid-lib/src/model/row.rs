//! Lazily resolved rows

use std::collections::HashMap;

use super::AsyncValue;
use super::Value;

/// One row of a lazily loaded source.
///
/// The row number and every cell resolve independently, so a failure in one
/// cell leaves its siblings untouched.
#[derive(Debug, Clone)]
pub struct Row {
    /// Position of the row in the source's natural order (excludes header).
    pub index: usize,
    /// Underlying row number, resolved once any cell of the row arrives.
    pub number: AsyncValue<usize>,
    /// Cells that have been requested so far, by column name.
    pub cells: HashMap<String, AsyncValue<Value>>,
}

impl Row {
    /// Creates a row with nothing requested yet.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            number: AsyncValue::pending(),
            cells: HashMap::new(),
        }
    }

    /// Returns the cell for a column, if it has been requested.
    pub fn cell(&self, column: &str) -> Option<&AsyncValue<Value>> {
        self.cells.get(column)
    }
}
