//! Validation error types

/// A call was rejected because its arguments do not fit the data frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A row index outside `0..num_rows`.
    #[error("Row {row} out of range (num_rows: {num_rows})")]
    RowOutOfRange { row: usize, num_rows: usize },

    /// A row range that is reversed or runs past the end of the frame.
    #[error("Invalid row range {start}..{end} (num_rows: {num_rows})")]
    InvalidRange {
        start: usize,
        end: usize,
        num_rows: usize,
    },

    /// A column that is not part of the frame's header.
    #[error("Unknown column '{column}'")]
    UnknownColumn { column: String },

    /// The same column name appears twice in a header.
    #[error("Duplicate column '{column}'")]
    DuplicateColumn { column: String },

    /// An order-by clause names a column that cannot be sorted.
    #[error("Column '{column}' is not sortable")]
    UnsortableColumn { column: String },

    /// A non-empty order-by was passed to a frame that cannot sort.
    #[error("Data frame does not support sorting")]
    SortingUnsupported,
}

impl ValidationError {
    /// Creates a new unknown column error.
    pub fn unknown_column(column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            column: column.into(),
        }
    }

    /// Creates a new unsortable column error.
    pub fn unsortable_column(column: impl Into<String>) -> Self {
        Self::UnsortableColumn {
            column: column.into(),
        }
    }
}
