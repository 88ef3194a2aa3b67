//! Data model: values, headers, orderings and lazily resolved rows.

mod async_value;
mod column;
mod order;
mod row;
mod value;
mod value_box;

pub use async_value::AsyncValue;
pub use async_value::Settlement;
pub use column::ColumnDescriptor;
pub use column::Columns;
pub use order::Direction;
pub use order::OrderBy;
pub use order::SortClause;
pub use row::Row;
pub use value::Value;
pub use value_box::ValueBox;
