//! Column descriptors and validated headers

use std::collections::HashMap;

use crate::error::ValidationError;

/// Describes one column of a data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name, unique within the frame.
    pub name: String,
    /// Whether the column may appear in an order-by list.
    pub sortable: bool,
}

impl ColumnDescriptor {
    /// Creates a sortable column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sortable: true,
        }
    }

    /// Sets whether the column is sortable.
    pub fn with_sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }
}

impl From<&str> for ColumnDescriptor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ColumnDescriptor {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// The ordered, duplicate-free header of a data frame.
///
/// Uniqueness is checked once here; lookups afterwards are O(1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    descriptors: Vec<ColumnDescriptor>,
    positions: HashMap<String, usize>,
}

impl Columns {
    /// Builds a header, rejecting duplicate names.
    pub fn new<I, C>(descriptors: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = C>,
        C: Into<ColumnDescriptor>,
    {
        let descriptors: Vec<ColumnDescriptor> = descriptors.into_iter().map(Into::into).collect();
        let mut positions = HashMap::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            if positions.insert(descriptor.name.clone(), index).is_some() {
                return Err(ValidationError::DuplicateColumn {
                    column: descriptor.name.clone(),
                });
            }
        }
        Ok(Self {
            descriptors,
            positions,
        })
    }

    /// Returns the column descriptors in header order.
    pub fn descriptors(&self) -> &[ColumnDescriptor] {
        &self.descriptors
    }

    /// Returns the column names in header order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    /// Returns the column names as owned strings.
    pub fn to_names(&self) -> Vec<String> {
        self.names().map(str::to_string).collect()
    }

    /// Returns the position of a column in the header.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Returns the descriptor of a column.
    pub fn get(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.position(name).and_then(|i| self.descriptors.get(i))
    }

    /// Returns `true` if the header contains the column.
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
