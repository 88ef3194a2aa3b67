//! Ordering types for sorted reads and fetches.

/// Sort direction for ordering rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending order (A-Z, 0-9).
    Asc,
    /// Descending order (Z-A, 9-0).
    Desc,
}

impl Direction {
    /// Returns the opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    /// Applies this direction to an ascending comparison.
    pub fn apply(self, ordering: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

/// One column of an order-by list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortClause {
    /// The column to sort by.
    pub column: String,
    /// The direction.
    pub direction: Direction,
}

/// Specifies the ordering of rows.
///
/// Earlier clauses take priority. An empty list is the source's natural
/// order. `OrderBy` is `Hash + Eq` and is used directly as a cache key.
///
/// # Example
///
/// ```
/// use lazygrid_lib::model::OrderBy;
///
/// // Single column ordering
/// let order = OrderBy::desc("revenue");
///
/// // Multiple column ordering
/// let order = OrderBy::desc("revenue").then_asc("name");
/// assert_eq!(order.to_string(), "revenue desc,name asc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct OrderBy {
    clauses: Vec<SortClause>,
}

impl OrderBy {
    /// The natural order of the source.
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates an ascending order on a column.
    pub fn asc(column: impl Into<String>) -> Self {
        Self::none().then_asc(column)
    }

    /// Creates a descending order on a column.
    pub fn desc(column: impl Into<String>) -> Self {
        Self::none().then_desc(column)
    }

    /// Adds a secondary ascending order on a column.
    pub fn then_asc(self, column: impl Into<String>) -> Self {
        self.then(column, Direction::Asc)
    }

    /// Adds a secondary descending order on a column.
    pub fn then_desc(self, column: impl Into<String>) -> Self {
        self.then(column, Direction::Desc)
    }

    /// Adds a secondary order on a column.
    pub fn then(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.clauses.push(SortClause {
            column: column.into(),
            direction,
        });
        self
    }

    /// Returns the clauses in priority order.
    pub fn clauses(&self) -> &[SortClause] {
        &self.clauses
    }

    /// Returns the sorted columns in priority order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|c| c.column.as_str())
    }

    /// Returns `true` for the natural order.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Header-click toggle.
    ///
    /// A column that is not the primary sort becomes the primary sort,
    /// ascending. The primary column flips to descending, and a descending
    /// primary column is removed. Other clauses keep their relative order.
    pub fn toggle(&self, column: &str) -> Self {
        let existing = self.clauses.iter().position(|c| c.column == column);
        let mut clauses: Vec<SortClause> = self
            .clauses
            .iter()
            .filter(|c| c.column != column)
            .cloned()
            .collect();

        let direction = match existing {
            Some(0) => match self.clauses.first().map(|c| c.direction) {
                Some(Direction::Asc) => Some(Direction::Desc),
                _ => None,
            },
            _ => Some(Direction::Asc),
        };
        if let Some(direction) = direction {
            clauses.insert(
                0,
                SortClause {
                    column: column.to_string(),
                    direction,
                },
            );
        }
        Self { clauses }
    }
}

impl std::fmt::Display for OrderBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let dir = match clause.direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            write!(f, "{} {}", clause.column, dir)?;
        }
        Ok(())
    }
}
