//! Known-value container

/// A value that is known, even when the value itself is empty.
///
/// Readers return `Option<ValueBox<T>>`: `None` means "not known yet",
/// `Some(ValueBox { value: Value::Null })` means "known to be empty".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValueBox<T> {
    /// The resolved value.
    pub value: T,
}

impl<T> ValueBox<T> {
    /// Wraps a resolved value.
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// Returns a reference to the value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Consumes the box and returns the value.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Maps the boxed value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ValueBox<U> {
        ValueBox { value: f(self.value) }
    }
}

impl<T> From<T> for ValueBox<T> {
    fn from(value: T) -> Self {
        Self { value }
    }
}
