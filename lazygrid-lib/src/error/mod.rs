//! Error types

mod validation;
mod viewport;

pub use validation::*;
pub use viewport::*;

/// Errors surfaced by data frames and the wrappers built on them.
///
/// Errors are cheap to clone: a failure that settles an [`AsyncValue`]
/// is handed to every reader of that value.
///
/// [`AsyncValue`]: crate::model::AsyncValue
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The call was rejected at the boundary, before any I/O.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The viewport could not be mapped to a row window.
    #[error(transparent)]
    Viewport(#[from] ViewportError),

    /// The fetch was cancelled, either before it started or while in flight.
    #[error("Fetch cancelled")]
    Cancelled,

    /// The underlying source failed to produce the requested data.
    #[error("Fetch failed: {0}")]
    Fetch(String),
}

impl Error {
    /// Creates a new fetch failure.
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch(message.into())
    }

    /// Returns `true` if the error means "superseded, ignore".
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if the call was rejected before any I/O happened.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Viewport(_))
    }

    /// Returns `true` if a later fetch of the same range may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Cancelled)
    }
}
