//! Viewport mapping error types

/// The viewport geometry cannot be turned into a row window.
///
/// These point at a misconfigured container (for instance one that is not
/// height-constrained), never at the data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewportError {
    /// Header plus rows occupy no space, so no scroll ratio exists.
    #[error("Scrollable extent must be positive, got {extent}")]
    EmptyExtent { extent: f64 },

    /// The scroll position or viewport size produced a non-finite bound.
    #[error("Non-finite row window (start: {start}, end: {end})")]
    NonFinite { start: f64, end: f64 },

    /// The viewport shows far more rows than any real screen could.
    #[error("Visible span of {span} rows exceeds the limit of {limit}")]
    SpanTooLarge { span: usize, limit: usize },
}
