//! Viewport to fetch-window mapping
//!
//! The table renders a fixed header followed by `num_rows` rows of equal
//! height inside a scrolling container. [`ViewportConfig::window`] turns the
//! container's scroll position into the rows that are visible and the wider
//! window that should be fetched. [`WindowFetcher`] keeps one fetch session
//! per window on top of that.

mod session;

pub use session::*;

use std::ops::Range;

use crate::error::ViewportError;

/// Geometry of the scrolling table.
///
/// # Example
///
/// ```
/// use lazygrid_lib::viewport::ViewportConfig;
///
/// let config = ViewportConfig::default().with_overscan(10);
/// let window = config.window(100, 0.0, 500.0)?;
/// assert_eq!(window.visible, 0..16);
/// assert_eq!(window.fetch, 0..26);
/// # Ok::<(), lazygrid_lib::error::ViewportError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportConfig {
    /// Height of one row in pixels.
    ///
    /// Default: 33
    pub row_height: f64,

    /// Height of the header in pixels.
    ///
    /// Default: 33
    pub header_height: f64,

    /// Rows fetched beyond each end of the visible window.
    ///
    /// Default: 20
    pub overscan: usize,

    /// Largest visible span accepted, in rows.
    ///
    /// Default: 1000
    pub max_span: usize,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            row_height: 33.0,
            header_height: 33.0,
            overscan: 20,
            max_span: 1000,
        }
    }
}

impl ViewportConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the row height.
    pub fn with_row_height(mut self, row_height: f64) -> Self {
        self.row_height = row_height;
        self
    }

    /// Sets the header height.
    pub fn with_header_height(mut self, header_height: f64) -> Self {
        self.header_height = header_height;
        self
    }

    /// Sets the overscan.
    pub fn with_overscan(mut self, overscan: usize) -> Self {
        self.overscan = overscan;
        self
    }

    /// Sets the largest accepted visible span.
    pub fn with_max_span(mut self, max_span: usize) -> Self {
        self.max_span = max_span;
        self
    }

    /// Total scrollable height: header plus every row.
    pub fn scroll_height(&self, num_rows: usize) -> f64 {
        self.header_height + num_rows as f64 * self.row_height
    }

    /// Maps a scroll position to the visible and fetch windows.
    ///
    /// The visible rows are the share of `num_rows` that the viewport's
    /// share of the scroll height covers, rounded outwards and clamped to
    /// `[0, num_rows]`. The fetch window adds `overscan` rows on each side.
    ///
    /// Fails when the scroll height is not positive, a bound is not finite,
    /// or the visible span exceeds `max_span`. The last usually means the
    /// container is not height-constrained.
    pub fn window(&self, num_rows: usize, scroll_top: f64, client_height: f64) -> Result<RowWindow, ViewportError> {
        let extent = self.scroll_height(num_rows);
        if extent.is_nan() || extent <= 0.0 {
            return Err(ViewportError::EmptyExtent { extent });
        }

        let n = num_rows as f64;
        let start = (n * scroll_top / extent).floor();
        let end = (n * (scroll_top + client_height) / extent).ceil();
        if !start.is_finite() || !end.is_finite() {
            return Err(ViewportError::NonFinite { start, end });
        }

        let start = start.clamp(0.0, n) as usize;
        let end = (end.clamp(0.0, n) as usize).max(start);
        let span = end - start;
        if span > self.max_span {
            return Err(ViewportError::SpanTooLarge {
                span,
                limit: self.max_span,
            });
        }

        let fetch = start.saturating_sub(self.overscan)..end.saturating_add(self.overscan).min(num_rows);
        Ok(RowWindow {
            visible: start..end,
            fetch,
        })
    }
}

/// Rows a viewport shows and rows worth fetching for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowWindow {
    /// Rows inside the viewport.
    pub visible: Range<usize>,
    /// Visible rows plus overscan, clamped to the table.
    pub fetch: Range<usize>,
}

impl RowWindow {
    /// Pixel offset of the first fetched row below the header.
    pub fn offset_top(&self, row_height: f64) -> f64 {
        self.fetch.start as f64 * row_height
    }

    /// Returns `true` if no row is visible.
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_at_top() {
        let window = ViewportConfig::default().window(100, 0.0, 500.0).unwrap();
        assert_eq!(window.visible, 0..16);
        assert_eq!(window.fetch, 0..36);
        assert_eq!(window.offset_top(33.0), 0.0);
    }

    #[test]
    fn test_window_scrolled() {
        let config = ViewportConfig::default();
        let window = config.window(100, 500.0, 500.0).unwrap();
        assert_eq!(window.visible, 15..31);
        assert_eq!(window.fetch, 0..51);

        let bottom = config.window(100, config.scroll_height(100) - 500.0, 500.0).unwrap();
        assert_eq!(bottom.visible.end, 100);
        assert_eq!(bottom.fetch.end, 100);
    }

    #[test]
    fn test_window_clamped() {
        let config = ViewportConfig::default().with_overscan(0);
        assert_eq!(config.window(100, -200.0, 100.0).unwrap().visible, 0..0);
        assert_eq!(config.window(100, 10_000.0, 500.0).unwrap().visible, 100..100);
    }

    #[test]
    fn test_span_limit() {
        let config = ViewportConfig::default().with_max_span(50);
        assert_eq!(
            config.window(10_000, 0.0, 1_000_000.0),
            Err(ViewportError::SpanTooLarge { span: 10_000, limit: 50 })
        );
        assert!(config.window(10_000, 0.0, 500.0).is_ok());
    }

    #[test]
    fn test_degenerate_geometry() {
        let flat = ViewportConfig::default().with_header_height(0.0);
        assert_eq!(
            flat.window(0, 0.0, 500.0),
            Err(ViewportError::EmptyExtent { extent: 0.0 })
        );
        assert!(matches!(
            ViewportConfig::default().window(100, f64::NAN, 500.0),
            Err(ViewportError::NonFinite { .. })
        ));
        assert!(matches!(
            ViewportConfig::default().window(100, 0.0, f64::INFINITY),
            Err(ViewportError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_empty_table_has_empty_window() {
        let window = ViewportConfig::default().window(0, 0.0, 500.0).unwrap();
        assert!(window.is_empty());
        assert_eq!(window.fetch, 0..0);
    }
}
