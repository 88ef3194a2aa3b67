//! Fetch sessions driven by scrolling

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::frame::DataFrame;
use crate::frame::FetchRequest;
use crate::frame::validate_fetch;
use crate::model::OrderBy;

use super::RowWindow;
use super::ViewportConfig;

/// Receives fetch failures that are not cancellations.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Debug)]
struct Session {
    window: RowWindow,
    order_by: OrderBy,
    token: CancellationToken,
}

/// Keeps the fetched window in step with the viewport.
///
/// Every [`scroll`](Self::scroll) maps the viewport to a fetch window. When
/// the window or the order changed, the previous session's token is
/// cancelled and exactly one new fetch is started on the tokio runtime.
/// Cancellations are expected and only logged; other failures go to the
/// error callback and never to the caller of `scroll`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use lazygrid_lib::frame::InMemoryFrame;
/// use lazygrid_lib::model::Value;
/// use lazygrid_lib::viewport::{ViewportConfig, WindowFetcher};
///
/// # tokio_test_block(async {
/// let rows = (0..500).map(|i| vec![Value::from(i)]).collect();
/// let frame = Arc::new(InMemoryFrame::new(["n"], rows)?);
/// let mut fetcher = WindowFetcher::new(frame, ViewportConfig::default())
///     .on_error(|error| eprintln!("fetch failed: {error}"));
///
/// if let Some(handle) = fetcher.scroll(0.0, 600.0)? {
///     handle.await.ok();
/// }
/// // Same window again: nothing new to fetch.
/// assert!(fetcher.scroll(5.0, 600.0)?.is_none());
/// # Ok::<(), lazygrid_lib::error::Error>(())
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct WindowFetcher {
    frame: Arc<dyn DataFrame>,
    config: ViewportConfig,
    columns: Option<Vec<String>>,
    order_by: OrderBy,
    on_error: Option<ErrorCallback>,
    session: Option<Session>,
}

impl WindowFetcher {
    /// Creates a fetcher for all columns in natural order.
    pub fn new(frame: Arc<dyn DataFrame>, config: ViewportConfig) -> Self {
        Self {
            frame,
            config,
            columns: None,
            order_by: OrderBy::none(),
            on_error: None,
            session: None,
        }
    }

    /// Restricts fetches to some columns.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the initial order.
    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    /// Sets the callback for fetch failures.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// The frame being fetched.
    pub fn frame(&self) -> &Arc<dyn DataFrame> {
        &self.frame
    }

    /// The viewport geometry.
    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    /// The current order.
    pub fn order_by(&self) -> &OrderBy {
        &self.order_by
    }

    /// The window of the current session, if any.
    pub fn window(&self) -> Option<&RowWindow> {
        self.session.as_ref().map(|session| &session.window)
    }

    /// Changes the order.
    ///
    /// The running session is cancelled; the next [`scroll`](Self::scroll)
    /// starts a new one even if the window did not move.
    pub fn set_order_by(&mut self, order_by: OrderBy) {
        if order_by != self.order_by {
            log::debug!("Order changed from '{}' to '{}'", self.order_by, order_by);
            self.order_by = order_by;
            self.cancel();
        }
    }

    /// Cancels the running session, if any.
    pub fn cancel(&mut self) {
        if let Some(session) = self.session.take() {
            session.token.cancel();
        }
    }

    /// Maps the viewport and fetches its window if it changed.
    ///
    /// Returns the handle of the new fetch, or `None` if the current
    /// session already covers this window and order. Geometry and
    /// validation failures are returned before anything is cancelled or
    /// fetched.
    pub fn scroll(&mut self, scroll_top: f64, client_height: f64) -> Result<Option<JoinHandle<()>>, Error> {
        let window = self
            .config
            .window(self.frame.num_rows(), scroll_top, client_height)?;

        if let Some(session) = &self.session
            && session.window.fetch == window.fetch
            && session.order_by == self.order_by
        {
            return Ok(None);
        }

        let token = CancellationToken::new();
        let request = FetchRequest {
            rows: window.fetch.clone(),
            columns: self.columns.clone(),
            order_by: self.order_by.clone(),
            cancel: token.clone(),
        };
        validate_fetch(self.frame.as_ref(), &request)?;

        self.cancel();
        log::debug!(
            "New fetch session: rows {}..{} (visible {}..{}, order: '{}')",
            window.fetch.start,
            window.fetch.end,
            window.visible.start,
            window.visible.end,
            self.order_by
        );
        self.session = Some(Session {
            window: window.clone(),
            order_by: self.order_by.clone(),
            token,
        });

        let frame = Arc::clone(&self.frame);
        let on_error = self.on_error.clone();
        let rows = window.fetch;
        Ok(Some(tokio::spawn(async move {
            match frame.fetch(request).await {
                Ok(()) => log::debug!("Fetched rows {}..{}", rows.start, rows.end),
                Err(Error::Cancelled) => log::debug!("Fetch of rows {}..{} superseded", rows.start, rows.end),
                Err(error) => {
                    log::warn!("Fetch of rows {}..{} failed: {}", rows.start, rows.end, error);
                    if let Some(on_error) = on_error {
                        on_error(&error);
                    }
                }
            }
        })))
    }
}

impl Drop for WindowFetcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for WindowFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowFetcher")
            .field("config", &self.config)
            .field("order_by", &self.order_by)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Range;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::ViewportError;
    use crate::frame::EventBus;
    use crate::frame::InMemoryFrame;
    use crate::model::Columns;
    use crate::model::Value;
    use crate::model::ValueBox;
    use crate::sort::SortableFrame;

    /// Holds every fetch until released and records how it ended.
    struct Gated {
        base: InMemoryFrame,
        gate: Notify,
        fail: bool,
        started: Mutex<Vec<Range<usize>>>,
        finished: Mutex<Vec<(Range<usize>, bool)>>,
    }

    impl Gated {
        fn new(num_rows: usize) -> Self {
            let rows = (0..num_rows).map(|i| vec![Value::from(i as i64)]).collect();
            Self {
                base: InMemoryFrame::new(["n"], rows).unwrap(),
                gate: Notify::new(),
                fail: false,
                started: Mutex::new(Vec::new()),
                finished: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DataFrame for Gated {
        fn columns(&self) -> &Columns {
            self.base.columns()
        }

        fn num_rows(&self) -> usize {
            self.base.num_rows()
        }

        fn events(&self) -> &EventBus {
            self.base.events()
        }

        fn get_row_number(&self, row: usize, order_by: &OrderBy) -> Result<Option<ValueBox<usize>>, Error> {
            self.base.get_row_number(row, order_by)
        }

        fn get_cell(&self, row: usize, column: &str, order_by: &OrderBy) -> Result<Option<ValueBox<Value>>, Error> {
            self.base.get_cell(row, column, order_by)
        }

        async fn fetch(&self, request: FetchRequest) -> Result<(), Error> {
            self.started.lock().unwrap().push(request.rows.clone());
            let completed = tokio::select! {
                _ = self.gate.notified() => true,
                _ = request.cancel.cancelled() => false,
            };
            self.finished
                .lock()
                .unwrap()
                .push((request.rows.clone(), completed));
            if !completed {
                return Err(Error::Cancelled);
            }
            if self.fail {
                return Err(Error::fetch("backend down"));
            }
            Ok(())
        }
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_new_window_cancels_previous_session() {
        let frame = Arc::new(Gated::new(1000));
        let mut fetcher = WindowFetcher::new(frame.clone(), ViewportConfig::default());

        let first = fetcher.scroll(0.0, 500.0).unwrap().unwrap();
        settle().await;
        let second = fetcher.scroll(10_000.0, 500.0).unwrap().unwrap();
        settle().await;
        frame.gate.notify_one();

        first.await.unwrap();
        second.await.unwrap();
        let finished = frame.finished.lock().unwrap().clone();
        assert_eq!(finished.len(), 2);
        assert!(!finished[0].1, "first session should be cancelled");
        assert!(finished[1].1);
        assert_eq!(Some(&finished[1].0), fetcher.window().map(|w| &w.fetch));
    }

    #[tokio::test]
    async fn test_unchanged_window_starts_nothing() {
        let frame = Arc::new(Gated::new(1000));
        let mut fetcher = WindowFetcher::new(frame.clone(), ViewportConfig::default());

        let handle = fetcher.scroll(0.0, 500.0).unwrap();
        assert!(handle.is_some());
        assert!(fetcher.scroll(0.0, 500.0).unwrap().is_none());
        // A one-pixel move maps to the same rows.
        assert!(fetcher.scroll(1.0, 500.0).unwrap().is_none());
        settle().await;
        assert_eq!(frame.started.lock().unwrap().len(), 1);
        fetcher.cancel();
    }

    #[tokio::test]
    async fn test_order_change_restarts_session() {
        let frame = Arc::new(SortableFrame::new(InMemoryFrame::new(
            ["n"],
            (0..100).map(|i| vec![Value::from(i)]).collect(),
        )
        .unwrap()));
        let mut fetcher = WindowFetcher::new(frame.clone(), ViewportConfig::default());

        fetcher.scroll(0.0, 500.0).unwrap().unwrap().await.unwrap();
        assert!(fetcher.scroll(0.0, 500.0).unwrap().is_none());

        fetcher.set_order_by(OrderBy::desc("n"));
        assert!(fetcher.window().is_none());
        fetcher.scroll(0.0, 500.0).unwrap().unwrap().await.unwrap();
        assert_eq!(
            frame.get_cell(0, "n", fetcher.order_by()),
            Ok(Some(ValueBox::new(Value::from(99))))
        );
    }

    #[tokio::test]
    async fn test_failures_go_to_callback() {
        let mut gated = Gated::new(100);
        gated.fail = true;
        let frame = Arc::new(gated);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let mut fetcher = WindowFetcher::new(frame.clone(), ViewportConfig::default())
            .on_error(move |error| sink.lock().unwrap().push(error.clone()));

        let handle = fetcher.scroll(0.0, 500.0).unwrap().unwrap();
        settle().await;
        frame.gate.notify_one();
        handle.await.unwrap();
        assert_eq!(*errors.lock().unwrap(), vec![Error::fetch("backend down")]);

        // Cancellations are not reported.
        let handle = fetcher.scroll(2_000.0, 500.0).unwrap().unwrap();
        settle().await;
        fetcher.cancel();
        handle.await.unwrap();
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_geometry_fetches_nothing() {
        let frame = Arc::new(Gated::new(100_000));
        let mut fetcher = WindowFetcher::new(frame.clone(), ViewportConfig::default());

        let err = fetcher.scroll(0.0, 1.0e9).unwrap_err();
        assert!(matches!(err, Error::Viewport(ViewportError::SpanTooLarge { .. })));
        assert!(fetcher.window().is_none());

        let mut sorted = WindowFetcher::new(frame.clone(), ViewportConfig::default())
            .with_order_by(OrderBy::asc("n"));
        assert!(sorted.scroll(0.0, 500.0).unwrap_err().is_validation());
        settle().await;
        assert!(frame.started.lock().unwrap().is_empty());
    }
}
