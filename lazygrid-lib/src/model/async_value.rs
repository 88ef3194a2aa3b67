//! Write-once asynchronous values with a synchronous peek.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::sync::watch;

use crate::error::Error;

use super::ValueBox;

/// The state of an [`AsyncValue`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Settlement<T> {
    /// Not settled yet.
    #[default]
    Pending,
    /// Settled with a value.
    Resolved(T),
    /// Settled with a failure.
    Rejected(Error),
}

impl<T> Settlement<T> {
    /// Check if still pending
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if settled with a value
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Check if settled with a failure
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Get reference to the resolved value
    pub fn as_resolved(&self) -> Option<&T> {
        match self {
            Self::Resolved(v) => Some(v),
            _ => None,
        }
    }

    /// Get the failure if present
    pub fn as_rejected(&self) -> Option<&Error> {
        match self {
            Self::Rejected(e) => Some(e),
            _ => None,
        }
    }

    /// Map the resolved value
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Settlement<U> {
        match self {
            Self::Pending => Settlement::Pending,
            Self::Resolved(v) => Settlement::Resolved(f(v)),
            Self::Rejected(e) => Settlement::Rejected(e),
        }
    }

    /// Reads the settlement the way cell readers report it: `Ok(None)` while
    /// pending, the value once resolved, the failure once rejected.
    pub fn into_read(self) -> Result<Option<ValueBox<T>>, Error> {
        match self {
            Self::Pending => Ok(None),
            Self::Resolved(v) => Ok(Some(ValueBox::new(v))),
            Self::Rejected(e) => Err(e),
        }
    }
}

impl<T> From<Result<Option<ValueBox<T>>, Error>> for Settlement<T> {
    fn from(read: Result<Option<ValueBox<T>>, Error>) -> Self {
        match read {
            Ok(Some(boxed)) => Self::Resolved(boxed.value),
            Ok(None) => Self::Pending,
            Err(e) => Self::Rejected(e),
        }
    }
}

type Callback<T> = Box<dyn FnOnce(&Settlement<T>) + Send>;

struct AsyncValueInner<T> {
    state: watch::Sender<Settlement<T>>,
    callbacks: Mutex<Vec<Callback<T>>>,
}

/// A deferred value that can be read synchronously once settled.
///
/// `AsyncValue<T>` is cheap to clone; all clones share the same state. It is
/// settled at most once, through [`resolve`](Self::resolve) or
/// [`reject`](Self::reject); later attempts are ignored. Readers can peek
/// without awaiting, await settlement, or register a callback.
///
/// # Example
///
/// ```
/// use lazygrid_lib::model::AsyncValue;
///
/// let cell = AsyncValue::<i64>::pending();
/// assert!(cell.value().is_none());
///
/// cell.resolve(42);
/// assert_eq!(cell.value().map(|b| b.value), Some(42));
///
/// // Write-once: the second settlement is ignored.
/// assert!(!cell.resolve(7));
/// ```
pub struct AsyncValue<T> {
    inner: Arc<AsyncValueInner<T>>,
}

impl<T> AsyncValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn with_state(state: Settlement<T>) -> Self {
        let (sender, _) = watch::channel(state);
        Self {
            inner: Arc::new(AsyncValueInner {
                state: sender,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates an unsettled value.
    pub fn pending() -> Self {
        Self::with_state(Settlement::Pending)
    }

    /// Creates a value that is already resolved.
    pub fn resolved(value: T) -> Self {
        Self::with_state(Settlement::Resolved(value))
    }

    /// Creates a value that already failed.
    pub fn rejected(error: Error) -> Self {
        Self::with_state(Settlement::Rejected(error))
    }

    /// Settles with a value. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Settlement::Resolved(value))
    }

    /// Settles with a failure. Returns `false` if already settled.
    pub fn reject(&self, error: Error) -> bool {
        self.settle(Settlement::Rejected(error))
    }

    fn settle(&self, settlement: Settlement<T>) -> bool {
        if settlement.is_pending() {
            return false;
        }
        let mut next = Some(settlement);
        let applied = self.inner.state.send_if_modified(|current| {
            if current.is_pending()
                && let Some(next) = next.take()
            {
                *current = next;
                true
            } else {
                false
            }
        });
        if applied {
            let callbacks = std::mem::take(
                &mut *self
                    .inner
                    .callbacks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if !callbacks.is_empty() {
                let state = self.peek();
                for callback in callbacks {
                    callback(&state);
                }
            }
        }
        applied
    }

    /// Get a clone of the current state.
    pub fn peek(&self) -> Settlement<T> {
        self.inner.state.borrow().clone()
    }

    /// Run `f` against the current state without cloning it.
    ///
    /// `f` must not settle this same value.
    pub fn with<R>(&self, f: impl FnOnce(&Settlement<T>) -> R) -> R {
        f(&self.inner.state.borrow())
    }

    /// The resolved value, if any.
    pub fn value(&self) -> Option<ValueBox<T>> {
        self.with(|state| state.as_resolved().cloned().map(ValueBox::new))
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<Error> {
        self.with(|state| state.as_rejected().cloned())
    }

    /// Check if still pending
    pub fn is_pending(&self) -> bool {
        self.with(Settlement::is_pending)
    }

    /// Check if settled either way
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// Returns `true` if both handles share the same state.
    pub fn ptr_eq(&self, other: &AsyncValue<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Waits until settled and returns the outcome.
    pub async fn wait(&self) -> Result<T, Error> {
        let mut receiver = self.inner.state.subscribe();
        let settled = receiver
            .wait_for(|state| !state.is_pending())
            .await
            .map(|state| state.clone());
        match settled {
            Ok(Settlement::Resolved(value)) => Ok(value),
            Ok(Settlement::Rejected(error)) => Err(error),
            // The sender lives as long as `self`, so the channel cannot close
            // while we are waiting on it.
            Ok(Settlement::Pending) | Err(_) => Err(Error::fetch("value dropped before settling")),
        }
    }

    /// Registers a callback invoked once on settlement.
    ///
    /// If the value is already settled, the callback runs immediately on the
    /// calling task.
    pub fn on_settle<F>(&self, callback: F)
    where
        F: FnOnce(&Settlement<T>) + Send + 'static,
    {
        let settled = {
            let mut callbacks = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let state = self.peek();
            if state.is_pending() {
                callbacks.push(Box::new(callback));
                return;
            }
            state
        };
        callback(&settled);
    }

    /// Derives a value that settles when this one does.
    pub fn map<U, F>(&self, f: F) -> AsyncValue<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let derived = AsyncValue::pending();
        let target = derived.clone();
        self.on_settle(move |state| match state {
            Settlement::Resolved(value) => {
                target.resolve(f(value));
            }
            Settlement::Rejected(error) => {
                target.reject(error.clone());
            }
            Settlement::Pending => {}
        });
        derived
    }
}

impl<T> Clone for AsyncValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AsyncValue")
            .field(&*self.inner.state.borrow())
            .finish()
    }
}
