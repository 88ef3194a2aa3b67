//! Change notifications for data frames.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;

/// The kinds of event a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// New data became readable.
    Resolve,
    /// The row count changed.
    NumRowsChange,
}

/// An advisory notification. Consumers re-read state; payloads are hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// New data became readable; pending cells may now resolve.
    Resolve,
    /// The row count changed; layouts must be recomputed.
    NumRowsChange {
        /// The new row count.
        num_rows: usize,
    },
}

impl FrameEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            FrameEvent::Resolve => EventKind::Resolve,
            FrameEvent::NumRowsChange { .. } => EventKind::NumRowsChange,
        }
    }
}

type Listener = Arc<dyn Fn(&FrameEvent) + Send + Sync>;

#[derive(Default)]
struct EventBusInner {
    next_id: u64,
    listeners: Vec<(u64, EventKind, Listener)>,
}

/// A typed observer list per event kind.
///
/// Cheap to clone; clones share listeners. Listeners run synchronously on
/// the emitting task, outside the internal lock, so a listener may
/// subscribe, unsubscribe or emit.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use lazygrid_lib::frame::{EventBus, EventKind, FrameEvent};
///
/// let bus = EventBus::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// let subscription = bus.subscribe(EventKind::Resolve, move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// bus.emit(&FrameEvent::Resolve);
/// drop(subscription);
/// bus.emit(&FrameEvent::Resolve);
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<EventBusInner>>,
}

impl EventBus {
    /// Creates a bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one kind of event.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or [`unsubscribed`](Subscription::unsubscribe).
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&FrameEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, kind, Arc::new(listener)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Registers one listener for every kind of event.
    pub fn subscribe_all<F>(&self, listener: F) -> Vec<Subscription>
    where
        F: Fn(&FrameEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        [EventKind::Resolve, EventKind::NumRowsChange]
            .into_iter()
            .map(|kind| {
                let listener = Arc::clone(&listener);
                self.subscribe(kind, move |event| listener(event))
            })
            .collect()
    }

    /// Dispatches an event to the listeners of its kind.
    pub fn emit(&self, event: &FrameEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .listeners
                .iter()
                .filter(|(_, k, _)| *k == kind)
                .map(|(_, _, l)| Arc::clone(l))
                .collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle to a registered listener. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes the listener"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<Mutex<EventBusInner>>,
}

impl Subscription {
    /// Removes the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn remove(&self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut inner = bus.lock().unwrap_or_else(PoisonError::into_inner);
            inner.listeners.retain(|(id, _, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Forwards every event of `from` to `to`.
///
/// Wrapper frames use this to re-announce their inner frame's events.
pub(crate) fn forward(from: &EventBus, to: &EventBus) -> Vec<Subscription> {
    let to = to.clone();
    from.subscribe_all(move |event| to.emit(event))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn test_kinds_are_separate() {
        let bus = EventBus::new();
        let resolves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resolves);
        let _sub = bus.subscribe(EventKind::Resolve, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&FrameEvent::NumRowsChange { num_rows: 3 });
        bus.emit(&FrameEvent::Resolve);
        assert_eq!(resolves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventKind::Resolve, |_| {});
        assert_eq!(bus.listener_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_unsubscribe_others() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner_slot = Arc::clone(&slot);
        let _outer = bus.subscribe(EventKind::Resolve, move |_| {
            inner_slot.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(bus.subscribe(EventKind::Resolve, |_| {}));

        bus.emit(&FrameEvent::Resolve);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_poisoned_bus_keeps_working() {
        let bus = EventBus::new();
        let resolves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resolves);
        let _sub = bus.subscribe(EventKind::Resolve, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let inner = Arc::clone(&bus.inner);
        let panicked = std::thread::spawn(move || {
            let _guard = inner.lock().unwrap();
            panic!("listener registry poisoned");
        })
        .join();
        assert!(panicked.is_err());
        assert!(bus.inner.is_poisoned());

        assert_eq!(bus.listener_count(), 1);
        bus.emit(&FrameEvent::Resolve);
        assert_eq!(resolves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forward() {
        let inner = EventBus::new();
        let outer = EventBus::new();
        let _forwarding = forward(&inner, &outer);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subs = outer.subscribe_all(move |event| sink.lock().unwrap().push(event.clone()));

        inner.emit(&FrameEvent::NumRowsChange { num_rows: 7 });
        inner.emit(&FrameEvent::Resolve);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![FrameEvent::NumRowsChange { num_rows: 7 }, FrameEvent::Resolve]
        );
    }
}
