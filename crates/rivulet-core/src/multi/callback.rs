//! Callback-style consumption of a Multi.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Failure;
use crate::infrastructure::{catch, handle_dropped_failure, run_detached};
use crate::subscription::upstream::{SlotSet, UpstreamSlot};
use crate::subscription::{Cancellable, Subscription, TerminalGuard, TerminalKind, UNBOUNDED};

use super::Subscriber;

/// Callbacks for [`Multi::subscribe_callback`](super::Multi::subscribe_callback).
///
/// Only `on_item` is mandatory. An unhandled failure goes to the
/// dropped-failure handler.
pub trait MultiCallback<T>: Send + Sync + 'static {
    /// Receives each item.
    fn on_item(&self, item: T);

    /// Receives the terminal failure.
    fn on_failure(&self, failure: Failure) {
        handle_dropped_failure(&failure);
    }

    /// Receives the terminal completion.
    fn on_completion(&self) {}
}

pub(super) struct FnCallback<F> {
    on_item: F,
}

impl<F> FnCallback<F> {
    pub(super) fn new(on_item: F) -> Self {
        Self { on_item }
    }
}

impl<T, F> MultiCallback<T> for FnCallback<F>
where
    F: Fn(T) + Send + Sync + 'static,
{
    fn on_item(&self, item: T) {
        (self.on_item)(item);
    }
}

/// Terminal subscriber requesting everything up front.
pub(super) struct CallbackSubscriber<T, C> {
    callback: C,
    upstream: UpstreamSlot<dyn Subscription>,
    guard: TerminalGuard,
    _item: PhantomData<fn(T)>,
}

impl<T, C> CallbackSubscriber<T, C>
where
    T: Send + 'static,
    C: MultiCallback<T>,
{
    pub(super) fn new(callback: C) -> Self {
        Self {
            callback,
            upstream: UpstreamSlot::new(),
            guard: TerminalGuard::new(),
            _item: PhantomData,
        }
    }

    fn deliver_failure(&self, failure: Failure) {
        run_detached(|| self.callback.on_failure(failure));
    }
}

impl<T, C> Subscriber<T> for CallbackSubscriber<T, C>
where
    T: Send + 'static,
    C: MultiCallback<T>,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if let SlotSet::Accepted = self.upstream.set(Arc::clone(&subscription)) {
            subscription.request(UNBOUNDED);
        }
    }

    fn on_item(&self, item: T) {
        if !self.guard.is_open() {
            return;
        }
        if let Err(failure) = catch(|| self.callback.on_item(item)) {
            if self.guard.try_close(TerminalKind::Failure) {
                self.upstream.cancel();
                self.deliver_failure(failure);
            }
        }
    }

    fn on_failure(&self, failure: Failure) {
        if self.guard.try_close(TerminalKind::Failure) {
            self.upstream.release();
            self.deliver_failure(failure);
        } else {
            tracing::debug!(%failure, "callback subscriber already terminated");
        }
    }

    fn on_completion(&self) {
        if self.guard.try_close(TerminalKind::Completion) {
            self.upstream.release();
            run_detached(|| self.callback.on_completion());
        }
    }
}

impl<T, C> Cancellable for CallbackSubscriber<T, C>
where
    T: Send + 'static,
    C: MultiCallback<T>,
{
    fn cancel(&self) {
        if self.guard.try_close(TerminalKind::Cancellation) {
            self.upstream.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::error::Error;
    use crate::multi::Multi;

    #[derive(Default)]
    struct Recorder {
        items: Mutex<Vec<i64>>,
        failures: Mutex<Vec<Failure>>,
        completions: AtomicUsize,
    }

    impl MultiCallback<i64> for Arc<Recorder> {
        fn on_item(&self, item: i64) {
            assert!(item != 13, "unlucky");
            self.items.lock().push(item);
        }

        fn on_failure(&self, failure: Failure) {
            self.failures.lock().push(failure);
        }

        fn on_completion(&self) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_subscribe_with_receives_everything() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = Multi::range(0, 4).subscribe_with(move |n| sink.lock().push(n));
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_callback_terminal_signals() {
        let recorder = Arc::new(Recorder::default());
        Multi::range(0, 3).subscribe_callback(Arc::clone(&recorder));
        assert_eq!(*recorder.items.lock(), vec![0, 1, 2]);
        assert_eq!(recorder.completions.load(Ordering::SeqCst), 1);

        let recorder = Arc::new(Recorder::default());
        Multi::<i64>::failure(Failure::message("boom")).subscribe_callback(Arc::clone(&recorder));
        assert_eq!(recorder.failures.lock().len(), 1);
        assert_eq!(recorder.completions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_item_callback_cancels_and_fails() {
        let recorder = Arc::new(Recorder::default());
        Multi::range(10, 20).subscribe_callback(Arc::clone(&recorder));
        assert_eq!(*recorder.items.lock(), vec![10, 11, 12]);
        let failures = recorder.failures.lock();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].kind(), Some(Error::CallbackPanicked(_))));
        assert_eq!(recorder.completions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handle_cancel_stops_emitter() {
        let emitter_slot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&emitter_slot);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handle = Multi::<i64>::emitter(move |e| *slot.lock() = Some(e))
            .subscribe_with(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let emitter = emitter_slot.lock().clone().unwrap();
        emitter.emit(1);
        handle.cancel();
        handle.cancel();
        emitter.emit(2);
        assert!(emitter.is_cancelled());
        assert!(handle.is_cancelled());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
