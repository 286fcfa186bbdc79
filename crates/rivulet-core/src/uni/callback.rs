use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Failure;
use crate::infrastructure::{catch, handle_dropped_failure, run_detached};
use crate::subscription::upstream::UpstreamSlot;
use crate::subscription::{Cancellable, TerminalGuard, TerminalKind};

use super::UniSubscriber;

/// Callbacks for [`Uni::subscribe_callback`](super::Uni::subscribe_callback).
pub trait UniCallback<T>: Send + Sync + 'static {
    /// Receives the item.
    fn on_item(&self, item: T);

    /// Receives the failure. Defaults to the dropped-failure handler.
    fn on_failure(&self, failure: Failure) {
        handle_dropped_failure(&failure);
    }
}

pub(super) struct FnCallback<F> {
    on_item: F,
}

impl<F> FnCallback<F> {
    pub(super) fn new(on_item: F) -> Self {
        Self { on_item }
    }
}

impl<T, F> UniCallback<T> for FnCallback<F>
where
    F: Fn(T) + Send + Sync + 'static,
{
    fn on_item(&self, item: T) {
        (self.on_item)(item);
    }
}

pub(super) struct CallbackSubscriber<T, C> {
    callback: C,
    upstream: UpstreamSlot<dyn Cancellable>,
    guard: TerminalGuard,
    _item: PhantomData<fn(T)>,
}

impl<T, C: UniCallback<T>> CallbackSubscriber<T, C> {
    pub(super) fn new(callback: C) -> Self {
        Self {
            callback,
            upstream: UpstreamSlot::new(),
            guard: TerminalGuard::new(),
            _item: PhantomData,
        }
    }
}

impl<T: Send + 'static, C: UniCallback<T>> UniSubscriber<T> for CallbackSubscriber<T, C> {
    fn on_subscribe(&self, subscription: Arc<dyn Cancellable>) {
        let _ = self.upstream.set(subscription);
    }

    fn on_item(&self, item: T) {
        if self.guard.try_close(TerminalKind::Completion) {
            self.upstream.release();
            if let Err(failure) = catch(|| self.callback.on_item(item)) {
                run_detached(|| self.callback.on_failure(failure));
            }
        }
    }

    fn on_failure(&self, failure: Failure) {
        if self.guard.try_close(TerminalKind::Failure) {
            self.upstream.release();
            run_detached(|| self.callback.on_failure(failure));
        } else {
            tracing::debug!(%failure, "callback subscriber already terminated");
        }
    }
}

impl<T: Send + 'static, C: UniCallback<T>> Cancellable for CallbackSubscriber<T, C> {
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
    use crate::uni::{Uni, UniEmitter};

    #[test]
    fn test_subscribe_with() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        Uni::item(7).subscribe_with(move |n| *sink.lock() = Some(n));
        assert_eq!(*seen.lock(), Some(7));
    }

    #[test]
    fn test_callback_failure() {
        struct Failures(Arc<AtomicUsize>);

        impl UniCallback<i32> for Failures {
            fn on_item(&self, _item: i32) {}

            fn on_failure(&self, _failure: Failure) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        Uni::<i32>::failure(Failure::message("boom")).subscribe_callback(Failures(count.clone()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_cancel_discards_late_item() {
        let slot: Arc<Mutex<Option<UniEmitter<i32>>>> = Arc::new(Mutex::new(None));
        let emitter_slot = Arc::clone(&slot);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handle = Uni::emitter(move |e| *emitter_slot.lock() = Some(e)).subscribe_with(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        let emitter = slot.lock().clone().unwrap();
        assert!(emitter.is_cancelled());
        emitter.complete(1);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
