//! Imperative resolution of a Uni.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Failure;
use crate::infrastructure::{catch, run_detached};
use crate::subscription::{Cancellable, GuardState, TerminalGuard, TerminalKind};

use super::{UniPublisher, UniSubscriber};

type TerminationHook = Box<dyn FnOnce() + Send>;

struct EmitterState<T> {
    downstream: Arc<dyn UniSubscriber<T>>,
    guard: TerminalGuard,
    on_termination: Mutex<Option<TerminationHook>>,
}

impl<T> EmitterState<T> {
    fn run_termination_hook(&self) {
        let hook = self.on_termination.lock().take();
        if let Some(hook) = hook {
            run_detached(hook);
        }
    }
}

impl<T: Send + 'static> Cancellable for EmitterState<T> {
    fn cancel(&self) {
        if self.guard.try_close(TerminalKind::Cancellation) {
            self.run_termination_hook();
        }
    }
}

/// Resolves a [`Uni::emitter`](super::Uni::emitter) subscription.
///
/// Only the first of `complete`, `fail` or a downstream cancel has an effect.
pub struct UniEmitter<T> {
    state: Arc<EmitterState<T>>,
}

impl<T> Clone for UniEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Send + 'static> UniEmitter<T> {
    /// Resolves with `item`.
    pub fn complete(&self, item: T) {
        if self.state.guard.try_close(TerminalKind::Completion) {
            self.state.downstream.on_item(item);
            self.state.run_termination_hook();
        } else {
            tracing::debug!("ignoring item emitted after termination");
        }
    }

    /// Resolves with `failure`.
    pub fn fail(&self, failure: Failure) {
        if self.state.guard.try_close(TerminalKind::Failure) {
            self.state.downstream.on_failure(failure);
            self.state.run_termination_hook();
        } else {
            tracing::debug!(%failure, "ignoring failure emitted after termination");
        }
    }

    /// Returns `true` once the downstream cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.guard.state() == GuardState::ClosedBy(TerminalKind::Cancellation)
    }

    /// Registers a hook run once when the Uni resolves or is cancelled.
    ///
    /// Runs immediately if that already happened.
    pub fn on_termination<F>(&self, hook: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        *self.state.on_termination.lock() = Some(Box::new(hook));
        if !self.state.guard.is_open() {
            self.state.run_termination_hook();
        }
        self
    }
}

impl<T> std::fmt::Debug for UniEmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniEmitter")
            .field("state", &self.state.guard.state())
            .finish_non_exhaustive()
    }
}

pub(super) struct EmitterPublisher<F> {
    consumer: F,
}

impl<F> EmitterPublisher<F> {
    pub(super) fn new(consumer: F) -> Self {
        Self { consumer }
    }
}

impl<T, F> UniPublisher<T> for EmitterPublisher<F>
where
    T: Send + 'static,
    F: Fn(UniEmitter<T>) + Send + Sync,
{
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        let state = Arc::new(EmitterState {
            downstream: subscriber,
            guard: TerminalGuard::new(),
            on_termination: Mutex::new(None),
        });
        state.downstream.on_subscribe(state.clone());
        let emitter = UniEmitter {
            state: Arc::clone(&state),
        };
        if let Err(failure) = catch(|| (self.consumer)(emitter.clone())) {
            emitter.fail(failure);
        }
    }
}
