//! Imperative Multi producer.
//!
//! A [`MultiEmitter`] may be cloned and driven from several threads at once.
//! Emissions are serialized through a work-in-progress counter: whichever
//! thread raises it from zero drains the queue, the others only enqueue.
//! Racing `complete`/`fail` calls are arbitrated by the terminal guard, so
//! the subscriber sees exactly one terminal signal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{BackpressureStrategy, EmitterConfig};
use crate::error::{Error, Failure};
use crate::infrastructure::{catch, run_detached};
use crate::subscription::{
    Cancellable, Demand, Subscription, TerminalGuard, TerminalKind, UNBOUNDED,
};

use super::{Publisher, Subscriber};

type TerminationHook = Box<dyn FnOnce() + Send>;

struct EmitterState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    config: EmitterConfig,
    queue: Mutex<VecDeque<T>>,
    demand: Demand,
    wip: AtomicUsize,
    /// Won by the first of complete, fail or cancel.
    guard: TerminalGuard,
    /// Set once a terminal signal is pending behind the queue.
    done: AtomicBool,
    failure: Mutex<Option<Failure>>,
    cancelled: AtomicBool,
    delivered: AtomicBool,
    on_termination: Mutex<Option<TerminationHook>>,
}

impl<T: Send + 'static> EmitterState<T> {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Room left in the demand window once queued items are accounted for.
    fn has_room(&self, queued: usize) -> bool {
        let requested = self.demand.pending();
        requested == UNBOUNDED || requested > queued as u64
    }

    fn emit(&self, item: T) {
        if !self.guard.is_open() {
            tracing::debug!("dropping item emitted after termination");
            return;
        }
        let mut queue = self.queue.lock();
        match self.config.backpressure {
            BackpressureStrategy::Buffer => {
                if let Some(capacity) = self.config.buffer_size {
                    if queue.len() >= capacity {
                        drop(queue);
                        self.fail(Error::BackPressure(format!(
                            "emitter buffer is full ({capacity} items)"
                        ))
                        .into());
                        return;
                    }
                }
                queue.push_back(item);
            }
            BackpressureStrategy::Drop => {
                if self.has_room(queue.len()) {
                    queue.push_back(item);
                } else {
                    tracing::debug!("dropping item emitted without demand");
                }
            }
            BackpressureStrategy::Error => {
                if self.has_room(queue.len()) {
                    queue.push_back(item);
                } else {
                    drop(queue);
                    self.fail(
                        Error::BackPressure(
                            "could not emit item downstream due to lack of requests".into(),
                        )
                        .into(),
                    );
                    return;
                }
            }
            BackpressureStrategy::Latest => {
                if !self.has_room(queue.len()) {
                    queue.pop_back();
                }
                queue.push_back(item);
            }
            BackpressureStrategy::Ignore => queue.push_back(item),
        }
        drop(queue);
        self.drain();
    }

    fn complete(&self) {
        if self.guard.try_close(TerminalKind::Completion) {
            self.done.store(true, Ordering::Release);
            self.drain();
        }
    }

    fn fail(&self, failure: Failure) {
        if self.guard.try_close(TerminalKind::Failure) {
            *self.failure.lock() = Some(failure);
            self.done.store(true, Ordering::Release);
            self.drain();
        } else {
            tracing::debug!(%failure, "dropping failure that lost terminal arbitration");
        }
    }

    /// Reports a subscriber protocol violation.
    ///
    /// Undelivered items are discarded and the failure replaces a terminal
    /// signal still waiting behind them.
    fn violate(&self, failure: Failure) {
        if self.is_cancelled() || self.delivered.load(Ordering::Acquire) {
            tracing::debug!(%failure, "ignoring protocol violation after termination");
            return;
        }
        let _ = self.guard.try_close(TerminalKind::Failure);
        self.queue.lock().clear();
        *self.failure.lock() = Some(failure);
        self.done.store(true, Ordering::Release);
        self.drain();
    }

    fn deliver_terminal(&self) {
        if self.delivered.swap(true, Ordering::AcqRel) {
            return;
        }
        let failure = self.failure.lock().take();
        match failure {
            Some(failure) => self.downstream.on_failure(failure),
            None => self.downstream.on_completion(),
        }
        self.run_termination_hook();
    }

    fn run_termination_hook(&self) {
        let hook = self.on_termination.lock().take();
        if let Some(hook) = hook {
            run_detached(hook);
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            let requested = match self.config.backpressure {
                BackpressureStrategy::Ignore => UNBOUNDED,
                _ => self.demand.pending(),
            };
            let mut emitted = 0u64;

            while emitted != requested {
                if self.is_cancelled() {
                    self.queue.lock().clear();
                    return;
                }
                let done = self.done.load(Ordering::Acquire);
                let item = self.queue.lock().pop_front();
                match item {
                    Some(item) => {
                        // on_item may emit or request re-entrantly
                        // against the remaining demand.
                        if requested != UNBOUNDED {
                            self.demand.produced(1);
                        }
                        self.downstream.on_item(item);
                        emitted += 1;
                    }
                    None if done => {
                        self.deliver_terminal();
                        return;
                    }
                    None => break,
                }
            }

            if emitted == requested {
                if self.is_cancelled() {
                    self.queue.lock().clear();
                    return;
                }
                let done = self.done.load(Ordering::Acquire);
                if done && self.queue.lock().is_empty() {
                    self.deliver_terminal();
                    return;
                }
            }

            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

impl<T: Send + 'static> Cancellable for EmitterState<T> {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.guard.try_close(TerminalKind::Cancellation);
        self.run_termination_hook();
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.queue.lock().clear();
        }
    }
}

impl<T: Send + 'static> Subscription for EmitterState<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.violate(Error::InvalidDemand(n).into());
            return;
        }
        self.demand.add(n);
        self.drain();
    }
}

// ---------------------------------------------------------------------------
// MultiEmitter
// ---------------------------------------------------------------------------

/// Handle used to push items into a Multi.
///
/// Cheap to clone; all clones drive the same subscription.
pub struct MultiEmitter<T> {
    state: Arc<EmitterState<T>>,
}

impl<T> Clone for MultiEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Send + 'static> MultiEmitter<T> {
    /// Emits an item, subject to the configured backpressure strategy.
    ///
    /// Items emitted after termination or cancellation are dropped.
    pub fn emit(&self, item: T) -> &Self {
        self.state.emit(item);
        self
    }

    /// Completes the stream once buffered items are delivered.
    pub fn complete(&self) {
        self.state.complete();
    }

    /// Fails the stream once buffered items are delivered.
    pub fn fail(&self, failure: Failure) {
        self.state.fail(failure);
    }

    /// Returns the outstanding demand.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.state.demand.pending()
    }

    /// Returns `true` once the subscriber cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Registers a hook that runs once, on cancellation or after the
    /// terminal signal was delivered.
    pub fn on_termination<F>(&self, hook: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        *self.state.on_termination.lock() = Some(Box::new(hook));
        if self.state.is_cancelled() || self.state.delivered.load(Ordering::Acquire) {
            self.state.run_termination_hook();
        }
        self
    }
}

impl<T> std::fmt::Debug for MultiEmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiEmitter")
            .field("requested", &self.state.demand.pending())
            .field("cancelled", &self.state.cancelled.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EmitterPublisher
// ---------------------------------------------------------------------------

pub(crate) struct EmitterPublisher<F> {
    config: EmitterConfig,
    consumer: F,
}

impl<F> EmitterPublisher<F> {
    pub(crate) fn new(config: EmitterConfig, consumer: F) -> Self {
        Self { config, consumer }
    }
}

impl<T, F> Publisher<T> for EmitterPublisher<F>
where
    T: Send + 'static,
    F: Fn(MultiEmitter<T>) + Send + Sync,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let state = Arc::new(EmitterState {
            downstream: subscriber,
            config: self.config,
            queue: Mutex::new(VecDeque::new()),
            demand: Demand::new(),
            wip: AtomicUsize::new(0),
            guard: TerminalGuard::new(),
            done: AtomicBool::new(false),
            failure: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
            on_termination: Mutex::new(None),
        });
        state.downstream.on_subscribe(state.clone());

        let emitter = MultiEmitter {
            state: Arc::clone(&state),
        };
        if let Err(failure) = catch(|| (self.consumer)(emitter)) {
            state.fail(failure);
        }
    }
}
