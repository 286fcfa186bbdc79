//! Pass-through Multi operators.
//!
//! Each operator here is a [`StageHooks`] implementation plugged into the
//! generic [`HookStage`](super::stage::HookStage). They consume one unit of
//! demand per forwarded item and leave the terminal contract alone.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Failure;
use crate::infrastructure::{catch, run_detached};
use crate::subscription::Subscription;

use super::stage::{StageCore, StageHooks, StagePublisher};
use super::Multi;

const LOG_TARGET: &str = "rivulet::log";

fn lift<I, O, H, F>(upstream: &Multi<I>, factory: F) -> Multi<O>
where
    I: Send + 'static,
    O: Send + 'static,
    H: StageHooks<I, O>,
    F: Fn() -> H + Send + Sync + 'static,
{
    Multi::from_publisher(StagePublisher::new(upstream.clone(), factory))
}

// ---------------------------------------------------------------------------
// map / filter / take
// ---------------------------------------------------------------------------

struct MapHooks<F> {
    mapper: Arc<F>,
}

impl<I, O, F> StageHooks<I, O> for MapHooks<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    fn on_item(&self, item: I, core: &Arc<StageCore<O>>) {
        match catch(|| (self.mapper)(item)) {
            Ok(mapped) => core.emit(mapped),
            Err(failure) => core.fail_and_cancel(failure),
        }
    }
}

pub(super) fn map<I, O, F>(upstream: &Multi<I>, mapper: F) -> Multi<O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    let mapper = Arc::new(mapper);
    lift(upstream, move || MapHooks {
        mapper: Arc::clone(&mapper),
    })
}

struct FilterHooks<F> {
    predicate: Arc<F>,
}

impl<T, F> StageHooks<T, T> for FilterHooks<F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<StageCore<T>>) {
        match catch(|| (self.predicate)(&item)) {
            Ok(true) => core.emit(item),
            // The dropped item used a unit of demand; ask for a replacement.
            Ok(false) => core.request_upstream(1),
            Err(failure) => core.fail_and_cancel(failure),
        }
    }
}

pub(super) fn filter<T, F>(upstream: &Multi<T>, predicate: F) -> Multi<T>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let predicate = Arc::new(predicate);
    lift(upstream, move || FilterHooks {
        predicate: Arc::clone(&predicate),
    })
}

struct TakeHooks {
    limit: u64,
    seen: AtomicU64,
}

impl<T: Send + 'static> StageHooks<T, T> for TakeHooks {
    fn on_item(&self, item: T, core: &Arc<StageCore<T>>) {
        let seen = self.seen.fetch_add(1, Ordering::AcqRel) + 1;
        if seen > self.limit {
            return;
        }
        core.emit(item);
        if seen == self.limit {
            core.cancel_upstream();
            core.complete();
        }
    }
}

pub(super) fn take<T: Send + 'static>(upstream: &Multi<T>, limit: u64) -> Multi<T> {
    if limit == 0 {
        return Multi::empty();
    }
    lift(upstream, move || TakeHooks {
        limit,
        seen: AtomicU64::new(0),
    })
}

// ---------------------------------------------------------------------------
// log
// ---------------------------------------------------------------------------

struct LogHooks {
    name: Arc<str>,
}

impl<T: Debug + Send + 'static> StageHooks<T, T> for LogHooks {
    fn on_subscribe(&self, _core: &Arc<StageCore<T>>) -> Result<(), Failure> {
        tracing::info!(target: LOG_TARGET, stage = %self.name, "on_subscribe");
        Ok(())
    }

    fn on_item(&self, item: T, core: &Arc<StageCore<T>>) {
        tracing::info!(target: LOG_TARGET, stage = %self.name, item = ?item, "on_item");
        core.emit(item);
    }

    fn on_failure(&self, failure: Failure, core: &Arc<StageCore<T>>) {
        tracing::info!(target: LOG_TARGET, stage = %self.name, %failure, "on_failure");
        core.fail(failure);
    }

    fn on_completion(&self, core: &Arc<StageCore<T>>) {
        tracing::info!(target: LOG_TARGET, stage = %self.name, "on_completion");
        core.complete();
    }

    fn on_request(&self, n: u64) {
        tracing::info!(target: LOG_TARGET, stage = %self.name, requested = n, "request");
    }

    fn on_cancellation(&self) {
        tracing::info!(target: LOG_TARGET, stage = %self.name, "cancel");
    }
}

pub(super) fn log<T: Debug + Send + 'static>(upstream: &Multi<T>, name: &str) -> Multi<T> {
    let name: Arc<str> = Arc::from(name);
    lift(upstream, move || LogHooks {
        name: Arc::clone(&name),
    })
}

// ---------------------------------------------------------------------------
// on_item()
// ---------------------------------------------------------------------------

/// Operators reacting to items. Created by [`Multi::on_item`].
#[derive(Debug)]
pub struct MultiOnItem<T> {
    upstream: Multi<T>,
}

struct InvokeItemHooks<F> {
    callback: Arc<F>,
}

impl<T, F> StageHooks<T, T> for InvokeItemHooks<F>
where
    T: Send + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<StageCore<T>>) {
        match catch(|| (self.callback)(&item)) {
            Ok(()) => core.emit(item),
            Err(failure) => core.fail_and_cancel(failure),
        }
    }
}

impl<T: Send + 'static> MultiOnItem<T> {
    pub(super) fn new(upstream: Multi<T>) -> Self {
        Self { upstream }
    }

    /// Runs `callback` for each item before forwarding it.
    pub fn invoke<F>(self, callback: F) -> Multi<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        lift(&self.upstream, move || InvokeItemHooks {
            callback: Arc::clone(&callback),
        })
    }

    /// Transforms each item. Same as [`Multi::map`].
    pub fn transform<O, F>(self, mapper: F) -> Multi<O>
    where
        O: Send + 'static,
        F: Fn(T) -> O + Send + Sync + 'static,
    {
        map(&self.upstream, mapper)
    }
}

// ---------------------------------------------------------------------------
// on_subscription()
// ---------------------------------------------------------------------------

/// Operators reacting to the upstream subscription. Created by
/// [`Multi::on_subscription`].
#[derive(Debug)]
pub struct MultiOnSubscription<T> {
    upstream: Multi<T>,
}

struct InvokeSubscriptionHooks<F> {
    callback: Arc<F>,
}

impl<T, F> StageHooks<T, T> for InvokeSubscriptionHooks<F>
where
    T: Send + 'static,
    F: Fn(&dyn Subscription) + Send + Sync + 'static,
{
    fn on_subscribe(&self, core: &Arc<StageCore<T>>) -> Result<(), Failure> {
        match core.upstream() {
            Some(upstream) => catch(|| (self.callback)(upstream.as_ref())),
            None => Ok(()),
        }
    }

    fn on_item(&self, item: T, core: &Arc<StageCore<T>>) {
        core.emit(item);
    }
}

impl<T: Send + 'static> MultiOnSubscription<T> {
    pub(super) fn new(upstream: Multi<T>) -> Self {
        Self { upstream }
    }

    /// Runs `callback` with the upstream subscription before the downstream
    /// receives its own.
    ///
    /// A panicking callback cancels upstream and fails the stream.
    pub fn invoke<F>(self, callback: F) -> Multi<T>
    where
        F: Fn(&dyn Subscription) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        lift(&self.upstream, move || InvokeSubscriptionHooks {
            callback: Arc::clone(&callback),
        })
    }
}

// ---------------------------------------------------------------------------
// on_cancellation()
// ---------------------------------------------------------------------------

/// Operators reacting to cancellation. Created by [`Multi::on_cancellation`].
#[derive(Debug)]
pub struct MultiOnCancellation<T> {
    upstream: Multi<T>,
}

struct InvokeCancellationHooks<F> {
    callback: Arc<F>,
    terminated: AtomicBool,
}

impl<T, F> StageHooks<T, T> for InvokeCancellationHooks<F>
where
    T: Send + 'static,
    F: Fn() + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<StageCore<T>>) {
        core.emit(item);
    }

    fn on_failure(&self, failure: Failure, core: &Arc<StageCore<T>>) {
        self.terminated.store(true, Ordering::Release);
        core.fail(failure);
    }

    fn on_completion(&self, core: &Arc<StageCore<T>>) {
        self.terminated.store(true, Ordering::Release);
        core.complete();
    }

    // Terminal states are absorbing: a cancel after completion is not a cancellation.
    fn on_cancellation(&self) {
        if !self.terminated.load(Ordering::Acquire) {
            run_detached(|| (self.callback)());
        }
    }
}

impl<T: Send + 'static> MultiOnCancellation<T> {
    pub(super) fn new(upstream: Multi<T>) -> Self {
        Self { upstream }
    }

    /// Runs `callback` once, on the first cancel, before upstream is cancelled.
    /// A cancel arriving after the stream terminated does not run it.
    ///
    /// A panic is reported to the dropped-failure handler.
    pub fn invoke<F>(self, callback: F) -> Multi<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        lift(&self.upstream, move || InvokeCancellationHooks {
            callback: Arc::clone(&callback),
            terminated: AtomicBool::new(false),
        })
    }
}
