//! Uni operators and operator groups.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Failure;
use crate::infrastructure::{catch, run_detached};
use crate::subscription::{Cancellable, TerminalKind};

use super::stage::{lift, UniHooks, UniStageCore};
use super::{Uni, UniSubscriber};

const LOG_TARGET: &str = "rivulet::log";

struct MapHooks<F> {
    mapper: Arc<F>,
}

impl<I, O, F> UniHooks<I, O> for MapHooks<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    fn on_item(&self, item: I, core: &Arc<UniStageCore<O>>) {
        match catch(|| (self.mapper)(item)) {
            Ok(mapped) => {
                core.emit_item(mapped);
            }
            Err(failure) => {
                core.fail(failure);
            }
        }
    }
}

pub(super) fn map<I, O, F>(upstream: &Uni<I>, mapper: F) -> Uni<O>
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

struct LogHooks {
    name: Arc<str>,
}

impl<T: Debug + Send + 'static> UniHooks<T, T> for LogHooks {
    fn on_subscribe(&self, _core: &Arc<UniStageCore<T>>) -> Result<(), Failure> {
        tracing::info!(target: LOG_TARGET, stage = %self.name, "on_subscribe");
        Ok(())
    }

    fn on_item(&self, item: T, core: &Arc<UniStageCore<T>>) {
        tracing::info!(target: LOG_TARGET, stage = %self.name, item = ?item, "on_item");
        core.emit_item(item);
    }

    fn on_failure(&self, failure: Failure, core: &Arc<UniStageCore<T>>) {
        tracing::info!(target: LOG_TARGET, stage = %self.name, %failure, "on_failure");
        core.fail(failure);
    }

    fn on_cancellation(&self) {
        tracing::info!(target: LOG_TARGET, stage = %self.name, "cancel");
    }
}

pub(super) fn log<T: Debug + Send + 'static>(upstream: &Uni<T>, name: &str) -> Uni<T> {
    let name: Arc<str> = Arc::from(name);
    lift(upstream, move || LogHooks {
        name: Arc::clone(&name),
    })
}

// ---------------------------------------------------------------------------
// on_item()
// ---------------------------------------------------------------------------

/// Operators reacting to the item. Created by [`Uni::on_item`].
#[derive(Debug)]
pub struct UniOnItem<T> {
    upstream: Uni<T>,
}

struct InvokeItemHooks<F> {
    callback: Arc<F>,
}

impl<T, F> UniHooks<T, T> for InvokeItemHooks<F>
where
    T: Send + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<UniStageCore<T>>) {
        match catch(|| (self.callback)(&item)) {
            Ok(()) => {
                core.emit_item(item);
            }
            Err(failure) => {
                core.fail(failure);
            }
        }
    }
}

impl<T: Send + 'static> UniOnItem<T> {
    pub(super) fn new(upstream: Uni<T>) -> Self {
        Self { upstream }
    }

    /// Runs `callback` with the item before forwarding it.
    pub fn invoke<F>(self, callback: F) -> Uni<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        lift(&self.upstream, move || InvokeItemHooks {
            callback: Arc::clone(&callback),
        })
    }

    /// Transforms the item. Same as [`Uni::map`].
    pub fn transform<O, F>(self, mapper: F) -> Uni<O>
    where
        O: Send + 'static,
        F: Fn(T) -> O + Send + Sync + 'static,
    {
        map(&self.upstream, mapper)
    }
}

// ---------------------------------------------------------------------------
// on_failure()
// ---------------------------------------------------------------------------

/// Operators reacting to the failure. Created by [`Uni::on_failure`].
#[derive(Debug)]
pub struct UniOnFailure<T> {
    upstream: Uni<T>,
}

struct InvokeFailureHooks<F> {
    callback: Arc<F>,
}

impl<T, F> UniHooks<T, T> for InvokeFailureHooks<F>
where
    T: Send + 'static,
    F: Fn(&Failure) + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<UniStageCore<T>>) {
        core.emit_item(item);
    }

    fn on_failure(&self, failure: Failure, core: &Arc<UniStageCore<T>>) {
        if !core.claim(TerminalKind::Failure) {
            tracing::debug!(%failure, "dropping failure that lost terminal arbitration");
            return;
        }
        let failure = match catch(|| (self.callback)(&failure)) {
            Ok(()) => failure,
            Err(secondary) => Failure::composite(failure, secondary),
        };
        core.deliver_failure(failure);
    }
}

struct RecoverItemHooks<F> {
    fallback: Arc<F>,
}

impl<T, F> UniHooks<T, T> for RecoverItemHooks<F>
where
    T: Send + 'static,
    F: Fn(&Failure) -> T + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<UniStageCore<T>>) {
        core.emit_item(item);
    }

    fn on_failure(&self, failure: Failure, core: &Arc<UniStageCore<T>>) {
        // Only the signal that wins the guard runs the fallback.
        if !core.claim(TerminalKind::Completion) {
            tracing::debug!(%failure, "dropping failure that lost terminal arbitration");
            return;
        }
        match catch(|| (self.fallback)(&failure)) {
            Ok(item) => core.deliver_item(item),
            Err(secondary) => core.deliver_failure(Failure::composite(failure, secondary)),
        }
    }
}

struct RecoverUniHooks<F> {
    fallback: Arc<F>,
    switched: AtomicBool,
}

impl<T, F> UniHooks<T, T> for RecoverUniHooks<F>
where
    T: Send + 'static,
    F: Fn(&Failure) -> Uni<T> + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<UniStageCore<T>>) {
        core.emit_item(item);
    }

    fn on_failure(&self, failure: Failure, core: &Arc<UniStageCore<T>>) {
        if self.switched.swap(true, Ordering::AcqRel) || core.is_cancelled() {
            core.fail(failure);
            return;
        }
        match catch(|| (self.fallback)(&failure)) {
            Ok(fallback) => fallback.subscribe_dyn(Arc::new(RecoveryRelay {
                core: Arc::clone(core),
            })),
            Err(secondary) => {
                core.fail(Failure::composite(failure, secondary));
            }
        }
    }
}

/// Subscriber to the fallback Uni, feeding the original stage.
struct RecoveryRelay<T> {
    core: Arc<UniStageCore<T>>,
}

impl<T: Send + 'static> UniSubscriber<T> for RecoveryRelay<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Cancellable>) {
        self.core.replace_upstream(subscription);
    }

    fn on_item(&self, item: T) {
        self.core.emit_item(item);
    }

    fn on_failure(&self, failure: Failure) {
        self.core.fail(failure);
    }
}

impl<T: Send + 'static> UniOnFailure<T> {
    pub(super) fn new(upstream: Uni<T>) -> Self {
        Self { upstream }
    }

    /// Runs `callback` with the failure before forwarding it.
    ///
    /// If the callback panics, the downstream receives a composite of both.
    pub fn invoke<F>(self, callback: F) -> Uni<T>
    where
        F: Fn(&Failure) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        lift(&self.upstream, move || InvokeFailureHooks {
            callback: Arc::clone(&callback),
        })
    }

    /// Replaces the failure with the item computed by `fallback`.
    pub fn recover_with_item<F>(self, fallback: F) -> Uni<T>
    where
        F: Fn(&Failure) -> T + Send + Sync + 'static,
    {
        let fallback = Arc::new(fallback);
        lift(&self.upstream, move || RecoverItemHooks {
            fallback: Arc::clone(&fallback),
        })
    }

    /// Replaces the failure with the outcome of another Uni.
    ///
    /// Recovery happens once: a failure of the fallback is forwarded.
    pub fn recover_with_uni<F>(self, fallback: F) -> Uni<T>
    where
        F: Fn(&Failure) -> Uni<T> + Send + Sync + 'static,
    {
        let fallback = Arc::new(fallback);
        lift(&self.upstream, move || RecoverUniHooks {
            fallback: Arc::clone(&fallback),
            switched: AtomicBool::new(false),
        })
    }
}

// ---------------------------------------------------------------------------
// on_cancellation()
// ---------------------------------------------------------------------------

/// Operators reacting to cancellation. Created by [`Uni::on_cancellation`].
#[derive(Debug)]
pub struct UniOnCancellation<T> {
    upstream: Uni<T>,
}

struct InvokeCancellationHooks<F> {
    callback: Arc<F>,
}

impl<T, F> UniHooks<T, T> for InvokeCancellationHooks<F>
where
    T: Send + 'static,
    F: Fn() + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<UniStageCore<T>>) {
        core.emit_item(item);
    }

    fn on_cancellation(&self) {
        run_detached(|| (self.callback)());
    }
}

impl<T: Send + 'static> UniOnCancellation<T> {
    pub(super) fn new(upstream: Uni<T>) -> Self {
        Self { upstream }
    }

    /// Runs `callback` once if the Uni is cancelled before it resolves.
    pub fn invoke<F>(self, callback: F) -> Uni<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        lift(&self.upstream, move || InvokeCancellationHooks {
            callback: Arc::clone(&callback),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;
    use crate::error::Error;
    use crate::subscription::ImmediateSubscription;
    use crate::testing::UniAssertSubscriber;
    use crate::uni::UniPublisher;

    type RawSlot = Arc<Mutex<Option<Arc<dyn UniSubscriber<i32>>>>>;

    /// Hands the subscriber out so a test can signal it without any guard.
    struct RawPublisher {
        slot: RawSlot,
    }

    impl UniPublisher<i32> for RawPublisher {
        fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<i32>>) {
            subscriber.on_subscribe(Arc::new(ImmediateSubscription::new()));
            *self.slot.lock() = Some(subscriber);
        }
    }

    fn counting_failure_hook() -> (RawSlot, Arc<AtomicUsize>, Arc<UniAssertSubscriber<i32>>) {
        let slot: RawSlot = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let ts = Uni::from_publisher(RawPublisher {
            slot: Arc::clone(&slot),
        })
        .on_failure()
        .invoke(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .subscribe(UniAssertSubscriber::create());
        (slot, calls, ts)
    }

    #[test]
    fn test_map() {
        Uni::item(20)
            .map(|n| n + 1)
            .subscribe(UniAssertSubscriber::create())
            .assert_item(&21);
    }

    #[test]
    fn test_map_panic() {
        Uni::item(1)
            .map(|_: i32| -> i32 { panic!("mapper") })
            .subscribe(UniAssertSubscriber::create())
            .assert_failed_with_kind(|e| matches!(e, Error::CallbackPanicked(m) if m == "mapper"));
    }

    #[test]
    fn test_on_item_invoke() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        Uni::item("x")
            .on_item()
            .invoke(move |v| *sink.lock() = Some(*v))
            .subscribe(UniAssertSubscriber::create())
            .assert_item(&"x");
        assert_eq!(*seen.lock(), Some("x"));
    }

    #[test]
    fn test_on_failure_invoke_composite() {
        let ts = Uni::<i32>::failure(Failure::message("first"))
            .on_failure()
            .invoke(|_| panic!("second"))
            .subscribe(UniAssertSubscriber::create());
        let failure = ts.failure().unwrap();
        match failure.kind() {
            Some(Error::Composite(parts)) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[0].to_string(), "first");
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn test_recover_with_item() {
        Uni::<i32>::failure(Failure::message("boom"))
            .on_failure()
            .recover_with_item(|f| f.to_string().len() as i32)
            .subscribe(UniAssertSubscriber::create())
            .assert_item(&4);
    }

    #[test]
    fn test_recover_with_uni() {
        Uni::<i32>::failure(Failure::message("boom"))
            .on_failure()
            .recover_with_uni(|_| Uni::item(9))
            .subscribe(UniAssertSubscriber::create())
            .assert_item(&9);

        Uni::<i32>::failure(Failure::message("boom"))
            .on_failure()
            .recover_with_uni(|_| Uni::failure(Failure::message("again")))
            .subscribe(UniAssertSubscriber::create())
            .assert_failed_with_message("again");
    }

    #[test]
    fn test_cancel_reaches_recovery_uni() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cancelled);
        let ts = Uni::<i32>::failure(Failure::message("boom"))
            .on_failure()
            .recover_with_uni(move |_| {
                let counter = Arc::clone(&counter);
                Uni::never().on_cancellation().invoke(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .subscribe(UniAssertSubscriber::create());
        ts.cancel();
        ts.cancel();
        ts.assert_not_terminated();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_cancellation_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let ts = Uni::<i32>::never()
            .on_cancellation()
            .invoke(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe(UniAssertSubscriber::create());
        ts.cancel();
        ts.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_cancellation_not_called_after_item() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let ts = Uni::item(1)
            .on_cancellation()
            .invoke(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe(UniAssertSubscriber::create());
        ts.cancel();
        ts.assert_item(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_hook_runs_once_under_racing_failures() {
        for _ in 0..100 {
            let (slot, calls, ts) = counting_failure_hook();
            let raw = slot.lock().clone().unwrap();
            let racers: Vec<_> = (0..2)
                .map(|i| {
                    let raw = Arc::clone(&raw);
                    std::thread::spawn(move || raw.on_failure(Failure::message(format!("f{i}"))))
                })
                .collect();
            for racer in racers {
                racer.join().unwrap();
            }
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(ts.signal_count(), 1);
        }
    }

    #[test]
    fn test_failure_hook_skipped_after_cancel() {
        let (slot, calls, ts) = counting_failure_hook();
        ts.cancel();
        let raw = slot.lock().clone().unwrap();
        raw.on_failure(Failure::message("late"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        ts.assert_not_terminated();
    }

    #[test]
    fn test_recover_fallback_runs_once() {
        let slot: RawSlot = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let ts = Uni::from_publisher(RawPublisher {
            slot: Arc::clone(&slot),
        })
        .on_failure()
        .recover_with_item(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        })
        .subscribe(UniAssertSubscriber::create());

        let raw = slot.lock().clone().unwrap();
        raw.on_failure(Failure::message("first"));
        raw.on_failure(Failure::message("second"));
        ts.assert_item(&0);
        assert_eq!(ts.signal_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
