//! Recording subscribers for tests.
//!
//! [`AssertSubscriber`] and [`UniAssertSubscriber`] record every signal they
//! receive and expose fluent assertions. They request (or cancel) upfront
//! when subscribed, and can wait for signals produced on other threads.
//!
//! ```rust,ignore
//! use rivulet_core::multi::Multi;
//! use rivulet_core::testing::AssertSubscriber;
//!
//! let ts = Multi::range(0, 10).subscribe(AssertSubscriber::create(3));
//! ts.assert_received(&[0, 1, 2]).assert_not_terminated();
//! ts.request(7);
//! ts.assert_completed();
//! ```

#![allow(clippy::missing_panics_doc)]

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Failure};
use crate::multi::Subscriber;
use crate::subscription::{Cancellable, PipelineState, Subscription};
use crate::uni::UniSubscriber;

fn check_failure(failure: Option<&Failure>, predicate: impl FnOnce(&Failure) -> bool, what: &str) {
    match failure {
        Some(failure) => assert!(predicate(failure), "expected {what}, got failure {failure:?}"),
        None => panic!("expected {what}, but no failure was received"),
    }
}

// ---------------------------------------------------------------------------
// AssertSubscriber
// ---------------------------------------------------------------------------

struct Recorded<T> {
    items: Vec<T>,
    failures: Vec<Failure>,
    completions: usize,
    subscribed: bool,
    cancelled: bool,
}

/// Recording [`Subscriber`] for Multi pipelines.
pub struct AssertSubscriber<T> {
    upfront: u64,
    cancel_upfront: bool,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    recorded: Mutex<Recorded<T>>,
    signal: Condvar,
}

impl<T> AssertSubscriber<T> {
    fn with(upfront: u64, cancel_upfront: bool) -> Arc<Self> {
        Arc::new(Self {
            upfront,
            cancel_upfront,
            subscription: Mutex::new(None),
            recorded: Mutex::new(Recorded {
                items: Vec::new(),
                failures: Vec::new(),
                completions: 0,
                subscribed: false,
                cancelled: false,
            }),
            signal: Condvar::new(),
        })
    }

    /// Creates a subscriber requesting `requested` items when subscribed.
    ///
    /// Zero means no upfront request.
    #[must_use]
    pub fn create(requested: u64) -> Arc<Self> {
        Self::with(requested, false)
    }

    /// Creates a subscriber that cancels as soon as it is subscribed.
    #[must_use]
    pub fn create_cancelled() -> Arc<Self> {
        Self::with(0, true)
    }

    fn subscription(&self) -> Arc<dyn Subscription> {
        match self.subscription.lock().clone() {
            Some(subscription) => subscription,
            None => panic!("no subscription received"),
        }
    }

    /// Requests `n` more items.
    pub fn request(&self, n: u64) -> &Self {
        self.subscription().request(n);
        self
    }

    /// Cancels the subscription.
    pub fn cancel(&self) -> &Self {
        self.recorded.lock().cancelled = true;
        self.subscription().cancel();
        self
    }

    /// Returns the first failure received, if any.
    #[must_use]
    pub fn failure(&self) -> Option<Failure> {
        self.recorded.lock().failures.first().cloned()
    }

    /// Number of completion signals received.
    #[must_use]
    pub fn completion_count(&self) -> usize {
        self.recorded.lock().completions
    }

    /// Number of failure signals received.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.recorded.lock().failures.len()
    }

    /// Lifecycle state as seen by this subscriber.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        let recorded = self.recorded.lock();
        if !recorded.failures.is_empty() {
            PipelineState::Failed
        } else if recorded.completions > 0 {
            PipelineState::Completed
        } else if recorded.cancelled {
            PipelineState::Cancelled
        } else if recorded.subscribed {
            PipelineState::Subscribed
        } else {
            PipelineState::Unsubscribed
        }
    }

    /// Asserts that a subscription was received.
    pub fn assert_subscribed(&self) -> &Self {
        assert!(self.recorded.lock().subscribed, "expected a subscription");
        self
    }

    /// Asserts exactly one completion and no failure.
    pub fn assert_completed(&self) -> &Self {
        let recorded = self.recorded.lock();
        assert!(
            recorded.failures.is_empty(),
            "expected completion, got failures {:?}",
            recorded.failures
        );
        assert_eq!(recorded.completions, 1, "expected exactly one completion");
        self
    }

    /// Asserts that neither a completion nor a failure was received.
    pub fn assert_not_terminated(&self) -> &Self {
        let recorded = self.recorded.lock();
        assert!(
            recorded.failures.is_empty(),
            "unexpected failures {:?}",
            recorded.failures
        );
        assert_eq!(recorded.completions, 0, "unexpected completion");
        self
    }

    /// Asserts exactly one failure matching `predicate` and no completion.
    pub fn assert_failed_with_kind(&self, predicate: impl FnOnce(&Error) -> bool) -> &Self {
        self.assert_single_failure(|f| f.kind().is_some_and(predicate), "an engine error");
        self
    }

    /// Asserts exactly one failure whose message is `message`.
    pub fn assert_failed_with_message(&self, message: &str) -> &Self {
        self.assert_single_failure(|f| f.to_string() == message, message);
        self
    }

    /// Asserts exactly one failure of payload type `E`, optionally with `message`.
    pub fn assert_failed_with<E>(&self, message: Option<&str>) -> &Self
    where
        E: std::error::Error + 'static,
    {
        self.assert_single_failure(
            |f| f.is::<E>() && message.map_or(true, |m| f.to_string() == m),
            std::any::type_name::<E>(),
        );
        self
    }

    fn assert_single_failure(&self, predicate: impl FnOnce(&Failure) -> bool, what: &str) {
        let recorded = self.recorded.lock();
        assert_eq!(recorded.completions, 0, "expected failure, got completion");
        assert!(
            recorded.failures.len() <= 1,
            "expected one failure, got {:?}",
            recorded.failures
        );
        check_failure(recorded.failures.first(), predicate, what);
    }

    /// Waits up to `timeout` for a terminal signal.
    pub fn await_terminal(&self, timeout: Duration) -> &Self {
        let mut recorded = self.recorded.lock();
        let result = self.signal.wait_while_for(
            &mut recorded,
            |r| r.completions == 0 && r.failures.is_empty(),
            timeout,
        );
        assert!(!result.timed_out(), "no terminal signal within {timeout:?}");
        self
    }

    /// Waits up to `timeout` for completion.
    pub fn await_completion(&self, timeout: Duration) -> &Self {
        self.await_terminal(timeout).assert_completed()
    }

    /// Waits up to `timeout` until at least `count` items arrived.
    pub fn await_items(&self, count: usize, timeout: Duration) -> &Self {
        let mut recorded = self.recorded.lock();
        let result = self
            .signal
            .wait_while_for(&mut recorded, |r| r.items.len() < count, timeout);
        assert!(!result.timed_out(), "fewer than {count} items within {timeout:?}");
        self
    }
}

impl<T: Clone> AssertSubscriber<T> {
    /// Returns a copy of the items received so far.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.recorded.lock().items.clone()
    }
}

impl<T: PartialEq + Debug> AssertSubscriber<T> {
    /// Asserts the exact sequence of items received so far.
    pub fn assert_received(&self, expected: &[T]) -> &Self {
        assert_eq!(self.recorded.lock().items.as_slice(), expected);
        self
    }

    /// Asserts that no item was received.
    pub fn assert_has_not_received_any_item(&self) -> &Self {
        let recorded = self.recorded.lock();
        assert!(recorded.items.is_empty(), "unexpected items {:?}", recorded.items);
        self
    }
}

impl<T: Send> Subscriber<T> for AssertSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut slot = self.subscription.lock();
            if slot.is_some() {
                drop(slot);
                subscription.cancel();
                self.recorded
                    .lock()
                    .failures
                    .push(Error::AlreadySubscribed.into());
                self.signal.notify_all();
                return;
            }
            *slot = Some(Arc::clone(&subscription));
        }
        self.recorded.lock().subscribed = true;
        if self.cancel_upfront {
            self.recorded.lock().cancelled = true;
            subscription.cancel();
        } else if self.upfront > 0 {
            subscription.request(self.upfront);
        }
    }

    fn on_item(&self, item: T) {
        self.recorded.lock().items.push(item);
        self.signal.notify_all();
    }

    fn on_failure(&self, failure: Failure) {
        self.recorded.lock().failures.push(failure);
        self.signal.notify_all();
    }

    fn on_completion(&self) {
        self.recorded.lock().completions += 1;
        self.signal.notify_all();
    }
}

impl<T> Debug for AssertSubscriber<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let recorded = self.recorded.lock();
        f.debug_struct("AssertSubscriber")
            .field("items", &recorded.items.len())
            .field("failures", &recorded.failures)
            .field("completions", &recorded.completions)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// UniAssertSubscriber
// ---------------------------------------------------------------------------

struct UniRecorded<T> {
    item: Option<T>,
    failure: Option<Failure>,
    signals: usize,
    subscribed: bool,
    cancelled: bool,
}

/// Recording [`UniSubscriber`].
pub struct UniAssertSubscriber<T> {
    cancel_upfront: bool,
    subscription: Mutex<Option<Arc<dyn Cancellable>>>,
    recorded: Mutex<UniRecorded<T>>,
    signal: Condvar,
}

impl<T> UniAssertSubscriber<T> {
    fn with(cancel_upfront: bool) -> Arc<Self> {
        Arc::new(Self {
            cancel_upfront,
            subscription: Mutex::new(None),
            recorded: Mutex::new(UniRecorded {
                item: None,
                failure: None,
                signals: 0,
                subscribed: false,
                cancelled: false,
            }),
            signal: Condvar::new(),
        })
    }

    /// Creates a subscriber.
    #[must_use]
    pub fn create() -> Arc<Self> {
        Self::with(false)
    }

    /// Creates a subscriber that cancels as soon as it is subscribed.
    #[must_use]
    pub fn create_cancelled() -> Arc<Self> {
        Self::with(true)
    }

    /// Cancels the subscription.
    pub fn cancel(&self) -> &Self {
        let subscription = self.subscription.lock().clone();
        match subscription {
            Some(subscription) => {
                self.recorded.lock().cancelled = true;
                subscription.cancel();
            }
            None => panic!("no subscription received"),
        }
        self
    }

    /// Returns the failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<Failure> {
        self.recorded.lock().failure.clone()
    }

    /// Number of item and failure signals received. Anything above one is a bug.
    #[must_use]
    pub fn signal_count(&self) -> usize {
        self.recorded.lock().signals
    }

    /// Lifecycle state as seen by this subscriber.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        let recorded = self.recorded.lock();
        if recorded.failure.is_some() {
            PipelineState::Failed
        } else if recorded.item.is_some() {
            PipelineState::Completed
        } else if recorded.cancelled {
            PipelineState::Cancelled
        } else if recorded.subscribed {
            PipelineState::Subscribed
        } else {
            PipelineState::Unsubscribed
        }
    }

    /// Asserts that a subscription was received.
    pub fn assert_subscribed(&self) -> &Self {
        assert!(self.recorded.lock().subscribed, "expected a subscription");
        self
    }

    /// Asserts that nothing was resolved.
    pub fn assert_not_terminated(&self) -> &Self {
        let recorded = self.recorded.lock();
        assert_eq!(recorded.signals, 0, "unexpected signal, failure {:?}", recorded.failure);
        self
    }

    /// Asserts a single failure matching `predicate`.
    pub fn assert_failed_with_kind(&self, predicate: impl FnOnce(&Error) -> bool) -> &Self {
        let recorded = self.recorded.lock();
        assert_eq!(recorded.signals, 1, "expected exactly one signal");
        check_failure(
            recorded.failure.as_ref(),
            |f| f.kind().is_some_and(predicate),
            "an engine error",
        );
        self
    }

    /// Asserts a single failure whose message is `message`.
    pub fn assert_failed_with_message(&self, message: &str) -> &Self {
        let recorded = self.recorded.lock();
        assert_eq!(recorded.signals, 1, "expected exactly one signal");
        check_failure(recorded.failure.as_ref(), |f| f.to_string() == message, message);
        self
    }

    /// Waits up to `timeout` for the item or failure.
    pub fn await_item(&self, timeout: Duration) -> &Self {
        let mut recorded = self.recorded.lock();
        let result = self
            .signal
            .wait_while_for(&mut recorded, |r| r.signals == 0, timeout);
        assert!(!result.timed_out(), "no signal within {timeout:?}");
        self
    }
}

impl<T: Clone> UniAssertSubscriber<T> {
    /// Returns the item, if resolved.
    #[must_use]
    pub fn item(&self) -> Option<T> {
        self.recorded.lock().item.clone()
    }
}

impl<T: PartialEq + Debug> UniAssertSubscriber<T> {
    /// Asserts the Uni resolved once, with `expected`.
    pub fn assert_item(&self, expected: &T) -> &Self {
        let recorded = self.recorded.lock();
        assert!(
            recorded.failure.is_none(),
            "expected an item, got failure {:?}",
            recorded.failure
        );
        assert_eq!(recorded.signals, 1, "expected exactly one signal");
        assert_eq!(recorded.item.as_ref(), Some(expected));
        self
    }
}

impl<T: Send> UniSubscriber<T> for UniAssertSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Cancellable>) {
        {
            let mut slot = self.subscription.lock();
            if slot.is_some() {
                drop(slot);
                subscription.cancel();
                let mut recorded = self.recorded.lock();
                recorded.failure = Some(Error::AlreadySubscribed.into());
                recorded.signals += 1;
                return;
            }
            *slot = Some(Arc::clone(&subscription));
        }
        self.recorded.lock().subscribed = true;
        if self.cancel_upfront {
            self.recorded.lock().cancelled = true;
            subscription.cancel();
        }
    }

    fn on_item(&self, item: T) {
        let mut recorded = self.recorded.lock();
        recorded.signals += 1;
        if recorded.item.is_none() {
            recorded.item = Some(item);
        }
        drop(recorded);
        self.signal.notify_all();
    }

    fn on_failure(&self, failure: Failure) {
        let mut recorded = self.recorded.lock();
        recorded.signals += 1;
        recorded.failure.get_or_insert(failure);
        drop(recorded);
        self.signal.notify_all();
    }
}

impl<T> Debug for UniAssertSubscriber<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let recorded = self.recorded.lock();
        f.debug_struct("UniAssertSubscriber")
            .field("resolved", &recorded.item.is_some())
            .field("failure", &recorded.failure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::multi::Multi;
    use crate::uni::Uni;

    #[test]
    fn test_states() {
        let ts = AssertSubscriber::<i64>::create(0);
        assert_eq!(ts.state(), PipelineState::Unsubscribed);

        let ts = Multi::range(0, 2).subscribe(ts);
        assert_eq!(ts.state(), PipelineState::Subscribed);
        ts.request(5);
        assert_eq!(ts.state(), PipelineState::Completed);

        let ts = Multi::<i64>::never().subscribe(AssertSubscriber::create(1));
        ts.cancel();
        assert_eq!(ts.state(), PipelineState::Cancelled);

        let ts = Uni::<i32>::failure(Failure::message("x")).subscribe(UniAssertSubscriber::create());
        assert_eq!(ts.state(), PipelineState::Failed);
    }

    #[test]
    fn test_second_subscription_is_recorded_as_failure() {
        let ts = AssertSubscriber::<i64>::create(1);
        Multi::<i64>::never().subscribe(Arc::clone(&ts));
        Multi::<i64>::never().subscribe(Arc::clone(&ts));
        ts.assert_failed_with_kind(|e| matches!(e, Error::AlreadySubscribed));
    }

    #[test]
    fn test_await_items_from_other_thread() {
        let ts = Multi::<i32>::emitter(|e| {
            thread::spawn(move || {
                for i in 0..3 {
                    e.emit(i);
                }
                e.complete();
            });
        })
        .subscribe(AssertSubscriber::create(10));
        ts.await_items(3, Duration::from_secs(5))
            .await_completion(Duration::from_secs(5))
            .assert_received(&[0, 1, 2]);
        assert_eq!(ts.items(), vec![0, 1, 2]);
    }

    #[test]
    fn test_assert_failed_with_type() {
        Multi::<i32>::failure(Failure::new(std::io::Error::other("disk")))
            .subscribe(AssertSubscriber::create(1))
            .assert_failed_with::<std::io::Error>(Some("disk"));
    }
}
