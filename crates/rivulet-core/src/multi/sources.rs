//! Built-in Multi sources.

use std::iter::Peekable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Failure};
use crate::infrastructure::catch;
use crate::subscription::{
    Cancellable, Demand, ImmediateSubscription, Subscription, TerminalGuard, TerminalKind,
};

use super::{Multi, Publisher, Subscriber};

/// Iterator feeding an [`IterSubscription`]. An `Err` element fails the stream.
pub(crate) type ItemIter<T> = Box<dyn Iterator<Item = Result<T, Failure>> + Send>;

pub(crate) fn complete_immediately<T>(subscriber: &Arc<dyn Subscriber<T>>) {
    let subscription = Arc::new(ImmediateSubscription::new());
    subscriber.on_subscribe(subscription.clone());
    if !subscription.is_cancelled() {
        subscriber.on_completion();
    }
}

pub(crate) fn fail_immediately<T>(subscriber: &Arc<dyn Subscriber<T>>, failure: Failure) {
    let subscription = Arc::new(ImmediateSubscription::new());
    subscriber.on_subscribe(subscription.clone());
    if subscription.is_cancelled() {
        tracing::debug!(%failure, "subscriber cancelled before failure delivery");
    } else {
        subscriber.on_failure(failure);
    }
}

// ---------------------------------------------------------------------------
// Iterator sources
// ---------------------------------------------------------------------------

pub(crate) struct IterPublisher<T> {
    factory: Box<dyn Fn() -> ItemIter<T> + Send + Sync>,
}

impl<T: Send + 'static> IterPublisher<T> {
    /// Re-iterates a clone of `items` for every subscription.
    pub(crate) fn new<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self {
            factory: Box::new(move || -> ItemIter<T> {
                Box::new(items.clone().into_iter().map(Ok))
            }),
        }
    }

    /// Emits `iter` for the first subscription only.
    ///
    /// Used for continuations that are built per subscription and
    /// subscribed exactly once.
    pub(crate) fn once<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<T, Failure>> + Send + 'static,
    {
        let slot = Mutex::new(Some(iter));
        Self {
            factory: Box::new(move || -> ItemIter<T> {
                match slot.lock().take() {
                    Some(iter) => Box::new(iter),
                    None => Box::new(std::iter::once(Err(Error::AlreadySubscribed.into()))),
                }
            }),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for IterPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let opened = catch(|| {
            let mut iter = (self.factory)().peekable();
            let exhausted = iter.peek().is_none();
            (iter, exhausted)
        });
        let iter = match opened {
            Ok((_, true)) => {
                complete_immediately(&subscriber);
                return;
            }
            Ok((iter, false)) => iter,
            Err(failure) => {
                fail_immediately(&subscriber, failure);
                return;
            }
        };
        let subscription = Arc::new(IterSubscription {
            downstream: subscriber,
            iter: Mutex::new(Some(iter)),
            demand: Demand::new(),
            guard: TerminalGuard::new(),
            cancelled: AtomicBool::new(false),
        });
        subscription.downstream.on_subscribe(subscription.clone());
    }
}

/// Builds a one-shot Multi from items that may be missing.
///
/// A `None` element fails the stream with a null reference; items before
/// it stay delivered.
pub(crate) fn from_nullable<T, I>(items: I, context: &'static str) -> Multi<T>
where
    T: Send + 'static,
    I: IntoIterator,
    I::Item: Into<Option<T>>,
    I::IntoIter: Send + 'static,
{
    let iter = items
        .into_iter()
        .map(move |item| item.into().ok_or_else(|| Failure::null_reference(context)));
    Multi::from_publisher(IterPublisher::once(iter))
}

/// Builds a one-shot Multi emitting a single item.
pub(crate) fn single<T: Send + 'static>(item: T) -> Multi<T> {
    Multi::from_publisher(IterPublisher::once(std::iter::once(Ok(item))))
}

struct IterSubscription<T> {
    downstream: Arc<dyn Subscriber<T>>,
    /// Taken out while user iterator code runs.
    iter: Mutex<Option<Peekable<ItemIter<T>>>>,
    demand: Demand,
    guard: TerminalGuard,
    cancelled: AtomicBool,
}

impl<T: Send + 'static> IterSubscription<T> {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn complete(&self) {
        if self.guard.try_close(TerminalKind::Completion) && !self.is_cancelled() {
            self.downstream.on_completion();
        }
    }

    fn fail(&self, failure: Failure) {
        if self.guard.try_close(TerminalKind::Failure) && !self.is_cancelled() {
            self.downstream.on_failure(failure);
        }
    }

    /// Runs `step` against the iterator without holding the lock. A panic
    /// inside the iterator fails the stream and yields `None`.
    fn advance<R>(&self, step: impl FnOnce(&mut Peekable<ItemIter<T>>) -> R) -> Option<R> {
        let mut iter = self.iter.lock().take()?;
        let outcome = catch(|| step(&mut iter));
        *self.iter.lock() = Some(iter);
        match outcome {
            Ok(value) => Some(value),
            Err(failure) => {
                self.fail(failure);
                None
            }
        }
    }

    /// Emits while demand lasts. Only the caller that raised demand from
    /// zero runs this loop; re-entrant requests just add to the counter.
    fn drain(&self) {
        let mut emitted = 0u64;
        let mut requested = self.demand.pending();
        loop {
            while emitted != requested {
                if self.is_cancelled() {
                    return;
                }
                let Some(next) = self.advance(|iter| iter.next()) else {
                    return;
                };
                match next {
                    None => {
                        self.complete();
                        return;
                    }
                    Some(Err(failure)) => {
                        self.fail(failure);
                        return;
                    }
                    Some(Ok(item)) => {
                        self.downstream.on_item(item);
                        emitted += 1;
                    }
                }
                if self.is_cancelled() {
                    return;
                }
                let Some(exhausted) = self.advance(|iter| iter.peek().is_none()) else {
                    return;
                };
                if exhausted {
                    self.complete();
                    return;
                }
            }

            requested = self.demand.pending();
            if requested == emitted {
                requested = self.demand.produced(emitted);
                if requested == 0 {
                    return;
                }
                emitted = 0;
            }
        }
    }
}

impl<T: Send + 'static> Cancellable for IterSubscription<T> {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _ = self.guard.try_close(TerminalKind::Cancellation);
    }
}

impl<T: Send + 'static> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.cancelled.store(true, Ordering::Release);
            if self.guard.try_close(TerminalKind::Failure) {
                self.downstream.on_failure(Error::InvalidDemand(n).into());
            }
            return;
        }
        if self.demand.add(n) == 0 {
            self.drain();
        }
    }
}

// ---------------------------------------------------------------------------
// Immediate sources
// ---------------------------------------------------------------------------

pub(crate) struct EmptyPublisher;

impl<T: Send + 'static> Publisher<T> for EmptyPublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        complete_immediately(&subscriber);
    }
}

pub(crate) struct FailurePublisher(pub(crate) Failure);

impl<T: Send + 'static> Publisher<T> for FailurePublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        fail_immediately(&subscriber, self.0.clone());
    }
}

pub(crate) struct NeverPublisher;

impl<T: Send + 'static> Publisher<T> for NeverPublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        subscriber.on_subscribe(Arc::new(ImmediateSubscription::new()));
    }
}

// ---------------------------------------------------------------------------
// Deferred
// ---------------------------------------------------------------------------

/// Resolves the actual source at subscribe time.
///
/// A supplier returning `None` fails the subscriber with a null reference;
/// a panicking supplier fails it with the captured panic.
pub(crate) struct DeferredPublisher<T> {
    supplier: Box<dyn Fn() -> Option<Multi<T>> + Send + Sync>,
}

impl<T: Send + 'static> DeferredPublisher<T> {
    pub(crate) fn new<F>(supplier: F) -> Self
    where
        F: Fn() -> Option<Multi<T>> + Send + Sync + 'static,
    {
        Self {
            supplier: Box::new(supplier),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for DeferredPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        match catch(|| (self.supplier)()) {
            Ok(Some(multi)) => multi.subscribe_dyn(subscriber),
            Ok(None) => fail_immediately(
                &subscriber,
                Failure::null_reference("deferred supplier produced no Multi"),
            ),
            Err(failure) => fail_immediately(&subscriber, failure),
        }
    }
}
