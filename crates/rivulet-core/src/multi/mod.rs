//! Multi: a backpressured stream of items.
//!
//! A [`Multi`] emits zero or more items followed by exactly one terminal
//! signal. It is cold: nothing happens until [`Multi::subscribe`] is called,
//! and every subscription builds a fresh chain of operator stages.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rivulet_core::multi::Multi;
//! use rivulet_core::testing::AssertSubscriber;
//!
//! let multi = Multi::range(1, 5)
//!     .map(|n| n * 10)
//!     .on_completion()
//!     .continue_with(vec![99]);
//!
//! multi
//!     .subscribe(AssertSubscriber::create(10))
//!     .assert_completed()
//!     .assert_received(&[10, 20, 30, 40, 99]);
//! ```

mod callback;
mod collect;
mod concat;
mod emitter;
mod on_completion;
mod on_failure;
mod operators;
mod sources;
pub(crate) mod stage;

use std::fmt::Debug;
use std::sync::Arc;

use crate::config::EmitterConfig;
use crate::error::Failure;
use crate::subscription::{Subscription, SubscriptionHandle};
use crate::uni::Uni;

pub use callback::MultiCallback;
pub use emitter::MultiEmitter;
pub use on_completion::MultiOnCompletion;
pub use on_failure::MultiOnFailure;
pub use operators::{MultiOnCancellation, MultiOnItem, MultiOnSubscription};

/// Consumer capability for a Multi.
///
/// Receives `on_subscribe` exactly once, then any number of `on_item`
/// calls, then at most one of `on_failure` / `on_completion`.
pub trait Subscriber<T>: Send + Sync {
    /// Receives the subscription used to request items and cancel.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// Receives an item. Never called beyond the requested demand.
    fn on_item(&self, item: T);

    /// Receives the terminal failure.
    fn on_failure(&self, failure: Failure);

    /// Receives the terminal completion.
    fn on_completion(&self);
}

/// Producer capability for a Multi.
pub trait Publisher<T>: Send + Sync {
    /// Starts a new, independent subscription for `subscriber`.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// A cold, backpressured stream of items.
pub struct Multi<T> {
    publisher: Arc<dyn Publisher<T>>,
}

impl<T> Clone for Multi<T> {
    fn clone(&self) -> Self {
        Self {
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<T> std::fmt::Debug for Multi<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multi").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Multi<T> {
    // --- Sources ---

    /// Wraps a custom producer.
    pub fn from_publisher<P>(publisher: P) -> Self
    where
        P: Publisher<T> + 'static,
    {
        Self {
            publisher: Arc::new(publisher),
        }
    }

    /// Emits the items of `items`, honouring demand.
    ///
    /// The iterable is cloned for every subscription.
    pub fn items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_publisher(sources::IterPublisher::new(items))
    }

    /// Completes immediately.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_publisher(sources::EmptyPublisher)
    }

    /// Fails immediately with `failure`.
    #[must_use]
    pub fn failure(failure: Failure) -> Self {
        Self::from_publisher(sources::FailurePublisher(failure))
    }

    /// Never emits anything.
    #[must_use]
    pub fn never() -> Self {
        Self::from_publisher(sources::NeverPublisher)
    }

    /// Calls `supplier` at each subscription and subscribes to its result.
    pub fn deferred<F>(supplier: F) -> Self
    where
        F: Fn() -> Multi<T> + Send + Sync + 'static,
    {
        Self::from_publisher(sources::DeferredPublisher::new(move || Some(supplier())))
    }

    /// Creates a Multi driven imperatively through a [`MultiEmitter`].
    ///
    /// `consumer` runs once per subscription, after the subscriber received
    /// its subscription. Items emitted without demand are buffered.
    pub fn emitter<F>(consumer: F) -> Self
    where
        F: Fn(MultiEmitter<T>) + Send + Sync + 'static,
    {
        Self::emitter_with_config(EmitterConfig::default(), consumer)
    }

    /// Like [`emitter`](Self::emitter) with an explicit backpressure configuration.
    pub fn emitter_with_config<F>(config: EmitterConfig, consumer: F) -> Self
    where
        F: Fn(MultiEmitter<T>) + Send + Sync + 'static,
    {
        Self::from_publisher(emitter::EmitterPublisher::new(config, consumer))
    }

    /// Subscribes to each source in turn, once the previous one completed.
    #[must_use]
    pub fn concat(sources: Vec<Multi<T>>) -> Self {
        Self::from_publisher(concat::ConcatPublisher::new(sources))
    }

    // --- Subscription ---

    /// Subscribes `subscriber` and returns it.
    pub fn subscribe<S>(&self, subscriber: Arc<S>) -> Arc<S>
    where
        S: Subscriber<T> + 'static,
    {
        self.publisher.subscribe(subscriber.clone());
        subscriber
    }

    pub(crate) fn subscribe_dyn(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.publisher.subscribe(subscriber);
    }

    /// Subscribes with an item callback and unbounded demand.
    ///
    /// Failures go to the dropped-failure handler.
    pub fn subscribe_with<F>(&self, on_item: F) -> SubscriptionHandle
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_callback(callback::FnCallback::new(on_item))
    }

    /// Subscribes with a [`MultiCallback`] and unbounded demand.
    pub fn subscribe_callback<C>(&self, callback: C) -> SubscriptionHandle
    where
        C: MultiCallback<T>,
    {
        let subscriber = Arc::new(callback::CallbackSubscriber::new(callback));
        self.subscribe_dyn(subscriber.clone());
        SubscriptionHandle::new(subscriber)
    }

    // --- Operators ---

    /// Transforms each item.
    ///
    /// A panicking mapper fails the stream and cancels upstream.
    pub fn map<O, F>(&self, mapper: F) -> Multi<O>
    where
        O: Send + 'static,
        F: Fn(T) -> O + Send + Sync + 'static,
    {
        operators::map(self, mapper)
    }

    /// Keeps the items matching `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Multi<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        operators::filter(self, predicate)
    }

    /// Emits the first `count` items, then cancels upstream and completes.
    #[must_use]
    pub fn take(&self, count: u64) -> Multi<T> {
        operators::take(self, count)
    }

    /// Traces every signal and control call under the `rivulet::log` target.
    #[must_use]
    pub fn log(&self, name: &str) -> Multi<T>
    where
        T: Debug,
    {
        operators::log(self, name)
    }

    /// Collects all items into a single value.
    #[must_use]
    pub fn collect_items(&self) -> Uni<Vec<T>> {
        collect::collect_items(self)
    }

    // --- Operator groups ---

    /// Operators reacting to items.
    #[must_use]
    pub fn on_item(&self) -> MultiOnItem<T> {
        MultiOnItem::new(self.clone())
    }

    /// Operators reacting to natural completion.
    #[must_use]
    pub fn on_completion(&self) -> MultiOnCompletion<T> {
        MultiOnCompletion::new(self.clone())
    }

    /// Operators reacting to failures.
    #[must_use]
    pub fn on_failure(&self) -> MultiOnFailure<T> {
        MultiOnFailure::new(self.clone())
    }

    /// Operators reacting to the upstream subscription.
    #[must_use]
    pub fn on_subscription(&self) -> MultiOnSubscription<T> {
        MultiOnSubscription::new(self.clone())
    }

    /// Operators reacting to cancellation.
    #[must_use]
    pub fn on_cancellation(&self) -> MultiOnCancellation<T> {
        MultiOnCancellation::new(self.clone())
    }
}

impl Multi<i64> {
    /// Emits the integers in `start..end`.
    #[must_use]
    pub fn range(start: i64, end: i64) -> Self {
        Self::items(start..end)
    }
}
