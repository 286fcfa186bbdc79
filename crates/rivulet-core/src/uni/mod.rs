//! Uni: a single eventual value.
//!
//! A [`Uni`] resolves with exactly one item or one failure, or never
//! resolves. There is no backpressure: subscribing is the only request.
//! Like [`Multi`], a Uni is cold and re-runs its sources for every
//! subscription.

mod callback;
mod emitter;
mod operators;
mod sources;
pub(crate) mod stage;
mod to_multi;

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Failure;
use crate::multi::Multi;
use crate::subscription::{Cancellable, SubscriptionHandle};

pub use callback::UniCallback;
pub use emitter::UniEmitter;
pub use operators::{UniOnCancellation, UniOnFailure, UniOnItem};

/// Consumer capability for a Uni.
///
/// Receives `on_subscribe` exactly once, then at most one of `on_item` /
/// `on_failure`.
pub trait UniSubscriber<T>: Send + Sync {
    /// Receives the handle used to cancel.
    fn on_subscribe(&self, subscription: Arc<dyn Cancellable>);

    /// Receives the resolved item.
    fn on_item(&self, item: T);

    /// Receives the failure.
    fn on_failure(&self, failure: Failure);
}

/// Producer capability for a Uni.
pub trait UniPublisher<T>: Send + Sync {
    /// Starts a new, independent resolution for `subscriber`.
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<T>>);
}

/// A cold single-value computation.
pub struct Uni<T> {
    publisher: Arc<dyn UniPublisher<T>>,
}

impl<T> Clone for Uni<T> {
    fn clone(&self) -> Self {
        Self {
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<T> Debug for Uni<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uni").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Uni<T> {
    /// Wraps a custom producer.
    pub fn from_publisher<P>(publisher: P) -> Self
    where
        P: UniPublisher<T> + 'static,
    {
        Self {
            publisher: Arc::new(publisher),
        }
    }

    /// Resolves with a clone of `item`.
    pub fn item(item: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_publisher(sources::ItemPublisher(item))
    }

    /// Resolves with the value returned by `supplier`, called at each subscription.
    pub fn item_from<F>(supplier: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::from_publisher(sources::SupplierPublisher(supplier))
    }

    /// Fails with `failure`.
    #[must_use]
    pub fn failure(failure: Failure) -> Self {
        Self::from_publisher(sources::FailurePublisher(failure))
    }

    /// Never resolves.
    #[must_use]
    pub fn never() -> Self {
        Self::from_publisher(sources::NeverPublisher)
    }

    /// Calls `supplier` at each subscription and subscribes to its result.
    pub fn deferred<F>(supplier: F) -> Self
    where
        F: Fn() -> Uni<T> + Send + Sync + 'static,
    {
        Self::from_publisher(sources::DeferredPublisher(supplier))
    }

    /// Resolves through a [`UniEmitter`] handed to `consumer` at each subscription.
    pub fn emitter<F>(consumer: F) -> Self
    where
        F: Fn(UniEmitter<T>) + Send + Sync + 'static,
    {
        Self::from_publisher(emitter::EmitterPublisher::new(consumer))
    }

    /// Subscribes `subscriber` and returns it.
    pub fn subscribe<S>(&self, subscriber: Arc<S>) -> Arc<S>
    where
        S: UniSubscriber<T> + 'static,
    {
        self.publisher.subscribe(subscriber.clone());
        subscriber
    }

    pub(crate) fn subscribe_dyn(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        self.publisher.subscribe(subscriber);
    }

    /// Subscribes with an item callback. Failures go to the dropped-failure handler.
    pub fn subscribe_with<F>(&self, on_item: F) -> SubscriptionHandle
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_callback(callback::FnCallback::new(on_item))
    }

    /// Subscribes with a [`UniCallback`].
    pub fn subscribe_callback<C>(&self, callback: C) -> SubscriptionHandle
    where
        C: UniCallback<T>,
    {
        let subscriber = Arc::new(callback::CallbackSubscriber::new(callback));
        self.subscribe_dyn(subscriber.clone());
        SubscriptionHandle::new(subscriber)
    }

    /// Transforms the item. A panicking mapper fails the Uni.
    pub fn map<O, F>(&self, mapper: F) -> Uni<O>
    where
        O: Send + 'static,
        F: Fn(T) -> O + Send + Sync + 'static,
    {
        operators::map(self, mapper)
    }

    /// Traces every signal and cancellation under the `rivulet::log` target.
    #[must_use]
    pub fn log(&self, name: &str) -> Uni<T>
    where
        T: Debug,
    {
        operators::log(self, name)
    }

    /// Exposes the Uni as a Multi of zero or one item.
    ///
    /// The Uni is subscribed on the first request, not at subscribe time.
    #[must_use]
    pub fn to_multi(&self) -> Multi<T> {
        to_multi::to_multi(self)
    }

    /// Operators reacting to the item.
    #[must_use]
    pub fn on_item(&self) -> UniOnItem<T> {
        UniOnItem::new(self.clone())
    }

    /// Operators reacting to the failure.
    #[must_use]
    pub fn on_failure(&self) -> UniOnFailure<T> {
        UniOnFailure::new(self.clone())
    }

    /// Operators reacting to cancellation.
    #[must_use]
    pub fn on_cancellation(&self) -> UniOnCancellation<T> {
        UniOnCancellation::new(self.clone())
    }
}
