use std::sync::Arc;

use crate::error::Failure;
use crate::infrastructure::catch;
use crate::subscription::ImmediateSubscription;

use super::{Uni, UniPublisher, UniSubscriber};

fn resolve<T>(subscriber: &Arc<dyn UniSubscriber<T>>, outcome: Result<T, Failure>) {
    let subscription = Arc::new(ImmediateSubscription::new());
    subscriber.on_subscribe(subscription.clone());
    if subscription.is_cancelled() {
        return;
    }
    match outcome {
        Ok(item) => subscriber.on_item(item),
        Err(failure) => subscriber.on_failure(failure),
    }
}

pub(super) struct ItemPublisher<T>(pub(super) T);

impl<T: Clone + Send + Sync> UniPublisher<T> for ItemPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        resolve(&subscriber, Ok(self.0.clone()));
    }
}

pub(super) struct SupplierPublisher<F>(pub(super) F);

impl<T, F> UniPublisher<T> for SupplierPublisher<F>
where
    F: Fn() -> T + Send + Sync,
{
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        resolve(&subscriber, catch(&self.0));
    }
}

pub(super) struct FailurePublisher(pub(super) Failure);

impl<T> UniPublisher<T> for FailurePublisher {
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        resolve(&subscriber, Err(self.0.clone()));
    }
}

pub(super) struct NeverPublisher;

impl<T> UniPublisher<T> for NeverPublisher {
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        subscriber.on_subscribe(Arc::new(ImmediateSubscription::new()));
    }
}

pub(super) struct DeferredPublisher<F>(pub(super) F);

impl<T, F> UniPublisher<T> for DeferredPublisher<F>
where
    T: Send + 'static,
    F: Fn() -> Uni<T> + Send + Sync,
{
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        match catch(&self.0) {
            Ok(uni) => uni.subscribe_dyn(subscriber),
            Err(failure) => resolve(&subscriber, Err(failure)),
        }
    }
}
