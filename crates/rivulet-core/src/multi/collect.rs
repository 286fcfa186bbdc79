use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Failure;
use crate::subscription::upstream::{SlotSet, UpstreamSlot};
use crate::subscription::{Cancellable, Subscription, TerminalGuard, TerminalKind, UNBOUNDED};
use crate::uni::{Uni, UniPublisher, UniSubscriber};

use super::{Multi, Subscriber};

pub(super) fn collect_items<T: Send + 'static>(upstream: &Multi<T>) -> Uni<Vec<T>> {
    Uni::from_publisher(CollectPublisher {
        upstream: upstream.clone(),
    })
}

struct CollectPublisher<T> {
    upstream: Multi<T>,
}

impl<T: Send + 'static> UniPublisher<Vec<T>> for CollectPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<Vec<T>>>) {
        let stage = Arc::new(CollectStage {
            downstream: subscriber,
            items: Mutex::new(Vec::new()),
            upstream: UpstreamSlot::new(),
            guard: TerminalGuard::new(),
        });
        stage.downstream.on_subscribe(stage.clone());
        if stage.guard.is_open() {
            self.upstream.subscribe_dyn(stage);
        }
    }
}

/// Accumulates every item with unbounded demand and resolves on completion.
struct CollectStage<T> {
    downstream: Arc<dyn UniSubscriber<Vec<T>>>,
    items: Mutex<Vec<T>>,
    upstream: UpstreamSlot<dyn Subscription>,
    guard: TerminalGuard,
}

impl<T: Send + 'static> Subscriber<T> for CollectStage<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(Arc::clone(&subscription)) == SlotSet::Accepted {
            subscription.request(UNBOUNDED);
        }
    }

    fn on_item(&self, item: T) {
        if self.guard.is_open() {
            self.items.lock().push(item);
        }
    }

    fn on_failure(&self, failure: Failure) {
        if self.guard.try_close(TerminalKind::Failure) {
            self.upstream.release();
            self.items.lock().clear();
            self.downstream.on_failure(failure);
        }
    }

    fn on_completion(&self) {
        if self.guard.try_close(TerminalKind::Completion) {
            self.upstream.release();
            let items = std::mem::take(&mut *self.items.lock());
            self.downstream.on_item(items);
        }
    }
}

impl<T: Send + 'static> Cancellable for CollectStage<T> {
    fn cancel(&self) {
        if self.guard.try_close(TerminalKind::Cancellation) {
            self.upstream.cancel();
            self.items.lock().clear();
        }
    }
}
