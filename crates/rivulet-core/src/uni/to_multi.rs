use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Error, Failure};
use crate::multi::stage::SignalGate;
use crate::multi::{Multi, Publisher, Subscriber};
use crate::subscription::upstream::UpstreamSlot;
use crate::subscription::{Cancellable, Subscription, TerminalKind};

use super::{Uni, UniSubscriber};

pub(super) fn to_multi<T: Send + 'static>(uni: &Uni<T>) -> Multi<T> {
    Multi::from_publisher(UniToMulti { uni: uni.clone() })
}

struct UniToMulti<T> {
    uni: Uni<T>,
}

impl<T: Send + 'static> Publisher<T> for UniToMulti<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let stage = Arc::new_cyclic(|this| ToMultiStage {
            gate: SignalGate::new(subscriber),
            upstream: UpstreamSlot::new(),
            started: AtomicBool::new(false),
            uni: self.uni.clone(),
            this: this.clone(),
        });
        stage.gate.downstream().on_subscribe(stage.clone());
    }
}

/// Subscribes to the Uni on the first request and replays its outcome as
/// at most one item followed by completion.
struct ToMultiStage<T> {
    gate: SignalGate<T>,
    upstream: UpstreamSlot<dyn Cancellable>,
    started: AtomicBool,
    uni: Uni<T>,
    this: Weak<Self>,
}

impl<T: Send + 'static> Cancellable for ToMultiStage<T> {
    fn cancel(&self) {
        if self.gate.mark_cancelled() {
            self.upstream.cancel();
        }
    }
}

impl<T: Send + 'static> Subscription for ToMultiStage<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            if self.gate.claim(TerminalKind::Failure) {
                self.upstream.cancel();
                self.gate.deliver_failure(Error::InvalidDemand(n).into());
            }
            return;
        }
        if self.started.swap(true, Ordering::AcqRel) || self.gate.is_cancelled() {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            self.uni.subscribe_dyn(this);
        }
    }
}

impl<T: Send + 'static> UniSubscriber<T> for ToMultiStage<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Cancellable>) {
        let _ = self.upstream.set(subscription);
    }

    fn on_item(&self, item: T) {
        self.upstream.release();
        self.gate.emit(item);
        self.gate.complete();
    }

    fn on_failure(&self, failure: Failure) {
        self.upstream.release();
        self.gate.fail(failure);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::testing::AssertSubscriber;

    #[test]
    fn test_item_then_completion() {
        Uni::item(3)
            .to_multi()
            .subscribe(AssertSubscriber::create(1))
            .assert_received(&[3])
            .assert_completed();
    }

    #[test]
    fn test_failure_propagates() {
        Uni::<i32>::failure(Failure::message("boom"))
            .to_multi()
            .subscribe(AssertSubscriber::create(1))
            .assert_failed_with_message("boom");
    }

    #[test]
    fn test_subscribes_on_first_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let ts = Uni::item_from(move || counter.fetch_add(1, Ordering::SeqCst))
            .to_multi()
            .subscribe(AssertSubscriber::create(0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        ts.assert_subscribed().assert_not_terminated();

        ts.request(1);
        ts.request(1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        ts.assert_received(&[0]).assert_completed();
    }

    #[test]
    fn test_cancel_reaches_uni() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cancelled);
        let ts = Uni::<i32>::never()
            .on_cancellation()
            .invoke(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .to_multi()
            .subscribe(AssertSubscriber::create(1));
        ts.cancel();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
