//! Sequential concatenation of sources.
//!
//! This is the engine behind every completion substitution: the upstream
//! is phase 0 and the continuation is phase 1. Each phase gets its own
//! subscriber, and only the first completion of the current phase advances
//! to the next one, so a rogue source completing twice cannot skip a phase.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Failure};
use crate::subscription::arbiter::Arbiter;
use crate::subscription::{Cancellable, Subscription, TerminalKind};

use super::sources::complete_immediately;
use super::stage::SignalGate;
use super::{Multi, Publisher, Subscriber};

pub(crate) struct ConcatPublisher<T> {
    sources: Arc<[Multi<T>]>,
}

impl<T> ConcatPublisher<T> {
    pub(crate) fn new(sources: Vec<Multi<T>>) -> Self {
        Self {
            sources: Arc::from(sources),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for ConcatPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        if self.sources.is_empty() {
            complete_immediately(&subscriber);
            return;
        }
        let stage = Arc::new(ConcatStage {
            gate: SignalGate::new(subscriber),
            arbiter: Arbiter::new(),
            sources: Arc::clone(&self.sources),
            phase: AtomicUsize::new(0),
        });
        stage.gate.downstream().on_subscribe(stage.clone());
        stage.subscribe_phase(0);
    }
}

struct ConcatStage<T> {
    gate: SignalGate<T>,
    arbiter: Arbiter,
    sources: Arc<[Multi<T>]>,
    phase: AtomicUsize,
}

impl<T: Send + 'static> ConcatStage<T> {
    fn subscribe_phase(self: &Arc<Self>, index: usize) {
        if self.gate.is_cancelled() {
            return;
        }
        self.sources[index].subscribe_dyn(Arc::new(PhaseSubscriber {
            stage: Arc::clone(self),
            index,
        }));
    }

    fn is_current(&self, index: usize) -> bool {
        self.phase.load(Ordering::Acquire) == index
    }

    fn advance(self: &Arc<Self>, from: usize) {
        if self
            .phase
            .compare_exchange(from, from + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(phase = from, "ignoring duplicate completion");
            return;
        }
        if from + 1 == self.sources.len() {
            if self.gate.complete() {
                self.arbiter.release();
            }
        } else {
            self.subscribe_phase(from + 1);
        }
    }

    fn fail(&self, failure: Failure) {
        if self.gate.fail(failure) {
            self.arbiter.release();
        }
    }
}

impl<T: Send + 'static> Cancellable for ConcatStage<T> {
    fn cancel(&self) {
        if self.gate.mark_cancelled() {
            self.arbiter.cancel();
        }
    }
}

impl<T: Send + 'static> Subscription for ConcatStage<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            if self.gate.claim(TerminalKind::Failure) {
                self.arbiter.cancel();
                self.gate.deliver_failure(Error::InvalidDemand(n).into());
            }
            return;
        }
        self.arbiter.request(n);
    }
}

struct PhaseSubscriber<T> {
    stage: Arc<ConcatStage<T>>,
    index: usize,
}

impl<T: Send + 'static> Subscriber<T> for PhaseSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.stage.is_current(self.index) {
            self.stage.arbiter.switch_to(subscription);
        } else {
            subscription.cancel();
        }
    }

    fn on_item(&self, item: T) {
        if self.stage.is_current(self.index) && self.stage.gate.is_active() {
            self.stage.arbiter.produced(1);
            self.stage.gate.emit(item);
        }
    }

    fn on_failure(&self, failure: Failure) {
        if self.stage.is_current(self.index) {
            self.stage.fail(failure);
        }
    }

    fn on_completion(&self) {
        self.stage.advance(self.index);
    }
}
