//! Operators reacting to failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Failure};
use crate::infrastructure::catch;
use crate::subscription::arbiter::Arbiter;
use crate::subscription::{Cancellable, Subscription, TerminalKind};

use super::sources::single;
use super::stage::{SignalGate, StageCore, StageHooks, StagePublisher};
use super::{Multi, Publisher, Subscriber};

/// Operators reacting to failures. Created by [`Multi::on_failure`].
#[derive(Debug)]
pub struct MultiOnFailure<T> {
    upstream: Multi<T>,
}

impl<T: Send + 'static> MultiOnFailure<T> {
    pub(super) fn new(upstream: Multi<T>) -> Self {
        Self { upstream }
    }

    /// Runs `callback` with the failure before forwarding it.
    ///
    /// A panicking callback yields a composite failure, original first.
    pub fn invoke<F>(self, callback: F) -> Multi<T>
    where
        F: Fn(&Failure) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        Multi::from_publisher(StagePublisher::new(self.upstream, move || {
            InvokeFailureHooks {
                callback: Arc::clone(&callback),
            }
        }))
    }

    /// Replaces the failure with one last item, then completes.
    pub fn recover_with_item<F>(self, fallback: F) -> Multi<T>
    where
        F: Fn(&Failure) -> T + Send + Sync + 'static,
    {
        self.recover_with_multi(move |failure| single(fallback(failure)))
    }

    /// Swallows the failure and completes.
    #[must_use]
    pub fn recover_with_completion(self) -> Multi<T> {
        self.recover_with_multi(|_| Multi::empty())
    }

    /// Switches to the Multi returned by `fallback` when the upstream fails.
    ///
    /// Outstanding demand carries over to the fallback. Recovery happens
    /// once; a failure of the fallback is forwarded.
    pub fn recover_with_multi<F>(self, fallback: F) -> Multi<T>
    where
        F: Fn(&Failure) -> Multi<T> + Send + Sync + 'static,
    {
        Multi::from_publisher(RecoverPublisher {
            upstream: self.upstream,
            fallback: Arc::new(fallback),
        })
    }
}

struct InvokeFailureHooks<F> {
    callback: Arc<F>,
}

impl<T, F> StageHooks<T, T> for InvokeFailureHooks<F>
where
    T: Send + 'static,
    F: Fn(&Failure) + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<StageCore<T>>) {
        core.emit(item);
    }

    fn on_failure(&self, failure: Failure, core: &Arc<StageCore<T>>) {
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

// ---------------------------------------------------------------------------
// recover_with_multi
// ---------------------------------------------------------------------------

type Fallback<T> = dyn Fn(&Failure) -> Multi<T> + Send + Sync;

struct RecoverPublisher<T> {
    upstream: Multi<T>,
    fallback: Arc<Fallback<T>>,
}

impl<T: Send + 'static> Publisher<T> for RecoverPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let stage = Arc::new(RecoverStage {
            gate: SignalGate::new(subscriber),
            arbiter: Arbiter::new(),
            switched: AtomicBool::new(false),
            fallback: Arc::clone(&self.fallback),
        });
        stage.gate.downstream().on_subscribe(stage.clone());
        self.upstream.subscribe_dyn(Arc::new(RecoverPhase {
            stage,
            is_fallback: false,
        }));
    }
}

struct RecoverStage<T> {
    gate: SignalGate<T>,
    arbiter: Arbiter,
    switched: AtomicBool,
    fallback: Arc<Fallback<T>>,
}

impl<T: Send + 'static> RecoverStage<T> {
    fn fail(&self, failure: Failure) {
        if self.gate.fail(failure) {
            self.arbiter.release();
        }
    }

    fn complete(&self) {
        if self.gate.complete() {
            self.arbiter.release();
        }
    }

    fn recover(self: &Arc<Self>, failure: Failure) {
        if self.switched.swap(true, Ordering::AcqRel) {
            self.fail(failure);
            return;
        }
        if self.gate.is_cancelled() {
            return;
        }
        match catch(|| (self.fallback)(&failure)) {
            Ok(fallback) => fallback.subscribe_dyn(Arc::new(RecoverPhase {
                stage: Arc::clone(self),
                is_fallback: true,
            })),
            Err(secondary) => self.fail(Failure::composite(failure, secondary)),
        }
    }
}

impl<T: Send + 'static> Cancellable for RecoverStage<T> {
    fn cancel(&self) {
        if self.gate.mark_cancelled() {
            self.arbiter.cancel();
        }
    }
}

impl<T: Send + 'static> Subscription for RecoverStage<T> {
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

struct RecoverPhase<T> {
    stage: Arc<RecoverStage<T>>,
    is_fallback: bool,
}

impl<T: Send + 'static> Subscriber<T> for RecoverPhase<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.stage.arbiter.switch_to(subscription);
    }

    fn on_item(&self, item: T) {
        if self.stage.gate.is_active() {
            self.stage.arbiter.produced(1);
            self.stage.gate.emit(item);
        }
    }

    fn on_failure(&self, failure: Failure) {
        if self.is_fallback {
            self.stage.fail(failure);
        } else {
            self.stage.recover(failure);
        }
    }

    fn on_completion(&self) {
        self.stage.complete();
    }
}
