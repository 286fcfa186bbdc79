//! Operator stage plumbing.
//!
//! Every Multi operator produces one stage per subscription. A stage is a
//! [`Subscriber`] towards its upstream and a [`Subscription`] towards its
//! downstream. The shared parts are factored out:
//!
//! - [`SignalGate`] owns the downstream, the terminal guard and the
//!   cancellation flag. Every signal sent downstream goes through it.
//! - [`StageCore`] adds the single upstream link.
//! - [`HookStage`] is the generic stage for pass-through operators, which
//!   only supply a [`StageHooks`] implementation.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Error, Failure};
use crate::subscription::upstream::{SlotSet, UpstreamSlot};
use crate::subscription::{
    Cancellable, ImmediateSubscription, Subscription, TerminalGuard, TerminalKind,
};

use super::{Multi, Subscriber};

// ---------------------------------------------------------------------------
// SignalGate
// ---------------------------------------------------------------------------

pub(crate) struct SignalGate<O> {
    downstream: Arc<dyn Subscriber<O>>,
    guard: TerminalGuard,
    cancelled: AtomicBool,
}

impl<O: Send + 'static> SignalGate<O> {
    pub(crate) fn new(downstream: Arc<dyn Subscriber<O>>) -> Self {
        Self {
            downstream,
            guard: TerminalGuard::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    pub(crate) fn downstream(&self) -> &Arc<dyn Subscriber<O>> {
        &self.downstream
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Items may flow only while the guard is open and nobody cancelled.
    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.guard.is_open() && !self.is_cancelled()
    }

    pub(crate) fn emit(&self, item: O) {
        if self.is_active() {
            self.downstream.on_item(item);
        }
    }

    /// Wins the terminal guard without delivering anything yet.
    pub(crate) fn claim(&self, kind: TerminalKind) -> bool {
        self.guard.try_close(kind)
    }

    /// Delivers completion after a successful [`claim`](Self::claim).
    pub(crate) fn deliver_completion(&self) {
        if !self.is_cancelled() {
            self.downstream.on_completion();
        }
    }

    /// Delivers a failure after a successful [`claim`](Self::claim).
    pub(crate) fn deliver_failure(&self, failure: Failure) {
        if self.is_cancelled() {
            tracing::debug!(%failure, "dropping failure raised after cancellation");
        } else {
            self.downstream.on_failure(failure);
        }
    }

    pub(crate) fn complete(&self) -> bool {
        if self.claim(TerminalKind::Completion) {
            self.deliver_completion();
            true
        } else {
            false
        }
    }

    pub(crate) fn fail(&self, failure: Failure) -> bool {
        if self.claim(TerminalKind::Failure) {
            self.deliver_failure(failure);
            true
        } else {
            tracing::debug!(%failure, "dropping failure that lost terminal arbitration");
            false
        }
    }

    /// Marks the stage cancelled. Returns `true` on the first call only.
    pub(crate) fn mark_cancelled(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.guard.try_close(TerminalKind::Cancellation);
        true
    }
}

// ---------------------------------------------------------------------------
// StageCore
// ---------------------------------------------------------------------------

pub(crate) struct StageCore<O> {
    gate: SignalGate<O>,
    upstream: UpstreamSlot<dyn Subscription>,
}

impl<O: Send + 'static> StageCore<O> {
    pub(crate) fn new(downstream: Arc<dyn Subscriber<O>>) -> Self {
        Self {
            gate: SignalGate::new(downstream),
            upstream: UpstreamSlot::new(),
        }
    }

    /// Stores the upstream link. A second link is a protocol violation.
    pub(crate) fn link(&self, upstream: Arc<dyn Subscription>) -> bool {
        match self.upstream.set(upstream) {
            SlotSet::Accepted => true,
            SlotSet::Closed => false,
            SlotSet::Occupied => {
                self.fail_and_cancel(Error::AlreadySubscribed.into());
                false
            }
        }
    }

    pub(crate) fn downstream(&self) -> &Arc<dyn Subscriber<O>> {
        self.gate.downstream()
    }

    pub(crate) fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.get()
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.gate.is_active()
    }

    pub(crate) fn emit(&self, item: O) {
        self.gate.emit(item);
    }

    pub(crate) fn complete(&self) -> bool {
        let won = self.gate.complete();
        if won {
            self.upstream.release();
        }
        won
    }

    pub(crate) fn fail(&self, failure: Failure) -> bool {
        let won = self.gate.fail(failure);
        if won {
            self.upstream.release();
        }
        won
    }

    /// Fails downstream and cancels upstream, for faults raised by the stage itself.
    pub(crate) fn fail_and_cancel(&self, failure: Failure) {
        if self.gate.claim(TerminalKind::Failure) {
            self.upstream.cancel();
            self.gate.deliver_failure(failure);
        } else {
            tracing::debug!(%failure, "dropping failure that lost terminal arbitration");
        }
    }

    pub(crate) fn claim(&self, kind: TerminalKind) -> bool {
        self.gate.claim(kind)
    }

    pub(crate) fn deliver_completion(&self) {
        self.upstream.release();
        self.gate.deliver_completion();
    }

    pub(crate) fn deliver_failure(&self, failure: Failure) {
        self.upstream.release();
        self.gate.deliver_failure(failure);
    }

    pub(crate) fn request_upstream(&self, n: u64) {
        if let Some(upstream) = self.upstream.get() {
            upstream.request(n);
        }
    }

    /// Downstream request entry point, validating the demand.
    pub(crate) fn request(&self, n: u64) {
        if n == 0 {
            self.fail_and_cancel(Error::InvalidDemand(n).into());
        } else {
            self.request_upstream(n);
        }
    }

    pub(crate) fn mark_cancelled(&self) -> bool {
        self.gate.mark_cancelled()
    }

    pub(crate) fn cancel_upstream(&self) {
        self.upstream.cancel();
    }
}

// ---------------------------------------------------------------------------
// HookStage
// ---------------------------------------------------------------------------

/// Per-subscription behaviour of a pass-through operator.
///
/// Defaults forward terminal signals unchanged. A hook that needs to reach
/// the stage later (after an asynchronous step) clones the `Arc<StageCore>`.
pub(crate) trait StageHooks<I, O>: Send + Sync + 'static {
    /// Runs before the downstream receives its subscription.
    fn on_subscribe(&self, _core: &Arc<StageCore<O>>) -> Result<(), Failure> {
        Ok(())
    }

    fn on_item(&self, item: I, core: &Arc<StageCore<O>>);

    fn on_failure(&self, failure: Failure, core: &Arc<StageCore<O>>)
    where
        O: Send + 'static,
    {
        core.fail(failure);
    }

    fn on_completion(&self, core: &Arc<StageCore<O>>)
    where
        O: Send + 'static,
    {
        core.complete();
    }

    /// Observes a valid downstream request before it is forwarded.
    fn on_request(&self, _n: u64) {}

    /// Runs once, on the first cancel, before upstream is cancelled.
    fn on_cancellation(&self) {}
}

pub(crate) struct HookStage<I, O, H> {
    core: Arc<StageCore<O>>,
    hooks: H,
    this: Weak<Self>,
    _input: PhantomData<fn(I)>,
}

impl<I, O, H> HookStage<I, O, H>
where
    I: Send + 'static,
    O: Send + 'static,
    H: StageHooks<I, O>,
{
    /// Creates the stage and subscribes it to `upstream`.
    pub(crate) fn attach(upstream: &Multi<I>, downstream: Arc<dyn Subscriber<O>>, hooks: H) {
        let stage = Arc::new_cyclic(|this| Self {
            core: Arc::new(StageCore::new(downstream)),
            hooks,
            this: this.clone(),
            _input: PhantomData,
        });
        upstream.subscribe_dyn(stage);
    }
}

impl<I, O, H> Subscriber<I> for HookStage<I, O, H>
where
    I: Send + 'static,
    O: Send + 'static,
    H: StageHooks<I, O>,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if !self.core.link(subscription) {
            return;
        }
        if let Err(failure) = self.hooks.on_subscribe(&self.core) {
            self.core
                .downstream()
                .on_subscribe(Arc::new(ImmediateSubscription::new()));
            self.core.fail_and_cancel(failure);
            return;
        }
        if let Some(this) = self.this.upgrade() {
            self.core.downstream().on_subscribe(this);
        }
    }

    fn on_item(&self, item: I) {
        if self.core.is_active() {
            self.hooks.on_item(item, &self.core);
        }
    }

    fn on_failure(&self, failure: Failure) {
        self.hooks.on_failure(failure, &self.core);
    }

    fn on_completion(&self) {
        self.hooks.on_completion(&self.core);
    }
}

impl<I, O, H> Cancellable for HookStage<I, O, H>
where
    I: Send + 'static,
    O: Send + 'static,
    H: StageHooks<I, O>,
{
    fn cancel(&self) {
        if self.core.mark_cancelled() {
            self.hooks.on_cancellation();
            self.core.cancel_upstream();
        }
    }
}

impl<I, O, H> Subscription for HookStage<I, O, H>
where
    I: Send + 'static,
    O: Send + 'static,
    H: StageHooks<I, O>,
{
    fn request(&self, n: u64) {
        if n > 0 {
            self.hooks.on_request(n);
        }
        self.core.request(n);
    }
}

// ---------------------------------------------------------------------------
// StagePublisher
// ---------------------------------------------------------------------------

/// Operator definition: builds fresh hooks for every subscription.
pub(crate) struct StagePublisher<I, O, F> {
    upstream: Multi<I>,
    factory: F,
    _output: PhantomData<fn() -> O>,
}

impl<I, O, F> StagePublisher<I, O, F> {
    pub(crate) fn new(upstream: Multi<I>, factory: F) -> Self {
        Self {
            upstream,
            factory,
            _output: PhantomData,
        }
    }
}

impl<I, O, H, F> super::Publisher<O> for StagePublisher<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    H: StageHooks<I, O>,
    F: Fn() -> H + Send + Sync,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<O>>) {
        HookStage::attach(&self.upstream, subscriber, (self.factory)());
    }
}
