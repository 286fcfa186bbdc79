//! Operator stage plumbing for Uni.
//!
//! Mirrors the Multi stage without demand: the downstream only ever cancels.
//! The item and the failure both go through the terminal guard, so a Uni
//! resolves at most once even when a producer races itself.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Error, Failure};
use crate::subscription::upstream::{SlotSet, UpstreamSlot};
use crate::subscription::{Cancellable, ImmediateSubscription, TerminalGuard, TerminalKind};

use super::{Uni, UniPublisher, UniSubscriber};

pub(crate) struct UniStageCore<O> {
    downstream: Arc<dyn UniSubscriber<O>>,
    guard: TerminalGuard,
    cancelled: AtomicBool,
    upstream: UpstreamSlot<dyn Cancellable>,
}

impl<O: Send + 'static> UniStageCore<O> {
    pub(crate) fn new(downstream: Arc<dyn UniSubscriber<O>>) -> Self {
        Self {
            downstream,
            guard: TerminalGuard::new(),
            cancelled: AtomicBool::new(false),
            upstream: UpstreamSlot::new(),
        }
    }

    pub(crate) fn link(&self, upstream: Arc<dyn Cancellable>) -> bool {
        match self.upstream.set(upstream) {
            SlotSet::Accepted => true,
            SlotSet::Closed => false,
            SlotSet::Occupied => {
                self.fail_and_cancel(Error::AlreadySubscribed.into());
                false
            }
        }
    }

    /// Points the stage at a new upstream, e.g. a recovery Uni.
    ///
    /// Returns `false` and cancels `upstream` if the stage was cancelled.
    pub(crate) fn replace_upstream(&self, upstream: Arc<dyn Cancellable>) -> bool {
        self.upstream.replace(upstream)
    }

    pub(crate) fn downstream(&self) -> &Arc<dyn UniSubscriber<O>> {
        &self.downstream
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.guard.is_open()
    }

    pub(crate) fn claim(&self, kind: TerminalKind) -> bool {
        self.guard.try_close(kind)
    }

    pub(crate) fn deliver_item(&self, item: O) {
        self.upstream.release();
        if !self.is_cancelled() {
            self.downstream.on_item(item);
        }
    }

    pub(crate) fn deliver_failure(&self, failure: Failure) {
        self.upstream.release();
        if self.is_cancelled() {
            tracing::debug!(%failure, "dropping failure raised after cancellation");
        } else {
            self.downstream.on_failure(failure);
        }
    }

    pub(crate) fn emit_item(&self, item: O) -> bool {
        if self.claim(TerminalKind::Completion) {
            self.deliver_item(item);
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

    pub(crate) fn fail_and_cancel(&self, failure: Failure) {
        if self.claim(TerminalKind::Failure) {
            self.upstream.cancel();
            self.deliver_failure(failure);
        } else {
            tracing::debug!(%failure, "dropping failure that lost terminal arbitration");
        }
    }

    /// Returns `true` only for the first cancel that wins the guard. A cancel
    /// arriving after the Uni resolved changes nothing downstream.
    pub(crate) fn mark_cancelled(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.guard.try_close(TerminalKind::Cancellation)
    }

    pub(crate) fn cancel_upstream(&self) {
        self.upstream.cancel();
    }
}

/// Per-subscription behaviour of a Uni operator.
pub(crate) trait UniHooks<I, O>: Send + Sync + 'static {
    fn on_subscribe(&self, _core: &Arc<UniStageCore<O>>) -> Result<(), Failure> {
        Ok(())
    }

    fn on_item(&self, item: I, core: &Arc<UniStageCore<O>>);

    fn on_failure(&self, failure: Failure, core: &Arc<UniStageCore<O>>)
    where
        O: Send + 'static,
    {
        core.fail(failure);
    }

    /// Runs once, on the first cancel, before upstream is cancelled.
    fn on_cancellation(&self) {}
}

pub(crate) struct UniHookStage<I, O, H> {
    core: Arc<UniStageCore<O>>,
    hooks: H,
    this: Weak<Self>,
    _input: PhantomData<fn(I)>,
}

impl<I, O, H> UniHookStage<I, O, H>
where
    I: Send + 'static,
    O: Send + 'static,
    H: UniHooks<I, O>,
{
    pub(crate) fn attach(upstream: &Uni<I>, downstream: Arc<dyn UniSubscriber<O>>, hooks: H) {
        let stage = Arc::new_cyclic(|this| Self {
            core: Arc::new(UniStageCore::new(downstream)),
            hooks,
            this: this.clone(),
            _input: PhantomData,
        });
        upstream.subscribe_dyn(stage);
    }
}

impl<I, O, H> UniSubscriber<I> for UniHookStage<I, O, H>
where
    I: Send + 'static,
    O: Send + 'static,
    H: UniHooks<I, O>,
{
    fn on_subscribe(&self, subscription: Arc<dyn Cancellable>) {
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
        if self.core.is_open() {
            self.hooks.on_item(item, &self.core);
        }
    }

    fn on_failure(&self, failure: Failure) {
        self.hooks.on_failure(failure, &self.core);
    }
}

impl<I, O, H> Cancellable for UniHookStage<I, O, H>
where
    I: Send + 'static,
    O: Send + 'static,
    H: UniHooks<I, O>,
{
    fn cancel(&self) {
        if self.core.mark_cancelled() {
            self.hooks.on_cancellation();
            self.core.cancel_upstream();
        }
    }
}

pub(crate) struct UniStagePublisher<I, O, F> {
    upstream: Uni<I>,
    factory: F,
    _output: PhantomData<fn() -> O>,
}

impl<I, O, F> UniStagePublisher<I, O, F> {
    pub(crate) fn new(upstream: Uni<I>, factory: F) -> Self {
        Self {
            upstream,
            factory,
            _output: PhantomData,
        }
    }
}

impl<I, O, H, F> UniPublisher<O> for UniStagePublisher<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    H: UniHooks<I, O>,
    F: Fn() -> H + Send + Sync,
{
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<O>>) {
        UniHookStage::attach(&self.upstream, subscriber, (self.factory)());
    }
}

/// Builds a Uni operator from a per-subscription hook factory.
pub(crate) fn lift<I, O, H, F>(upstream: &Uni<I>, factory: F) -> Uni<O>
where
    I: Send + 'static,
    O: Send + 'static,
    H: UniHooks<I, O>,
    F: Fn() -> H + Send + Sync + 'static,
{
    Uni::from_publisher(UniStagePublisher::new(upstream.clone(), factory))
}
