//! Operators reacting to natural completion.
//!
//! Substitutions (`continue_with*`, `fail*`, `switch_to*`) are all a
//! two-phase [`ConcatPublisher`]: phase 1 only starts once the upstream
//! completed, so an upstream failure or a cancel never triggers them.
//! `invoke` and `invoke_async` are stage hooks that claim the terminal guard
//! before running, which keeps the side effect exactly-once when producers
//! race to complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::EmitterConfig;
use crate::error::{Error, Failure};
use crate::infrastructure::catch;
use crate::subscription::upstream::UpstreamSlot;
use crate::subscription::{Cancellable, TerminalKind};
use crate::uni::{Uni, UniSubscriber};

use super::concat::ConcatPublisher;
use super::emitter::EmitterPublisher;
use super::sources::{from_nullable, DeferredPublisher};
use super::stage::{StageCore, StageHooks, StagePublisher};
use super::{Multi, MultiEmitter};

/// Operators reacting to natural completion. Created by
/// [`Multi::on_completion`].
#[derive(Debug)]
pub struct MultiOnCompletion<T> {
    upstream: Multi<T>,
}

impl<T: Send + 'static> MultiOnCompletion<T> {
    pub(super) fn new(upstream: Multi<T>) -> Self {
        Self { upstream }
    }

    fn then(self, next: Multi<T>) -> Multi<T> {
        Multi::from_publisher(ConcatPublisher::new(vec![self.upstream, next]))
    }

    /// Emits `items` after the upstream completed, then completes.
    pub fn continue_with<I>(self, items: I) -> Multi<T>
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        self.then(Multi::items(items))
    }

    /// Emits the items returned by `supplier` after the upstream completed.
    ///
    /// The supplier runs once per subscription, at completion time. A `None`
    /// result fails with a null reference; so does a `None` element, after
    /// the elements before it were delivered.
    pub fn continue_with_supplier<F, I>(self, supplier: F) -> Multi<T>
    where
        F: Fn() -> Option<I> + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Into<Option<T>>,
        I::IntoIter: Send + 'static,
    {
        let next = Multi::from_publisher(DeferredPublisher::new(move || {
            supplier().map(|items| from_nullable(items, "continue_with supplier produced no item"))
        }));
        self.then(next)
    }

    /// Replaces completion with a [`Error::NoSuchElement`] failure.
    #[must_use]
    pub fn fail(self) -> Multi<T> {
        self.fail_with(Error::NoSuchElement.into())
    }

    /// Replaces completion with `failure`.
    #[must_use]
    pub fn fail_with(self, failure: Failure) -> Multi<T> {
        self.then(Multi::failure(failure))
    }

    /// Replaces completion with the failure returned by `supplier`.
    ///
    /// A supplier returning `None` fails with a null reference instead.
    pub fn fail_with_supplier<F>(self, supplier: F) -> Multi<T>
    where
        F: Fn() -> Option<Failure> + Send + Sync + 'static,
    {
        let next = Multi::from_publisher(DeferredPublisher::new(move || {
            Some(match supplier() {
                Some(failure) => Multi::failure(failure),
                None => Multi::failure(Failure::null_reference(
                    "fail_with supplier produced no failure",
                )),
            })
        }));
        self.then(next)
    }

    /// Continues with `other` once the upstream completed.
    #[must_use]
    pub fn switch_to(self, other: Multi<T>) -> Multi<T> {
        self.then(other)
    }

    /// Continues with the Multi returned by `supplier`, called at completion time.
    pub fn switch_to_supplier<F>(self, supplier: F) -> Multi<T>
    where
        F: Fn() -> Option<Multi<T>> + Send + Sync + 'static,
    {
        self.then(Multi::from_publisher(DeferredPublisher::new(supplier)))
    }

    /// Continues with an emitter-driven Multi.
    pub fn switch_to_emitter<F>(self, consumer: F) -> Multi<T>
    where
        F: Fn(MultiEmitter<T>) + Send + Sync + 'static,
    {
        self.then(Multi::from_publisher(EmitterPublisher::new(
            EmitterConfig::default(),
            consumer,
        )))
    }

    /// Runs `callback` once, at natural completion, before completion is forwarded.
    ///
    /// A panicking callback turns the completion into a failure.
    pub fn invoke<F>(self, callback: F) -> Multi<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        Multi::from_publisher(StagePublisher::new(self.upstream, move || {
            InvokeHooks {
                callback: Arc::clone(&callback),
            }
        }))
    }

    /// Delays completion until the Uni returned by `supplier` resolves.
    ///
    /// The Uni's item is discarded; its failure replaces the completion.
    /// Cancelling while the Uni is pending cancels it.
    pub fn invoke_async<X, F>(self, supplier: F) -> Multi<T>
    where
        X: Send + 'static,
        F: Fn() -> Uni<X> + Send + Sync + 'static,
    {
        let supplier = Arc::new(supplier);
        Multi::from_publisher(StagePublisher::new(self.upstream, move || {
            InvokeAsyncHooks {
                supplier: Arc::clone(&supplier),
                pending: Arc::new(UpstreamSlot::new()),
            }
        }))
    }
}

struct InvokeHooks<F> {
    callback: Arc<F>,
}

impl<T, F> StageHooks<T, T> for InvokeHooks<F>
where
    T: Send + 'static,
    F: Fn() + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<StageCore<T>>) {
        core.emit(item);
    }

    fn on_completion(&self, core: &Arc<StageCore<T>>) {
        if !core.claim(TerminalKind::Completion) {
            tracing::debug!("ignoring duplicate completion");
            return;
        }
        match catch(|| (self.callback)()) {
            Ok(()) => core.deliver_completion(),
            Err(failure) => core.deliver_failure(failure),
        }
    }
}

struct InvokeAsyncHooks<F> {
    supplier: Arc<F>,
    pending: Arc<UpstreamSlot<dyn Cancellable>>,
}

impl<T, X, F> StageHooks<T, T> for InvokeAsyncHooks<F>
where
    T: Send + 'static,
    X: Send + 'static,
    F: Fn() -> Uni<X> + Send + Sync + 'static,
{
    fn on_item(&self, item: T, core: &Arc<StageCore<T>>) {
        core.emit(item);
    }

    fn on_completion(&self, core: &Arc<StageCore<T>>) {
        if !core.claim(TerminalKind::Completion) {
            tracing::debug!("ignoring duplicate completion");
            return;
        }
        match catch(|| (self.supplier)()) {
            Ok(uni) => uni.subscribe_dyn(Arc::new(CompletionRelay {
                core: Arc::clone(core),
                pending: Arc::clone(&self.pending),
                done: AtomicBool::new(false),
            })),
            Err(failure) => core.deliver_failure(failure),
        }
    }

    fn on_cancellation(&self) {
        self.pending.cancel();
    }
}

/// Waits for the async hook, then releases the held-back completion.
struct CompletionRelay<T> {
    core: Arc<StageCore<T>>,
    pending: Arc<UpstreamSlot<dyn Cancellable>>,
    done: AtomicBool,
}

impl<T: Send + 'static, X> UniSubscriber<X> for CompletionRelay<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Cancellable>) {
        let _ = self.pending.set(subscription);
    }

    fn on_item(&self, _item: X) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.pending.release();
            self.core.deliver_completion();
        }
    }

    fn on_failure(&self, failure: Failure) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.pending.release();
            self.core.deliver_failure(failure);
        }
    }
}
