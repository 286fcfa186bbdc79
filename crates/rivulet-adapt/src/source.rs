//! Pipelines sourced from async Rust.
//!
//! Both sources are cold: the factory runs once per subscription and the
//! resulting future or stream is driven by a task spawned on the given
//! tokio runtime. Cancelling the subscription aborts that task.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use rivulet_core::subscription::demand::validate_request;
use rivulet_core::subscription::{Demand, TerminalGuard, TerminalKind};
use rivulet_core::{
    Cancellable, Failure, Multi, Publisher, Subscriber, Subscription, Uni, UniPublisher,
    UniSubscriber,
};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{panic_message, AdaptError};

/// Spawned task slot that tolerates cancellation racing the spawn.
#[derive(Default)]
struct TaskSlot {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    fn store(&self, task: JoinHandle<()>, guard: &TerminalGuard) {
        *self.task.lock() = Some(task);
        // A terminal that won the guard before the handle was stored found
        // nothing to abort.
        if !guard.is_open() {
            self.abort();
        }
    }

    fn abort(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Runs a per-subscription factory, turning a panic into a failure.
fn build<R>(factory: impl FnOnce() -> R) -> Result<R, Failure> {
    std::panic::catch_unwind(AssertUnwindSafe(factory))
        .map_err(|panic| AdaptError::FactoryPanicked(panic_message(panic.as_ref())).into())
}

// ---------------------------------------------------------------------------
// multi_from_stream
// ---------------------------------------------------------------------------

/// Creates a Multi that drives a fresh stream per subscription.
///
/// The stream is polled on `handle` only while downstream demand is
/// positive. An `Err` element fails the Multi; the end of the stream
/// completes it.
pub fn multi_from_stream<T, S, F>(handle: Handle, factory: F) -> Multi<T>
where
    T: Send + 'static,
    S: Stream<Item = Result<T, Failure>> + Send + 'static,
    F: Fn() -> S + Send + Sync + 'static,
{
    Multi::from_publisher(StreamPublisher { handle, factory })
}

struct StreamPublisher<F> {
    handle: Handle,
    factory: F,
}

struct StreamSubscription<T> {
    downstream: Arc<dyn Subscriber<T>>,
    demand: Demand,
    wakeup: Notify,
    guard: TerminalGuard,
    task: TaskSlot,
}

impl<T: Send + 'static> StreamSubscription<T> {
    fn fail(&self, failure: Failure) {
        if self.guard.try_close(TerminalKind::Failure) {
            self.task.abort();
            self.downstream.on_failure(failure);
        } else {
            tracing::debug!(%failure, "dropping failure that lost terminal arbitration");
        }
    }

    async fn drive<S>(self: Arc<Self>, stream: S)
    where
        S: Stream<Item = Result<T, Failure>> + Send,
    {
        let mut stream = Box::pin(stream);
        loop {
            while !self.demand.try_consume() {
                if !self.guard.is_open() {
                    return;
                }
                self.wakeup.notified().await;
            }
            if !self.guard.is_open() {
                return;
            }
            let next = AssertUnwindSafe(stream.next()).catch_unwind().await;
            match next {
                Ok(Some(Ok(item))) => {
                    if self.guard.is_open() {
                        self.downstream.on_item(item);
                    }
                }
                Ok(Some(Err(failure))) => {
                    if self.guard.try_close(TerminalKind::Failure) {
                        self.downstream.on_failure(failure);
                    }
                    return;
                }
                Ok(None) => {
                    if self.guard.try_close(TerminalKind::Completion) {
                        self.downstream.on_completion();
                    }
                    return;
                }
                Err(panic) => {
                    let failure: Failure =
                        AdaptError::TaskPanicked(panic_message(panic.as_ref())).into();
                    if self.guard.try_close(TerminalKind::Failure) {
                        self.downstream.on_failure(failure);
                    }
                    return;
                }
            }
        }
    }
}

impl<T: Send + 'static> Cancellable for StreamSubscription<T> {
    fn cancel(&self) {
        if self.guard.try_close(TerminalKind::Cancellation) {
            self.task.abort();
            self.wakeup.notify_one();
        }
    }
}

impl<T: Send + 'static> Subscription for StreamSubscription<T> {
    fn request(&self, n: u64) {
        match validate_request(n) {
            Ok(n) => {
                self.demand.add(n);
                self.wakeup.notify_one();
            }
            Err(error) => self.fail(error.into()),
        }
    }
}

impl<T, S, F> Publisher<T> for StreamPublisher<F>
where
    T: Send + 'static,
    S: Stream<Item = Result<T, Failure>> + Send + 'static,
    F: Fn() -> S + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let subscription = Arc::new(StreamSubscription {
            downstream: subscriber,
            demand: Demand::new(),
            wakeup: Notify::new(),
            guard: TerminalGuard::new(),
            task: TaskSlot::default(),
        });
        subscription
            .downstream
            .on_subscribe(Arc::clone(&subscription) as Arc<dyn Subscription>);
        if !subscription.guard.is_open() {
            return;
        }
        let stream = match build(&self.factory) {
            Ok(stream) => stream,
            Err(failure) => {
                subscription.fail(failure);
                return;
            }
        };
        let task = self.handle.spawn(Arc::clone(&subscription).drive(stream));
        subscription.task.store(task, &subscription.guard);
    }
}

// ---------------------------------------------------------------------------
// uni_from_future
// ---------------------------------------------------------------------------

/// Creates a Uni that spawns a fresh future per subscription.
///
/// The future runs on `handle`; cancelling the subscription aborts it.
pub fn uni_from_future<T, Fut, F>(handle: Handle, factory: F) -> Uni<T>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
{
    Uni::from_publisher(FuturePublisher { handle, factory })
}

struct FuturePublisher<F> {
    handle: Handle,
    factory: F,
}

struct FutureSubscription {
    guard: TerminalGuard,
    task: TaskSlot,
}

impl Cancellable for FutureSubscription {
    fn cancel(&self) {
        if self.guard.try_close(TerminalKind::Cancellation) {
            self.task.abort();
        }
    }
}

impl<T, Fut, F> UniPublisher<T> for FuturePublisher<F>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        let subscription = Arc::new(FutureSubscription {
            guard: TerminalGuard::new(),
            task: TaskSlot::default(),
        });
        subscriber.on_subscribe(Arc::clone(&subscription) as Arc<dyn Cancellable>);
        if !subscription.guard.is_open() {
            return;
        }

        let future = match build(&self.factory) {
            Ok(future) => future,
            Err(failure) => {
                if subscription.guard.try_close(TerminalKind::Failure) {
                    subscriber.on_failure(failure);
                }
                return;
            }
        };
        let state = Arc::clone(&subscription);
        let task = self.handle.spawn(async move {
            let outcome = AssertUnwindSafe(future).catch_unwind().await;
            match outcome {
                Ok(Ok(item)) => {
                    if state.guard.try_close(TerminalKind::Completion) {
                        subscriber.on_item(item);
                    }
                }
                Ok(Err(failure)) => {
                    if state.guard.try_close(TerminalKind::Failure) {
                        subscriber.on_failure(failure);
                    }
                }
                Err(panic) => {
                    if state.guard.try_close(TerminalKind::Failure) {
                        let message = panic_message(panic.as_ref());
                        subscriber.on_failure(AdaptError::TaskPanicked(message).into());
                    }
                }
            }
        });
        subscription.task.store(task, &subscription.guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rivulet_core::testing::{AssertSubscriber, UniAssertSubscriber};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_respects_demand() {
        let multi = multi_from_stream(Handle::current(), || {
            futures::stream::iter((0..10).map(Ok))
        });
        let ts = multi.subscribe(AssertSubscriber::create(3));
        ts.await_items(3, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ts.items(), vec![0, 1, 2]);
        ts.assert_not_terminated();

        ts.request(7);
        ts.await_completion(Duration::from_secs(5));
        assert_eq!(ts.items(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_error_fails() {
        let multi = multi_from_stream(Handle::current(), || {
            futures::stream::iter(vec![Ok(1), Err(Failure::message("bad row")), Ok(2)])
        });
        let ts = multi.subscribe(AssertSubscriber::create(10));
        ts.await_terminal(Duration::from_secs(5));
        ts.assert_received(&[1]).assert_failed_with_message("bad row");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_future_item() {
        let uni = uni_from_future(Handle::current(), || async { Ok::<_, Failure>(5) });
        let ts = uni.subscribe(UniAssertSubscriber::create());
        ts.await_item(Duration::from_secs(5)).assert_item(&5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_future_panic_becomes_failure() {
        let uni = uni_from_future(Handle::current(), || async {
            if true {
                panic!("inside task");
            }
            Ok::<i32, Failure>(1)
        });
        let ts = uni.subscribe(UniAssertSubscriber::create());
        ts.await_item(Duration::from_secs(5));
        ts.assert_failed_with_message("adapted task panicked: inside task");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_future_factory_panic_becomes_failure() {
        let uni = uni_from_future(
            Handle::current(),
            || -> futures::future::Ready<Result<i32, Failure>> { panic!("no connection") },
        );
        let ts = uni.subscribe(UniAssertSubscriber::create());
        ts.assert_failed_with_message("adapter factory panicked: no connection");

        // the factory runs again for the next subscriber
        uni.subscribe(UniAssertSubscriber::create())
            .assert_failed_with_message("adapter factory panicked: no connection");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_factory_panic_becomes_failure() {
        let multi = multi_from_stream(
            Handle::current(),
            || -> futures::stream::Empty<Result<i32, Failure>> { panic!("cursor closed") },
        );
        multi
            .subscribe(AssertSubscriber::create(5))
            .assert_has_not_received_any_item()
            .assert_failed_with_message("adapter factory panicked: cursor closed");
    }
}
