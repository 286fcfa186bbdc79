//! Uni to [`Future`] conversion.
//!
//! A [`UniFuture`] is as lazy as the Uni it wraps: it subscribes on the
//! first poll and cancels the subscription if dropped before resolution.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use rivulet_core::{Cancellable, Failure, Uni, UniSubscriber};
use tokio::sync::oneshot;

/// Conversion of a [`Uni`] into a future.
pub trait UniAdaptExt<T> {
    /// Converts into a future resolving with the Uni's outcome.
    fn to_future(&self) -> UniFuture<T>;
}

impl<T: Send + 'static> UniAdaptExt<T> for Uni<T> {
    fn to_future(&self) -> UniFuture<T> {
        UniFuture {
            state: FutureState::Idle(self.clone()),
        }
    }
}

struct FutureSubscriber<T> {
    sender: Mutex<Option<oneshot::Sender<Result<T, Failure>>>>,
    upstream: Mutex<Option<Arc<dyn Cancellable>>>,
    cancelled: AtomicBool,
}

impl<T> FutureSubscriber<T> {
    fn resolve(&self, outcome: Result<T, Failure>) {
        let sender = self.sender.lock().take();
        if let Some(sender) = sender {
            if sender.send(outcome).is_err() {
                tracing::debug!("future dropped before the uni resolved");
            }
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let upstream = self.upstream.lock().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

impl<T: Send> UniSubscriber<T> for FutureSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Cancellable>) {
        let mut upstream = self.upstream.lock();
        if upstream.is_some() || self.cancelled.load(Ordering::Acquire) {
            drop(upstream);
            subscription.cancel();
            return;
        }
        *upstream = Some(subscription);
    }

    fn on_item(&self, item: T) {
        self.upstream.lock().take();
        self.resolve(Ok(item));
    }

    fn on_failure(&self, failure: Failure) {
        self.upstream.lock().take();
        self.resolve(Err(failure));
    }
}

enum FutureState<T> {
    Idle(Uni<T>),
    Waiting {
        receiver: oneshot::Receiver<Result<T, Failure>>,
        subscriber: Arc<FutureSubscriber<T>>,
    },
    Done,
}

/// Future resolving with the outcome of a [`Uni`] subscription.
///
/// A Uni that never resolves yields a future that never completes.
pub struct UniFuture<T> {
    state: FutureState<T>,
}

impl<T> Unpin for UniFuture<T> {}

impl<T: Send + 'static> Future for UniFuture<T> {
    type Output = Result<T, Failure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let FutureState::Idle(uni) = &this.state {
            let uni = uni.clone();
            let (sender, receiver) = oneshot::channel();
            let subscriber = Arc::new(FutureSubscriber {
                sender: Mutex::new(Some(sender)),
                upstream: Mutex::new(None),
                cancelled: AtomicBool::new(false),
            });
            this.state = FutureState::Waiting {
                receiver,
                subscriber: Arc::clone(&subscriber),
            };
            uni.subscribe(subscriber);
        }

        match &mut this.state {
            FutureState::Waiting { receiver, .. } => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(outcome)) => {
                    this.state = FutureState::Done;
                    Poll::Ready(outcome)
                }
                // The subscriber owns the sender for as long as we hold it.
                Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
            },
            FutureState::Idle(_) | FutureState::Done => Poll::Pending,
        }
    }
}

impl<T> Drop for UniFuture<T> {
    fn drop(&mut self) {
        if let FutureState::Waiting { subscriber, .. } = &self.state {
            subscriber.cancel();
        }
    }
}

impl<T> std::fmt::Debug for UniFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            FutureState::Idle(_) => "idle",
            FutureState::Waiting { .. } => "waiting",
            FutureState::Done => "done",
        };
        f.debug_struct("UniFuture")
            .field("state", &state)
            .finish()
    }
}
