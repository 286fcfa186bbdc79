//! Multi to async [`Stream`] conversion.
//!
//! A [`MultiStream`] subscribes on its first poll, requests
//! [`StreamConfig::prefetch`] items and re-requests in batches as the
//! consumer drains the queue. Signals travel from the pipeline thread to
//! the polling task over an unbounded channel; demand keeps it bounded.
//!
//! # Usage
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use rivulet_adapt::MultiAdaptExt;
//!
//! let mut stream = Multi::range(0, 10).to_stream();
//! while let Some(item) = stream.next().await {
//!     println!("{}", item?);
//! }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use rivulet_core::{Cancellable, Failure, Multi, Signal, Subscriber, Subscription};
use tokio::sync::mpsc;

use crate::config::StreamConfig;

/// Conversion of a [`Multi`] into an async stream.
pub trait MultiAdaptExt<T> {
    /// Converts into a stream using the default [`StreamConfig`].
    fn to_stream(&self) -> MultiStream<T>;

    /// Converts into a stream using `config`.
    fn to_stream_with(&self, config: StreamConfig) -> MultiStream<T>;
}

impl<T: Send + 'static> MultiAdaptExt<T> for Multi<T> {
    fn to_stream(&self) -> MultiStream<T> {
        self.to_stream_with(StreamConfig::default())
    }

    fn to_stream_with(&self, config: StreamConfig) -> MultiStream<T> {
        MultiStream {
            source: Some(self.clone()),
            link: None,
            limit: config.replenish_limit(),
            config,
            consumed: 0,
            terminated: false,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamSubscriber
// ---------------------------------------------------------------------------

struct StreamSubscriber<T> {
    sender: mpsc::UnboundedSender<Signal<T>>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    cancelled: AtomicBool,
    prefetch: u64,
}

impl<T> StreamSubscriber<T> {
    fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.lock().clone()
    }

    fn request(&self, n: u64) {
        if let Some(upstream) = self.upstream() {
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let upstream = self.upstream.lock().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }

    fn push(&self, signal: Signal<T>) {
        if self.sender.send(signal).is_err() {
            tracing::debug!("stream dropped, discarding signal");
        }
    }
}

impl<T: Send> Subscriber<T> for StreamSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut upstream = self.upstream.lock();
            if upstream.is_some() || self.cancelled.load(Ordering::Acquire) {
                drop(upstream);
                subscription.cancel();
                return;
            }
            *upstream = Some(Arc::clone(&subscription));
        }
        subscription.request(self.prefetch.max(1));
    }

    fn on_item(&self, item: T) {
        self.push(Signal::Item(item));
    }

    fn on_failure(&self, failure: Failure) {
        self.push(Signal::Failure(failure));
    }

    fn on_completion(&self) {
        self.push(Signal::Completion);
    }
}

// ---------------------------------------------------------------------------
// MultiStream
// ---------------------------------------------------------------------------

struct Link<T> {
    receiver: mpsc::UnboundedReceiver<Signal<T>>,
    subscriber: Arc<StreamSubscriber<T>>,
}

/// Async stream over a [`Multi`] subscription.
///
/// Yields `Ok(item)` per item, then `Err(failure)` if the pipeline failed,
/// then ends. Dropping the stream before it ends cancels the subscription.
pub struct MultiStream<T> {
    /// Pending until the first poll.
    source: Option<Multi<T>>,
    link: Option<Link<T>>,
    config: StreamConfig,
    limit: u64,
    consumed: u64,
    terminated: bool,
}

impl<T> Unpin for MultiStream<T> {}

impl<T: Send + 'static> MultiStream<T> {
    /// Returns `true` once the stream has yielded its last element.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Cancels the subscription and ends the stream.
    pub fn cancel(&mut self) {
        self.source = None;
        if !self.terminated {
            self.terminated = true;
            if let Some(link) = &self.link {
                link.subscriber.cancel();
            }
        }
    }

    fn link(&mut self) -> Option<&mut Link<T>> {
        if let Some(source) = self.source.take() {
            let (sender, receiver) = mpsc::unbounded_channel();
            let subscriber = Arc::new(StreamSubscriber {
                sender,
                upstream: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                prefetch: self.config.prefetch,
            });
            self.link = Some(Link {
                receiver,
                subscriber: Arc::clone(&subscriber),
            });
            source.subscribe(subscriber);
        }
        self.link.as_mut()
    }

    fn replenish(&mut self) {
        self.consumed += 1;
        if self.consumed == self.limit {
            self.consumed = 0;
            if let Some(link) = &self.link {
                link.subscriber.request(self.limit);
            }
        }
    }
}

impl<T: Send + 'static> Stream for MultiStream<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.terminated {
            return Poll::Ready(None);
        }
        let Some(link) = this.link() else {
            return Poll::Ready(None);
        };

        match link.receiver.poll_recv(cx) {
            Poll::Ready(Some(Signal::Item(item))) => {
                this.replenish();
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Signal::Failure(failure))) => {
                this.terminated = true;
                Poll::Ready(Some(Err(failure)))
            }
            Poll::Ready(Some(Signal::Completion) | None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for MultiStream<T> {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        if let Some(link) = &self.link {
            link.subscriber.cancel();
        }
    }
}

impl<T> std::fmt::Debug for MultiStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiStream")
            .field("config", &self.config)
            .field("subscribed", &self.link.is_some())
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
