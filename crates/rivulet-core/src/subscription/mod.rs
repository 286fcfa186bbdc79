//! Subscription contract, control flowing upstream.
//!
//! A consumer receives a [`Subscription`] in `on_subscribe` and uses it to
//! request more items or to cancel. Single-value pipelines only need the
//! [`Cancellable`] half.
//!
//! # Components
//!
//! - [`demand`]: Demand accumulator for `request(n)`
//! - [`terminal`]: Exactly-once terminal arbitration
//! - [`SubscriptionHandle`]: Handle returned by callback-style subscribe
//!
//! Two crate-internal helpers build on these: the upstream slot every stage
//! uses to hold its single upstream link, and the arbiter that lets
//! substitution stages re-target demand to a new upstream.

pub mod demand;
pub mod terminal;

pub(crate) mod arbiter;
pub(crate) mod upstream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use demand::{Demand, UNBOUNDED};
pub use terminal::{GuardState, PipelineState, TerminalGuard, TerminalKind};

/// Something that can be cancelled.
///
/// Cancellation is cooperative and idempotent: the first call tears down
/// the upstream link, later calls do nothing.
pub trait Cancellable: Send + Sync {
    /// Requests cancellation.
    fn cancel(&self);
}

/// Demand and cancellation control for a Multi subscription.
pub trait Subscription: Cancellable {
    /// Requests `n` more items.
    ///
    /// `n` must be positive. `request(0)` is a protocol violation that the
    /// pipeline reports downstream as a failure.
    fn request(&self, n: u64);
}

// ---------------------------------------------------------------------------
// ImmediateSubscription
// ---------------------------------------------------------------------------

/// Subscription for sources whose outcome is known at subscribe time.
///
/// Requests are ignored. Cancellation only sets a flag the source checks
/// before delivering.
#[derive(Debug, Default)]
pub struct ImmediateSubscription {
    cancelled: AtomicBool,
}

impl ImmediateSubscription {
    /// Creates an uncancelled subscription.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Cancellable for ImmediateSubscription {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Subscription for ImmediateSubscription {
    fn request(&self, _n: u64) {}
}

// ---------------------------------------------------------------------------
// SubscriptionHandle
// ---------------------------------------------------------------------------

/// Handle returned by callback-style subscribe calls.
///
/// Dropping the handle does **not** cancel; pipelines subscribed with
/// callbacks run until they terminate or [`cancel`](Self::cancel) is called.
pub struct SubscriptionHandle {
    target: Arc<dyn Cancellable>,
    cancelled: AtomicBool,
}

impl SubscriptionHandle {
    pub(crate) fn new(target: Arc<dyn Cancellable>) -> Self {
        Self {
            target,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Cancels the subscription.
    ///
    /// Idempotent: calling this multiple times has no additional effect.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.target.cancel();
        }
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
