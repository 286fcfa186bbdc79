//! Demand accounting for backpressured streams.
//!
//! [`Demand`] implements the Reactive Streams `request(n)` model: the
//! subscriber grants permission for N more items, the producer consumes one
//! unit per item it emits. Requests saturate at [`UNBOUNDED`], after which
//! the producer may emit freely and consumption no longer decrements.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;

/// Demand value meaning "emit without limit".
pub const UNBOUNDED: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// Demand
// ---------------------------------------------------------------------------

/// Outstanding demand for one subscription.
///
/// # Thread Safety
///
/// The counter is an [`AtomicU64`] shared between the subscriber side
/// (which adds via [`add`](Self::add)) and the producer side (which
/// decrements via [`try_consume`](Self::try_consume) or
/// [`produced`](Self::produced)). All updates are CAS loops, so concurrent
/// requests never lose increments and the counter never underflows.
#[derive(Debug, Default)]
pub struct Demand {
    /// Items the subscriber has requested but not yet received.
    pending: AtomicU64,
}

impl Demand {
    /// Creates an accumulator with no demand.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicU64::new(0),
        }
    }

    /// Adds `n` to the pending demand, saturating at [`UNBOUNDED`].
    ///
    /// Returns the demand *before* the addition. A return value of 0 tells
    /// the caller it is responsible for starting emission.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_add(n);
            match self.pending.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return previous,
                Err(actual) => current = actual,
            }
        }
    }

    /// Attempts to consume one unit of demand.
    ///
    /// Returns `true` if demand was available (and decremented, unless
    /// unbounded), `false` if pending demand was 0.
    #[inline]
    #[must_use]
    pub fn try_consume(&self) -> bool {
        loop {
            let current = self.pending.load(Ordering::Acquire);
            if current == 0 {
                return false;
            }
            if current == UNBOUNDED {
                return true;
            }
            if self
                .pending
                .compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Records that `n` items were emitted and returns the remaining demand.
    ///
    /// Unbounded demand is left untouched. Emitting more than was requested
    /// is a producer bug; the counter clamps at zero instead of wrapping.
    pub fn produced(&self, n: u64) -> u64 {
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = if let Some(next) = current.checked_sub(n) {
                next
            } else {
                tracing::debug!(current, produced = n, "more items produced than requested");
                0
            };
            match self.pending.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the current pending demand.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns `true` once demand has saturated.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.pending() == UNBOUNDED
    }
}

/// Validates a `request(n)` argument.
///
/// # Errors
///
/// Returns [`Error::InvalidDemand`] if `n` is zero.
pub fn validate_request(n: u64) -> Result<u64, Error> {
    if n == 0 {
        Err(Error::InvalidDemand(n))
    } else {
        Ok(n)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
