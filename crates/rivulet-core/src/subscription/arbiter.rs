//! Switchable upstream for substitution stages.
//!
//! The [`Arbiter`] remembers how much demand the downstream granted and how
//! much of it was already satisfied. When a stage switches to a new
//! upstream, the unsatisfied remainder is requested from it, so the
//! downstream sees one continuous subscription.

use std::sync::Arc;

use parking_lot::Mutex;

use super::demand::UNBOUNDED;
use super::Subscription;

struct ArbiterState {
    current: Option<Arc<dyn Subscription>>,
    requested: u64,
    cancelled: bool,
}

pub(crate) struct Arbiter {
    state: Mutex<ArbiterState>,
}

impl Arbiter {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ArbiterState {
                current: None,
                requested: 0,
                cancelled: false,
            }),
        }
    }

    /// Adds demand and forwards it to the current upstream, if any.
    pub(crate) fn request(&self, n: u64) {
        let current = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            if state.requested != UNBOUNDED {
                state.requested = state.requested.saturating_add(n);
            }
            state.current.clone()
        };
        if let Some(upstream) = current {
            upstream.request(n);
        }
    }

    /// Records items delivered downstream.
    pub(crate) fn produced(&self, n: u64) {
        let mut state = self.state.lock();
        if state.requested != UNBOUNDED {
            state.requested = state.requested.saturating_sub(n);
        }
    }

    /// Makes `next` the current upstream and requests the outstanding demand.
    pub(crate) fn switch_to(&self, next: Arc<dyn Subscription>) {
        let outstanding = {
            let mut state = self.state.lock();
            if state.cancelled {
                None
            } else {
                state.current = Some(Arc::clone(&next));
                Some(state.requested)
            }
        };
        match outstanding {
            None => next.cancel(),
            Some(0) => {}
            Some(requested) => next.request(requested),
        }
    }

    /// Cancels the current upstream and any upstream switched to later.
    pub(crate) fn cancel(&self) {
        let current = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.current.take()
        };
        if let Some(upstream) = current {
            upstream.cancel();
        }
    }

    /// Drops the current upstream after a terminal signal.
    pub(crate) fn release(&self) {
        let current = self.state.lock().current.take();
        drop(current);
    }
}
