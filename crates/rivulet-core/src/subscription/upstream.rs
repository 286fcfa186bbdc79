//! Holder for a stage's single upstream link.
//!
//! Calls into the link (request, cancel) are always made after the lock is
//! released, so an upstream that re-enters the stage cannot deadlock.

use std::sync::Arc;

use parking_lot::Mutex;

use super::Cancellable;

/// Outcome of [`UpstreamSlot::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotSet {
    /// The link was stored.
    Accepted,
    /// A link was already present; the new one was cancelled.
    Occupied,
    /// The slot was cancelled or released; the new link was cancelled.
    Closed,
}

enum Slot<S: ?Sized> {
    Empty,
    Linked(Arc<S>),
    Released,
    Cancelled,
}

pub(crate) struct UpstreamSlot<S: ?Sized> {
    state: Mutex<Slot<S>>,
}

impl<S: ?Sized + Cancellable> UpstreamSlot<S> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(Slot::Empty),
        }
    }

    /// Stores the first link. Any later link is cancelled.
    pub(crate) fn set(&self, link: Arc<S>) -> SlotSet {
        let mut state = self.state.lock();
        if matches!(*state, Slot::Empty) {
            *state = Slot::Linked(link);
            return SlotSet::Accepted;
        }
        let outcome = if matches!(*state, Slot::Linked(_)) {
            SlotSet::Occupied
        } else {
            SlotSet::Closed
        };
        drop(state);
        link.cancel();
        outcome
    }

    /// Replaces the current link, used when a stage switches upstream.
    ///
    /// Returns `false` (and cancels `link`) if the slot was cancelled.
    pub(crate) fn replace(&self, link: Arc<S>) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, Slot::Cancelled) {
            drop(state);
            link.cancel();
            return false;
        }
        let previous = std::mem::replace(&mut *state, Slot::Linked(link));
        drop(state);
        drop(previous);
        true
    }

    pub(crate) fn get(&self) -> Option<Arc<S>> {
        match &*self.state.lock() {
            Slot::Linked(link) => Some(Arc::clone(link)),
            _ => None,
        }
    }

    /// Cancels the link. Returns `true` if this call closed the slot.
    pub(crate) fn cancel(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), Slot::Cancelled);
        match previous {
            Slot::Linked(link) => {
                link.cancel();
                true
            }
            Slot::Empty => true,
            Slot::Released | Slot::Cancelled => false,
        }
    }

    /// Drops the link after a terminal signal without cancelling it.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        if matches!(*state, Slot::Cancelled) {
            return;
        }
        let previous = std::mem::replace(&mut *state, Slot::Released);
        drop(state);
        drop(previous);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(*self.state.lock(), Slot::Cancelled)
    }
}
