//! Exactly-once terminal arbitration.
//!
//! Every pipeline instance owns one [`TerminalGuard`]. Whoever wants to
//! deliver a completion or failure, or to cancel, must first win the guard.
//! Losers drop their event.

use std::sync::atomic::{AtomicU8, Ordering};

const OPEN: u8 = 0;

/// The event that closed a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminalKind {
    /// Natural completion.
    Completion = 1,
    /// A failure signal.
    Failure = 2,
    /// Consumer-initiated cancellation.
    Cancellation = 3,
}

/// Observable state of a [`TerminalGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// No terminal event has won yet.
    Open,
    /// Closed by the given event.
    ClosedBy(TerminalKind),
}

/// Single-writer-wins terminal flag backed by one atomic byte.
#[derive(Debug, Default)]
pub struct TerminalGuard {
    state: AtomicU8,
}

impl TerminalGuard {
    /// Creates an open guard.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(OPEN),
        }
    }

    /// Attempts to close the guard with `kind`.
    ///
    /// Returns `true` for exactly one caller per guard.
    #[must_use]
    pub fn try_close(&self, kind: TerminalKind) -> bool {
        self.state
            .compare_exchange(OPEN, kind as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> GuardState {
        match self.state.load(Ordering::Acquire) {
            OPEN => GuardState::Open,
            1 => GuardState::ClosedBy(TerminalKind::Completion),
            2 => GuardState::ClosedBy(TerminalKind::Failure),
            _ => GuardState::ClosedBy(TerminalKind::Cancellation),
        }
    }

    /// Returns `true` while no terminal event has won.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }
}

/// Lifecycle of a subscription, shared by both engines.
///
/// `Unsubscribed -> Subscribed -> {Completed | Failed | Cancelled}`. The
/// three terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No subscription received yet.
    Unsubscribed,
    /// Subscribed and still open.
    Subscribed,
    /// Completed normally.
    Completed,
    /// Terminated by a failure.
    Failed,
    /// Cancelled by the consumer.
    Cancelled,
}

impl PipelineState {
    /// Returns `true` for the absorbing states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl From<TerminalKind> for PipelineState {
    fn from(kind: TerminalKind) -> Self {
        match kind {
            TerminalKind::Completion => Self::Completed,
            TerminalKind::Failure => Self::Failed,
            TerminalKind::Cancellation => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_first_close_wins() {
        let guard = TerminalGuard::new();
        assert!(guard.is_open());
        assert!(guard.try_close(TerminalKind::Failure));
        assert!(!guard.try_close(TerminalKind::Completion));
        assert!(!guard.try_close(TerminalKind::Cancellation));
        assert_eq!(guard.state(), GuardState::ClosedBy(TerminalKind::Failure));
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            PipelineState::from(TerminalKind::Cancellation),
            PipelineState::Cancelled
        );
        assert!(PipelineState::Completed.is_terminal());
        assert!(!PipelineState::Subscribed.is_terminal());
    }

    #[test]
    fn test_concurrent_close_single_winner() {
        for _ in 0..100 {
            let guard = Arc::new(TerminalGuard::new());
            let winners = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let guard = Arc::clone(&guard);
                    let winners = Arc::clone(&winners);
                    std::thread::spawn(move || {
                        if guard.try_close(TerminalKind::Completion) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }
}
