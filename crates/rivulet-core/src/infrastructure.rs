//! Process-wide fallback for failures nobody handles.
//!
//! A failure is never silently lost. When no downstream consumer can take
//! it (a callback subscriber without a failure handler, a panicking
//! cancellation hook, a failure racing a cancel) it is passed to the
//! dropped-failure handler. The default handler logs it with
//! `tracing::error!`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Failure};

type FailureHandler = Arc<dyn Fn(&Failure) + Send + Sync>;

static DROPPED_FAILURE_HANDLER: RwLock<Option<FailureHandler>> = parking_lot::const_rwlock(None);

/// Installs a custom dropped-failure handler, replacing any previous one.
pub fn set_dropped_failure_handler<F>(handler: F)
where
    F: Fn(&Failure) + Send + Sync + 'static,
{
    *DROPPED_FAILURE_HANDLER.write() = Some(Arc::new(handler));
}

/// Restores the default logging handler.
pub fn reset_dropped_failure_handler() {
    *DROPPED_FAILURE_HANDLER.write() = None;
}

/// Reports a failure that has no consumer.
pub fn handle_dropped_failure(failure: &Failure) {
    let handler = DROPPED_FAILURE_HANDLER.read().clone();
    match handler {
        Some(handler) => handler(failure),
        None => tracing::error!(%failure, "unhandled failure dropped by pipeline"),
    }
}

/// Runs a user callback, converting a panic into a [`Failure`].
pub(crate) fn catch<R>(callback: impl FnOnce() -> R) -> Result<R, Failure> {
    std::panic::catch_unwind(AssertUnwindSafe(callback)).map_err(|panic| {
        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Failure::new(Error::CallbackPanicked(msg))
    })
}

/// Runs a callback whose panic has nowhere to go but the dropped-failure handler.
pub(crate) fn run_detached(callback: impl FnOnce()) {
    if let Err(failure) = catch(callback) {
        handle_dropped_failure(&failure);
    }
}
