//! Error types for the reactive engine.
//!
//! Two layers live here:
//!
//! - [`Error`] enumerates the faults the engine raises itself: protocol
//!   violations, missing values, captured callback panics.
//! - [`Failure`] is the cloneable payload of a Failure signal. It wraps any
//!   `std::error::Error`, engine [`Error`]s included, so user errors travel
//!   through a pipeline untouched.

use std::fmt;
use std::sync::Arc;

/// Errors raised by the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `request(0)` was called on a subscription.
    #[error("invalid demand: request({0}) must be positive")]
    InvalidDemand(u64),

    /// A supplier or emitter produced no value where one is mandatory.
    #[error("null reference: {0}")]
    NullReference(String),

    /// Completion was converted into a failure without a specific cause.
    #[error("no such element")]
    NoSuchElement,

    /// A user callback panicked; the payload message is preserved.
    #[error("callback panicked: {0}")]
    CallbackPanicked(String),

    /// A subscriber received a second subscription.
    #[error("subscriber already has an upstream subscription")]
    AlreadySubscribed,

    /// An emitter could not honour its backpressure strategy.
    #[error("back-pressure failure: {0}")]
    BackPressure(String),

    /// Invalid argument at composition time.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Several failures, in the order they happened.
    #[error("multiple failures: [{}]", join_failures(.0))]
    Composite(Vec<Failure>),
}

fn join_failures(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for composition-time operations.
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Payload of a Failure signal.
///
/// Cloning is cheap (a reference count bump), which lets hooks observe a
/// failure while it continues downstream.
#[derive(Clone)]
pub struct Failure {
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MessageFailure(String);

impl Failure {
    /// Wraps an error.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Creates a failure carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(MessageFailure(message.into()))
    }

    /// Shorthand for an [`Error::NullReference`] failure.
    pub fn null_reference(what: impl Into<String>) -> Self {
        Self::new(Error::NullReference(what.into()))
    }

    /// Combines a failure already in flight with a secondary one.
    ///
    /// Nested composites are flattened so the result lists every failure
    /// once, the primary first.
    #[must_use]
    pub fn composite(primary: Failure, secondary: Failure) -> Self {
        let existing = match primary.kind() {
            Some(Error::Composite(failures)) => Some(failures.clone()),
            _ => None,
        };
        let mut failures = existing.unwrap_or_else(|| vec![primary]);
        failures.push(secondary);
        Self::new(Error::Composite(failures))
    }

    /// Returns the engine error, if this failure carries one.
    #[must_use]
    pub fn kind(&self) -> Option<&Error> {
        self.downcast_ref::<Error>()
    }

    /// Attempts to view the payload as `E`.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// Returns `true` if the payload is an `E`.
    #[must_use]
    pub fn is<E>(&self) -> bool
    where
        E: std::error::Error + 'static,
    {
        self.inner.is::<E>()
    }

    /// Returns `true` if both failures share the same payload.
    #[must_use]
    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Failure").field(&self.inner).finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}
