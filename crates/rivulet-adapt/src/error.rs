//! Errors raised at the async boundary.

use rivulet_core::Failure;

/// Errors raised by the adapters themselves.
///
/// User failures cross the boundary unchanged as [`Failure`]s; these
/// variants only cover faults introduced by the bridging.
#[derive(Debug, thiserror::Error)]
pub enum AdaptError {
    /// Invalid adapter configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A spawned future or stream panicked while being driven.
    #[error("adapted task panicked: {0}")]
    TaskPanicked(String),

    /// The factory building a subscription's future or stream panicked.
    #[error("adapter factory panicked: {0}")]
    FactoryPanicked(String),

    /// The runtime dropped the task before it produced a value.
    #[error("adapted task was dropped by the runtime")]
    TaskDropped,
}

impl From<AdaptError> for Failure {
    fn from(error: AdaptError) -> Self {
        Failure::new(error)
    }
}

/// Result type for adapter configuration.
pub type Result<T> = std::result::Result<T, AdaptError>;

/// Renders a panic payload caught from a spawned task.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_failure_keeps_kind() {
        let failure: Failure = AdaptError::TaskPanicked("boom".into()).into();
        assert!(failure.is::<AdaptError>());
        assert_eq!(failure.to_string(), "adapted task panicked: boom");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
