//! The signals a producer sends downstream.

use crate::error::Failure;

/// One downstream signal.
///
/// Items may be followed by at most one terminal signal
/// (`Failure` or `Completion`).
#[derive(Debug, Clone)]
pub enum Signal<T> {
    /// An item.
    Item(T),
    /// Terminal failure.
    Failure(Failure),
    /// Terminal completion.
    Completion,
}

impl<T> Signal<T> {
    /// Returns `true` for `Failure` and `Completion`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Item(_))
    }

    /// Returns the item, if this is one.
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::Failure(_) | Self::Completion => None,
        }
    }
}
