//! Emitter configuration types.
//!
//! A [`MultiEmitter`](crate::multi::MultiEmitter) lets imperative code push
//! items into a Multi without looking at demand. [`EmitterConfig`] decides
//! what happens to items emitted while the subscriber has not asked for them.

use crate::error::{Error, Result};

/// Maximum bounded buffer size accepted by the builder.
pub const MAX_BUFFER_SIZE: usize = 1 << 20; // 1M entries

/// Backpressure strategy for items emitted without outstanding demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressureStrategy {
    /// Queue the items until they are requested.
    ///
    /// With a bounded buffer, overflow fails the stream.
    #[default]
    Buffer,

    /// Discard items nobody asked for.
    Drop,

    /// Fail the stream as soon as an item is emitted without demand.
    Error,

    /// Keep only the most recent undelivered item.
    Latest,

    /// Deliver regardless of demand.
    ///
    /// Only appropriate when the subscriber is known to request unbounded.
    Ignore,
}

/// Configuration for a Multi emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmitterConfig {
    /// Backpressure strategy.
    pub backpressure: BackpressureStrategy,

    /// Capacity of the `Buffer` strategy queue; `None` is unbounded.
    pub buffer_size: Option<usize>,
}

impl EmitterConfig {
    /// Creates a configuration using the given strategy and an unbounded buffer.
    #[must_use]
    pub fn with_strategy(backpressure: BackpressureStrategy) -> Self {
        Self {
            backpressure,
            buffer_size: None,
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> EmitterConfigBuilder {
        EmitterConfigBuilder::default()
    }
}

/// Builder for [`EmitterConfig`].
#[derive(Debug, Default)]
pub struct EmitterConfigBuilder {
    backpressure: Option<BackpressureStrategy>,
    buffer_size: Option<usize>,
}

impl EmitterConfigBuilder {
    /// Sets the backpressure strategy.
    #[must_use]
    pub fn backpressure(mut self, strategy: BackpressureStrategy) -> Self {
        self.backpressure = Some(strategy);
        self
    }

    /// Bounds the buffer used by [`BackpressureStrategy::Buffer`].
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the buffer size is zero or
    /// above [`MAX_BUFFER_SIZE`].
    pub fn build(self) -> Result<EmitterConfig> {
        if let Some(size) = self.buffer_size {
            if size == 0 || size > MAX_BUFFER_SIZE {
                return Err(Error::InvalidArgument(format!(
                    "buffer_size must be in 1..={MAX_BUFFER_SIZE}, got {size}"
                )));
            }
        }
        Ok(EmitterConfig {
            backpressure: self.backpressure.unwrap_or_default(),
            buffer_size: self.buffer_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmitterConfig::default();
        assert_eq!(config.backpressure, BackpressureStrategy::Buffer);
        assert_eq!(config.buffer_size, None);
    }

    #[test]
    fn test_builder() {
        let config = EmitterConfig::builder()
            .backpressure(BackpressureStrategy::Latest)
            .buffer_size(16)
            .build()
            .unwrap();
        assert_eq!(config.backpressure, BackpressureStrategy::Latest);
        assert_eq!(config.buffer_size, Some(16));
    }

    #[test]
    fn test_builder_rejects_zero_buffer() {
        let result = EmitterConfig::builder().buffer_size(0).build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_with_strategy() {
        let config = EmitterConfig::with_strategy(BackpressureStrategy::Drop);
        assert_eq!(config.backpressure, BackpressureStrategy::Drop);
        assert!(config.buffer_size.is_none());
    }
}
