//! Stream adapter configuration.

use crate::error::{AdaptError, Result};

/// Items requested upfront by a [`MultiStream`](crate::MultiStream).
pub const DEFAULT_PREFETCH: u64 = 256;

/// Configuration for converting a Multi into an async stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Items requested when the stream first subscribes.
    ///
    /// Once three quarters of a batch have been consumed, the same number
    /// is requested again, so at most `prefetch` items wait in the queue.
    pub prefetch: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

impl StreamConfig {
    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    /// Items requested per replenishment.
    #[must_use]
    pub(crate) fn replenish_limit(&self) -> u64 {
        (self.prefetch - (self.prefetch >> 2)).max(1)
    }
}

/// Builder for [`StreamConfig`].
#[derive(Debug, Default)]
pub struct StreamConfigBuilder {
    prefetch: Option<u64>,
}

impl StreamConfigBuilder {
    /// Sets the prefetch size.
    #[must_use]
    pub fn prefetch(mut self, prefetch: u64) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::InvalidConfig`] if the prefetch is zero.
    pub fn build(self) -> Result<StreamConfig> {
        let prefetch = self.prefetch.unwrap_or(DEFAULT_PREFETCH);
        if prefetch == 0 {
            return Err(AdaptError::InvalidConfig(
                "prefetch must be positive".to_string(),
            ));
        }
        Ok(StreamConfig { prefetch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert_eq!(StreamConfig::default().prefetch, DEFAULT_PREFETCH);
        assert_eq!(StreamConfig::default().replenish_limit(), 192);
    }

    #[test]
    fn test_builder_rejects_zero_prefetch() {
        let result = StreamConfig::builder().prefetch(0).build();
        assert!(matches!(result, Err(AdaptError::InvalidConfig(_))));
    }

    #[test]
    fn test_small_prefetch_still_replenishes() {
        let config = StreamConfig::builder().prefetch(1).build().unwrap();
        assert_eq!(config.replenish_limit(), 1);
        let config = StreamConfig::builder().prefetch(4).build().unwrap();
        assert_eq!(config.replenish_limit(), 3);
    }
}
