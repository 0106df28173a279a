//! Engine configuration.

use crate::error::ConfigError;

/// Parameters fixed for one init/release session of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved input channel count. Zero disables `adc~` input.
    pub input_channels: usize,
    /// Interleaved output channel count.
    pub output_channels: usize,
    /// Frames per processing block. Fixed until release.
    pub block_size: usize,
    /// Capacity of each cross-domain event queue, in entries.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            input_channels: 0,
            output_channels: 2,
            block_size: 64,
            queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Checks the configuration before the engine commits to it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.output_channels == 0 {
            return Err(ConfigError::NoOutputChannels);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }

    /// Duration of one block in logical samples (frames).
    pub fn block_frames(&self) -> u64 {
        self.block_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut cfg = EngineConfig::default();
        cfg.block_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroBlockSize)));

        let mut cfg = EngineConfig::default();
        cfg.output_channels = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::NoOutputChannels)));

        let mut cfg = EngineConfig::default();
        cfg.sample_rate = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroSampleRate)));

        let mut cfg = EngineConfig::default();
        cfg.queue_capacity = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroQueueCapacity)));
    }
}
