//! Engine settings file format.
//!
//! Settings are stored as TOML and map onto [`EngineConfig`]; every field
//! has a default so a partial file (or none at all) works.

use std::path::Path;

use anyhow::Context;
use parche_core::EngineConfig;
use serde::Deserialize;

/// Settings file format.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Sample rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Frames per processing block.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Input channel count.
    #[serde(default)]
    pub input_channels: usize,
    /// Output channel count.
    #[serde(default = "default_output_channels")]
    pub output_channels: usize,
    /// Capacity of each cross-domain event queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_block_size() -> usize {
    64
}

fn default_output_channels() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            input_channels: 0,
            output_channels: default_output_channels(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("parsing settings file {}", path.display()))
    }

    /// The engine configuration these settings describe.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_rate: self.sample_rate,
            input_channels: self.input_channels,
            output_channels: self.output_channels,
            block_size: self.block_size,
            queue_capacity: self.queue_capacity,
        }
    }
}
