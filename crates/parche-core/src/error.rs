//! Engine error taxonomy.
//!
//! Structural errors return synchronously from the control API. Per-block
//! faults never surface here; they travel the outbound queue as fault
//! entries so nothing unwinds across the audio boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::PatchId;

/// Convenience alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Everything the engine's control surface can fail with.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Patch source failed to parse or build.
    #[error("invalid patch at line {line}: {reason}")]
    InvalidPatch {
        /// 1-based source line the problem was found on.
        line: usize,
        /// Human-readable description of the problem.
        reason: String,
    },

    /// Patch file could not be read.
    #[error("failed to read patch {path:?}")]
    PatchIo {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Patch handle does not name an open patch.
    #[error("unknown patch handle {0}")]
    UnknownHandle(PatchId),

    /// No array with this name is registered.
    #[error("unknown array: {0}")]
    UnknownArray(String),

    /// Array access crosses the declared bounds. Nothing was read or written.
    #[error("array '{name}': offset {offset} + len {len} exceeds size {size}")]
    OutOfRange {
        /// Array name.
        name: String,
        /// Requested start offset.
        offset: usize,
        /// Requested element count.
        len: usize,
        /// Declared array size.
        size: usize,
    },

    /// The signal graph contains a cycle with no intervening one-block delay.
    #[error("signal cycle through '{object}' (close feedback loops with delay1~)")]
    CyclicGraph {
        /// An object on the offending cycle.
        object: String,
    },

    /// Engine configuration was rejected at init.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Operation requires an initialized, non-released engine.
    #[error("engine is not initialized")]
    NotInitialized,

    /// The bounded inbound queue is full; the event was not enqueued.
    #[error("event queue is full")]
    QueueFull,

    /// `finish_list`/`finish_message` called with no staged message.
    #[error("no staged message to finish")]
    EmptyStage,
}

impl EngineError {
    /// Shorthand for [`EngineError::InvalidPatch`].
    pub fn invalid_patch(line: usize, reason: impl Into<String>) -> Self {
        Self::InvalidPatch {
            line,
            reason: reason.into(),
        }
    }
}

/// Validation failures for [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Sample rate must be nonzero.
    #[error("sample rate must be nonzero")]
    ZeroSampleRate,

    /// Block size must be nonzero.
    #[error("block size must be nonzero")]
    ZeroBlockSize,

    /// At least one output channel is required.
    #[error("at least one output channel is required")]
    NoOutputChannels,

    /// Queue capacity must be nonzero.
    #[error("queue capacity must be nonzero")]
    ZeroQueueCapacity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = EngineError::OutOfRange {
            name: "table".into(),
            offset: 60,
            len: 8,
            size: 64,
        };
        let text = err.to_string();
        assert!(text.contains("table"));
        assert!(text.contains("60"));
        assert!(text.contains("64"));

        let err = EngineError::invalid_patch(7, "unknown object type 'foo~'");
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn config_error_converts() {
        let err: EngineError = ConfigError::ZeroBlockSize.into();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
