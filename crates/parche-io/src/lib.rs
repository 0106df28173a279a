//! Device I/O adapter for the parche engine.
//!
//! This crate connects an [`AudioProcessor`](parche_core::AudioProcessor)
//! to the outside world:
//!
//! - [`AudioBackend`]: object-safe trait over platform audio APIs, with
//!   boxed callbacks and RAII [`StreamHandle`]s
//! - [`CpalBackend`]: the default backend (ALSA, CoreAudio, WASAPI)
//! - [`MockBackend`]: deterministic backend for tests and CI
//! - [`run_output`]: glue that chunks arbitrary device buffer sizes into
//!   engine blocks
//! - [`render_wav`]: offline render to a WAV file
//!
//! The engine core never depends on any of this; a host that brings its
//! own buffers can drive `AudioProcessor` directly.

mod backend;
mod cpal_backend;
mod mock;
mod run;

pub use backend::{
    AudioBackend, AudioDevice, BackendStreamConfig, ErrorCallback, InputCallback,
    NegotiatedFormat, OutputCallback, StreamHandle,
};
pub use cpal_backend::CpalBackend;
pub use mock::MockBackend;
pub use run::{render_wav, run_output};

/// Error types for device I/O and offline rendering.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Stream setup or runtime error.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("no audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The backend cannot provide the format the engine was initialized with.
    #[error("unsupported stream format: {0}")]
    UnsupportedFormat(String),

    /// Engine-side failure while driving the stream.
    #[error(transparent)]
    Engine(#[from] parche_core::EngineError),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for device I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
