//! Pluggable audio backend abstraction.
//!
//! [`AudioBackend`] decouples the engine from any specific platform audio
//! API. The default implementation wraps cpal; tests use the deterministic
//! [`MockBackend`](crate::MockBackend); plugin hosts and embedded targets
//! can drive the engine directly and skip this layer entirely.
//!
//! The trait uses boxed closures for callbacks rather than generic
//! parameters, making it object-safe and enabling runtime backend
//! selection. Stream handles are returned as [`StreamHandle`], a
//! type-erased wrapper that stops the stream on drop, keeping
//! platform-specific types out of application code.

use crate::Result;

/// Audio device information.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Whether the device supports audio input.
    pub is_input: bool,
    /// Whether the device supports audio output.
    pub is_output: bool,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
}

/// Configuration for building an audio stream.
#[derive(Debug, Clone)]
pub struct BackendStreamConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred device buffer size in frames.
    pub buffer_size: u32,
    /// Number of audio channels.
    pub channels: u16,
    /// Optional device name (uses system default if `None`).
    pub device_name: Option<String>,
}

impl Default for BackendStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 512,
            channels: 2,
            device_name: None,
        }
    }
}

/// The format a backend actually committed to for a stream.
///
/// Backends may not support the exact requested rate or channel count;
/// [`AudioBackend::negotiate`] reports what a subsequent
/// `build_output_stream` with the same config would use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Actual sample rate in Hz.
    pub sample_rate: u32,
    /// Actual channel count.
    pub channels: u16,
}

/// Type-erased audio stream handle.
///
/// The stream is active while this handle exists; dropping it stops
/// playback or capture, whichever backend produced it.
pub struct StreamHandle {
    _inner: Box<dyn Send>,
}

impl StreamHandle {
    /// Wraps a backend-specific stream object, keeping it alive until this
    /// handle is dropped. `T` must be `Send + 'static` so the handle can
    /// move between threads.
    pub fn new<T: Send + 'static>(stream: T) -> Self {
        Self {
            _inner: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Audio output callback. Runs on the audio thread with a mutable buffer
/// of interleaved f32 samples to fill; it must not allocate, lock, or
/// perform I/O beyond what the engine's block step does.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Audio input callback. Runs on the audio thread with captured
/// interleaved f32 samples.
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Error callback, invoked with a human-readable message when the backend
/// encounters a streaming error.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// Pluggable audio backend.
///
/// Object-safe: select a backend at runtime via `Box<dyn AudioBackend>`.
pub trait AudioBackend: Send {
    /// Human-readable backend name (e.g. "cpal", "mock").
    fn name(&self) -> &str;

    /// Lists all available audio devices.
    fn list_devices(&self) -> Result<Vec<AudioDevice>>;

    /// The default output device, if any.
    fn default_output_device(&self) -> Result<Option<AudioDevice>>;

    /// The default input device, if any.
    fn default_input_device(&self) -> Result<Option<AudioDevice>>;

    /// Reports the format a stream built from `config` would actually use.
    ///
    /// The default implementation echoes the request unchanged.
    fn negotiate(&self, config: &BackendStreamConfig) -> Result<NegotiatedFormat> {
        Ok(NegotiatedFormat {
            sample_rate: config.sample_rate,
            channels: config.channels,
        })
    }

    /// Builds an output-only stream. `callback` fills interleaved f32
    /// buffers on the audio thread; the returned handle keeps the stream
    /// alive and dropping it stops playback.
    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: OutputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;

    /// Builds an input-only stream. `callback` receives captured
    /// interleaved f32 buffers on the audio thread.
    fn build_input_stream(
        &self,
        config: &BackendStreamConfig,
        callback: InputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = BackendStreamConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.buffer_size, 512);
        assert_eq!(config.channels, 2);
        assert!(config.device_name.is_none());
    }

    #[test]
    fn stream_handle_debug() {
        let handle = StreamHandle::new(42u32);
        assert!(format!("{handle:?}").contains("StreamHandle"));
    }
}
