//! Engine-to-backend glue and offline rendering.
//!
//! Device callbacks arrive with whatever buffer size the platform picked;
//! the engine renders in fixed blocks. [`run_output`] adapts the two with
//! a carry buffer that holds the unread tail of the last block.

use std::path::Path;

use parche_core::AudioProcessor;
use tracing::{info, warn};

use crate::backend::{AudioBackend, BackendStreamConfig, StreamHandle};
use crate::{Error, Result};

/// Starts an output stream that pulls blocks from `processor`.
///
/// The engine must already be initialized; its sample rate and output
/// channel count define the stream format, and a backend that cannot match
/// the sample rate is rejected. The stream runs until the returned handle
/// is dropped.
pub fn run_output(
    processor: &AudioProcessor,
    backend: &dyn AudioBackend,
    config: &BackendStreamConfig,
) -> Result<StreamHandle> {
    let engine_config = processor
        .config()
        .ok_or(Error::Engine(parche_core::EngineError::NotInitialized))?;

    let stream_config = BackendStreamConfig {
        sample_rate: engine_config.sample_rate,
        channels: engine_config.output_channels as u16,
        ..config.clone()
    };
    let format = backend.negotiate(&stream_config)?;
    if format.sample_rate != engine_config.sample_rate {
        return Err(Error::UnsupportedFormat(format!(
            "engine runs at {} Hz but backend '{}' offers {} Hz",
            engine_config.sample_rate,
            backend.name(),
            format.sample_rate
        )));
    }
    if format.channels != stream_config.channels {
        return Err(Error::UnsupportedFormat(format!(
            "engine renders {} channels but backend '{}' offers {}",
            stream_config.channels,
            backend.name(),
            format.channels
        )));
    }

    let channels = engine_config.output_channels;
    let block_samples = engine_config.block_size * channels;
    let callback_processor = processor.clone();
    // Carry holds one rendered block; start exhausted to force a render on
    // the first callback.
    let mut carry = vec![0.0f32; block_samples];
    let mut carry_pos = block_samples;

    let callback = Box::new(move |data: &mut [f32]| {
        let mut filled = 0;
        while filled < data.len() {
            if carry_pos == carry.len() {
                if callback_processor.process_block(&[], &mut carry).is_err() {
                    data[filled..].fill(0.0);
                    return;
                }
                carry_pos = 0;
            }
            let n = (data.len() - filled).min(carry.len() - carry_pos);
            data[filled..filled + n].copy_from_slice(&carry[carry_pos..carry_pos + n]);
            carry_pos += n;
            filled += n;
        }
    });
    let error_callback = Box::new(|message: &str| {
        warn!(message, "audio stream error");
    });

    info!(
        backend = backend.name(),
        sample_rate = engine_config.sample_rate,
        channels,
        block_size = engine_config.block_size,
        "starting engine output stream"
    );
    backend.build_output_stream(&stream_config, callback, error_callback)
}

/// Renders `duration_secs` of engine output into a 32-bit float WAV file.
///
/// Returns the number of frames written, which is exactly
/// `round(duration_secs * sample_rate)` regardless of block size.
pub fn render_wav(
    processor: &AudioProcessor,
    path: impl AsRef<Path>,
    duration_secs: f64,
) -> Result<u64> {
    let engine_config = processor
        .config()
        .ok_or(Error::Engine(parche_core::EngineError::NotInitialized))?;
    let channels = engine_config.output_channels;
    let total_frames = (duration_secs * f64::from(engine_config.sample_rate)).round() as u64;

    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate: engine_config.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;

    let mut block = vec![0.0f32; engine_config.block_size * channels];
    let mut written = 0u64;
    while written < total_frames {
        processor.process_block(&[], &mut block)?;
        let frames = ((total_frames - written) as usize).min(engine_config.block_size);
        for sample in &block[..frames * channels] {
            writer.write_sample(*sample)?;
        }
        written += frames as u64;
    }
    writer.finalize()?;

    info!(
        path = %path.as_ref().display(),
        frames = written,
        sample_rate = engine_config.sample_rate,
        "offline render complete"
    );
    Ok(written)
}
