//! Real-time patch playback.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Args;
use parche_core::Engine;
use parche_io::{BackendStreamConfig, CpalBackend, run_output};

use super::ConsoleSink;
use crate::settings::Settings;

#[derive(Args)]
pub struct PlayArgs {
    /// Patch file to play
    #[arg(value_name = "PATCH")]
    patch: PathBuf,

    /// Engine settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output device (exact or partial name)
    #[arg(short, long)]
    output: Option<String>,

    /// Device buffer size in frames
    #[arg(long, default_value_t = 512)]
    buffer_size: u32,

    /// Stop after this many seconds (runs until Ctrl+C if omitted)
    #[arg(short, long)]
    duration: Option<f64>,
}

pub fn run(args: PlayArgs) -> anyhow::Result<()> {
    let settings = Settings::load(args.config.as_deref())?;
    let mut engine = Engine::new();
    engine.init(settings.engine_config())?;

    let patch = engine.load_file(&args.patch)?;
    println!("Loaded {} as patch {patch}", args.patch.display());

    engine.dsp(true)?;
    let backend = CpalBackend::new();
    let stream_config = BackendStreamConfig {
        buffer_size: args.buffer_size,
        device_name: args.output.clone(),
        ..BackendStreamConfig::default()
    };
    let stream = run_output(&engine.processor(), &backend, &stream_config)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    match args.duration {
        Some(secs) => println!("Playing for {secs}s... Press Ctrl+C to stop early."),
        None => println!("Playing... Press Ctrl+C to stop."),
    }

    let deadline = args
        .duration
        .map(|secs| std::time::Instant::now() + Duration::from_secs_f64(secs));
    let mut sink = ConsoleSink;
    while running.load(Ordering::SeqCst) {
        engine.dispatch_pending(&mut sink);
        if let Some(deadline) = deadline
            && std::time::Instant::now() >= deadline
        {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    engine.dispatch_pending(&mut sink);
    engine.dsp(false)?;
    engine.release()?;
    println!("Done!");
    Ok(())
}
