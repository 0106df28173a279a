//! Offline patch rendering.

use std::path::PathBuf;

use clap::Args;
use parche_core::Engine;
use parche_io::render_wav;

use super::ConsoleSink;
use crate::settings::Settings;

#[derive(Args)]
pub struct RenderArgs {
    /// Patch file to render
    #[arg(value_name = "PATCH")]
    patch: PathBuf,

    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Duration to render, in seconds
    #[arg(short, long, default_value_t = 5.0)]
    duration: f64,

    /// Engine settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.duration > 0.0, "duration must be positive");

    let settings = Settings::load(args.config.as_deref())?;
    let mut engine = Engine::new();
    engine.init(settings.engine_config())?;

    let patch = engine.load_file(&args.patch)?;
    println!("Loaded {} as patch {patch}", args.patch.display());

    engine.dsp(true)?;
    let frames = render_wav(&engine.processor(), &args.output, args.duration)?;
    engine.dispatch_pending(&mut ConsoleSink);

    println!(
        "Wrote {} ({frames} frames, {:.2}s at {} Hz)",
        args.output.display(),
        frames as f64 / f64::from(settings.sample_rate),
        settings.sample_rate
    );
    engine.release()?;
    Ok(())
}
