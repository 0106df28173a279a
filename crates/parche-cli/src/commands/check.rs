//! Patch validation without audio.

use std::path::PathBuf;

use clap::Args;
use parche_core::Engine;

use crate::settings::Settings;

#[derive(Args)]
pub struct CheckArgs {
    /// Patch files to check
    #[arg(value_name = "PATCH", required = true)]
    patches: Vec<PathBuf>,

    /// Engine settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let settings = Settings::load(args.config.as_deref())?;
    let mut engine = Engine::new();
    engine.init(settings.engine_config())?;

    let mut failures = 0usize;
    for path in &args.patches {
        match engine.load_file(path) {
            Ok(id) => {
                println!("{}: ok", path.display());
                engine.close(id)?;
            }
            Err(err) => {
                println!("{}: {err}", path.display());
                failures += 1;
            }
        }
    }
    engine.release()?;

    anyhow::ensure!(
        failures == 0,
        "{failures} of {} patch(es) failed to compile",
        args.patches.len()
    );
    Ok(())
}
