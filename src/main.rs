//! retro-gba - headless runner
//!
//! Loads a game with the test-pattern guest core, runs a fixed number of
//! frames and optionally writes a snapshot.

use anyhow::{bail, Context};
use clap::Parser;
use rg_core::Config;
use rg_integration::host::{Host, HostLogLevel, PerfCounter, VideoFrame};
use rg_integration::{Engine, NullCore, DRC_OPTION_KEY};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "retro-gba", version, about = "Headless retro-gba runner")]
struct Args {
    /// Game image to load
    game: PathBuf,

    /// Number of frames to run
    #[arg(short, long, default_value_t = 60)]
    frames: u64,

    /// Directory holding gba_bios.bin (defaults to the game's directory)
    #[arg(long)]
    system_dir: Option<PathBuf>,

    /// Directory for backup files (defaults to the game's directory)
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Disable the dynamic recompiler
    #[arg(long)]
    interpreter: bool,

    /// Write a snapshot here after the last frame
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

/// Host that forwards everything to the log
struct ConsoleHost {
    system_dir: Option<PathBuf>,
    save_dir: Option<PathBuf>,
    translation: bool,
    frames: u64,
    samples: usize,
}

impl Host for ConsoleHost {
    fn log(&mut self, level: HostLogLevel, message: &str) {
        match level {
            HostLogLevel::Debug => tracing::debug!("{}", message),
            HostLogLevel::Info => tracing::info!("{}", message),
            HostLogLevel::Warn => tracing::warn!("{}", message),
            HostLogLevel::Error => tracing::error!("{}", message),
        }
    }

    fn system_directory(&self) -> Option<PathBuf> {
        self.system_dir.clone()
    }

    fn save_directory(&self) -> Option<PathBuf> {
        self.save_dir.clone()
    }

    fn variable(&self, key: &str) -> Option<String> {
        (key == DRC_OPTION_KEY)
            .then(|| if self.translation { "enabled" } else { "disabled" }.to_string())
    }

    fn perf_log(&mut self, counters: &[PerfCounter]) {
        for counter in counters {
            let average = counter
                .total
                .checked_div(counter.calls.max(1) as u32)
                .unwrap_or_default();
            tracing::info!(
                "{}: {} calls, {:?} total, {:?} average",
                counter.name,
                counter.calls,
                counter.total,
                average
            );
        }
    }

    fn poll_input(&mut self) {}

    fn video_refresh(&mut self, _frame: &VideoFrame<'_>) {
        self.frames += 1;
    }

    fn audio_sample_batch(&mut self, samples: &[i16]) {
        self.samples += samples.len() / 2;
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    rg_core::logging::init(config.debug.log_level);

    tracing::info!("Starting retro-gba headless runner");

    let host = ConsoleHost {
        system_dir: args.system_dir,
        save_dir: args.save_dir,
        translation: !args.interpreter,
        frames: 0,
        samples: 0,
    };

    let mut engine = Engine::new(config, host, NullCore::new());
    engine.init();
    engine.set_environment();

    if !engine.load_game(&args.game) {
        engine.deinit();
        bail!("failed to load {}", args.game.display());
    }

    for _ in 0..args.frames {
        engine.run().context("frame failed")?;
    }
    tracing::info!(
        "Ran {} frames, {} audio frames",
        engine.host().frames,
        engine.host().samples
    );

    if let Some(path) = args.snapshot.as_ref() {
        let mut blob = vec![0u8; engine.serialize_size()];
        engine.try_serialize(&mut blob)?;
        std::fs::write(path, &blob)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
        tracing::info!("Wrote snapshot to {}", path.display());
    }

    engine.deinit();
    Ok(())
}
