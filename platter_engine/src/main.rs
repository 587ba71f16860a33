//! # Platter Engine Binary
//!
//! Digital-vinyl engine: registers simulated decks and a control surface
//! with the real-time dispatch core, starts the session, and runs until
//! Ctrl-C (or `--run-for` elapses).
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (2 decks, 1ms tick)
//! platter_engine
//!
//! # Run from a config file, verbose logging
//! platter_engine --config config/platter.toml -v
//!
//! # Bounded run for scripted checks
//! platter_engine --decks 1 --run-for 5
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use platter_common::config::{EngineConfig, load_config};
use platter_common::device::Device;
use platter_engine::drivers::simulation::{SimDeck, SimPanel};
use platter_rt::RtController;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Platter engine - poll-driven real-time dispatch over simulated decks
#[derive(Parser, Debug)]
#[command(name = "platter_engine")]
#[command(version)]
#[command(about = "Digital-vinyl engine with poll-driven real-time dispatch")]
struct Args {
    /// Path to engine configuration TOML. Defaults apply when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the number of simulated decks.
    #[arg(long)]
    decks: Option<u8>,

    /// Run for N seconds, then stop (run until Ctrl-C when omitted).
    #[arg(long, value_name = "SECS")]
    run_for: Option<u64>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("platter engine v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("platter engine shutdown complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            info!("loading config from {}", path.display());
            load_config(path)?
        }
        None => EngineConfig::default(),
    };
    if let Some(decks) = args.decks {
        config.decks = decks;
        config.validate()?;
    }

    let tick = Duration::from_micros(u64::from(config.tick_us));
    info!("config OK: decks={}, tick={}us", config.decks, config.tick_us);

    let mut rt = RtController::new();

    let mut decks = Vec::with_capacity(config.decks as usize);
    for index in 0..config.decks as usize {
        let deck = Arc::new(SimDeck::new(index, tick)?);
        rt.add_device(deck.clone())?;
        decks.push(deck);
    }

    let panel = Arc::new(SimPanel::new());
    rt.add_controller(panel.clone())?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    rt.start()?;
    info!("engine running");

    let deadline = args
        .run_for
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("run window elapsed");
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    rt.stop();

    for deck in &decks {
        info!("{} serviced {} audio blocks", deck.name(), deck.ticks());
    }
    info!(
        "panel sampled {} times over {} dispatch cycles",
        panel.samples(),
        rt.wakes()
    );

    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
