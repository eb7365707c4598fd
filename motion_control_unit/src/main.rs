//! # Motion Control Unit
//!
//! Loads a TOML configuration, builds the fieldbus master engine named in
//! it (the simulation engine is the only one shipped), performs RT setup
//! and runs the control core until Ctrl-C, the configured run duration or
//! an engine-side stop.
//!
//! With `--interactive` the operator console reads commands from stdin; see
//! [`motion_control_unit::console`] for the protocol.

use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use clap::Parser;
use motion_common::config::MotionConfig;
use motion_common::drive::RunMode;
use motion_common::engine::MasterEngine;
use motion_control_unit::config::load_config;
use motion_control_unit::console::Console;
use motion_control_unit::cycle::{RtParams, rt_setup};
use motion_control_unit::supervisor::MotionCore;
use motion_sim::{SimOptions, SimulatedMaster};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Motion Control Unit: cyclic CiA402 drive control
#[derive(Parser, Debug)]
#[command(name = "motion_control_unit")]
#[command(author)]
#[command(version)]
#[command(about = "Cyclic CiA402 motion control over a fieldbus master engine")]
struct Args {
    /// Path to the configuration TOML.
    #[arg(default_value = "config/motion.toml")]
    config: PathBuf,

    /// Engine driver, overrides `engine.driver` from the config.
    #[arg(long, value_name = "NAME")]
    engine: Option<String>,

    /// CPU core to pin the RT threads to (default: 1).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (default: 80).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Stop after this many milliseconds (0 = run until Ctrl-C).
    #[arg(long, value_name = "MS")]
    duration_ms: Option<u64>,

    /// Start in MANUAL run mode (external commands drive the axes).
    #[arg(long)]
    manual: bool,

    /// Read operator commands from stdin.
    #[arg(short, long)]
    interactive: bool,

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

    info!("Motion Control Unit v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Motion Control Unit shutdown complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    if let Some(ms) = args.duration_ms {
        config.duration_ms = ms;
    }
    if args.manual {
        config.run_mode = RunMode::Manual;
    }
    if let Some(engine) = &args.engine {
        config.engine.driver = engine.clone();
    }
    info!(
        "Config OK: cycle_time={}µs, slaves={}, axes={}",
        config.cycle_time_us,
        config.slaves.len(),
        config.total_axes()
    );

    let engine = create_engine(&config)?;

    rt_setup()?;
    let rt = RtParams {
        cpu_core: Some(args.cpu_core),
        priority: args.rt_priority,
    };
    info!(
        "RT setup complete (cpu_core={}, priority={})",
        args.cpu_core, args.rt_priority
    );

    let core = MotionCore::new(config, engine)?.with_rt(rt);

    let running = core.run_flag();
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    if args.interactive {
        let console = Console::new(core.channel());
        if !args.manual {
            console.prompt_run_mode(&mut io::stdin().lock(), &mut io::stdout())?;
        }
        let flag = Arc::clone(&running);
        thread::Builder::new()
            .name("console".into())
            .spawn(move || {
                let mut out = BufWriter::new(io::stdout());
                if let Err(e) = console.run(&mut io::stdin().lock(), &mut out, &flag) {
                    warn!("console I/O error: {e}");
                }
                // Closing the console ends the run.
                flag.store(false, Ordering::SeqCst);
            })?;
    }

    let summary = core.run()?;
    if !summary.skipped_slaves.is_empty() {
        warn!(slaves = ?summary.skipped_slaves, "slaves skipped during binding");
    }
    if !summary.settled {
        warn!("axes did not settle before engine shutdown");
    }
    Ok(())
}

/// Build the engine selected by `engine.driver`.
fn create_engine(config: &MotionConfig) -> Result<Arc<dyn MasterEngine>, Box<dyn std::error::Error>> {
    match config.engine.driver.as_str() {
        "simulation" => {
            let master = SimulatedMaster::new(SimOptions::from_config(config))?;
            info!(
                "Simulation engine: {} slaves, {} axes",
                master.pdo_map().slaves().len(),
                master.pdo_map().axis_count()
            );
            Ok(Arc::new(master))
        }
        other => Err(format!("unsupported engine driver '{other}' (available: simulation)").into()),
    }
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
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_writer(io::stderr)
            .init();
    }
}
