use std::process;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use burnin::cpu::{ComputeEngine, PrimeSearch, UNBOUNDED};
use burnin::{GraphicsEngine, OffscreenSurface, RunStatus};

#[derive(Parser)]
#[command(name = "burnin", version, about = "Saturate the CPU or the GPU on demand")]
struct Cli {
    #[command(subcommand)]
    test: Test,
}

#[derive(Subcommand)]
enum Test {
    /// Run one prime-search worker per hardware thread
    Cpu {
        /// Number of workers (defaults to the number of hardware threads)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Search bound; the default is never reached
        #[arg(long, default_value_t = UNBOUNDED)]
        ceiling: u64,
        /// Seconds before the run is stopped, 0 runs until it settles
        #[arg(short, long, default_value_t = 0)]
        duration: u64,
    },
    /// Redraw the fragment workload on a headless device every frame
    Gpu {
        /// Seconds before the session is stopped, 0 runs until killed
        #[arg(short, long, default_value_t = 0)]
        duration: u64,
    },
}

/// How a watched run ended from the command line's point of view.
enum Outcome {
    Settled(RunStatus),
    TimedOut,
}

fn watch(statuses: &Receiver<RunStatus>, duration: u64) -> Result<Outcome> {
    let deadline = (duration > 0).then(|| Instant::now() + Duration::from_secs(duration));
    loop {
        let status = match deadline {
            Some(at) => match statuses.recv_deadline(at) {
                Ok(status) => status,
                Err(RecvTimeoutError::Timeout) => return Ok(Outcome::TimedOut),
                Err(RecvTimeoutError::Disconnected) => bail!("status stream closed"),
            },
            None => statuses.recv().context("status stream closed")?,
        };
        if status != RunStatus::Running {
            return Ok(Outcome::Settled(status));
        }
    }
}

fn run_cpu(workers: Option<usize>, ceiling: u64, duration: u64) -> Result<()> {
    let engine = ComputeEngine::with_workload(PrimeSearch::new(ceiling));
    let statuses = engine.subscribe();
    let size = engine.start(workers)?;
    info!(workers = size, duration, "cpu test starting");
    if duration == 0 && ceiling == UNBOUNDED {
        info!("running indefinitely, to stop use: kill {}", process::id());
    }

    match watch(&statuses, duration)? {
        Outcome::Settled(RunStatus::Completed) => {
            info!(completed = engine.completed_units(), "stress test completed");
            Ok(())
        }
        Outcome::Settled(RunStatus::Failed(reason)) => bail!("test failed: {}", reason),
        Outcome::Settled(other) => bail!("compute run ended unexpectedly: {}", other),
        Outcome::TimedOut => {
            engine.stop();
            info!(completed = engine.completed_units(), "test finished after {} seconds", duration);
            Ok(())
        }
    }
}

fn run_gpu(duration: u64) -> Result<()> {
    let engine = GraphicsEngine::new();
    let statuses = engine.subscribe();
    engine
        .start(OffscreenSurface::default())
        .context("gpu test could not start")?;
    info!(duration, "gpu test running");
    if duration == 0 {
        info!("running indefinitely, to stop use: kill {}", process::id());
    }

    match watch(&statuses, duration)? {
        Outcome::TimedOut => {
            engine.stop();
            info!("gpu test stopped after {} seconds", duration);
            Ok(())
        }
        Outcome::Settled(RunStatus::Failed(reason)) => bail!("gpu test failed: {}", reason),
        Outcome::Settled(other) => bail!("render session ended unexpectedly: {}", other),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.test {
        Test::Cpu {
            workers,
            ceiling,
            duration,
        } => run_cpu(workers, ceiling, duration),
        Test::Gpu { duration } => run_gpu(duration),
    };

    if let Err(err) = result {
        error!("{:#}", err);
        process::exit(1);
    }
}
