//! simcast command-line interface
//!
//! ```text
//! simcast publish   [--endpoint tcp://*:5555] [--max-ticks N]
//! simcast subscribe [--endpoint tcp://localhost:5555] [--snapshot-dir DIR] [--max-rate HZ] [--quit-after N]
//! simcast local     [--snapshot-dir DIR] [--quit-after N] [--max-ticks N]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use simcast::config::{Config, RendererKind};
use simcast::runner::{self, StopReason};
use simcast::simulators::SyntheticSimulator;
use simcast::transport::{Publisher, Subscriber};
use simcast::{Endpoint, StreamError, renderer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "simcast")]
#[command(author, version, about = "Stream simulator camera frames over pub/sub", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. info, debug, simcast=trace)
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Step the simulation and publish camera frames
    Publish {
        /// Endpoint to bind
        #[arg(long)]
        endpoint: Option<Endpoint>,

        /// Stop after this many simulation steps
        #[arg(long)]
        max_ticks: Option<u64>,
    },

    /// Receive frames from a publisher and display them
    Subscribe {
        /// Publisher endpoint to connect to
        #[arg(long)]
        endpoint: Option<Endpoint>,

        /// Write frames as PNG files into this directory
        #[arg(long, value_name = "DIR")]
        snapshot_dir: Option<PathBuf>,

        /// Render at most this many frames per second
        #[arg(long, value_name = "HZ")]
        max_rate: Option<u32>,

        /// Quit after this many displayed frames
        #[arg(long, value_name = "N")]
        quit_after: Option<u64>,
    },

    /// Step the simulation and display frames in-process
    Local {
        /// Write frames as PNG files into this directory
        #[arg(long, value_name = "DIR")]
        snapshot_dir: Option<PathBuf>,

        /// Quit after this many displayed frames
        #[arg(long, value_name = "N")]
        quit_after: Option<u64>,

        /// Stop after this many simulation steps
        #[arg(long)]
        max_ticks: Option<u64>,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    let use_snapshots = |config: &mut Config, dir: &Option<PathBuf>| {
        if let Some(dir) = dir {
            config.render.renderer = RendererKind::Snapshot;
            config.render.snapshot_dir = Some(dir.clone());
        }
    };

    match &cli.command {
        Commands::Publish { endpoint, max_ticks } => {
            if let Some(endpoint) = endpoint {
                config.transport.publish_endpoint = endpoint.clone();
            }
            config.simulator.max_ticks = max_ticks.or(config.simulator.max_ticks);
        }
        Commands::Subscribe { endpoint, snapshot_dir, max_rate, quit_after } => {
            if let Some(endpoint) = endpoint {
                config.transport.subscribe_endpoint = endpoint.clone();
            }
            use_snapshots(&mut config, snapshot_dir);
            config.render.max_rate_hz = max_rate.or(config.render.max_rate_hz);
            config.render.quit_after = quit_after.or(config.render.quit_after);
        }
        Commands::Local { snapshot_dir, quit_after, max_ticks } => {
            use_snapshots(&mut config, snapshot_dir);
            config.render.quit_after = quit_after.or(config.render.quit_after);
            config.simulator.max_ticks = max_ticks.or(config.simulator.max_ticks);
        }
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn async_main(command: Commands, config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let stop = match command {
        Commands::Publish { .. } => {
            let publisher =
                Publisher::bind(&config.transport.publish_endpoint, config.transport.publisher_options()).await?;
            info!(endpoint = %config.transport.publish_endpoint, "Publisher listening");

            let sim = SyntheticSimulator::from_config(&config.simulator)?;
            let report = runner::run_publisher(sim, publisher, &config, cancel.clone()).await?;
            if let Some(publish) = report.publish {
                info!(
                    published = publish.published,
                    delivered = publish.delivered,
                    dropped = publish.dropped,
                    "Publishing finished"
                );
            }
            report.stop
        }
        Commands::Subscribe { .. } => {
            let subscriber =
                Subscriber::connect(&config.transport.subscribe_endpoint, config.transport.subscriber_options())
                    .await?;
            let renderer = renderer::from_config(&config.render)?;
            let report = runner::run_subscriber(
                subscriber,
                renderer,
                &config.render,
                &config.transport.topic,
                config.simulator.frame_rate(),
                cancel.clone(),
            )
            .await?;
            report.stop
        }
        Commands::Local { .. } => {
            let sim = SyntheticSimulator::from_config(&config.simulator)?;
            let renderer = renderer::from_config(&config.render)?;
            runner::run_local(sim, renderer, &config, cancel.clone()).await?.stop
        }
    };

    if stop == StopReason::Cancelled {
        info!("Cancelled by user");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging.level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(cli.command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            if let Some(stream_error) = e.downcast_ref::<StreamError>() {
                for suggestion in stream_error.recovery_suggestions() {
                    warn!("  - {}", suggestion);
                }
            }
            ExitCode::FAILURE
        }
    }
}
