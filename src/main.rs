//! # Depth map node
//!
//! Headless runner: binds the two input endpoints to replay directories, writes every published
//! map to the output directory, and takes parameter updates from a watched control file and
//! `name=value` lines on stdin.

use std::io::BufReader;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::Layer;

use cv_depthmap::config::NodeConfig;
use cv_depthmap::params::ParamFile;
use cv_depthmap::prelude::*;
use cv_depthmap::publisher::{DirectorySink, LogSink};
use cv_depthmap::transport::{dispatch, spawn_control, DirectorySource};

/// Stereo block-matching depth map node
#[derive(Parser, Debug)]
#[command(name = "depthmap", author, version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "DEPTHMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Left input endpoint name
    #[arg(long, env = "DEPTHMAP_LEFT_ENDPOINT")]
    left_endpoint: Option<String>,

    /// Right input endpoint name
    #[arg(long, env = "DEPTHMAP_RIGHT_ENDPOINT")]
    right_endpoint: Option<String>,

    /// Directory replayed as the left stream
    #[arg(long, env = "DEPTHMAP_LEFT_DIR")]
    left_dir: Option<PathBuf>,

    /// Directory replayed as the right stream
    #[arg(long, env = "DEPTHMAP_RIGHT_DIR")]
    right_dir: Option<PathBuf>,

    /// Directory published maps are written to
    #[arg(short, long, env = "DEPTHMAP_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Watched parameter control file
    #[arg(long, env = "DEPTHMAP_PARAMS_FILE")]
    params_file: Option<PathBuf>,

    /// Do not read parameter commands from stdin
    #[arg(long)]
    no_stdin: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, env = "DEPTHMAP_VERBOSE")]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", env = "DEPTHMAP_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = load_config(&cli)?;
    info!(version = env!("CARGO_PKG_VERSION"), ?config, "depth map node starting");

    // ---- BIND ENDPOINTS ----

    let interval = Duration::from_millis(config.replay.frame_interval_ms);
    let left = DirectorySource::open(
        config.endpoints.left.as_str(),
        Side::Left,
        &config.replay.left_dir,
        interval,
    )?;
    let right = DirectorySource::open(
        config.endpoints.right.as_str(),
        Side::Right,
        &config.replay.right_dir,
        interval,
    )?;
    let output = DirectorySink::new(&config.replay.output_dir)?;

    let publisher = Publisher::new()
        .with_sink(output)
        .with_sink(LogSink::new(OUTPUT_TOPIC));
    let node = DepthMapNode::new(config.pairing_policy(), ParameterStore::default(), publisher);

    // ---- CONTROL SURFACE ----

    let mut params_file = config.replay.params_file.as_ref().map(ParamFile::new);
    if !cli.no_stdin {
        spawn_control(node.params().clone(), BufReader::new(std::io::stdin()));
    }

    // ---- DISPATCH ----

    let (tx, rx) = mpsc::channel();
    let sources = vec![left.spawn(tx.clone()), right.spawn(tx)];

    let stats = dispatch(&node, &rx, params_file.as_mut());

    for handle in sources {
        if handle.join().is_err() {
            tracing::error!("replay thread panicked");
        }
    }

    info!(
        received = stats.received,
        published = stats.published,
        failed = stats.failed,
        "depth map node finished"
    );

    Ok(())
}

/// Merge the configuration file with command line and environment overrides.
fn load_config(cli: &Cli) -> Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };

    if let Some(left) = &cli.left_endpoint {
        config.endpoints.left = left.clone();
    }
    if let Some(right) = &cli.right_endpoint {
        config.endpoints.right = right.clone();
    }
    if let Some(dir) = &cli.left_dir {
        config.replay.left_dir = dir.clone();
    }
    if let Some(dir) = &cli.right_dir {
        config.replay.right_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.replay.output_dir = dir.clone();
    }
    if cli.params_file.is_some() {
        config.replay.params_file = cli.params_file.clone();
    }

    Ok(config)
}

fn init_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = match cli.log_format {
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to initialise logging")?;

    Ok(())
}
