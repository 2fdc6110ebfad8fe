use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stream_supervisor::{Supervisor, SupervisorConfig};
use tracing_subscriber::EnvFilter;

/// Stream Supervisor - RTSP to HLS transcoder babysitter
///
/// - Runs one ffmpeg per configured camera stream
/// - Restarts dead or wedged transcoders within a bounded retry budget
/// - Sweeps stale HLS output from streams that are no longer running
#[derive(Parser)]
#[command(name = "stream-supervisor")]
#[command(about = "Supervise ffmpeg RTSP-to-HLS transcoders")]
struct Cli {
    /// Config file (default: ~/.config/stream-supervisor/supervisor.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (includes transcoder stderr)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Start all configured streams and supervise them until interrupted
    Run,
    /// Check that the configured transcoder can be executed
    Check,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let path = match cli.config {
        Some(path) => path,
        None => SupervisorConfig::default_path()?,
    };

    match cli.command {
        Cmd::Init { force } => init(&path, force),
        Cmd::Check => {
            let supervisor = Supervisor::new(load(&path)?)?;
            let version = supervisor.check_transcoder().await?;
            println!("{}", version);
            Ok(())
        }
        Cmd::Run => run(load(&path)?).await,
    }
}

fn load(path: &Path) -> Result<SupervisorConfig> {
    SupervisorConfig::load_from(path).with_context(|| {
        format!(
            "Could not load {}. Run 'stream-supervisor init' to create one.",
            path.display()
        )
    })
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    SupervisorConfig::default().save_to(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn run(config: SupervisorConfig) -> Result<()> {
    let streams = config.streams.clone();
    let supervisor = Supervisor::new(config)?;

    let version = supervisor
        .check_transcoder()
        .await
        .context("Transcoder check failed")?;
    println!("~ STREAM SUPERVISOR ~");
    println!("Transcoder: {}", version);
    println!("Output root: {}", supervisor.config().output_root.display());
    println!();

    supervisor.spawn_janitor();
    supervisor.spawn_health_monitor();

    for spec in streams {
        let id = spec.id.clone();
        match supervisor.start(spec).await {
            Ok(outcome) => println!("  {} -> {}", id, outcome.playlist_url),
            Err(e) => eprintln!("  {} failed to start: {}", id, e),
        }
    }
    println!();

    // Setup signal handlers for graceful shutdown
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    println!("Supervising {} stream(s). Press Ctrl+C to stop.", supervisor.list().len());

    tokio::select! {
        _ = sigint.recv() => println!("\nReceived SIGINT, shutting down..."),
        _ = sigterm.recv() => println!("\nReceived SIGTERM, shutting down..."),
    }

    supervisor.shutdown().await;
    Ok(())
}
