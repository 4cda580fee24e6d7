//! Burrow cache maintenance tool

use burrow_blockstore::DEFAULT_CLUSTER_SIZE;
use burrow_cli::{run, Command, ToolConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "burrow-cache")]
#[command(about = "Inspect and maintain a Burrow block cache")]
#[command(version)]
struct Args {
    /// Cache directory
    #[arg(short, long, default_value = "./burrow-cache", env = "BURROW_DIR")]
    dir: PathBuf,

    /// Store size in bytes for a cache without a saved index
    #[arg(short, long, env = "BURROW_SIZE")]
    size: Option<u64>,

    /// Cluster size in bytes
    #[arg(long, default_value_t = DEFAULT_CLUSTER_SIZE, env = "BURROW_CLUSTER_SIZE")]
    cluster_size: u64,

    /// Enable debug logging
    #[arg(long, env = "BURROW_DEBUG")]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "BURROW_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            directory: self.dir.clone(),
            size: self.size,
            cluster_size: self.cluster_size,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logs go to stderr so block data on stdout stays clean
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("burrow_cli={log_level},burrow_blockstore={log_level}").into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    tracing::debug!(dir = %args.dir.display(), command = ?args.command, "Running command");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(&args.command, &args.tool_config(), &mut out)
}
