//! Cache maintenance commands

use crate::config::ToolConfig;
use anyhow::{bail, Context};
use burrow_blockstore::{CacheStore, ContentKey};
use clap::Subcommand;
use std::io::Write;
use std::ops::ControlFlow;
use std::path::PathBuf;
use tracing::{debug, info};

/// Blocks between progress lines during a check
const PROGRESS_EVERY: usize = 100;

/// Operations on a cache directory
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show space usage
    Stats {
        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored blocks
    List,
    /// Store a file as a block and print its key
    Put {
        /// File to store
        path: PathBuf,
    },
    /// Read a block back
    Get {
        /// Key as `<algorithm>:<hex>` or bare SHA-512 hex
        key: String,
        /// Write the block here instead of standard output
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove a block
    Remove {
        key: String,
    },
    /// Verify stored blocks, purging corrupt ones
    Check {
        /// Stop after this many blocks
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Change the store size
    Resize {
        /// New size in bytes, rounded up to the allocation unit
        size: u64,
    },
}

impl Command {
    /// Whether the command changes the index
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Command::Stats { .. } | Command::List | Command::Get { .. })
    }
}

/// Open the cache described by `config` and run `command` against it
pub fn run(command: &Command, config: &ToolConfig, out: &mut impl Write) -> anyhow::Result<()> {
    let cache_config = config.cache_config();
    let store = CacheStore::open(cache_config)
        .with_context(|| format!("failed to open cache at {}", config.directory.display()))?;
    debug!(blocks = store.len(), size = store.size(), "Opened cache");

    execute(&store, command, out)?;

    if command.is_mutating() {
        store.save().context("failed to save cache index")?;
    }
    Ok(())
}

fn execute(store: &CacheStore, command: &Command, out: &mut impl Write) -> anyhow::Result<()> {
    match command {
        Command::Stats { json } => {
            let stats = store.stats();
            if *json {
                serde_json::to_writer_pretty(&mut *out, &stats)?;
                writeln!(out)?;
            } else {
                writeln!(out, "size:    {}", stats.size)?;
                writeln!(out, "used:    {} ({:.1}%)", stats.used_space, stats.usage() * 100.0)?;
                writeln!(out, "free:    {}", stats.free_space)?;
                writeln!(out, "locked:  {}", stats.locked_space)?;
                writeln!(out, "blocks:  {}", stats.block_count)?;
            }
        }
        Command::List => {
            let mut keys: Vec<_> = store.keys().collect();
            keys.sort();
            for key in keys {
                // Skip keys removed since the snapshot
                if let Ok(length) = store.length_of(&key) {
                    writeln!(out, "{key}\t{length}")?;
                }
            }
        }
        Command::Put { path } => {
            let data = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let key = ContentKey::sha512(&data);
            store.put(&key, &data)?;
            info!(key = %key, length = data.len(), "Stored block");
            writeln!(out, "{key}")?;
        }
        Command::Get { key, output } => {
            let key = parse_key(key)?;
            let data = store.get(&key)?;
            match output {
                Some(path) => std::fs::write(path, &data)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => out.write_all(&data)?,
            }
        }
        Command::Remove { key } => {
            let key = parse_key(key)?;
            if !store.contains(&key) {
                bail!("block {key} is not stored");
            }
            store.remove(&key);
            writeln!(out, "removed {key}")?;
        }
        Command::Check { limit } => {
            let report = store.check_blocks(|progress| {
                if progress.checked % PROGRESS_EVERY == 0 {
                    info!(
                        checked = progress.checked,
                        total = progress.total,
                        bad = progress.bad,
                        "Check progress"
                    );
                }
                match limit {
                    Some(limit) if progress.checked >= *limit => ControlFlow::Break(()),
                    _ => ControlFlow::Continue(()),
                }
            });
            writeln!(
                out,
                "checked {} of {} blocks, {} bad{}",
                report.checked,
                report.total,
                report.bad,
                if report.stopped { " (stopped)" } else { "" }
            )?;
        }
        Command::Resize { size } => {
            store.resize(*size)?;
            writeln!(out, "size {}", store.size())?;
        }
    }
    Ok(())
}

fn parse_key(text: &str) -> anyhow::Result<ContentKey> {
    text.parse()
        .with_context(|| format!("invalid content key: {text}"))
}
