//! # vecsync CLI
//!
//! Keeps a vector index in sync with a folder of documents.
//!
//! ## Usage
//!
//! ```bash
//! vecsync --config ./config/vecsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vecsync ingest <file>...` | Chunk, embed, and store files |
//! | `vecsync query "<text>"` | Nearest chunks for a query |
//! | `vecsync list` | Ingested paths |
//! | `vecsync delete <file>` | Retract a file's vectors |
//! | `vecsync watch <folder>` | Scan a folder, then follow its changes until Ctrl-C |
//!
//! Add `--json` for one JSON object per result on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use vecsync::config::{load_config, Config};
use vecsync::logging;
use vecsync::pipeline::{Outcome, Pipeline};
use vecsync::store::VectorStore;
use vecsync::watcher::FolderWatcher;

#[derive(Parser)]
#[command(
    name = "vecsync",
    about = "Keep a vector index in sync with a folder of documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./config/vecsync.toml")]
    config: PathBuf,

    /// Machine-readable JSON output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one or more files.
    ///
    /// Unchanged files are skipped, edited files replace their previous
    /// chunks, and files whose content is already indexed under another
    /// path are skipped as duplicates.
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Search the index.
    Query {
        #[arg(required = true)]
        text: Vec<String>,

        #[arg(long, default_value = "5")]
        top_k: usize,
    },

    /// List ingested files.
    List,

    /// Remove a file and all of its chunks from the index.
    Delete { file: PathBuf },

    /// Ingest a folder's files, then keep the index in sync with it.
    ///
    /// The folder is created if it does not exist. Runs until Ctrl-C.
    Watch { folder: PathBuf },
}

#[derive(Serialize)]
struct PathOutcome<'a> {
    path: String,
    #[serde(flatten)]
    outcome: &'a Outcome,
}

fn print_outcome(path: &std::path::Path, outcome: &Outcome, json: bool) -> Result<()> {
    if json {
        let line = PathOutcome {
            path: path.display().to_string(),
            outcome,
        };
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }
    match outcome {
        Outcome::Ingested {
            chunks,
            hard_splits,
            ..
        } => {
            if *hard_splits > 0 {
                println!(
                    "ingested {} ({} chunks, {} oversized sentences split)",
                    path.display(),
                    chunks,
                    hard_splits
                );
            } else {
                println!("ingested {} ({} chunks)", path.display(), chunks);
            }
        }
        Outcome::Skipped {
            reason,
            duplicate_of,
        } => match duplicate_of {
            Some(original) => println!("skipped {} (duplicate of {})", path.display(), original),
            None => println!(
                "skipped {} ({})",
                path.display(),
                serde_json::to_value(reason)?.as_str().unwrap_or("skipped")
            ),
        },
        Outcome::Deleted { id, chunks } => {
            println!("deleted {} ({} chunks)", id, chunks)
        }
        Outcome::Error { reason, detail } => {
            println!("error {} ({}): {}", path.display(), reason, detail)
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init_with_config(&config.logging);

    let pipeline = Arc::new(Pipeline::open(&config).await?);
    let result = run(cli.command, cli.json, &config, &pipeline).await;
    pipeline.store().close().await;
    result
}

async fn run(
    command: Commands,
    json: bool,
    config: &Config,
    pipeline: &Arc<Pipeline>,
) -> Result<ExitCode> {
    match command {
        Commands::Ingest { files } => {
            let mut failed = false;
            for file in files {
                let outcome = pipeline.ingest(&file).await;
                failed |= outcome.is_error();
                print_outcome(&file, &outcome, json)?;
            }
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Query { text, top_k } => {
            let query = text.join(" ");
            let matches = pipeline.query(&query, top_k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else if matches.is_empty() {
                println!("No results.");
            } else {
                for (rank, m) in matches.iter().enumerate() {
                    println!("{}. [{:.4}] {}", rank + 1, m.score, m.id);
                    if let Some(meta) = &m.metadata {
                        println!("    file: {} (chunk {})", meta.file, meta.chunk_index);
                        let excerpt: String = meta.chunk_text.chars().take(160).collect();
                        println!("    {}", excerpt.replace('\n', " "));
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            let paths = pipeline.list().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&paths)?);
            } else {
                for path in &paths {
                    println!("{}", path);
                }
                println!("{} documents", paths.len());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Delete { file } => {
            let outcome = pipeline.delete(&file).await;
            print_outcome(&file, &outcome, json)?;
            Ok(if outcome.is_error() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Watch { folder } => {
            let watcher = FolderWatcher::new(Arc::clone(pipeline), folder, &config.watch)?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("[watch] interrupt received");
                    on_signal.cancel();
                }
            });

            let summary = watcher.run(cancel).await?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "ingested": summary.ingested,
                        "skipped": summary.skipped,
                        "deleted": summary.deleted,
                        "errors": summary.errors,
                    })
                );
            } else {
                println!(
                    "watch stopped: {} ingested, {} skipped, {} deleted, {} errors",
                    summary.ingested, summary.skipped, summary.deleted, summary.errors
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
