///
/// This module implements the CLI interface for gemini-context: command parsing,
/// argument validation and the orchestration of one chat session.
///
/// All pipeline logic (discovery, truncation, retries, budget admission, cleanup)
/// lives in the [`gemini-context-core`] crate. This module wires it to the
/// [`GeminiClient`](crate::upload::GeminiClient) and the terminal.
///
/// ## How To Use
/// - For command-line users: use the installed `gemini-context` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// ## Exit status
/// Discovery and configuration errors fail the command. Files that could not be
/// uploaded or did not fit the budget are reported and the session continues.
///
/// [`gemini-context-core`]: ../../gemini-context-core/
use crate::chat::{converse, spawn_stdin_reader};
use crate::load_config::{load_optional_config, CliConfig};
use crate::upload::GeminiClient;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gemini_context_core::cleanup::{guarded, sweep, CleanupReport};
use gemini_context_core::discover::discover;
use gemini_context_core::ingest::ingest;
use gemini_context_core::registry::HandleRegistry;
use std::path::PathBuf;

/// CLI for gemini-context: chat with a model over the files of a directory.
#[derive(Parser)]
#[clap(
    name = "gemini-context",
    version,
    about = "Upload a directory as model context within a token budget, chat over it, and clean up afterwards"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload every file under DIRECTORY and start a conversation over them
    Chat {
        /// Directory whose files are uploaded
        directory: PathBuf,
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// MIME type sent with every upload
        #[clap(long)]
        mime_type: Option<String>,
        /// Number of files processed concurrently
        #[clap(long)]
        workers: Option<usize>,
        /// Send each question on its own instead of the whole conversation
        #[clap(long)]
        no_history: bool,
        /// Delete every file already stored on the service before uploading
        #[clap(long)]
        sweep: bool,
    },
    /// Delete every file currently stored on the service
    Sweep {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Chat {
            directory,
            config,
            mime_type,
            workers,
            no_history,
            sweep,
        } => {
            let config = load_optional_config(config)?.with_overrides(mime_type, workers);
            config.pipeline.trace_loaded();
            chat(config, directory, !no_history, sweep).await
        }
        Commands::Sweep { config } => {
            let config = load_optional_config(config)?;
            let client = client_from_env(&config)?;
            tracing::info!(command = "sweep", "Sweeping remote files");
            let report = sweep(&client, config.pipeline.ingest.concurrency)
                .await
                .context("Failed to list remote files")?;
            print_cleanup(&report);
            Ok(())
        }
    }
}

fn client_from_env(config: &CliConfig) -> Result<GeminiClient> {
    GeminiClient::new_from_env(&config.remote)
        .map_err(|e| anyhow::anyhow!("Failed to construct Gemini client: {e}"))
}

async fn chat(
    config: CliConfig,
    directory: PathBuf,
    keep_history: bool,
    sweep_first: bool,
) -> Result<()> {
    let files = discover(&directory, &config.pipeline.discover_options())
        .with_context(|| format!("Failed to discover files under {}", directory.display()))?;
    tracing::info!(command = "chat", files = files.len(), directory = %directory.display(), "Discovered files");

    let client = client_from_env(&config)?;
    let options = config.pipeline.ingest_options();

    if sweep_first {
        match sweep(&client, options.concurrency).await {
            Ok(report) => print_cleanup(&report),
            Err(e) => tracing::warn!(error = %e, "Pre-run sweep failed, continuing"),
        }
    }

    let registry = HandleRegistry::new();
    let (outcome, cleaned) = guarded(&client, &registry, options.concurrency, async {
        tokio::select! {
            result = async {
                let report = ingest(&client, files, &options, &registry).await;
                println!("{report}");
                for handle in &report.undeleted {
                    println!("Could not delete skipped file {} ({})", handle.display_name, handle.id);
                }
                let mut input = spawn_stdin_reader();
                let mut stdout = std::io::stdout();
                converse(&client, &report.admitted_handles(), keep_history, &mut input, &mut stdout).await
            } => result.map(|_| ()),
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, releasing uploaded files");
                println!();
                Ok(())
            }
        }
    })
    .await;

    print_cleanup(&cleaned);
    outcome.context("Conversation failed")
}

fn print_cleanup(report: &CleanupReport) {
    println!("Deleted {} remote file(s)", report.deleted.len());
    if !report.is_clean() {
        println!("Failed to delete {} remote file(s):", report.failed.len());
        for (handle, e) in &report.failed {
            println!("  - {} ({}): {e}", handle.display_name, handle.id);
        }
    }
}
