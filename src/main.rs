use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docrag_core::{AppContext, Config, LogFormat, LoggingConfig, resolve_config_path};
use docrag_index::{BuildOptions, IndexError, SearchRequest};
use tokio_util::sync::CancellationToken;

/// Exit code for a build stopped by Ctrl-C (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;
const EXIT_NOT_FOUND: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "docrag",
    version,
    about = "Hybrid dense and lexical retrieval over technical documentation"
)]
struct Cli {
    /// Configuration file (defaults to $DOCRAG_CONFIG, then config/docrag.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Build the index of one project, or of every project when omitted
    Index {
        project: Option<String>,

        /// Drop and recreate the collection before writing
        #[arg(long)]
        recreate: bool,

        /// Ignore any saved checkpoint and embed everything again
        #[arg(long)]
        restart: bool,

        /// Resume a specific job instead of the one derived from the corpus
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Query a project
    Search {
        project: String,
        query: String,

        /// Number of results (defaults to search.default_limit)
        #[arg(long, short = 'n')]
        limit: Option<usize>,

        /// Return fused retrieval order without the rerank pass
        #[arg(long)]
        no_rerank: bool,

        /// Include token usage, retrieval stats and stage timings
        #[arg(long)]
        debug: bool,
    },
    /// Print every chunk of one document in order
    Doc { project: String, doc_id: String },
    /// List configured projects
    Projects,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    init_subscriber(&config.logging);
    tracing::debug!(path = %config_path.display(), "configuration loaded");

    match cli.command {
        Command::Projects => {
            print_projects(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Index {
            project,
            recreate,
            restart,
            job_id,
        } => {
            let ctx = AppContext::from_config(config)?;
            let options = BuildOptions {
                recreate,
                restart,
                job_id,
            };
            run_index(&ctx, project, &options).await
        }
        Command::Search {
            project,
            query,
            limit,
            no_rerank,
            debug,
        } => {
            let ctx = AppContext::from_config(config)?;
            let request = SearchRequest::new(query)
                .with_limit(limit.unwrap_or(0))
                .with_rerank(!no_rerank)
                .with_debug(debug);
            let response = ctx.searcher(&project)?.search(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Doc { project, doc_id } => {
            let ctx = AppContext::from_config(config)?;
            let chunks = ctx.searcher(&project)?.get_chunks_by_document(&doc_id).await?;
            if chunks.is_empty() {
                eprintln!("document not found: {doc_id}");
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            }
            println!("{}", serde_json::to_string_pretty(&chunks)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_index<P: docrag_llm::EmbeddingProvider>(
    ctx: &AppContext<P>,
    project: Option<String>,
    options: &BuildOptions,
) -> anyhow::Result<ExitCode> {
    let names: Vec<String> = match project {
        Some(name) => vec![name],
        None => ctx.projects().map(|(name, _)| name.to_owned()).collect(),
    };
    if names.is_empty() {
        anyhow::bail!("no projects configured");
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let mut summaries = Vec::with_capacity(names.len());
    for name in &names {
        match ctx.index_project(name, options, &cancel).await {
            Ok(summary) => summaries.push(summary),
            Err(e) if is_interrupted(&e) => {
                eprintln!("{e:#}\nprogress is checkpointed; rerun the same command to resume");
                println!("{}", serde_json::to_string_pretty(&summaries)?);
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
            Err(e) => return Err(e),
        }
    }
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(ExitCode::SUCCESS)
}

fn is_interrupted(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<IndexError>(),
        Some(IndexError::Interrupted { .. })
    )
}

fn print_projects(config: &Config) -> anyhow::Result<()> {
    let projects: Vec<serde_json::Value> = config
        .projects
        .iter()
        .map(|(name, p)| {
            serde_json::json!({
                "name": name,
                "collection": p.collection,
                "raw_data": p.raw_data,
                "chunker": p.chunker,
                "description": p.description,
                "subdirs": p.subdirs,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&projects)?);
    Ok(())
}

/// Logs go to stderr; stdout carries command output.
fn init_subscriber(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}
