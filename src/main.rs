//! # Compliance Atlas CLI (`atlas`)
//!
//! The `atlas` binary is the primary interface for Compliance Atlas. It
//! provides commands for database initialization, document ingestion,
//! querying, graph maintenance, store statistics, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! atlas --config ./config/atlas.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `atlas init` | Create the SQLite database and run schema migrations |
//! | `atlas ingest <path>` | Run the ingestion pipeline on a local file |
//! | `atlas query "<question>"` | Answer a question over the stored corpus |
//! | `atlas garden` | Run one graph maintenance cycle |
//! | `atlas stats` | Print a store overview |
//! | `atlas serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use compliance_atlas::{
    config, db, gardener::GraphGardener, llm::LlmClient, loader::FileSource, migrate,
    models::DocumentType, pipeline::{IngestOptions, IngestionPipeline}, query::QueryFallbackEngine,
    server, stats, tasks::TaskStatusTracker,
};

/// Compliance Atlas — a compliance knowledge-graph ingestion, maintenance,
/// and retrieval engine.
#[derive(Parser)]
#[command(
    name = "atlas",
    about = "Compliance Atlas — compliance document ingestion, knowledge graph, and retrieval",
    version,
    long_about = "Compliance Atlas ingests compliance documents (ISO 27001, NIST 800-53, PCI DSS, \
    SOC 2, plain prose), extracts control-aligned structure into a knowledge graph and vector \
    index, keeps the graph healthy with a background gardener, and answers questions with \
    graceful degradation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/atlas.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent;
    /// running it multiple times is safe.
    Init,

    /// Ingest a local file through the full pipeline.
    ///
    /// Loads, classifies, extracts controls, chunks, embeds, and stores the
    /// document, printing the task's terminal state.
    Ingest {
        /// Path to the file (plain text, markdown, or PDF).
        path: PathBuf,

        /// Skip classification and force a document type
        /// (iso_27001, nist_800_53, pci_dss, soc_2, free_text).
        #[arg(long)]
        force_type: Option<String>,

        /// Skip structural validation of extracted controls.
        #[arg(long)]
        no_validate: bool,
    },

    /// Answer a question over the stored corpus.
    ///
    /// Uses the LLM-backed primary path when configured, otherwise plain
    /// vector retrieval with capped confidence.
    Query {
        /// The question text.
        text: String,

        /// Bypass the in-memory response cache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Run one graph maintenance cycle.
    ///
    /// Repairs orphans, groups duplicates, validates candidate links, and
    /// appends a quality report.
    Garden,

    /// Print a store overview.
    ///
    /// Document, chunk, control, and graph counts, embedding coverage, and
    /// the latest quality report.
    Stats,

    /// Start the HTTP server.
    ///
    /// Serves document submission, task status, query, and quality endpoints
    /// on the configured bind address, with the gardener running in the
    /// background.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            force_type,
            no_validate,
        } => {
            let force_type = match force_type.as_deref() {
                Some(s) => Some(
                    DocumentType::parse(s)
                        .ok_or_else(|| anyhow::anyhow!("unknown document type: {}", s))?,
                ),
                None => None,
            };

            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let pipeline = IngestionPipeline::new(pool, cfg, TaskStatusTracker::new())?;

            let task_id = pipeline.register_task();
            let result = pipeline
                .run(
                    &task_id,
                    FileSource::Path(path),
                    IngestOptions {
                        force_type,
                        validate: !no_validate,
                    },
                )
                .await;

            match result {
                Ok(processed) => {
                    println!("Ingested {}:", processed.document_id);
                    println!("  Type:       {}", processed.doc_type.as_str());
                    println!("  Confidence: {:.2}", processed.confidence);
                    println!("  Chunks:     {}", processed.num_chunks);
                    println!("  Controls:   {}", processed.num_controls);
                }
                Err(e) => anyhow::bail!("ingestion failed: {}", e),
            }
        }
        Commands::Query { text, no_cache } => {
            let pool = db::connect(&cfg).await?;
            let llm = LlmClient::from_config(&cfg.llm)
                .map_err(|e| anyhow::anyhow!("LLM client init failed: {}", e))?;
            let engine =
                QueryFallbackEngine::new(pool, cfg.retrieval.clone(), &cfg.embedding, llm)?;

            let answer = engine.answer(&text, !no_cache).await;
            println!("{}", answer.response);
            println!();
            println!(
                "Confidence: {:.2}{}",
                answer.confidence,
                if answer.metadata.fallback_used {
                    " (fallback)"
                } else {
                    ""
                }
            );
            for source in &answer.sources {
                println!(
                    "  [{:.2}] {} — {}",
                    source.score, source.chunk_id, source.snippet
                );
            }
        }
        Commands::Garden => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let llm = LlmClient::from_config(&cfg.llm)
                .map_err(|e| anyhow::anyhow!("LLM client init failed: {}", e))?;
            let gardener = GraphGardener::new(pool, cfg.gardener.clone(), llm);

            let outcome = gardener.run_cycle().await?;
            println!("Gardener cycle finished:");
            println!("  Orphans repaired:    {}", outcome.orphans_repaired);
            println!("  Orphans remaining:   {}", outcome.orphans_remaining);
            println!("  Duplicate groups:    {}", outcome.duplicate_groups);
            println!("  Links created:       {}", outcome.links_created);
            println!("  Validation failures: {}", outcome.validation_failures);
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            server::run_server(&cfg, pool).await?;
        }
    }

    Ok(())
}
