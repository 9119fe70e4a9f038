//! # odoo-rag CLI (`orag`)
//!
//! Index an Odoo module tree and ask questions about it.
//!
//! ```bash
//! orag index ./addons                      # build or refresh the index
//! orag query "What fields does sale.order have?" --module sale
//! orag interactive --entity res.partner    # filtered question loop
//! orag diagram "quotation to invoice" --output-file flow.mmd
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `orag init` | Create the index directory and schema |
//! | `orag index <root>` | Scan, extract, embed and store a module tree |
//! | `orag query <question>` | Answer one question |
//! | `orag diagram <process>` | Mermaid sequence diagram of a business process |
//! | `orag interactive` | Question loop with in-band filter commands |
//! | `orag modules` | List indexed modules |
//! | `orag lookup <entity>` | Declarations and parents of an entity or view |
//! | `orag get <id>` | Print one stored document |
//! | `orag stats` | Index statistics |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use odoo_rag::ask::{self, OutputFormat};
use odoo_rag::config::{self, DEFAULT_CONFIG_PATH};
use odoo_rag::progress::ProgressMode;
use odoo_rag::{db, get, index_cmd, logging, migrate, stats};
use odoo_rag_core::models::Filter;
use odoo_rag_core::session::ModelTier;

#[derive(Parser)]
#[command(
    name = "orag",
    about = "Structure-aware retrieval and question answering over Odoo module trees",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When left at the default and the file does not exist, built-in
    /// defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Index directory; overrides `[index] dir`.
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Filter and tier flags shared by the question commands.
#[derive(clap::Args, Debug, Clone, Default)]
struct ScopeArgs {
    /// Restrict retrieval to one module.
    #[arg(long)]
    module: Option<String>,

    /// Restrict retrieval to one entity (e.g. `res.partner`).
    #[arg(long, visible_alias = "model")]
    entity: Option<String>,

    /// Model tier used for generation.
    #[arg(long, value_parser = parse_tier)]
    tier: Option<ModelTier>,
}

impl ScopeArgs {
    fn filter(&self) -> Filter {
        Filter {
            module: self.module.clone(),
            entity_name: self.entity.clone(),
        }
    }
}

fn parse_tier(s: &str) -> Result<ModelTier, String> {
    ModelTier::parse(s).ok_or_else(|| format!("unknown tier '{}': use fast, balanced or best", s))
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index directory and schema. Idempotent.
    Init,

    /// Index a module tree.
    ///
    /// Every immediate subdirectory of ROOT that holds a manifest is a
    /// module. Re-running on the same tree is safe: unchanged documents
    /// are not re-embedded and documents that disappeared are removed.
    Index {
        /// Root directory containing the modules.
        root: PathBuf,

        /// Scan and extract only; print counts without touching the index.
        #[arg(long)]
        dry_run: bool,

        /// Progress reporting on stderr. Defaults to human on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Answer one question.
    Query {
        question: String,

        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate a Mermaid sequence diagram for a business process.
    Diagram {
        process: String,

        #[command(flatten)]
        scope: ScopeArgs,

        /// Write the diagram here instead of stdout.
        #[arg(long)]
        output_file: Option<PathBuf>,
    },

    /// Interactive question loop. Type /help inside for commands.
    Interactive {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List indexed modules with per-kind document counts.
    Modules,

    /// Show declarations and parents of an entity or view without semantic search.
    Lookup {
        name: String,

        #[arg(long)]
        json: bool,
    },

    /// Print one stored document by id.
    Get { id: String },

    /// Show index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = config::load_or_minimal(&cli.config)?;
    if let Some(dir) = cli.index_dir {
        cfg.index.dir = dir;
    }

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Index initialized at {}", cfg.db_path().display());
        }
        Commands::Index {
            root,
            dry_run,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            index_cmd::run_index(&cfg, &root, dry_run, mode).await?;
        }
        Commands::Query {
            question,
            scope,
            format,
        } => {
            ask::run_query(&cfg, &question, scope.filter(), scope.tier, format).await?;
        }
        Commands::Diagram {
            process,
            scope,
            output_file,
        } => {
            ask::run_diagram(
                &cfg,
                &process,
                scope.filter(),
                scope.tier,
                output_file.as_deref(),
            )
            .await?;
        }
        Commands::Interactive { scope } => {
            ask::run_interactive(&cfg, scope.filter(), scope.tier).await?;
        }
        Commands::Modules => ask::run_modules(&cfg).await?,
        Commands::Lookup { name, json } => get::run_lookup(&cfg, &name, json).await?,
        Commands::Get { id } => get::run_get(&cfg, &id).await?,
        Commands::Stats => stats::run_stats(&cfg).await?,
    }

    Ok(())
}
