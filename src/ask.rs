//! Query-time commands: `query`, `diagram`, `modules`, `interactive`.
//!
//! Each command opens the index read-mostly, builds a [`Session`] from the
//! configured embedder and generator, and prints to stdout. Failures of a
//! single question inside the interactive loop are reported and the loop
//! continues; only opening the index is fatal.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use odoo_rag_core::embedding::Embedder;
use odoo_rag_core::error::IndexServiceError;
use odoo_rag_core::models::Filter;
use odoo_rag_core::retrieval::{Provenance, RetrievedDocument};
use odoo_rag_core::session::{Answer, ModelTier, Session, SessionSettings};
use odoo_rag_core::store::{IndexStore, ModuleSummary};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::sqlite_store::SqliteStore;

/// How `orag query` prints its answer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

const SHOWN_SOURCES: usize = 3;

pub fn session_settings(config: &Config, tier: Option<ModelTier>) -> SessionSettings {
    SessionSettings {
        k: config.retrieval.k,
        expand_inheritance: config.retrieval.expand_inheritance,
        tier: tier.unwrap_or(config.generation.default_tier),
        models: config.generation.models.catalog(),
        max_tokens: config.generation.max_tokens,
        temperature: config.generation.temperature,
        timeout: Duration::from_secs(config.generation.timeout_secs),
    }
}

/// Open the index and wire up a session with the given starting filter.
pub async fn open_session(
    config: &Config,
    filter: Filter,
    tier: Option<ModelTier>,
) -> Result<(Session, Arc<SqliteStore>)> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let embedder = create_embedder(&config.embedding)?;
    check_embedding(&store, embedder.as_ref()).await?;
    let generator = create_generator(&config.generation)?;

    let session = Session::new(
        store.clone(),
        embedder,
        generator,
        session_settings(config, tier),
    )
    .with_filter(filter);
    Ok((session, store))
}

/// Vectors written by another model cannot be compared with this one's.
async fn check_embedding(store: &SqliteStore, embedder: &dyn Embedder) -> Result<()> {
    let Some((model, dims)) = store.embedding_info().await? else {
        return Ok(());
    };
    if dims != embedder.dims() {
        return Err::<(), _>(IndexServiceError::DimensionMismatch {
            expected: dims,
            actual: embedder.dims(),
        })
        .with_context(|| {
            format!(
                "index was built with {} ({} dims); re-index or configure the same embedder",
                model, dims
            )
        });
    }
    if model != embedder.model_name() {
        tracing::warn!(
            indexed = %model,
            configured = %embedder.model_name(),
            "embedding model differs from the one used to build the index"
        );
    }
    Ok(())
}

pub async fn run_query(
    config: &Config,
    question: &str,
    filter: Filter,
    tier: Option<ModelTier>,
    format: OutputFormat,
) -> Result<()> {
    let (session, _store) = open_session(config, filter, tier).await?;
    let answer = session.ask(question).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&answer)?),
        OutputFormat::Text => print_answer("Answer", &answer),
    }
    Ok(())
}

pub async fn run_diagram(
    config: &Config,
    process: &str,
    filter: Filter,
    tier: Option<ModelTier>,
    output_file: Option<&Path>,
) -> Result<()> {
    let (session, _store) = open_session(config, filter, tier).await?;
    let answer = session.diagram(process).await?;

    match output_file {
        Some(path) => {
            std::fs::write(path, &answer.text)
                .with_context(|| format!("Failed to write diagram to {}", path.display()))?;
            println!("Diagram saved to {}", path.display());
        }
        None => print_answer("Sequence Diagram", &answer),
    }
    Ok(())
}

pub async fn run_modules(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let modules = store.modules().await?;
    store.pool().close().await;
    print!("{}", format_modules(&modules));
    Ok(())
}

fn format_modules(modules: &[ModuleSummary]) -> String {
    if modules.is_empty() {
        return "No modules indexed.\n".to_string();
    }
    let mut out = format!("{} modules indexed:\n", modules.len());
    for m in modules {
        out.push_str(&format!(
            "  {:<32} {} entities, {} views, {} scripts\n",
            m.module, m.entities, m.views, m.scripts
        ));
    }
    out
}

fn print_answer(heading: &str, answer: &Answer) {
    println!();
    println!("{}:", heading);
    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in answer.sources.iter().take(SHOWN_SOURCES).enumerate() {
            println!("{}. {}", i + 1, describe_source(source));
        }
    }
}

fn describe_source(source: &RetrievedDocument) -> String {
    let meta = &source.document.metadata;
    let mut line = format!(
        "{}:{}-{} ({} {})",
        meta.source_path,
        meta.span.start_line,
        meta.span.end_line,
        meta.kind.as_str(),
        meta.title
    );
    if let Provenance::Ancestor { depth, .. } = &source.provenance {
        line.push_str(&format!(" [ancestor, depth {}]", depth));
    }
    line
}

/// One line typed at the interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    /// `None` clears just the module part of the filter.
    Module(Option<String>),
    Entity(Option<String>),
    Tier(ModelTier),
    Clear,
    ShowFilter,
    Modules,
    Diagram(String),
    Retry,
    Help,
    Exit,
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Command::Exit;
    }
    if !line.starts_with('/') {
        return Command::Ask(line.to_string());
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    match head.to_ascii_lowercase().as_str() {
        "/module" => Command::Module(arg),
        "/entity" | "/model" => Command::Entity(arg),
        "/tier" => match ModelTier::parse(rest) {
            Some(tier) => Command::Tier(tier),
            None => Command::Invalid("usage: /tier fast|balanced|best".to_string()),
        },
        "/clear" => Command::Clear,
        "/filter" => Command::ShowFilter,
        "/modules" => Command::Modules,
        "/diagram" => match arg {
            Some(process) => Command::Diagram(process),
            None => Command::Invalid("usage: /diagram <process>".to_string()),
        },
        "/retry" => Command::Retry,
        "/help" => Command::Help,
        "/exit" | "/quit" => Command::Exit,
        other => Command::Invalid(format!("unknown command {} (try /help)", other)),
    }
}

const HELP: &str = "\
Commands:
  /module <name>     restrict retrieval to a module (no name: drop it)
  /entity <name>     restrict retrieval to an entity (alias: /model)
  /clear             clear all filters
  /filter            show the active filter
  /tier <tier>       switch model tier: fast, balanced, best
  /modules           list indexed modules
  /diagram <process> sequence diagram of a business process
  /retry             re-send the last failed question
  exit, quit         end the session
Ctrl-C cancels a running question.";

pub async fn run_interactive(
    config: &Config,
    filter: Filter,
    tier: Option<ModelTier>,
) -> Result<()> {
    let (session, store) = open_session(config, filter, tier).await?;
    let total = store.count().await?;

    println!("odoo-rag interactive session");
    println!("Index contains {} documents", total);
    println!("Type 'exit' or 'quit' to end the session, /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let filter = session.filter();
        if !filter.is_empty() {
            println!();
            println!("Active filter: {}", filter);
        }
        print!("\nQuestion: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!("\nExiting...");
            break;
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Exit => {
                println!("Exiting...");
                break;
            }
            Command::Help => println!("{}", HELP),
            Command::Invalid(message) => println!("{}", message),
            Command::Module(module) => {
                let filter = session.set_module(module);
                println!("Filter: {}", filter);
            }
            Command::Entity(entity) => {
                let filter = session.set_entity(entity);
                println!("Filter: {}", filter);
            }
            Command::Clear => {
                session.clear_filter();
                println!("Filters cleared");
            }
            Command::ShowFilter => println!("Filter: {}", session.filter()),
            Command::Tier(tier) => {
                session.set_tier(tier);
                println!(
                    "Model tier: {} ({})",
                    tier,
                    session.settings().models.model_for(tier)
                );
            }
            Command::Modules => match store.modules().await {
                Ok(modules) => print!("\n{}", format_modules(&modules)),
                Err(e) => eprintln!("Error: {}", e),
            },
            Command::Diagram(process) => {
                cancellable("Sequence Diagram", session.diagram(&process)).await;
            }
            Command::Retry => {
                cancellable("Answer", session.retry()).await;
            }
            Command::Ask(question) => {
                cancellable("Answer", session.ask(&question)).await;
            }
        }
    }

    store.pool().close().await;
    Ok(())
}

/// Run one session call, dropping it if Ctrl-C arrives first.
async fn cancellable<F>(heading: &str, call: F)
where
    F: std::future::Future<Output = Result<Answer, odoo_rag_core::error::SessionError>>,
{
    tokio::select! {
        result = call => match result {
            Ok(answer) => print_answer(heading, &answer),
            Err(e) => eprintln!("Error: {}", e),
        },
        _ = tokio::signal::ctrl_c() => println!("\nCancelled."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filter_commands() {
        assert_eq!(
            parse_command("/module sale"),
            Command::Module(Some("sale".into()))
        );
        assert_eq!(parse_command("/module"), Command::Module(None));
        assert_eq!(
            parse_command("/model res.partner"),
            Command::Entity(Some("res.partner".into()))
        );
        assert_eq!(parse_command("  /CLEAR "), Command::Clear);
        assert_eq!(parse_command("/tier best"), Command::Tier(ModelTier::Best));
        assert!(matches!(parse_command("/tier huge"), Command::Invalid(_)));
    }

    #[test]
    fn parses_questions_and_exit() {
        assert_eq!(
            parse_command("What is sale.order?"),
            Command::Ask("What is sale.order?".into())
        );
        assert_eq!(parse_command("quit"), Command::Exit);
        assert_eq!(parse_command("EXIT"), Command::Exit);
        assert_eq!(parse_command(""), Command::Empty);
        assert_eq!(
            parse_command("/diagram order to invoice"),
            Command::Diagram("order to invoice".into())
        );
        assert!(matches!(parse_command("/diagram"), Command::Invalid(_)));
        assert!(matches!(parse_command("/frobnicate"), Command::Invalid(_)));
    }

    #[test]
    fn module_listing() {
        assert_eq!(format_modules(&[]), "No modules indexed.\n");
        let listing = format_modules(&[ModuleSummary {
            module: "sale".into(),
            entities: 2,
            views: 3,
            scripts: 1,
            manifests: 1,
        }]);
        assert!(listing.starts_with("1 modules indexed:"));
        assert!(listing.contains("2 entities, 3 views, 1 scripts"));
    }

    #[test]
    fn settings_take_tier_override() {
        let config = Config::minimal();
        let settings = session_settings(&config, Some(ModelTier::Best));
        assert_eq!(settings.tier, ModelTier::Best);
        assert_eq!(settings.k, 5);
        assert_eq!(session_settings(&config, None).tier, ModelTier::Fast);
    }
}
