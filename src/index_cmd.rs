//! `orag index`: scan, extract, build, embed, store.
//!
//! Extraction runs on a bounded pool of blocking workers. Documents are
//! embedded in batches of `embedding.batch_size`, with up to
//! `index.workers` batches in flight. A re-run upserts by document id,
//! skips unchanged documents, and drops documents no longer produced.

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use odoo_rag_core::builder::{build_documents, ExtractedFacts};
use odoo_rag_core::embedding::Embedder;
use odoo_rag_core::error::{ExtractionError, IndexServiceError, ScanError};
use odoo_rag_core::extract::{extract, Facts};
use odoo_rag_core::store::{add_batch, BatchReport, IndexStore};
use odoo_rag_core::models::Module;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::migrate;
use crate::progress::{IndexProgressEvent, IndexProgressReporter, ProgressMode};
use crate::scan::{scan_modules, Artifact};
use crate::sqlite_store::{SqliteStore, META_EMBEDDING_DIMS, META_EMBEDDING_MODEL, META_ROOT};

/// Counters printed at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub modules: usize,
    pub skipped_dirs: usize,
    pub files: usize,
    pub declarations_skipped: usize,
    pub documents: usize,
    pub embedded: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: usize,
}

pub async fn run_index(
    config: &Config,
    root: &Path,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<IndexSummary> {
    let reporter = progress.reporter();
    reporter.report(IndexProgressEvent::Scanning {
        root: root.display().to_string(),
    });

    let scan_root = root.to_path_buf();
    let index_config = config.index.clone();
    let scanned = tokio::task::spawn_blocking(move || scan_modules(&scan_root, &index_config))
        .await
        .context("scan task panicked")??;

    let mut summary = IndexSummary {
        modules: scanned.modules.len(),
        skipped_dirs: scanned
            .skipped
            .iter()
            .filter(|e| matches!(e, ScanError::MalformedManifest { .. }))
            .count(),
        files: scanned.artifacts.len(),
        ..IndexSummary::default()
    };

    let (facts, extraction_errors) = extract_all(
        scanned.modules,
        scanned.artifacts,
        config.index.workers,
        reporter.as_ref(),
    )
    .await;
    let built = build_documents(&facts);
    for diagnostic in extraction_errors.iter().chain(built.diagnostics.iter()) {
        tracing::warn!("skipped declaration: {}", diagnostic);
    }
    summary.declarations_skipped = extraction_errors.len() + built.diagnostics.len();
    summary.documents = built.entries.len();

    if dry_run {
        println!("index {} (dry-run)", root.display());
        print_scan_counts(&summary);
        println!("  documents: {}", summary.documents);
        return Ok(summary);
    }

    let embedder = create_embedder(&config.embedding)?;
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool);

    prepare_embedding_meta(&store, embedder.as_ref()).await?;

    let total = built.entries.len() as u64;
    let mut done = 0u64;
    let mut failures: Vec<IndexServiceError> = Vec::new();
    let batches = built.entries.chunks(config.embedding.batch_size);
    let store_ref = &store;
    let embedder_ref = embedder.as_ref();
    let mut reports = stream::iter(batches)
        .map(move |batch| async move {
            let report: BatchReport = add_batch(store_ref, embedder_ref, batch).await;
            (batch.len() as u64, report)
        })
        .buffer_unordered(config.index.workers);

    while let Some((size, report)) = reports.next().await {
        done += size;
        reporter.report(IndexProgressEvent::Embedding { n: done, total });
        summary.embedded += report.embedded;
        summary.unchanged += report.unchanged;
        failures.extend(report.failures);
    }
    drop(reports);

    let keep: HashSet<String> = built
        .entries
        .iter()
        .map(|e| e.document.id.clone())
        .collect();
    summary.removed = store.retain_only(&keep).await?;
    store
        .set_meta(META_ROOT, &root.display().to_string())
        .await?;

    for failure in &failures {
        tracing::warn!("index failure: {}", failure);
        eprintln!("Warning: {}", failure);
    }
    summary.failed = failures.len();

    println!("index {}", root.display());
    print_scan_counts(&summary);
    println!("  documents: {}", summary.documents);
    println!("  embedded: {}", summary.embedded);
    println!("  unchanged: {}", summary.unchanged);
    println!("  removed: {}", summary.removed);
    println!("  failed: {}", summary.failed);

    store.pool().close().await;

    if summary.failed > 0 {
        bail!("{} documents failed to index", summary.failed);
    }
    println!("ok");
    Ok(summary)
}

fn print_scan_counts(summary: &IndexSummary) {
    println!("  modules: {}", summary.modules);
    if summary.skipped_dirs > 0 {
        println!("  skipped directories: {}", summary.skipped_dirs);
    }
    println!("  files: {}", summary.files);
    println!("  declarations skipped: {}", summary.declarations_skipped);
}

/// Record the embedder in `index_meta`. When the model or dimensionality
/// changed since the last run, every stored vector is dropped so all
/// documents get re-embedded.
async fn prepare_embedding_meta(store: &SqliteStore, embedder: &dyn Embedder) -> Result<()> {
    let current = (embedder.model_name().to_string(), embedder.dims());
    if let Some(previous) = store.embedding_info().await? {
        if previous != current {
            let cleared = store.clear_vectors().await?;
            tracing::warn!(
                previous_model = %previous.0,
                previous_dims = previous.1,
                model = %current.0,
                dims = current.1,
                cleared,
                "embedding model changed, re-embedding all documents"
            );
        }
    }
    store.set_meta(META_EMBEDDING_MODEL, &current.0).await?;
    store
        .set_meta(META_EMBEDDING_DIMS, &current.1.to_string())
        .await?;
    Ok(())
}

/// Extract every artifact on a pool of `workers` blocking tasks.
///
/// Results are merged in source-path order so the facts do not depend on
/// worker scheduling.
async fn extract_all(
    modules: Vec<Module>,
    artifacts: Vec<Artifact>,
    workers: usize,
    reporter: &dyn IndexProgressReporter,
) -> (ExtractedFacts, Vec<ExtractionError>) {
    let total = artifacts.len() as u64;
    let mut results: Vec<(String, Facts, Vec<ExtractionError>)> = Vec::with_capacity(artifacts.len());

    let mut tasks = stream::iter(artifacts)
        .map(|artifact| tokio::task::spawn_blocking(move || extract_artifact(artifact)))
        .buffer_unordered(workers.max(1));

    let mut n = 0u64;
    while let Some(joined) = tasks.next().await {
        n += 1;
        reporter.report(IndexProgressEvent::Extracting { n, total });
        match joined {
            Ok(Ok(result)) => results.push(result),
            Ok(Err((path, e))) => {
                tracing::warn!(path = %path.display(), "cannot read file: {}", e);
            }
            Err(e) => tracing::warn!("extraction task failed: {}", e),
        }
    }

    results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut facts = ExtractedFacts {
        modules,
        ..ExtractedFacts::default()
    };
    let mut diagnostics = Vec::new();
    for (_, extracted, errors) in results {
        match extracted {
            Facts::Entities(v) => facts.entities.extend(v),
            Facts::Views(v) => facts.views.extend(v),
            Facts::Fragments(v) => facts.fragments.extend(v),
        }
        diagnostics.extend(errors);
    }
    (facts, diagnostics)
}

type ExtractResult = Result<(String, Facts, Vec<ExtractionError>), (PathBuf, std::io::Error)>;

fn extract_artifact(artifact: Artifact) -> ExtractResult {
    let content = std::fs::read_to_string(&artifact.path).map_err(|e| (artifact.path.clone(), e))?;
    let extraction = extract(
        artifact.kind,
        &artifact.module,
        &artifact.source_path,
        &content,
    );
    Ok((artifact.source_path, extraction.facts, extraction.diagnostics))
}
