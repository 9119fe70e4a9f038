//! Storage abstraction for odoo-rag.
//!
//! The [`IndexStore`] trait defines every storage operation the indexing
//! and retrieval pipeline needs: a vector index over document bodies and a
//! metadata-only lookup over structural parent edges. Backends are
//! pluggable (SQLite in the app crate, [`memory::InMemoryStore`] here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

use crate::embedding::Embedder;
use crate::error::IndexServiceError;
use crate::models::{Document, Filter, IndexEntry, ParentEdge, Span};

/// A document returned from similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub parents: Vec<ParentEdge>,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Per-module document counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub module: String,
    pub entities: usize,
    pub views: usize,
    pub scripts: usize,
    pub manifests: usize,
}

impl ModuleSummary {
    pub fn total(&self) -> usize {
        self.entities + self.views + self.scripts + self.manifests
    }
}

/// Abstract index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](IndexStore::add) | Insert or replace a document with its vector |
/// | [`stored_hash`](IndexStore::stored_hash) | Content hash of a stored document |
/// | [`update_span`](IndexStore::update_span) | Move a stored document without re-embedding |
/// | [`query`](IndexStore::query) | Filtered top-k similarity search |
/// | [`lookup_by_entity`](IndexStore::lookup_by_entity) | Metadata lookup, no vectors involved |
/// | [`get`](IndexStore::get) | Fetch one entry by id |
/// | [`retain_only`](IndexStore::retain_only) | Drop everything not in a set of ids |
/// | [`modules`](IndexStore::modules) | Per-module counts |
///
/// `query` applies the filter before ranking, so a filtered query never
/// returns a non-matching document. Equal scores are ordered by ascending
/// document id.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or replace the entry with `entry.document.id`.
    async fn add(
        &self,
        entry: &IndexEntry,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<(), IndexServiceError>;

    async fn stored_hash(&self, id: &str) -> Result<Option<String>, IndexServiceError>;

    /// Overwrite the line span of a stored document, keeping its vector.
    async fn update_span(&self, id: &str, span: Span) -> Result<(), IndexServiceError>;

    /// At most `k` documents matching `filter`, best first.
    async fn query(
        &self,
        query_vec: &[f32],
        filter: &Filter,
        k: usize,
    ) -> Result<Vec<ScoredDocument>, IndexServiceError>;

    /// Every entity or view document whose `entity_name` is `name`.
    async fn lookup_by_entity(&self, name: &str) -> Result<Vec<IndexEntry>, IndexServiceError>;

    async fn get(&self, id: &str) -> Result<Option<IndexEntry>, IndexServiceError>;

    /// Remove every document whose id is not in `keep`. Returns the number removed.
    async fn retain_only(&self, keep: &HashSet<String>) -> Result<usize, IndexServiceError>;

    async fn modules(&self) -> Result<Vec<ModuleSummary>, IndexServiceError>;

    async fn count(&self) -> Result<usize, IndexServiceError>;
}

/// Outcome of [`add_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub embedded: usize,
    pub unchanged: usize,
    /// Per-document failures; the rest of the batch is still stored.
    pub failures: Vec<IndexServiceError>,
}

/// Embed and store a batch of entries, skipping ones whose content hash
/// is unchanged (their span is still refreshed). A failed embedding call fails every document of the batch
/// individually; a failed insert fails only that document.
pub async fn add_batch(
    store: &dyn IndexStore,
    embedder: &dyn Embedder,
    entries: &[IndexEntry],
) -> BatchReport {
    let mut report = BatchReport::default();
    let mut pending: Vec<(&IndexEntry, String)> = Vec::new();

    for entry in entries {
        let hash = crate::builder::content_hash(entry);
        match store.stored_hash(&entry.document.id).await {
            Ok(Some(existing)) if existing == hash => {
                match store
                    .update_span(&entry.document.id, entry.document.metadata.span)
                    .await
                {
                    Ok(()) => report.unchanged += 1,
                    Err(e) => report.failures.push(with_document(entry, e)),
                }
            }
            Ok(_) => pending.push((entry, hash)),
            Err(e) => report.failures.push(with_document(entry, e)),
        }
    }
    if pending.is_empty() {
        return report;
    }

    let texts: Vec<String> = pending
        .iter()
        .map(|(entry, _)| entry.document.body.clone())
        .collect();
    let vectors = match embedder.embed(&texts).await {
        Ok(v) if v.len() == texts.len() => v,
        Ok(v) => {
            let err = IndexServiceError::service(
                "embed",
                format!("expected {} vectors, got {}", texts.len(), v.len()),
            );
            for (entry, _) in &pending {
                report.failures.push(with_document(entry, err.clone()));
            }
            return report;
        }
        Err(e) => {
            for (entry, _) in &pending {
                report.failures.push(with_document(entry, e.clone()));
            }
            return report;
        }
    };

    for ((entry, hash), vector) in pending.iter().zip(vectors.iter()) {
        if vector.len() != embedder.dims() {
            report.failures.push(with_document(
                entry,
                IndexServiceError::DimensionMismatch {
                    expected: embedder.dims(),
                    actual: vector.len(),
                },
            ));
            continue;
        }
        match store.add(entry, hash, vector).await {
            Ok(()) => report.embedded += 1,
            Err(e) => report.failures.push(with_document(entry, e)),
        }
    }
    report
}

fn with_document(entry: &IndexEntry, err: IndexServiceError) -> IndexServiceError {
    IndexServiceError::Document {
        id: entry.document.id.clone(),
        title: entry.document.metadata.title.clone(),
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::{DocumentKind, DocumentMetadata};
    use super::memory::InMemoryStore;

    fn entry(span: Span, body: &str) -> IndexEntry {
        IndexEntry {
            document: Document {
                id: "doc-1".into(),
                body: body.into(),
                metadata: DocumentMetadata {
                    module: "sale".into(),
                    entity_name: Some("sale.order".into()),
                    kind: DocumentKind::Entity,
                    source_path: "sale/models/sale.py".into(),
                    span,
                    title: "sale.order (sale)".into(),
                },
            },
            parents: vec![],
        }
    }

    #[tokio::test]
    async fn moved_entries_are_not_re_embedded() {
        let store = InMemoryStore::new();
        let embedder = HashEmbedder::default();

        let first = add_batch(&store, &embedder, &[entry(Span::new(3, 9), "Entity: sale.order")]).await;
        assert_eq!(first.embedded, 1);

        let moved = add_batch(&store, &embedder, &[entry(Span::new(5, 11), "Entity: sale.order")]).await;
        assert_eq!(moved.embedded, 0);
        assert_eq!(moved.unchanged, 1);
        assert!(moved.failures.is_empty());
        let stored = store.get("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.document.metadata.span, Span::new(5, 11));

        let edited = add_batch(
            &store,
            &embedder,
            &[entry(Span::new(5, 11), "Entity: sale.order\nMethods: action_confirm")],
        )
        .await;
        assert_eq!(edited.embedded, 1);
        assert_eq!(edited.unchanged, 0);
    }
}
