//! In-memory [`IndexStore`] for tests and embedding in other tools.
//!
//! Entries live in a `BTreeMap` keyed by document id behind
//! `std::sync::RwLock`. Search is brute-force cosine similarity over the
//! filtered entries.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{IndexStore, ModuleSummary, ScoredDocument};
use crate::embedding::cosine_similarity;
use crate::error::IndexServiceError;
use crate::models::{DocumentKind, Filter, IndexEntry, Span};

struct StoredEntry {
    entry: IndexEntry,
    content_hash: String,
    vector: Vec<f32>,
}

pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, StoredEntry>>, IndexServiceError> {
        self.entries
            .read()
            .map_err(|_| IndexServiceError::storage("in-memory index lock poisoned"))
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<String, StoredEntry>>, IndexServiceError> {
        self.entries
            .write()
            .map_err(|_| IndexServiceError::storage("in-memory index lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn add(
        &self,
        entry: &IndexEntry,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<(), IndexServiceError> {
        let mut entries = self.write()?;
        if let Some(existing) = entries.values().find(|s| s.entry.document.id != entry.document.id) {
            if existing.vector.len() != vector.len() {
                return Err(IndexServiceError::DimensionMismatch {
                    expected: existing.vector.len(),
                    actual: vector.len(),
                });
            }
        }
        entries.insert(
            entry.document.id.clone(),
            StoredEntry {
                entry: entry.clone(),
                content_hash: content_hash.to_string(),
                vector: vector.to_vec(),
            },
        );
        Ok(())
    }

    async fn stored_hash(&self, id: &str) -> Result<Option<String>, IndexServiceError> {
        Ok(self.read()?.get(id).map(|s| s.content_hash.clone()))
    }

    async fn update_span(&self, id: &str, span: Span) -> Result<(), IndexServiceError> {
        if let Some(stored) = self.write()?.get_mut(id) {
            stored.entry.document.metadata.span = span;
        }
        Ok(())
    }

    async fn query(
        &self,
        query_vec: &[f32],
        filter: &Filter,
        k: usize,
    ) -> Result<Vec<ScoredDocument>, IndexServiceError> {
        let entries = self.read()?;
        if let Some(first) = entries.values().next() {
            if first.vector.len() != query_vec.len() {
                return Err(IndexServiceError::DimensionMismatch {
                    expected: first.vector.len(),
                    actual: query_vec.len(),
                });
            }
        }
        // BTreeMap iteration is id-ascending and the sort is stable, so
        // equal scores stay in id order.
        let mut scored: Vec<ScoredDocument> = entries
            .values()
            .filter(|s| filter.matches(&s.entry.document.metadata))
            .map(|s| ScoredDocument {
                document: s.entry.document.clone(),
                parents: s.entry.parents.clone(),
                score: cosine_similarity(query_vec, &s.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn lookup_by_entity(&self, name: &str) -> Result<Vec<IndexEntry>, IndexServiceError> {
        Ok(self
            .read()?
            .values()
            .filter(|s| {
                let meta = &s.entry.document.metadata;
                meta.entity_name.as_deref() == Some(name)
                    && matches!(meta.kind, DocumentKind::Entity | DocumentKind::View)
            })
            .map(|s| s.entry.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<IndexEntry>, IndexServiceError> {
        Ok(self.read()?.get(id).map(|s| s.entry.clone()))
    }

    async fn retain_only(&self, keep: &HashSet<String>) -> Result<usize, IndexServiceError> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|id, _| keep.contains(id));
        Ok(before - entries.len())
    }

    async fn modules(&self) -> Result<Vec<ModuleSummary>, IndexServiceError> {
        let entries = self.read()?;
        let mut by_module: BTreeMap<String, ModuleSummary> = BTreeMap::new();
        for s in entries.values() {
            let meta = &s.entry.document.metadata;
            let summary = by_module
                .entry(meta.module.clone())
                .or_insert_with(|| ModuleSummary {
                    module: meta.module.clone(),
                    ..ModuleSummary::default()
                });
            match meta.kind {
                DocumentKind::Entity => summary.entities += 1,
                DocumentKind::View => summary.views += 1,
                DocumentKind::Script => summary.scripts += 1,
                DocumentKind::Manifest => summary.manifests += 1,
            }
        }
        Ok(by_module.into_values().collect())
    }

    async fn count(&self) -> Result<usize, IndexServiceError> {
        Ok(self.read()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, DocumentMetadata, Span};

    fn entry(id: &str, module: &str, entity: Option<&str>) -> IndexEntry {
        IndexEntry {
            document: Document {
                id: id.into(),
                body: format!("body of {id}"),
                metadata: DocumentMetadata {
                    module: module.into(),
                    entity_name: entity.map(str::to_string),
                    kind: DocumentKind::Entity,
                    source_path: format!("{module}/models/x.py"),
                    span: Span::new(1, 2),
                    title: id.into(),
                },
            },
            parents: vec![],
        }
    }

    #[tokio::test]
    async fn filter_is_applied_before_ranking() {
        let store = InMemoryStore::new();
        store.add(&entry("a", "crm", Some("crm.lead")), "h", &[1.0, 0.0]).await.unwrap();
        store.add(&entry("b", "sale", Some("sale.order")), "h", &[0.9, 0.1]).await.unwrap();
        store.add(&entry("c", "sale", Some("sale.order")), "h", &[0.0, 1.0]).await.unwrap();

        let results = store.query(&[1.0, 0.0], &Filter::module("sale"), 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "b");

        let results = store.query(&[1.0, 0.0], &Filter::module("hr"), 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn ties_are_broken_by_id() {
        let store = InMemoryStore::new();
        for id in ["z", "m", "a"] {
            store.add(&entry(id, "m", None), "h", &[1.0, 0.0]).await.unwrap();
        }
        let ids: Vec<String> = store
            .query(&[1.0, 0.0], &Filter::default(), 3)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.document.id)
            .collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_reported() {
        let store = InMemoryStore::new();
        store.add(&entry("a", "m", None), "h", &[1.0, 0.0]).await.unwrap();
        let err = store.query(&[1.0, 0.0, 0.0], &Filter::default(), 3).await.unwrap_err();
        assert!(matches!(err, IndexServiceError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[tokio::test]
    async fn retain_only_and_modules() {
        let store = InMemoryStore::new();
        store.add(&entry("a", "crm", Some("crm.lead")), "h", &[1.0]).await.unwrap();
        store.add(&entry("b", "sale", Some("sale.order")), "h", &[1.0]).await.unwrap();
        let keep: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(store.retain_only(&keep).await.unwrap(), 1);
        let modules = store.modules().await.unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].module, "crm");
        assert_eq!(modules[0].entities, 1);
        assert_eq!(store.lookup_by_entity("crm.lead").await.unwrap().len(), 1);
        assert!(store.lookup_by_entity("sale.order").await.unwrap().is_empty());
    }
}
