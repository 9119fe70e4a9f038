//! SQLite-backed [`IndexStore`] implementation.
//!
//! Documents, their vectors, and their parent edges live in three tables
//! of `index.sqlite` (see [`crate::migrate`]). Similarity search loads the
//! vectors that pass the metadata filter and ranks them with cosine
//! similarity in process.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashSet};

use odoo_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use odoo_rag_core::error::IndexServiceError;
use odoo_rag_core::models::{
    Document, DocumentKind, DocumentMetadata, Filter, IndexEntry, InheritKind, ParentEdge, Span,
};
use odoo_rag_core::store::{IndexStore, ModuleSummary, ScoredDocument};

use crate::config::Config;
use crate::{db, migrate};

pub const META_EMBEDDING_MODEL: &str = "embedding_model";
pub const META_EMBEDDING_DIMS: &str = "embedding_dims";
pub const META_ROOT: &str = "root";

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open an existing index. Fails when nothing was indexed at the
    /// configured location yet.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let db_path = config.db_path();
        if !db_path.exists() {
            anyhow::bail!(
                "no index at {} (run `orag index <root>` first)",
                db_path.display()
            );
        }
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, IndexServiceError> {
        let row = sqlx::query("SELECT value FROM index_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(IndexServiceError::storage)?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), IndexServiceError> {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(IndexServiceError::storage)?;
        Ok(())
    }

    /// Embedding model and dimensionality recorded by the last index run.
    pub async fn embedding_info(&self) -> Result<Option<(String, usize)>, IndexServiceError> {
        let model = self.get_meta(META_EMBEDDING_MODEL).await?;
        let dims = self.get_meta(META_EMBEDDING_DIMS).await?;
        Ok(match (model, dims) {
            (Some(model), Some(dims)) => dims.parse().ok().map(|d| (model, d)),
            _ => None,
        })
    }

    /// Drop every stored vector so the next run re-embeds all documents.
    pub async fn clear_vectors(&self) -> Result<u64, IndexServiceError> {
        let result = sqlx::query("DELETE FROM document_vectors")
            .execute(&self.pool)
            .await
            .map_err(IndexServiceError::storage)?;
        Ok(result.rows_affected())
    }

    /// Unix timestamp of the most recently stored document.
    pub async fn last_indexed_at(&self) -> Result<Option<i64>, IndexServiceError> {
        sqlx::query_scalar("SELECT MAX(indexed_at) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(IndexServiceError::storage)
    }

    async fn parents_of(&self, id: &str) -> Result<Vec<ParentEdge>, IndexServiceError> {
        let rows = sqlx::query(
            "SELECT parent_name, parent_module, kind FROM inheritance_edges WHERE document_id = ? ORDER BY position ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(IndexServiceError::storage)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("kind");
                Ok(ParentEdge {
                    name: row.get("parent_name"),
                    module: row.get("parent_module"),
                    kind: InheritKind::parse(&kind).ok_or_else(|| {
                        IndexServiceError::storage(format!("unknown edge kind '{kind}'"))
                    })?,
                })
            })
            .collect()
    }

    async fn entry_from_row(&self, row: &SqliteRow) -> Result<IndexEntry, IndexServiceError> {
        let document = row_to_document(row)?;
        let parents = self.parents_of(&document.id).await?;
        Ok(IndexEntry { document, parents })
    }
}

const DOCUMENT_COLUMNS: &str =
    "d.id, d.module, d.entity_name, d.kind, d.source_path, d.start_line, d.end_line, d.title, d.body";

fn row_to_document(row: &SqliteRow) -> Result<Document, IndexServiceError> {
    let kind: String = row.get("kind");
    let start: i64 = row.get("start_line");
    let end: i64 = row.get("end_line");
    Ok(Document {
        id: row.get("id"),
        body: row.get("body"),
        metadata: DocumentMetadata {
            module: row.get("module"),
            entity_name: row.get("entity_name"),
            kind: DocumentKind::parse(&kind).ok_or_else(|| {
                IndexServiceError::storage(format!("unknown document kind '{kind}'"))
            })?,
            source_path: row.get("source_path"),
            span: Span::new(start.max(0) as usize, end.max(0) as usize),
            title: row.get("title"),
        },
    })
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn add(
        &self,
        entry: &IndexEntry,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<(), IndexServiceError> {
        let doc = &entry.document;
        let meta = &doc.metadata;
        let now = chrono::Utc::now().timestamp();
        let blob = vec_to_blob(vector);
        let model = self.get_meta(META_EMBEDDING_MODEL).await?.unwrap_or_default();

        let mut tx = self.pool.begin().await.map_err(IndexServiceError::storage)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, module, entity_name, kind, source_path,
                                   start_line, end_line, title, body, content_hash, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                module = excluded.module,
                entity_name = excluded.entity_name,
                kind = excluded.kind,
                source_path = excluded.source_path,
                start_line = excluded.start_line,
                end_line = excluded.end_line,
                title = excluded.title,
                body = excluded.body,
                content_hash = excluded.content_hash,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&doc.id)
        .bind(&meta.module)
        .bind(&meta.entity_name)
        .bind(meta.kind.as_str())
        .bind(&meta.source_path)
        .bind(meta.span.start_line as i64)
        .bind(meta.span.end_line as i64)
        .bind(&meta.title)
        .bind(&doc.body)
        .bind(content_hash)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(IndexServiceError::storage)?;

        sqlx::query("DELETE FROM inheritance_edges WHERE document_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await
            .map_err(IndexServiceError::storage)?;

        for (position, edge) in entry.parents.iter().enumerate() {
            sqlx::query(
                "INSERT INTO inheritance_edges (document_id, position, parent_name, parent_module, kind) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(position as i64)
            .bind(&edge.name)
            .bind(&edge.module)
            .bind(edge.kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(IndexServiceError::storage)?;
        }

        sqlx::query(
            r#"
            INSERT INTO document_vectors (document_id, model, dims, embedding)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(&doc.id)
        .bind(&model)
        .bind(vector.len() as i64)
        .bind(&blob)
        .execute(&mut *tx)
        .await
        .map_err(IndexServiceError::storage)?;

        tx.commit().await.map_err(IndexServiceError::storage)?;
        Ok(())
    }

    async fn stored_hash(&self, id: &str) -> Result<Option<String>, IndexServiceError> {
        let row = sqlx::query(
            "SELECT d.content_hash FROM documents d JOIN document_vectors v ON v.document_id = d.id WHERE d.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(IndexServiceError::storage)?;
        Ok(row.map(|r| r.get("content_hash")))
    }

    async fn update_span(&self, id: &str, span: Span) -> Result<(), IndexServiceError> {
        sqlx::query("UPDATE documents SET start_line = ?, end_line = ? WHERE id = ?")
            .bind(span.start_line as i64)
            .bind(span.end_line as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(IndexServiceError::storage)?;
        Ok(())
    }

    async fn query(
        &self,
        query_vec: &[f32],
        filter: &Filter,
        k: usize,
    ) -> Result<Vec<ScoredDocument>, IndexServiceError> {
        let sql = format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}, v.embedding
            FROM documents d
            JOIN document_vectors v ON v.document_id = d.id
            WHERE (? IS NULL OR d.module = ?)
              AND (? IS NULL OR d.entity_name = ?)
            ORDER BY d.id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&filter.module)
            .bind(&filter.module)
            .bind(&filter.entity_name)
            .bind(&filter.entity_name)
            .fetch_all(&self.pool)
            .await
            .map_err(IndexServiceError::storage)?;

        let mut scored: Vec<(f32, Document)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            if vec.len() != query_vec.len() {
                return Err(IndexServiceError::DimensionMismatch {
                    expected: vec.len(),
                    actual: query_vec.len(),
                });
            }
            scored.push((cosine_similarity(query_vec, &vec), row_to_document(row)?));
        }

        // Rows arrive in id order and the sort is stable: equal scores stay id-ascending.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut results = Vec::with_capacity(scored.len());
        for (score, document) in scored {
            let parents = self.parents_of(&document.id).await?;
            results.push(ScoredDocument {
                document,
                parents,
                score,
            });
        }
        Ok(results)
    }

    async fn lookup_by_entity(&self, name: &str) -> Result<Vec<IndexEntry>, IndexServiceError> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.entity_name = ? AND d.kind IN ('entity', 'view') ORDER BY d.id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(IndexServiceError::storage)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(self.entry_from_row(row).await?);
        }
        Ok(entries)
    }

    async fn get(&self, id: &str) -> Result<Option<IndexEntry>, IndexServiceError> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(IndexServiceError::storage)?;
        match row {
            Some(row) => Ok(Some(self.entry_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn retain_only(&self, keep: &HashSet<String>) -> Result<usize, IndexServiceError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM documents")
            .fetch_all(&self.pool)
            .await
            .map_err(IndexServiceError::storage)?;
        let stale: Vec<&String> = ids.iter().filter(|id| !keep.contains(*id)).collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(IndexServiceError::storage)?;
        for id in &stale {
            for sql in [
                "DELETE FROM inheritance_edges WHERE document_id = ?",
                "DELETE FROM document_vectors WHERE document_id = ?",
                "DELETE FROM documents WHERE id = ?",
            ] {
                sqlx::query(sql)
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(IndexServiceError::storage)?;
            }
        }
        tx.commit().await.map_err(IndexServiceError::storage)?;
        Ok(stale.len())
    }

    async fn modules(&self) -> Result<Vec<ModuleSummary>, IndexServiceError> {
        let rows = sqlx::query(
            "SELECT module, kind, COUNT(*) AS n FROM documents GROUP BY module, kind ORDER BY module ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(IndexServiceError::storage)?;

        let mut by_module: BTreeMap<String, ModuleSummary> = BTreeMap::new();
        for row in &rows {
            let module: String = row.get("module");
            let kind: String = row.get("kind");
            let n: i64 = row.get("n");
            let summary = by_module
                .entry(module.clone())
                .or_insert_with(|| ModuleSummary {
                    module,
                    ..ModuleSummary::default()
                });
            let n = n.max(0) as usize;
            match DocumentKind::parse(&kind) {
                Some(DocumentKind::Entity) => summary.entities += n,
                Some(DocumentKind::View) => summary.views += n,
                Some(DocumentKind::Script) => summary.scripts += n,
                Some(DocumentKind::Manifest) => summary.manifests += n,
                None => {}
            }
        }
        Ok(by_module.into_values().collect())
    }

    async fn count(&self) -> Result<usize, IndexServiceError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(IndexServiceError::storage)?;
        Ok(n.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odoo_rag_core::builder::content_hash;

    async fn store(dir: &std::path::Path) -> SqliteStore {
        let mut config = Config::minimal();
        config.index.dir = dir.to_path_buf();
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn entry(id: &str, module: &str, entity: &str, parent: Option<&str>) -> IndexEntry {
        IndexEntry {
            document: Document {
                id: id.into(),
                body: format!("Entity: {entity}"),
                metadata: DocumentMetadata {
                    module: module.into(),
                    entity_name: Some(entity.into()),
                    kind: DocumentKind::Entity,
                    source_path: format!("{module}/models/m.py"),
                    span: Span::new(3, 12),
                    title: entity.into(),
                },
            },
            parents: parent
                .map(|p| {
                    vec![ParentEdge {
                        name: p.into(),
                        module: Some("sale".into()),
                        kind: InheritKind::Extension,
                    }]
                })
                .unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn round_trips_entries_and_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path()).await;
        let base = entry("a1", "sale", "sale.order", None);
        let ext = entry("b2", "sale_custom", "sale.order", Some("sale.order"));
        store.add(&base, &content_hash(&base), &[1.0, 0.0]).await.unwrap();
        store.add(&ext, &content_hash(&ext), &[0.8, 0.2]).await.unwrap();

        assert_eq!(store.get("b2").await.unwrap(), Some(ext.clone()));
        assert_eq!(store.stored_hash("a1").await.unwrap(), Some(content_hash(&base)));

        let hits = store
            .query(&[1.0, 0.0], &Filter::module("sale_custom"), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "b2");
        assert_eq!(hits[0].parents, ext.parents);

        let found = store.lookup_by_entity("sale.order").await.unwrap();
        assert_eq!(found.len(), 2);

        let keep: HashSet<String> = ["a1".to_string()].into_iter().collect();
        assert_eq!(store.retain_only(&keep).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get("b2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn moved_document_keeps_its_vector() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path()).await;
        let e = entry("a1", "sale", "sale.order", None);
        store.add(&e, &content_hash(&e), &[0.6, 0.8]).await.unwrap();
        store.update_span("a1", Span::new(20, 31)).await.unwrap();

        let got = store.get("a1").await.unwrap().unwrap();
        assert_eq!(got.document.metadata.span, Span::new(20, 31));
        assert_eq!(store.stored_hash("a1").await.unwrap(), Some(content_hash(&e)));
        let hits = store.query(&[0.6, 0.8], &Filter::default(), 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn rejects_queries_with_other_dimensions() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path()).await;
        let e = entry("a1", "sale", "sale.order", None);
        store.add(&e, "h", &[1.0, 0.0]).await.unwrap();
        let err = store.query(&[1.0, 0.0, 0.0], &Filter::default(), 5).await.unwrap_err();
        assert!(matches!(err, IndexServiceError::DimensionMismatch { .. }));
    }
}
