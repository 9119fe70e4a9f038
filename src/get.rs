//! `orag get` and `orag lookup`: metadata reads that bypass semantic search.

use anyhow::{bail, Result};
use serde::Serialize;

use odoo_rag_core::models::{IndexEntry, ParentEdge};
use odoo_rag_core::store::IndexStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Structural facts about one entity or view name.
#[derive(Debug, Clone, Serialize)]
pub struct LookupResponse {
    pub name: String,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Declaration {
    pub id: String,
    pub module: String,
    pub kind: String,
    pub source_path: String,
    pub lines: (usize, usize),
    pub parents: Vec<ParentEdge>,
}

impl From<&IndexEntry> for Declaration {
    fn from(entry: &IndexEntry) -> Self {
        let meta = &entry.document.metadata;
        Declaration {
            id: entry.document.id.clone(),
            module: meta.module.clone(),
            kind: meta.kind.as_str().to_string(),
            source_path: meta.source_path.clone(),
            lines: (meta.span.start_line, meta.span.end_line),
            parents: entry.parents.clone(),
        }
    }
}

pub async fn lookup_entity(store: &dyn IndexStore, name: &str) -> Result<LookupResponse> {
    let entries = store.lookup_by_entity(name).await?;
    Ok(LookupResponse {
        name: name.to_string(),
        declarations: entries.iter().map(Declaration::from).collect(),
    })
}

pub async fn run_lookup(config: &Config, name: &str, json: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let response = lookup_entity(&store, name).await?;
    store.pool().close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    if response.declarations.is_empty() {
        println!("No declarations of {}.", name);
        return Ok(());
    }

    println!("{}", name);
    for d in &response.declarations {
        println!(
            "  [{}] {} {}:{}-{}",
            d.module, d.kind, d.source_path, d.lines.0, d.lines.1
        );
        for p in &d.parents {
            println!(
                "    {} {} [{}]",
                p.kind.as_str(),
                p.name,
                p.module.as_deref().unwrap_or("not indexed")
            );
        }
    }
    Ok(())
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let entry = store.get(id).await?;
    store.pool().close().await;

    let Some(entry) = entry else {
        bail!("document not found: {}", id);
    };
    let doc = &entry.document;
    let meta = &doc.metadata;

    println!("--- Document ---");
    println!("id:          {}", doc.id);
    println!("title:       {}", meta.title);
    println!("kind:        {}", meta.kind.as_str());
    println!("module:      {}", meta.module);
    if let Some(entity) = &meta.entity_name {
        println!("entity:      {}", entity);
    }
    println!(
        "source:      {}:{}-{}",
        meta.source_path, meta.span.start_line, meta.span.end_line
    );
    for p in &entry.parents {
        println!(
            "parent:      {} {} [{}]",
            p.kind.as_str(),
            p.name,
            p.module.as_deref().unwrap_or("not indexed")
        );
    }
    println!();
    println!("--- Body ---");
    println!("{}", doc.body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use odoo_rag_core::models::{Document, DocumentKind, DocumentMetadata, InheritKind, Span};
    use odoo_rag_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn lookup_lists_every_declaration_with_parents() {
        let store = InMemoryStore::new();
        let entry = IndexEntry {
            document: Document {
                id: "x1".into(),
                body: "Entity: sale.order".into(),
                metadata: DocumentMetadata {
                    module: "sale_stock".into(),
                    entity_name: Some("sale.order".into()),
                    kind: DocumentKind::Entity,
                    source_path: "sale_stock/models/sale.py".into(),
                    span: Span::new(5, 30),
                    title: "sale.order".into(),
                },
            },
            parents: vec![ParentEdge {
                name: "sale.order".into(),
                module: Some("sale".into()),
                kind: InheritKind::Extension,
            }],
        };
        store.add(&entry, "h", &[1.0]).await.unwrap();

        let response = lookup_entity(&store, "sale.order").await.unwrap();
        assert_eq!(response.declarations.len(), 1);
        assert_eq!(response.declarations[0].module, "sale_stock");
        assert_eq!(response.declarations[0].lines, (5, 30));
        assert_eq!(response.declarations[0].parents[0].module.as_deref(), Some("sale"));

        let empty = lookup_entity(&store, "res.partner").await.unwrap();
        assert!(empty.declarations.is_empty());
    }
}
