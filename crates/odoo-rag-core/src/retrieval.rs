//! Retrieval engine: filtered top-k search plus inheritance expansion.
//!
//! Direct results come from [`IndexStore::query`] and are never padded.
//! For inheritance questions the engine then walks parent edges through
//! [`IndexStore::lookup_by_entity`], breadth first, adding the ancestor
//! declarations of each direct result. The combined list is capped at
//! twice the requested `k`.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::embedding::{embed_one, Embedder};
use crate::error::IndexServiceError;
use crate::models::{Document, Filter, IndexEntry, ParentEdge, QueryIntent};
use crate::store::IndexStore;

/// How a document entered the result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Provenance {
    /// Similarity search under the active filter.
    Direct,
    /// Parent-edge walk from the document `of`, `depth` edges away.
    Ancestor { of: String, depth: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    pub document: Document,
    pub parents: Vec<ParentEdge>,
    /// Similarity score; `None` for expanded ancestors.
    pub score: Option<f32>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub question: &'a str,
    pub filter: &'a Filter,
    pub k: usize,
    pub intent: QueryIntent,
    /// Walk parent edges for inheritance questions.
    pub expand_inheritance: bool,
}

/// Run one retrieval. An empty question retrieves nothing.
pub async fn retrieve(
    store: &dyn IndexStore,
    embedder: &dyn Embedder,
    request: &RetrievalRequest<'_>,
) -> Result<Vec<RetrievedDocument>, IndexServiceError> {
    if request.question.trim().is_empty() || request.k == 0 {
        return Ok(Vec::new());
    }

    let query_vec = embed_one(embedder, request.question).await?;
    let direct = store.query(&query_vec, request.filter, request.k).await?;
    let mut results: Vec<RetrievedDocument> = direct
        .into_iter()
        .map(|s| RetrievedDocument {
            document: s.document,
            parents: s.parents,
            score: Some(s.score),
            provenance: Provenance::Direct,
        })
        .collect();

    if request.intent == QueryIntent::InheritanceInquiry && request.expand_inheritance {
        expand_ancestors(store, &mut results, request.k * 2).await?;
    }
    Ok(results)
}

async fn expand_ancestors(
    store: &dyn IndexStore,
    results: &mut Vec<RetrievedDocument>,
    cap: usize,
) -> Result<(), IndexServiceError> {
    let mut seen: HashSet<String> = results.iter().map(|r| r.document.id.clone()).collect();
    let mut queue: VecDeque<(String, Vec<ParentEdge>, usize)> = results
        .iter()
        .map(|r| (r.document.id.clone(), r.parents.clone(), 0))
        .collect();
    let mut by_name: HashMap<String, Vec<IndexEntry>> = HashMap::new();

    while let Some((origin, parents, depth)) = queue.pop_front() {
        for edge in &parents {
            if results.len() >= cap {
                return Ok(());
            }
            if !by_name.contains_key(&edge.name) {
                let found = store.lookup_by_entity(&edge.name).await?;
                by_name.insert(edge.name.clone(), found);
            }
            let mut targets: Vec<&IndexEntry> = by_name
                .get(&edge.name)
                .map(|v| v.iter().filter(|e| edge.points_at(&e.document)).collect())
                .unwrap_or_default();
            targets.sort_by(|a, b| a.document.id.cmp(&b.document.id));

            for target in targets {
                if results.len() >= cap {
                    return Ok(());
                }
                if !seen.insert(target.document.id.clone()) {
                    continue;
                }
                queue.push_back((target.document.id.clone(), target.parents.clone(), depth + 1));
                results.push(RetrievedDocument {
                    document: target.document.clone(),
                    parents: target.parents.clone(),
                    score: None,
                    provenance: Provenance::Ancestor {
                        of: origin.clone(),
                        depth: depth + 1,
                    },
                });
            }
        }
    }
    Ok(())
}
