//! Answering session: classify, retrieve, build prompt, generate.
//!
//! A [`Session`] owns the filter state for one conversation. The filter
//! is read once per question as a snapshot, and changed only through
//! [`Session::update_filter`], so a running question never observes a
//! half-applied change. When generation fails after retrieval succeeded,
//! the prompt is kept and [`Session::retry`] sends it again without
//! re-querying the index.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::classify::classify;
use crate::embedding::Embedder;
use crate::error::{GenerationError, SessionError};
use crate::models::{Filter, QueryIntent};
use crate::prompt::{build_diagram_prompt, build_prompt, Prompt};
use crate::retrieval::{retrieve, RetrievalRequest, RetrievedDocument};
use crate::store::IndexStore;

/// Quality/cost tier used to pick a generation model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    Fast,
    Balanced,
    Best,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Balanced => "balanced",
            ModelTier::Best => "best",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fast" => Some(ModelTier::Fast),
            "balanced" => Some(ModelTier::Balanced),
            "best" => Some(ModelTier::Best),
            _ => None,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model identifiers per tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    pub fast: String,
    pub balanced: String,
    pub best: String,
}

impl ModelCatalog {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Balanced => &self.balanced,
            ModelTier::Best => &self.best,
        }
    }
}

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound on the whole call, retries included.
    pub timeout: Duration,
}

/// Text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Backend name for logs (`"anthropic"`, `"echo"`, ...).
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub k: usize,
    pub expand_inheritance: bool,
    pub tier: ModelTier,
    pub models: ModelCatalog,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Filtered,
}

/// A generated answer and the context it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub intent: QueryIntent,
    pub filter: Filter,
    pub model: String,
    pub sources: Vec<RetrievedDocument>,
}

/// Context kept after a failed generation.
#[derive(Debug, Clone)]
struct Pending {
    prompt: Prompt,
    filter: Filter,
    model: String,
    sources: Vec<RetrievedDocument>,
}

pub struct Session {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    settings: SessionSettings,
    filter: RwLock<Filter>,
    tier: RwLock<ModelTier>,
    pending: Mutex<Option<Pending>>,
}

impl Session {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            tier: RwLock::new(settings.tier),
            settings,
            filter: RwLock::new(Filter::default()),
            pending: Mutex::new(None),
        }
    }

    pub fn with_filter(self, filter: Filter) -> Self {
        self.update_filter(|f| *f = filter);
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Snapshot of the active filter.
    pub fn filter(&self) -> Filter {
        match self.filter.read() {
            Ok(f) => f.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.filter().is_empty() {
            SessionState::Idle
        } else {
            SessionState::Filtered
        }
    }

    /// The single mutation point for filter state. Returns the new filter.
    pub fn update_filter(&self, change: impl FnOnce(&mut Filter)) -> Filter {
        let mut guard = match self.filter.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        change(&mut guard);
        guard.clone()
    }

    pub fn set_module(&self, module: Option<String>) -> Filter {
        self.update_filter(|f| f.module = module)
    }

    pub fn set_entity(&self, entity: Option<String>) -> Filter {
        self.update_filter(|f| f.entity_name = entity)
    }

    pub fn clear_filter(&self) -> Filter {
        self.update_filter(|f| *f = Filter::default())
    }

    pub fn tier(&self) -> ModelTier {
        match self.tier.read() {
            Ok(t) => *t,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Switch the model tier used by subsequent generations.
    pub fn set_tier(&self, tier: ModelTier) {
        match self.tier.write() {
            Ok(mut t) => *t = tier,
            Err(poisoned) => *poisoned.into_inner() = tier,
        }
    }

    /// Answer one question under the current filter.
    pub async fn ask(&self, question: &str) -> Result<Answer, SessionError> {
        let intent = classify(question);
        let filter = self.filter();
        let sources = self.retrieve(question, &filter, intent).await?;
        let prompt = build_prompt(question, intent, &filter, &sources);
        self.generate(prompt, filter, self.current_model(), sources)
            .await
    }

    /// Ask for a Mermaid sequence diagram of a business process.
    pub async fn diagram(&self, process: &str) -> Result<Answer, SessionError> {
        let filter = self.filter();
        let sources = self
            .retrieve(process, &filter, QueryIntent::WorkflowInquiry)
            .await?;
        let prompt = build_diagram_prompt(process, &filter, &sources);
        self.generate(prompt, filter, self.current_model(), sources)
            .await
    }

    /// Re-send the prompt of the last failed generation to the model it
    /// was first sent to.
    pub async fn retry(&self) -> Result<Answer, SessionError> {
        let pending = self
            .take_pending()
            .ok_or(SessionError::NothingToRetry)?;
        self.generate(
            pending.prompt,
            pending.filter,
            pending.model,
            pending.sources,
        )
        .await
    }

    /// Whether a failed generation can be retried.
    pub fn can_retry(&self) -> bool {
        match self.pending.lock() {
            Ok(p) => p.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    async fn retrieve(
        &self,
        question: &str,
        filter: &Filter,
        intent: QueryIntent,
    ) -> Result<Vec<RetrievedDocument>, SessionError> {
        let request = RetrievalRequest {
            question,
            filter,
            k: self.settings.k,
            intent,
            expand_inheritance: self.settings.expand_inheritance,
        };
        Ok(retrieve(self.store.as_ref(), self.embedder.as_ref(), &request).await?)
    }

    fn current_model(&self) -> String {
        self.settings.models.model_for(self.tier()).to_string()
    }

    async fn generate(
        &self,
        prompt: Prompt,
        filter: Filter,
        model: String,
        sources: Vec<RetrievedDocument>,
    ) -> Result<Answer, SessionError> {
        let request = GenerationRequest {
            prompt: prompt.text.clone(),
            model: model.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            timeout: self.settings.timeout,
        };
        match self.generator.generate(&request).await {
            Ok(text) => {
                self.set_pending(None);
                Ok(Answer {
                    text,
                    intent: prompt.intent,
                    filter,
                    model,
                    sources,
                })
            }
            Err(e) => {
                self.set_pending(Some(Pending {
                    prompt,
                    filter,
                    model,
                    sources,
                }));
                Err(SessionError::Generation(e))
            }
        }
    }

    fn set_pending(&self, value: Option<Pending>) {
        match self.pending.lock() {
            Ok(mut p) => *p = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    fn take_pending(&self) -> Option<Pending> {
        match self.pending.lock() {
            Ok(mut p) => p.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_documents, content_hash, ExtractedFacts};
    use crate::embedding::HashEmbedder;
    use crate::extract::model;
    use crate::models::{Manifest, Module};
    use crate::store::memory::InMemoryStore;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then echoes the prompt.
    struct Flaky {
        failures: AtomicUsize,
    }

    #[async_trait]
    impl Generator for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(GenerationError::Timeout {
                    model: request.model.clone(),
                    after: request.timeout,
                });
            }
            Ok(request.prompt.clone())
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            k: 5,
            expand_inheritance: true,
            tier: ModelTier::Balanced,
            models: ModelCatalog {
                fast: "m-fast".into(),
                balanced: "m-balanced".into(),
                best: "m-best".into(),
            },
            max_tokens: 512,
            temperature: 0.0,
            timeout: Duration::from_secs(5),
        }
    }

    async fn session(failures: usize) -> Session {
        let sale = "class SaleOrder(models.Model):\n    _name = 'sale.order'\n    name = fields.Char()\n    partner_id = fields.Many2one('res.partner')\n";
        let partner = "class Partner(models.Model):\n    _name = 'res.partner'\n    name = fields.Char()\n    email = fields.Char()\n";
        let mut entities = model::extract_entities("sale", "sale/models/sale.py", sale).0;
        entities.extend(model::extract_entities("base", "base/models/res_partner.py", partner).0);
        let module = |name: &str| Module {
            name: name.into(),
            path: PathBuf::from(name),
            manifest: Manifest {
                source_path: format!("{name}/__manifest__.py"),
                ..Manifest::default()
            },
        };
        let facts = ExtractedFacts {
            modules: vec![module("base"), module("sale")],
            entities,
            ..ExtractedFacts::default()
        };
        let store = InMemoryStore::new();
        let embedder = HashEmbedder::default();
        for entry in build_documents(&facts).entries {
            let v = embedder.embed_text(&entry.document.body);
            store.add(&entry, &content_hash(&entry), &v).await.unwrap();
        }
        Session::new(
            Arc::new(store),
            Arc::new(embedder),
            Arc::new(Flaky {
                failures: AtomicUsize::new(failures),
            }),
            settings(),
        )
    }

    #[tokio::test]
    async fn entity_filter_scopes_retrieval() {
        let session = session(0).await;
        assert_eq!(session.state(), SessionState::Idle);
        session.set_entity(Some("res.partner".into()));
        assert_eq!(session.state(), SessionState::Filtered);

        let answer = session
            .ask("What fields are defined in the partner model?")
            .await
            .unwrap();
        assert_eq!(answer.intent, QueryIntent::FieldInquiry);
        assert_eq!(answer.model, "m-balanced");
        assert!(!answer.sources.is_empty());
        assert!(answer
            .sources
            .iter()
            .all(|s| s.document.metadata.entity_name.as_deref() == Some("res.partner")));
        assert!(!answer.text.contains("Entity: sale.order"));

        // questions never change the filter
        assert_eq!(session.filter(), Filter::entity("res.partner"));
        session.clear_filter();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn failed_generation_can_be_retried() {
        let session = session(1).await;
        let err = session.ask("What is sale.order?").await.unwrap_err();
        assert!(matches!(err, SessionError::Generation(GenerationError::Timeout { .. })));
        assert!(session.can_retry());

        session.set_module(Some("base".into()));
        session.set_tier(ModelTier::Best);
        let answer = session.retry().await.unwrap();
        // the retried prompt keeps the filter and model it was built with
        assert_eq!(answer.filter, Filter::default());
        assert_eq!(answer.model, "m-balanced");
        assert_eq!(answer.intent, QueryIntent::Definition);
        assert!(!session.can_retry());

        let answer = session.ask("What is sale.order?").await.unwrap();
        assert_eq!(answer.model, "m-best");
        assert!(matches!(
            session.retry().await.unwrap_err(),
            SessionError::NothingToRetry
        ));
    }
}
