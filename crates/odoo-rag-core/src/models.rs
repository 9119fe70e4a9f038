//! Core data models used throughout odoo-rag.
//!
//! These types represent the modules, structural facts, and retrievable
//! documents that flow through the indexing and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A module discovered under the scanned root, identified by its directory name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Directory name (the module's technical name).
    pub name: String,
    /// Absolute or root-relative path of the module directory.
    pub path: PathBuf,
    pub manifest: Manifest,
}

/// Facts read from a module manifest (`__manifest__.py`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Human-readable name (`'name'` key), if declared.
    pub title: Option<String>,
    pub version: Option<String>,
    pub summary: Option<String>,
    pub category: Option<String>,
    /// Modules this module depends on, in declared order.
    pub depends: Vec<String>,
    /// Declared data files (`'data'` key), in declared order.
    pub data: Vec<String>,
    /// Root-relative path of the manifest file.
    pub source_path: String,
}

/// Classification of a source file inside a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ModelDefinition,
    ViewDefinition,
    Script,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::ModelDefinition => "model_definition",
            ArtifactKind::ViewDefinition => "view_definition",
            ArtifactKind::Script => "script",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a retrievable [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Entity,
    View,
    Script,
    Manifest,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Entity => "entity",
            DocumentKind::View => "view",
            DocumentKind::Script => "script",
            DocumentKind::Manifest => "manifest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entity" => Some(DocumentKind::Entity),
            "view" => Some(DocumentKind::View),
            "script" => Some(DocumentKind::Script),
            "manifest" => Some(DocumentKind::Manifest),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive 1-based line range inside a source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    pub fn new(start_line: usize, end_line: usize) -> Self {
        Self {
            start_line,
            end_line: end_line.max(start_line),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_line == self.end_line {
            write!(f, "line {}", self.start_line)
        } else {
            write!(f, "lines {}-{}", self.start_line, self.end_line)
        }
    }
}

/// How an entity or view refers to a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritKind {
    /// `_inherit`: fields merge into (or extend) the parent entity.
    Extension,
    /// `_inherits`: the parent is composed by reference through a field.
    Delegation,
    /// `inherit_id` on a view record.
    View,
}

impl InheritKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InheritKind::Extension => "extension",
            InheritKind::Delegation => "delegation",
            InheritKind::View => "view",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extension" => Some(InheritKind::Extension),
            "delegation" => Some(InheritKind::Delegation),
            "view" => Some(InheritKind::View),
            _ => None,
        }
    }
}

/// A field declared on an entity (`name = fields.Char(...)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Lower-cased field type, e.g. `char`, `many2one`.
    pub type_tag: String,
    /// Target entity of a relational field, if declared literally.
    pub comodel: Option<String>,
    /// Declared with `compute=` or `related=`.
    pub computed: bool,
    /// Declared with `tracking=` / `track_visibility=`.
    pub tracked: bool,
    pub line: usize,
}

/// A reference from an entity declaration to a parent entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritRef {
    pub name: String,
    pub kind: InheritKind,
    /// Delegation field (`_inherits` value); `None` for extension refs.
    pub via_field: Option<String>,
}

/// One model class declaration found in a model-definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Qualified entity name, e.g. `sale.order`.
    pub name: String,
    pub module: String,
    pub class_name: String,
    pub description: Option<String>,
    pub parents: Vec<InheritRef>,
    /// Fields declared by this class, in declaration order.
    pub fields: Vec<Field>,
    /// Method names declared by this class, in declaration order.
    pub methods: Vec<String>,
    pub source_path: String,
    pub span: Span,
}

/// The structural action of a view patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchAction {
    InsertBefore,
    InsertAfter,
    InsertInside,
    Replace,
    Remove,
    Attributes,
}

impl PatchAction {
    pub fn describe(&self) -> &'static str {
        match self {
            PatchAction::InsertBefore => "insert before",
            PatchAction::InsertAfter => "insert after",
            PatchAction::InsertInside => "insert inside",
            PatchAction::Replace => "replace",
            PatchAction::Remove => "remove",
            PatchAction::Attributes => "set attributes on",
        }
    }
}

/// A single anchored patch operation inside an inheriting view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOp {
    pub action: PatchAction,
    /// Anchor locator: an xpath expression or a shorthand element selector.
    pub anchor: String,
    /// Field names referenced by the patch content.
    pub fields: Vec<String>,
    /// Attribute names touched by an `attributes` patch.
    pub attributes: Vec<String>,
    pub line: usize,
}

/// A UI-structure declaration (`ir.ui.view` record or QWeb template).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRecord {
    /// Qualified external id, e.g. `sale.view_order_form`.
    pub name: String,
    pub module: String,
    /// Display name (`<field name="name">`), if any.
    pub title: Option<String>,
    /// Entity the view renders (`<field name="model">`), if any.
    pub model: Option<String>,
    /// Root element of the arch for non-inheriting views (`form`, `tree`, ...).
    pub view_type: Option<String>,
    /// Qualified external id of the parent view.
    pub inherit: Option<String>,
    pub patches: Vec<PatchOp>,
    /// Field names placed by a non-inheriting arch.
    pub fields: Vec<String>,
    pub source_path: String,
    pub span: Span,
}

/// A named top-level declaration from an auxiliary script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFragment {
    pub name: String,
    pub module: String,
    /// Leading comment/doc text attached to the declaration.
    pub doc: String,
    /// Declaration text, comments included, verbatim.
    pub text: String,
    pub source_path: String,
    pub span: Span,
}

/// Metadata attached to every [`Document`]; the single source of truth for filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub module: String,
    /// Entity or view name, where applicable.
    pub entity_name: Option<String>,
    pub kind: DocumentKind,
    pub source_path: String,
    pub span: Span,
    /// Short display title.
    pub title: String,
}

/// An indexable, immutable text unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Deterministic identifier (hex SHA-256).
    pub id: String,
    pub body: String,
    pub metadata: DocumentMetadata,
}

/// A resolved parent edge stored in the metadata-only index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentEdge {
    pub name: String,
    /// Module of the resolved parent declaration, when it was indexed.
    pub module: Option<String>,
    pub kind: InheritKind,
}

impl ParentEdge {
    /// Whether `doc` is the declaration this edge points at.
    pub fn points_at(&self, doc: &Document) -> bool {
        doc.metadata.entity_name.as_deref() == Some(self.name.as_str())
            && matches!(doc.metadata.kind, DocumentKind::Entity | DocumentKind::View)
            && self
                .module
                .as_deref()
                .map_or(true, |m| m == doc.metadata.module)
    }
}

/// A document paired with its structural parent edges, as handed to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub document: Document,
    pub parents: Vec<ParentEdge>,
}

/// Query-time metadata predicate. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub module: Option<String>,
    pub entity_name: Option<String>,
}

impl Filter {
    pub fn module(module: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
            entity_name: None,
        }
    }

    pub fn entity(entity_name: impl Into<String>) -> Self {
        Self {
            module: None,
            entity_name: Some(entity_name.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.module.is_none() && self.entity_name.is_none()
    }

    /// Exact-match AND over the populated fields.
    pub fn matches(&self, meta: &DocumentMetadata) -> bool {
        if let Some(m) = &self.module {
            if &meta.module != m {
                return false;
            }
        }
        if let Some(e) = &self.entity_name {
            if meta.entity_name.as_ref() != Some(e) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.module, &self.entity_name) {
            (None, None) => f.write_str("none"),
            (Some(m), None) => write!(f, "module={}", m),
            (None, Some(e)) => write!(f, "entity={}", e),
            (Some(m), Some(e)) => write!(f, "module={}, entity={}", m, e),
        }
    }
}

/// Classification of a question's purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Definition,
    FieldInquiry,
    InheritanceInquiry,
    WorkflowInquiry,
    Generic,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Definition => "definition",
            QueryIntent::FieldInquiry => "field_inquiry",
            QueryIntent::InheritanceInquiry => "inheritance_inquiry",
            QueryIntent::WorkflowInquiry => "workflow_inquiry",
            QueryIntent::Generic => "generic",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
