//! Document builder: turns extracted facts into self-contained documents.
//!
//! Every document names its module, declaration site and resolved
//! ancestry, so it can be understood without reading any other document.
//! Entity documents list the effective field set after inheritance, and
//! view documents list patch operations from the root view down.
//!
//! Output is deterministic: ids are SHA-256 digests of the declaration's
//! identity, and entries are sorted by id.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::error::ExtractionError;
use crate::graph::{module_load_order, EntityGraph, ViewGraph};
use crate::models::{
    Document, DocumentKind, DocumentMetadata, Entity, IndexEntry, InheritKind, Module, ParentEdge,
    ScriptFragment, Span, ViewRecord,
};

/// Everything extracted from one scan.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFacts {
    pub modules: Vec<Module>,
    pub entities: Vec<Entity>,
    pub views: Vec<ViewRecord>,
    pub fragments: Vec<ScriptFragment>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub entries: Vec<IndexEntry>,
    /// Declarations skipped while building (inheritance cycles).
    pub diagnostics: Vec<ExtractionError>,
}

/// Deterministic document id.
pub fn document_id(
    kind: DocumentKind,
    module: &str,
    name: &str,
    source_path: &str,
    occurrence: usize,
) -> String {
    let mut hasher = Sha256::new();
    for part in [kind.as_str(), module, name, source_path] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(occurrence.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash of what a stored entry carries apart from its line span; a change
/// means re-embedding. Spans move whenever a sibling declaration in the same
/// file grows, so they are refreshed in place instead.
pub fn content_hash(entry: &IndexEntry) -> String {
    let doc = &entry.document;
    let meta = &doc.metadata;
    let mut hasher = Sha256::new();
    hasher.update(doc.body.as_bytes());
    for part in [
        meta.module.as_str(),
        meta.entity_name.as_deref().unwrap_or(""),
        meta.kind.as_str(),
        meta.source_path.as_str(),
        meta.title.as_str(),
    ] {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }
    for p in &entry.parents {
        hasher.update([0u8]);
        hasher.update(p.name.as_bytes());
        hasher.update([1u8]);
        hasher.update(p.module.as_deref().unwrap_or("").as_bytes());
        hasher.update([1u8]);
        hasher.update(p.kind.as_str().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Build every document for one scan.
pub fn build_documents(facts: &ExtractedFacts) -> BuildOutput {
    let order = module_load_order(&facts.modules);
    let mut occurrences: HashMap<(DocumentKind, String, String, String), usize> = HashMap::new();
    let mut next_id = |kind: DocumentKind, module: &str, name: &str, path: &str| {
        let key = (kind, module.to_string(), name.to_string(), path.to_string());
        let slot = occurrences.entry(key).or_insert(0);
        let id = document_id(kind, module, name, path, *slot);
        *slot += 1;
        id
    };

    let mut entries = Vec::new();
    let mut diagnostics = Vec::new();

    let (entities, entity_diags) = EntityGraph::build(&facts.entities, &order);
    diagnostics.extend(entity_diags);
    for idx in entities.healthy() {
        let e = entities.entity(idx);
        let id = next_id(DocumentKind::Entity, &e.module, &e.name, &e.source_path);
        entries.push(entity_entry(&entities, idx, id));
    }

    let (views, view_diags) = ViewGraph::build(&facts.views, &order);
    diagnostics.extend(view_diags);
    for idx in views.healthy() {
        let v = views.view(idx);
        let id = next_id(DocumentKind::View, &v.module, &v.name, &v.source_path);
        entries.push(view_entry(&views, idx, id));
    }

    let mut fragments: Vec<&ScriptFragment> = facts.fragments.iter().collect();
    fragments.sort_by(|a, b| {
        (&a.module, &a.source_path, a.span.start_line).cmp(&(
            &b.module,
            &b.source_path,
            b.span.start_line,
        ))
    });
    for f in fragments {
        let id = next_id(DocumentKind::Script, &f.module, &f.name, &f.source_path);
        entries.push(script_entry(f, id));
    }

    for module in &facts.modules {
        let id = next_id(
            DocumentKind::Manifest,
            &module.name,
            &module.name,
            &module.manifest.source_path,
        );
        entries.push(manifest_entry(module, facts, id));
    }

    entries.sort_by(|a, b| a.document.id.cmp(&b.document.id));
    BuildOutput {
        entries,
        diagnostics,
    }
}

fn entity_entry(graph: &EntityGraph<'_>, idx: usize, id: String) -> IndexEntry {
    let e = graph.entity(idx);
    let mut body = String::new();
    let _ = writeln!(body, "Entity: {}", e.name);
    let _ = writeln!(body, "Module: {}", e.module);
    let _ = writeln!(body, "Declared in: {}", e.source_path);
    let _ = writeln!(body, "Class: {}", e.class_name);
    if let Some(desc) = &e.description {
        let _ = writeln!(body, "Description: {desc}");
    }

    let mut parents = Vec::new();
    for p in graph.parents(idx) {
        let target = p.target.map(|t| graph.entity(t));
        let shown = match target {
            Some(t) => format!("{} [{}]", t.name, t.module),
            None => format!("{} (not indexed)", p.reference.name),
        };
        match p.reference.kind {
            InheritKind::Delegation => {
                let via = p.reference.via_field.as_deref().unwrap_or("?");
                let _ = writeln!(body, "Delegates to: {shown} via {via}");
            }
            _ => {
                let _ = writeln!(body, "Extends: {shown}");
            }
        }
        parents.push(ParentEdge {
            name: p.reference.name.clone(),
            module: target.map(|t| t.module.clone()),
            kind: p.reference.kind,
        });
    }

    let chain = graph.linearize(idx);
    if chain.len() > 1 {
        let shown: Vec<String> = chain
            .iter()
            .map(|&n| {
                let a = graph.entity(n);
                format!("{} [{}]", a.name, a.module)
            })
            .collect();
        let _ = writeln!(body, "Inheritance chain: {}", shown.join(" -> "));
    }

    let fields = graph.effective_fields(idx);
    if !fields.is_empty() {
        let _ = writeln!(body, "Fields:");
        for ef in &fields {
            let f = &ef.field;
            let mut traits = vec![f.type_tag.clone()];
            if let Some(comodel) = &f.comodel {
                traits[0] = format!("{} -> {}", f.type_tag, comodel);
            }
            if f.computed {
                traits.push("computed".to_string());
            }
            if f.tracked {
                traits.push("tracked".to_string());
            }
            let _ = write!(body, "- {} ({}) from {}", f.name, traits.join(", "), ef.origin);
            if let Some(prev) = &ef.overrides {
                if prev != &ef.origin {
                    let _ = write!(body, ", overrides {prev}");
                }
            }
            body.push('\n');
        }
    }
    if !e.methods.is_empty() {
        let _ = writeln!(body, "Methods: {}", e.methods.join(", "));
    }

    IndexEntry {
        document: Document {
            id,
            body: body.trim_end().to_string(),
            metadata: DocumentMetadata {
                module: e.module.clone(),
                entity_name: Some(e.name.clone()),
                kind: DocumentKind::Entity,
                source_path: e.source_path.clone(),
                span: e.span,
                title: format!("{} ({})", e.name, e.module),
            },
        },
        parents,
    }
}

fn view_entry(graph: &ViewGraph<'_>, idx: usize, id: String) -> IndexEntry {
    let v = graph.view(idx);
    let mut body = String::new();
    let _ = writeln!(body, "View: {}", v.name);
    let _ = writeln!(body, "Module: {}", v.module);
    let _ = writeln!(body, "Declared in: {}", v.source_path);
    if let Some(title) = &v.title {
        let _ = writeln!(body, "Title: {title}");
    }
    if let Some(model) = &v.model {
        let _ = writeln!(body, "Model: {model}");
    }
    if let Some(view_type) = &v.view_type {
        let _ = writeln!(body, "Type: {view_type}");
    }

    let chain = graph.chain(idx);
    let mut shown: Vec<String> = chain
        .iter()
        .map(|&n| {
            let a = graph.view(n);
            format!("{} [{}]", a.name, a.module)
        })
        .collect();
    let root_missing = chain
        .first()
        .and_then(|&root| graph.view(root).inherit.clone());
    if let Some(missing) = &root_missing {
        shown.insert(0, format!("{missing} (not indexed)"));
    }

    let mut parents = Vec::new();
    if let Some(inherit) = &v.inherit {
        let parent = graph.parent(idx).map(|p| graph.view(p));
        match parent {
            Some(p) => {
                let _ = writeln!(body, "Inherits: {} [{}]", p.name, p.module);
            }
            None => {
                let _ = writeln!(body, "Inherits: {inherit} (not indexed)");
            }
        }
        parents.push(ParentEdge {
            name: inherit.clone(),
            module: parent.map(|p| p.module.clone()),
            kind: InheritKind::View,
        });
    }
    if shown.len() > 1 {
        let _ = writeln!(body, "Inheritance chain: {}", shown.join(" -> "));
    }
    if !v.fields.is_empty() {
        let _ = writeln!(body, "Fields: {}", v.fields.join(", "));
    }

    let patched: Vec<&ViewRecord> = chain
        .iter()
        .map(|&n| graph.view(n))
        .filter(|a| !a.patches.is_empty())
        .collect();
    if !patched.is_empty() {
        let _ = writeln!(body, "Patches (root first):");
        for a in patched {
            for p in &a.patches {
                let _ = write!(
                    body,
                    "- {}: {} {}",
                    a.name,
                    p.action.describe(),
                    p.anchor
                );
                if !p.fields.is_empty() {
                    let _ = write!(body, " with fields {}", p.fields.join(", "));
                }
                if !p.attributes.is_empty() {
                    let _ = write!(body, " ({})", p.attributes.join(", "));
                }
                body.push('\n');
            }
        }
    }

    IndexEntry {
        document: Document {
            id,
            body: body.trim_end().to_string(),
            metadata: DocumentMetadata {
                module: v.module.clone(),
                entity_name: Some(v.name.clone()),
                kind: DocumentKind::View,
                source_path: v.source_path.clone(),
                span: v.span,
                title: v.title.clone().unwrap_or_else(|| v.name.clone()),
            },
        },
        parents,
    }
}

fn script_entry(f: &ScriptFragment, id: String) -> IndexEntry {
    let mut body = String::new();
    let _ = writeln!(body, "Script: {}", f.name);
    let _ = writeln!(body, "Module: {}", f.module);
    let _ = writeln!(body, "Declared in: {}", f.source_path);
    if !f.doc.is_empty() {
        let _ = writeln!(body, "Summary: {}", f.doc.replace('\n', " "));
    }
    body.push('\n');
    body.push_str(&f.text);

    IndexEntry {
        document: Document {
            id,
            body: body.trim_end().to_string(),
            metadata: DocumentMetadata {
                module: f.module.clone(),
                entity_name: None,
                kind: DocumentKind::Script,
                source_path: f.source_path.clone(),
                span: f.span,
                title: format!("{}::{}", f.source_path, f.name),
            },
        },
        parents: Vec::new(),
    }
}

fn manifest_entry(module: &Module, facts: &ExtractedFacts, id: String) -> IndexEntry {
    let m = &module.manifest;
    let mut body = String::new();
    let _ = writeln!(body, "Module: {}", module.name);
    if let Some(title) = &m.title {
        let _ = writeln!(body, "Title: {title}");
    }
    if let Some(version) = &m.version {
        let _ = writeln!(body, "Version: {version}");
    }
    if let Some(category) = &m.category {
        let _ = writeln!(body, "Category: {category}");
    }
    if let Some(summary) = &m.summary {
        let _ = writeln!(body, "Summary: {summary}");
    }
    if !m.depends.is_empty() {
        let _ = writeln!(body, "Depends on: {}", m.depends.join(", "));
    }
    if !m.data.is_empty() {
        let _ = writeln!(body, "Data files: {}", m.data.join(", "));
    }
    let mut entities: Vec<&str> = facts
        .entities
        .iter()
        .filter(|e| e.module == module.name)
        .map(|e| e.name.as_str())
        .collect();
    entities.sort_unstable();
    entities.dedup();
    if !entities.is_empty() {
        let _ = writeln!(body, "Entities: {}", entities.join(", "));
    }
    let mut views: Vec<&str> = facts
        .views
        .iter()
        .filter(|v| v.module == module.name)
        .map(|v| v.name.as_str())
        .collect();
    views.sort_unstable();
    views.dedup();
    if !views.is_empty() {
        let _ = writeln!(body, "Views: {}", views.join(", "));
    }

    IndexEntry {
        document: Document {
            id,
            body: body.trim_end().to_string(),
            metadata: DocumentMetadata {
                module: module.name.clone(),
                entity_name: None,
                kind: DocumentKind::Manifest,
                source_path: m.source_path.clone(),
                span: Span::new(1, 1),
                title: m
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("{} manifest", module.name)),
            },
        },
        parents: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{model, view};
    use crate::models::Manifest;
    use std::path::PathBuf;

    fn module(name: &str, depends: &[&str]) -> Module {
        Module {
            name: name.into(),
            path: PathBuf::from(name),
            manifest: Manifest {
                title: Some(name.to_uppercase()),
                depends: depends.iter().map(|d| d.to_string()).collect(),
                source_path: format!("{name}/__manifest__.py"),
                ..Manifest::default()
            },
        }
    }

    fn partner_facts() -> ExtractedFacts {
        let base_src = "class Partner(models.Model):\n    _name = 'res.partner'\n    name = fields.Char()\n    email = fields.Char()\n";
        let ext_src = "class Partner(models.Model):\n    _inherit = 'res.partner'\n    x_loyalty = fields.Integer()\n";
        let (mut entities, _) = model::extract_entities("base", "base/models/res_partner.py", base_src);
        let (ext, _) = model::extract_entities("crm_ext", "crm_ext/models/partner.py", ext_src);
        entities.extend(ext);
        ExtractedFacts {
            modules: vec![module("base", &[]), module("crm_ext", &["base"])],
            entities,
            views: vec![],
            fragments: vec![],
        }
    }

    #[test]
    fn build_is_deterministic() {
        let facts = partner_facts();
        let first = build_documents(&facts);
        let mut reversed = facts.clone();
        reversed.entities.reverse();
        reversed.modules.reverse();
        let second = build_documents(&reversed);
        assert_eq!(first.entries, second.entries);
        let ids: Vec<&str> = first.entries.iter().map(|e| e.document.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn extension_document_lists_effective_fields() {
        let out = build_documents(&partner_facts());
        let ext = out
            .entries
            .iter()
            .find(|e| e.document.metadata.module == "crm_ext" && e.document.metadata.kind == DocumentKind::Entity)
            .expect("extension entity document");
        let body = &ext.document.body;
        assert!(body.contains("Entity: res.partner"));
        assert!(body.contains("Extends: res.partner [base]"));
        assert!(body.contains("- name (char) from base"));
        assert!(body.contains("- email (char) from base"));
        assert!(body.contains("- x_loyalty (integer) from crm_ext"));
        assert_eq!(
            ext.parents,
            vec![ParentEdge {
                name: "res.partner".into(),
                module: Some("base".into()),
                kind: InheritKind::Extension,
            }]
        );
        assert_eq!(out.entries.len(), 4);
    }

    #[test]
    fn view_document_orders_patches_root_first() {
        let mid = r#"<odoo><record id="form_mid" model="ir.ui.view">
<field name="inherit_id" ref="sale.form_base"/>
<field name="arch" type="xml"><field name="a" position="after"><field name="mid_field"/></field></field>
</record></odoo>"#;
        let leaf = r#"<odoo><record id="form_leaf" model="ir.ui.view">
<field name="inherit_id" ref="mid.form_mid"/>
<field name="arch" type="xml"><field name="mid_field" position="replace"/></field>
</record></odoo>"#;
        let base = r#"<odoo><record id="form_base" model="ir.ui.view">
<field name="model">sale.order</field>
<field name="arch" type="xml"><form><field name="a"/></form></field>
</record></odoo>"#;
        let mut views = Vec::new();
        views.extend(view::extract_views("leaf", "leaf/views/v.xml", leaf).0);
        views.extend(view::extract_views("sale", "sale/views/v.xml", base).0);
        views.extend(view::extract_views("mid", "mid/views/v.xml", mid).0);
        let facts = ExtractedFacts {
            modules: vec![
                module("sale", &[]),
                module("mid", &["sale"]),
                module("leaf", &["mid"]),
            ],
            views,
            ..ExtractedFacts::default()
        };
        let out = build_documents(&facts);
        let leaf_doc = out
            .entries
            .iter()
            .find(|e| e.document.metadata.entity_name.as_deref() == Some("leaf.form_leaf"))
            .expect("leaf view document");
        let body = &leaf_doc.document.body;
        assert!(body.contains(
            "Inheritance chain: sale.form_base [sale] -> mid.form_mid [mid] -> leaf.form_leaf [leaf]"
        ));
        let mid_pos = body.find("- mid.form_mid").expect("mid patch");
        let leaf_pos = body.find("- leaf.form_leaf").expect("leaf patch");
        assert!(mid_pos < leaf_pos);
        assert!(body.contains("remove field[@name='mid_field']"));
    }

    #[test]
    fn missing_parent_is_marked_not_indexed() {
        let src = "class Order(models.Model):\n    _name = 'sale.order'\n    _inherit = ['mail.thread']\n";
        let (entities, _) = model::extract_entities("sale", "sale/models/sale.py", src);
        let facts = ExtractedFacts {
            modules: vec![module("sale", &[])],
            entities,
            ..ExtractedFacts::default()
        };
        let out = build_documents(&facts);
        let doc = out
            .entries
            .iter()
            .find(|e| e.document.metadata.kind == DocumentKind::Entity)
            .expect("entity document");
        assert!(doc.document.body.contains("Extends: mail.thread (not indexed)"));
        assert_eq!(doc.parents[0].module, None);
    }

    #[test]
    fn content_hash_ignores_span() {
        let out = build_documents(&partner_facts());
        let mut entry = out.entries[0].clone();
        let before = content_hash(&entry);
        entry.document.metadata.span = Span::new(40, 50);
        assert_eq!(before, content_hash(&entry));
        entry.document.body.push_str("\nMethods: action_confirm");
        assert_ne!(before, content_hash(&entry));
    }

    fn hashes_by_id(out: &BuildOutput) -> HashMap<String, (String, String)> {
        out.entries
            .iter()
            .map(|e| {
                let name = e.document.metadata.entity_name.clone().unwrap_or_default();
                let label = format!("{}:{}:{}", e.document.metadata.kind.as_str(), e.document.metadata.module, name);
                (e.document.id.clone(), (label, content_hash(e)))
            })
            .collect()
    }

    #[test]
    fn growing_a_class_leaves_later_classes_in_the_file_unchanged() {
        let before_src = "class A(models.Model):\n    _name = 'x.a'\n    f1 = fields.Char()\n\n\nclass B(models.Model):\n    _name = 'x.b'\n    g1 = fields.Char()\n";
        let after_src = "class A(models.Model):\n    _name = 'x.a'\n    f1 = fields.Char()\n    f2 = fields.Char()\n\n\nclass B(models.Model):\n    _name = 'x.b'\n    g1 = fields.Char()\n";
        let facts = |src: &str| ExtractedFacts {
            modules: vec![module("base", &[])],
            entities: model::extract_entities("base", "base/models/m.py", src).0,
            ..ExtractedFacts::default()
        };
        let before = build_documents(&facts(before_src));
        let after = build_documents(&facts(after_src));

        let find = |out: &BuildOutput, name: &str| {
            out.entries
                .iter()
                .find(|e| e.document.metadata.entity_name.as_deref() == Some(name))
                .cloned()
                .expect("entity document")
        };
        let (b1, b2) = (find(&before, "x.b"), find(&after, "x.b"));
        assert_eq!(b1.document.id, b2.document.id);
        assert_ne!(b1.document.metadata.span, b2.document.metadata.span);
        assert_eq!(b1.document.body, b2.document.body);
        assert_eq!(content_hash(&b1), content_hash(&b2));

        let (a1, a2) = (find(&before, "x.a"), find(&after, "x.a"));
        assert_eq!(a1.document.id, a2.document.id);
        assert_ne!(content_hash(&a1), content_hash(&a2));
    }

    #[test]
    fn adding_a_field_changes_only_the_entity_and_its_descendants() {
        let base_before = "class Partner(models.Model):\n    _name = 'res.partner'\n    name = fields.Char()\n\n\nclass Bank(models.Model):\n    _name = 'res.bank'\n    bic = fields.Char()\n";
        let base_after = "class Partner(models.Model):\n    _name = 'res.partner'\n    name = fields.Char()\n    phone = fields.Char()\n\n\nclass Bank(models.Model):\n    _name = 'res.bank'\n    bic = fields.Char()\n";
        let ext_src = "class Partner(models.Model):\n    _inherit = 'res.partner'\n    x_loyalty = fields.Integer()\n";
        let lead_src = "class Lead(models.Model):\n    _name = 'crm.lead'\n    partner_id = fields.Many2one('res.partner')\n";
        let views = r#"<odoo><record id="partner_form" model="ir.ui.view">
<field name="model">res.partner</field>
<field name="arch" type="xml"><form><field name="name"/></form></field>
</record></odoo>"#;
        let facts = |base_src: &str| {
            let mut entities = model::extract_entities("base", "base/models/res_partner.py", base_src).0;
            entities.extend(model::extract_entities("crm_ext", "crm_ext/models/partner.py", ext_src).0);
            entities.extend(model::extract_entities("crm_ext", "crm_ext/models/lead.py", lead_src).0);
            ExtractedFacts {
                modules: vec![module("base", &[]), module("crm_ext", &["base"])],
                entities,
                views: view::extract_views("base", "base/views/partner.xml", views).0,
                fragments: vec![],
            }
        };
        let before = hashes_by_id(&build_documents(&facts(base_before)));
        let after = hashes_by_id(&build_documents(&facts(base_after)));

        let mut before_ids: Vec<&String> = before.keys().collect();
        let mut after_ids: Vec<&String> = after.keys().collect();
        before_ids.sort();
        after_ids.sort();
        assert_eq!(before_ids, after_ids);

        let mut changed: Vec<&str> = before
            .iter()
            .filter(|(id, (_, hash))| after[*id].1 != *hash)
            .map(|(_, (label, _))| label.as_str())
            .collect();
        changed.sort_unstable();
        assert_eq!(
            changed,
            vec!["entity:base:res.partner", "entity:crm_ext:res.partner"]
        );
    }
}
