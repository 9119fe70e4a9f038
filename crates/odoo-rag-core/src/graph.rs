//! Inheritance graphs over extracted entities and views.
//!
//! Nodes live in an arena ordered by declaration position (module load
//! order, then file, then line). Parent references are resolved to arena
//! indices once, so walking an ancestry never re-resolves names. Cycles are
//! detected up front: a node on or above a cycle is marked broken and never
//! walked.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::ExtractionError;
use crate::models::{Entity, Field, InheritKind, InheritRef, Module, ViewRecord};

/// Topological order of modules by manifest `depends`, ties broken by name.
///
/// Dependencies that are not among `modules` are ignored. Modules caught in
/// a dependency cycle are appended afterwards in name order.
pub fn module_load_order(modules: &[Module]) -> Vec<String> {
    let names: BTreeSet<&str> = modules.iter().map(|m| m.name.as_str()).collect();
    let mut pending: BTreeMap<&str, BTreeSet<&str>> = modules
        .iter()
        .map(|m| {
            let deps = m
                .manifest
                .depends
                .iter()
                .map(String::as_str)
                .filter(|d| names.contains(d) && *d != m.name)
                .collect();
            (m.name.as_str(), deps)
        })
        .collect();

    let mut order = Vec::with_capacity(pending.len());
    loop {
        let ready: Option<&str> = pending
            .iter()
            .find(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name);
        let Some(name) = ready else { break };
        pending.remove(name);
        for deps in pending.values_mut() {
            deps.remove(name);
        }
        order.push(name.to_string());
    }
    order.extend(pending.keys().map(|n| n.to_string()));
    order
}

/// A field as seen on an entity after inheritance is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveField {
    pub field: Field,
    /// Module whose declaration last defined the field.
    pub origin: String,
    /// Module of the declaration this one overrides, if any.
    pub overrides: Option<String>,
}

/// A parent reference after resolution against the arena.
#[derive(Debug, Clone)]
pub struct ResolvedParent<'a> {
    pub reference: &'a InheritRef,
    /// Arena index of the parent, `None` when it was not indexed.
    pub target: Option<usize>,
}

fn module_rank(order: &[String]) -> HashMap<&str, usize> {
    order
        .iter()
        .enumerate()
        .map(|(i, m)| (m.as_str(), i))
        .collect()
}

/// Inheritance graph over entity declarations.
pub struct EntityGraph<'a> {
    nodes: Vec<&'a Entity>,
    parents: Vec<Vec<ResolvedParent<'a>>>,
    broken: Vec<bool>,
}

impl<'a> EntityGraph<'a> {
    /// Build the graph. Returns one [`ExtractionError::InheritanceCycle`] per
    /// broken node.
    pub fn build(entities: &'a [Entity], load_order: &[String]) -> (Self, Vec<ExtractionError>) {
        let rank = module_rank(load_order);
        let mut nodes: Vec<&Entity> = entities.iter().collect();
        nodes.sort_by(|a, b| {
            let ra = rank.get(a.module.as_str()).copied().unwrap_or(usize::MAX);
            let rb = rank.get(b.module.as_str()).copied().unwrap_or(usize::MAX);
            (ra, &a.module, &a.source_path, a.span.start_line).cmp(&(
                rb,
                &b.module,
                &b.source_path,
                b.span.start_line,
            ))
        });

        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, e) in nodes.iter().enumerate() {
            by_name.entry(e.name.as_str()).or_default().push(i);
        }

        let parents: Vec<Vec<ResolvedParent>> = nodes
            .iter()
            .enumerate()
            .map(|(i, e)| {
                e.parents
                    .iter()
                    .map(|r| ResolvedParent {
                        reference: r,
                        target: resolve(&by_name, i, &r.name, r.name == e.name),
                    })
                    .collect()
            })
            .collect();

        let adjacency: Vec<Vec<usize>> = parents
            .iter()
            .map(|ps| {
                ps.iter()
                    .filter(|p| p.reference.kind == InheritKind::Extension)
                    .filter_map(|p| p.target)
                    .collect()
            })
            .collect();
        let cycles = find_cycles(&adjacency);

        let mut diagnostics = Vec::new();
        let broken = cycles
            .iter()
            .enumerate()
            .map(|(i, c)| match c {
                Some(chain) => {
                    let e = nodes[i];
                    diagnostics.push(ExtractionError::InheritanceCycle {
                        name: e.name.clone(),
                        path: e.source_path.clone(),
                        line: e.span.start_line,
                        chain: chain
                            .iter()
                            .map(|&n| format!("{} [{}]", nodes[n].name, nodes[n].module))
                            .collect::<Vec<_>>()
                            .join(" -> "),
                    });
                    true
                }
                None => false,
            })
            .collect();

        (
            Self {
                nodes,
                parents,
                broken,
            },
            diagnostics,
        )
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn entity(&self, idx: usize) -> &'a Entity {
        self.nodes[idx]
    }

    pub fn is_broken(&self, idx: usize) -> bool {
        self.broken[idx]
    }

    pub fn parents(&self, idx: usize) -> &[ResolvedParent<'a>] {
        &self.parents[idx]
    }

    /// Indices of healthy nodes in declaration order.
    pub fn healthy(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&i| !self.broken[i])
    }

    /// Extension ancestry of `idx`, root first and `idx` last.
    ///
    /// Earlier parents come before later ones, so later parents win when
    /// their fields are applied in this order.
    pub fn linearize(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        if !self.broken[idx] {
            self.linearize_into(idx, &mut out);
        }
        out
    }

    fn linearize_into(&self, idx: usize, out: &mut Vec<usize>) {
        if out.contains(&idx) {
            return;
        }
        for p in &self.parents[idx] {
            if p.reference.kind != InheritKind::Extension {
                continue;
            }
            if let Some(t) = p.target {
                self.linearize_into(t, out);
            }
        }
        out.push(idx);
    }

    /// Fields visible on `idx` after applying its extension ancestry.
    ///
    /// Fields keep the position of their first declaration; a redeclaration
    /// replaces the definition and takes over the origin.
    pub fn effective_fields(&self, idx: usize) -> Vec<EffectiveField> {
        let mut out: Vec<EffectiveField> = Vec::new();
        for n in self.linearize(idx) {
            let e = self.nodes[n];
            for f in &e.fields {
                match out.iter_mut().find(|ef| ef.field.name == f.name) {
                    Some(existing) => {
                        let previous = std::mem::replace(&mut existing.origin, e.module.clone());
                        existing.overrides = Some(previous);
                        existing.field = f.clone();
                    }
                    None => out.push(EffectiveField {
                        field: f.clone(),
                        origin: e.module.clone(),
                        overrides: None,
                    }),
                }
            }
        }
        out
    }
}

/// Resolve a parent name from node `from`.
///
/// Prefers the latest declaration preceding `from`. An in-place extension
/// with no earlier declaration points at an external parent.
fn resolve(
    by_name: &HashMap<&str, Vec<usize>>,
    from: usize,
    name: &str,
    same_name: bool,
) -> Option<usize> {
    let candidates = by_name.get(name)?;
    if let Some(&before) = candidates.iter().rev().find(|&&c| c < from) {
        return Some(before);
    }
    if same_name {
        return None;
    }
    candidates.iter().rev().find(|&&c| c != from).copied()
}

/// Inheritance graph over view records, keyed by qualified external id.
pub struct ViewGraph<'a> {
    nodes: Vec<&'a ViewRecord>,
    parent: Vec<Option<usize>>,
    broken: Vec<bool>,
}

impl<'a> ViewGraph<'a> {
    pub fn build(views: &'a [ViewRecord], load_order: &[String]) -> (Self, Vec<ExtractionError>) {
        let rank = module_rank(load_order);
        let mut nodes: Vec<&ViewRecord> = views.iter().collect();
        nodes.sort_by(|a, b| {
            let ra = rank.get(a.module.as_str()).copied().unwrap_or(usize::MAX);
            let rb = rank.get(b.module.as_str()).copied().unwrap_or(usize::MAX);
            (ra, &a.module, &a.source_path, a.span.start_line).cmp(&(
                rb,
                &b.module,
                &b.source_path,
                b.span.start_line,
            ))
        });

        // A later record with the same id overrides the earlier one.
        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (i, v) in nodes.iter().enumerate() {
            by_name.insert(v.name.as_str(), i);
        }
        let parent: Vec<Option<usize>> = nodes
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.inherit
                    .as_deref()
                    .and_then(|p| by_name.get(p).copied())
                    .filter(|&p| p != i)
            })
            .collect();

        let adjacency: Vec<Vec<usize>> = parent.iter().map(|p| p.iter().copied().collect()).collect();
        let mut diagnostics = Vec::new();
        let broken = find_cycles(&adjacency)
            .into_iter()
            .enumerate()
            .map(|(i, c)| match c {
                Some(chain) => {
                    let v = nodes[i];
                    diagnostics.push(ExtractionError::InheritanceCycle {
                        name: v.name.clone(),
                        path: v.source_path.clone(),
                        line: v.span.start_line,
                        chain: chain
                            .iter()
                            .map(|&n| nodes[n].name.clone())
                            .collect::<Vec<_>>()
                            .join(" -> "),
                    });
                    true
                }
                None => false,
            })
            .collect();

        (
            Self {
                nodes,
                parent,
                broken,
            },
            diagnostics,
        )
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn view(&self, idx: usize) -> &'a ViewRecord {
        self.nodes[idx]
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.parent[idx]
    }

    pub fn is_broken(&self, idx: usize) -> bool {
        self.broken[idx]
    }

    pub fn healthy(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&i| !self.broken[i])
    }

    /// Indexed ancestry of `idx`, root first and `idx` last.
    pub fn chain(&self, idx: usize) -> Vec<usize> {
        if self.broken[idx] {
            return Vec::new();
        }
        let mut chain = vec![idx];
        let mut cur = idx;
        while let Some(p) = self.parent[cur] {
            chain.push(p);
            cur = p;
        }
        chain.reverse();
        chain
    }
}

/// For every node, the cycle it reaches through `adjacency`, if any.
///
/// Nodes that only lead into a cycle report the cycle they reach.
fn find_cycles(adjacency: &[Vec<usize>]) -> Vec<Option<Vec<usize>>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn visit(
        node: usize,
        adjacency: &[Vec<usize>],
        color: &mut [Color],
        stack: &mut Vec<usize>,
        result: &mut [Option<Vec<usize>>],
    ) {
        color[node] = Color::Gray;
        stack.push(node);
        for &next in &adjacency[node] {
            match color[next] {
                Color::Gray => {
                    if result[node].is_none() {
                        let from = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle = stack[from..].to_vec();
                        cycle.push(next);
                        result[node] = Some(cycle);
                    }
                }
                Color::White => {
                    visit(next, adjacency, color, stack, result);
                    if result[node].is_none() {
                        result[node] = result[next].clone();
                    }
                }
                Color::Black => {
                    if result[node].is_none() {
                        result[node] = result[next].clone();
                    }
                }
            }
        }
        stack.pop();
        color[node] = Color::Black;
    }

    let mut color = vec![Color::White; adjacency.len()];
    let mut result = vec![None; adjacency.len()];
    let mut stack = Vec::new();
    for node in 0..adjacency.len() {
        if color[node] == Color::White {
            visit(node, adjacency, &mut color, &mut stack, &mut result);
        }
    }
    // Members of a cycle discovered late may not have seen it yet.
    for node in 0..adjacency.len() {
        if result[node].is_none() {
            if let Some(c) = adjacency[node].iter().find_map(|&n| result[n].clone()) {
                result[node] = Some(c);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Manifest, Span};
    use std::path::PathBuf;

    fn module(name: &str, depends: &[&str]) -> Module {
        Module {
            name: name.into(),
            path: PathBuf::from(name),
            manifest: Manifest {
                depends: depends.iter().map(|d| d.to_string()).collect(),
                ..Manifest::default()
            },
        }
    }

    fn field(name: &str, type_tag: &str) -> Field {
        Field {
            name: name.into(),
            type_tag: type_tag.into(),
            comodel: None,
            computed: false,
            tracked: false,
            line: 1,
        }
    }

    fn entity(name: &str, module: &str, inherit: &[&str], fields: Vec<Field>) -> Entity {
        Entity {
            name: name.into(),
            module: module.into(),
            class_name: "C".into(),
            description: None,
            parents: inherit
                .iter()
                .map(|p| InheritRef {
                    name: p.to_string(),
                    kind: InheritKind::Extension,
                    via_field: None,
                })
                .collect(),
            fields,
            methods: vec![],
            source_path: format!("{module}/models/x.py"),
            span: Span::new(1, 10),
        }
    }

    #[test]
    fn load_order_follows_depends_then_name() {
        let mods = vec![
            module("sale_custom", &["sale"]),
            module("sale", &["base"]),
            module("base", &[]),
            module("crm", &["base", "missing"]),
        ];
        assert_eq!(
            module_load_order(&mods),
            vec!["base", "crm", "sale", "sale_custom"]
        );
    }

    #[test]
    fn effective_fields_merge_in_place_extension() {
        let order = vec!["base".to_string(), "custom".to_string()];
        let entities = vec![
            entity(
                "res.partner",
                "custom",
                &["res.partner"],
                vec![field("x_loyalty", "integer"), field("email", "text")],
            ),
            entity(
                "res.partner",
                "base",
                &[],
                vec![field("name", "char"), field("email", "char")],
            ),
        ];
        let (graph, diags) = EntityGraph::build(&entities, &order);
        assert!(diags.is_empty());
        assert_eq!(graph.entity(0).module, "base");

        let fields = graph.effective_fields(1);
        let summary: Vec<(&str, &str, &str)> = fields
            .iter()
            .map(|f| (f.field.name.as_str(), f.field.type_tag.as_str(), f.origin.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("name", "char", "base"),
                ("email", "text", "custom"),
                ("x_loyalty", "integer", "custom"),
            ]
        );
        assert_eq!(fields[1].overrides.as_deref(), Some("base"));
        assert_eq!(graph.effective_fields(0).len(), 2);
    }

    #[test]
    fn later_parents_override_earlier() {
        let order = vec!["m".to_string()];
        let mut a = entity("a", "m", &[], vec![field("f", "char")]);
        a.span = Span::new(1, 2);
        let mut b = entity("b", "m", &[], vec![field("f", "text")]);
        b.span = Span::new(3, 4);
        let mut c = entity("c", "m", &["a", "b"], vec![]);
        c.span = Span::new(5, 6);
        let entities = vec![a, b, c];
        let (graph, _) = EntityGraph::build(&entities, &order);
        let fields = graph.effective_fields(2);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field.type_tag, "text");
    }

    #[test]
    fn cycles_are_detected_and_skipped() {
        let order = vec!["m".to_string()];
        let mut a = entity("a", "m", &["b"], vec![]);
        a.span = Span::new(1, 2);
        let mut b = entity("b", "m", &["a"], vec![]);
        b.span = Span::new(3, 4);
        let mut c = entity("c", "m", &[], vec![field("x", "char")]);
        c.span = Span::new(5, 6);
        let entities = vec![a, b, c];
        let (graph, diags) = EntityGraph::build(&entities, &order);
        assert_eq!(diags.len(), 2);
        assert!(graph.is_broken(0) && graph.is_broken(1));
        assert!(!graph.is_broken(2));
        assert!(graph.linearize(0).is_empty());
        assert_eq!(graph.healthy().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn view_chain_is_root_first() {
        let view = |name: &str, module: &str, inherit: Option<&str>| ViewRecord {
            name: name.into(),
            module: module.into(),
            title: None,
            model: Some("sale.order".into()),
            view_type: None,
            inherit: inherit.map(str::to_string),
            patches: vec![],
            fields: vec![],
            source_path: format!("{module}/views/v.xml"),
            span: Span::new(1, 5),
        };
        let views = vec![
            view("c.form", "c", Some("b.form")),
            view("a.form", "a", None),
            view("b.form", "b", Some("a.form")),
        ];
        let order = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let (graph, diags) = ViewGraph::build(&views, &order);
        assert!(diags.is_empty());
        let names: Vec<&str> = graph
            .chain(2)
            .into_iter()
            .map(|i| graph.view(i).name.as_str())
            .collect();
        assert_eq!(names, vec!["a.form", "b.form", "c.form"]);
    }
}
