//! Prompt templates, one per [`QueryIntent`].
//!
//! A template fixes three things: the order retrieved documents are
//! presented in, the task framing, and the expected answer shape. The
//! active [`Filter`] is always stated so the model knows the intended
//! scope. Empty retrieval never fails; the template's acknowledgment is
//! emitted in place of the context block.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::models::{Filter, QueryIntent};
use crate::retrieval::{Provenance, RetrievedDocument};

const PREAMBLE: &str = "You are an expert on the Odoo ERP codebase. Answer using the structural context documents below, which were extracted from the indexed source tree. If the context does not contain the answer, say so instead of guessing.";

/// Static parts of one intent's template.
struct Template {
    task: &'static str,
    order: &'static str,
    answer_shape: &'static str,
    empty: &'static str,
}

fn template(intent: QueryIntent) -> Template {
    match intent {
        QueryIntent::Definition => Template {
            task: "Explain what the requested entity, view, or script is, what it represents, and where it is declared.",
            order: "in declaration order",
            answer_shape: "Start with a one-sentence definition, then give the declaring module, the source location, and the most important fields or elements.",
            empty: "No declaration matching this question was found in the index. State that clearly, then describe only in general terms what such a declaration usually looks like in Odoo.",
        },
        QueryIntent::FieldInquiry => Template {
            task: "Describe the fields involved in the question.",
            order: "by relevance",
            answer_shape: "Enumerate the fields with their type and the module each field originates from; flag computed, tracked, and relational fields (with their target entity).",
            empty: "No entity documents matching this question were found in the index. State that no field information is available for this scope.",
        },
        QueryIntent::InheritanceInquiry => Template {
            task: "Explain how the declarations in scope inherit from, extend, or patch their ancestors.",
            order: "from the oldest ancestor to the most specific customization",
            answer_shape: "Walk the inheritance chain from the oldest ancestor to the most specific customization, stating for each step what it adds, overrides, or patches and in which module.",
            empty: "No inheritance information matching this question was found in the index. State that the customization could not be located in this scope.",
        },
        QueryIntent::WorkflowInquiry => Template {
            task: "Explain the business process or behavior the question asks about.",
            order: "by relevance",
            answer_shape: "Describe the process as ordered steps, naming the methods, buttons, and state transitions involved and the module that contributes each.",
            empty: "No code matching this process was found in the index. State that the workflow could not be traced in this scope.",
        },
        QueryIntent::Generic => Template {
            task: "Answer the question about the codebase.",
            order: "by relevance",
            answer_shape: "Answer directly and cite the documents you relied on by number.",
            empty: "No relevant documents were found in the index for this question. Say so.",
        },
    }
}

/// A rendered prompt plus the presentation order used.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub text: String,
    pub intent: QueryIntent,
    /// Document ids in the order they appear in `text`.
    pub presented: Vec<String>,
}

/// Render the answer prompt for `question`.
pub fn build_prompt(
    question: &str,
    intent: QueryIntent,
    filter: &Filter,
    documents: &[RetrievedDocument],
) -> Prompt {
    let t = template(intent);
    let order = presentation_order(intent, documents);

    let mut text = String::new();
    let _ = writeln!(text, "{PREAMBLE}\n");
    let _ = writeln!(text, "Task: {}", t.task);
    let _ = writeln!(text, "Scope: {}\n", scope_line(filter));
    if documents.is_empty() {
        let _ = writeln!(text, "Context: none. {}\n", t.empty);
    } else {
        let _ = writeln!(text, "Context documents ({}):\n", t.order);
        write_documents(&mut text, documents, &order);
    }
    let _ = writeln!(text, "Question: {}\n", question.trim());
    let _ = write!(text, "Answer shape: {}", t.answer_shape);

    Prompt {
        text,
        intent,
        presented: order.iter().map(|&i| documents[i].document.id.clone()).collect(),
    }
}

/// Render a prompt asking for a Mermaid sequence diagram of `process`.
pub fn build_diagram_prompt(
    process: &str,
    filter: &Filter,
    documents: &[RetrievedDocument],
) -> Prompt {
    let order = presentation_order(QueryIntent::WorkflowInquiry, documents);
    let mut text = String::new();
    let _ = writeln!(text, "{PREAMBLE}\n");
    let _ = writeln!(
        text,
        "Task: Produce a sequence diagram of the business process \"{}\".",
        process.trim()
    );
    let _ = writeln!(text, "Scope: {}\n", scope_line(filter));
    if documents.is_empty() {
        let _ = writeln!(
            text,
            "Context: none. No code matching this process was found in the index. Produce a diagram only if the process is standard Odoo behavior, and label it as generic.\n"
        );
    } else {
        let _ = writeln!(text, "Context documents (by relevance):\n");
        write_documents(&mut text, documents, &order);
    }
    let _ = write!(
        text,
        "Answer shape: A single Mermaid `sequenceDiagram` block. Participants are users, entities, and modules; messages are method calls, button actions, and state transitions found in the context. Follow the block with at most three sentences of explanation."
    );
    Prompt {
        text,
        intent: QueryIntent::WorkflowInquiry,
        presented: order.iter().map(|&i| documents[i].document.id.clone()).collect(),
    }
}

fn scope_line(filter: &Filter) -> String {
    match (&filter.module, &filter.entity_name) {
        (None, None) => "no filter is active; the whole indexed codebase is in scope.".to_string(),
        (Some(m), None) => format!("the user is asking about module `{m}`."),
        (None, Some(e)) => format!("the user is asking about `{e}`."),
        (Some(m), Some(e)) => format!("the user is asking about `{e}` in module `{m}`."),
    }
}

fn write_documents(text: &mut String, documents: &[RetrievedDocument], order: &[usize]) {
    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(pos, &i)| (documents[i].document.id.as_str(), pos + 1))
        .collect();

    for (pos, &i) in order.iter().enumerate() {
        let r = &documents[i];
        let meta = &r.document.metadata;
        let _ = write!(
            text,
            "[Document {}] Module: {} | Kind: {}",
            pos + 1,
            meta.module,
            meta.kind
        );
        if let Some(name) = &meta.entity_name {
            let _ = write!(text, " | Name: {name}");
        }
        let _ = write!(text, " | Path: {} ({})", meta.source_path, meta.span);
        match &r.provenance {
            Provenance::Direct => {}
            Provenance::Ancestor { of, .. } => match position.get(of.as_str()) {
                Some(n) => {
                    let _ = write!(text, " | Ancestor of Document {n}");
                }
                None => text.push_str(" | Ancestor"),
            },
        }
        let _ = writeln!(text, "\n{}\n", r.document.body);
    }
}

/// Indices into `documents` in the order the intent's template presents them.
pub fn presentation_order(intent: QueryIntent, documents: &[RetrievedDocument]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..documents.len()).collect();
    match intent {
        QueryIntent::Definition => {
            let rank = module_order(documents);
            let module_rank = |i: usize| {
                rank.get(documents[i].document.metadata.module.as_str())
                    .copied()
                    .unwrap_or(usize::MAX)
            };
            order.sort_by(|&a, &b| {
                let ma = &documents[a].document.metadata;
                let mb = &documents[b].document.metadata;
                (module_rank(a), &ma.source_path, ma.span.start_line).cmp(&(
                    module_rank(b),
                    &mb.source_path,
                    mb.span.start_line,
                ))
            })
        }
        QueryIntent::InheritanceInquiry => return ancestors_first(documents),
        QueryIntent::FieldInquiry | QueryIntent::WorkflowInquiry | QueryIntent::Generic => {}
    }
    order
}

/// Load order of the modules in `documents`, as implied by their parent
/// edges: a module extended by another comes first. Unrelated modules keep
/// the rank of their best document.
fn module_order(documents: &[RetrievedDocument]) -> HashMap<&str, usize> {
    let mut modules: Vec<&str> = Vec::new();
    for d in documents {
        let m = d.document.metadata.module.as_str();
        if !modules.contains(&m) {
            modules.push(m);
        }
    }
    let n = modules.len();
    let mut depends: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for d in documents {
        let Some(child) = modules.iter().position(|m| *m == d.document.metadata.module) else {
            continue;
        };
        for edge in &d.parents {
            let parent = edge
                .module
                .as_deref()
                .and_then(|pm| modules.iter().position(|m| *m == pm));
            if let Some(p) = parent.filter(|&p| p != child) {
                depends[child].insert(p);
            }
        }
    }

    let mut placed = vec![false; n];
    let mut rank = HashMap::with_capacity(n);
    while rank.len() < n {
        let next = (0..n)
            .find(|&i| !placed[i] && depends[i].iter().all(|&p| placed[p]))
            .or_else(|| (0..n).find(|&i| !placed[i]));
        let Some(i) = next else { break };
        placed[i] = true;
        rank.insert(modules[i], rank.len());
    }
    rank
}

/// Topological order over parent edges among `documents`; ties keep rank.
fn ancestors_first(documents: &[RetrievedDocument]) -> Vec<usize> {
    let n = documents.len();
    let parents: Vec<Vec<usize>> = documents
        .iter()
        .enumerate()
        .map(|(i, d)| {
            (0..n)
                .filter(|&j| j != i)
                .filter(|&j| d.parents.iter().any(|e| e.points_at(&documents[j].document)))
                .collect()
        })
        .collect();

    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let next = (0..n)
            .find(|&i| !placed[i] && parents[i].iter().all(|&p| placed[p]))
            .or_else(|| (0..n).find(|&i| !placed[i]));
        let Some(i) = next else { break };
        placed[i] = true;
        order.push(i);
    }
    order
}
