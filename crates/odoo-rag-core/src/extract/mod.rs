//! Structural extractors, one per [`ArtifactKind`].
//!
//! Extraction is pattern-based: declarations are located by keywords and
//! literal assignments, never evaluated. Each extractor fails locally: a
//! malformed declaration is reported in [`Extraction::diagnostics`] and the
//! rest of the file is still extracted.

pub mod model;
pub mod script;
pub mod view;

use crate::error::ExtractionError;
use crate::models::{ArtifactKind, Entity, ScriptFragment, ViewRecord};

/// Facts extracted from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Facts {
    Entities(Vec<Entity>),
    Views(Vec<ViewRecord>),
    Fragments(Vec<ScriptFragment>),
}

impl Facts {
    pub fn len(&self) -> usize {
        match self {
            Facts::Entities(v) => v.len(),
            Facts::Views(v) => v.len(),
            Facts::Fragments(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub facts: Facts,
    pub diagnostics: Vec<ExtractionError>,
}

/// Run the extractor matching `kind` over one file's content.
///
/// `source_path` is the root-relative path recorded on every extracted fact.
pub fn extract(kind: ArtifactKind, module: &str, source_path: &str, content: &str) -> Extraction {
    match kind {
        ArtifactKind::ModelDefinition => {
            let (entities, diagnostics) = model::extract_entities(module, source_path, content);
            Extraction {
                facts: Facts::Entities(entities),
                diagnostics,
            }
        }
        ArtifactKind::ViewDefinition => {
            let (views, diagnostics) = view::extract_views(module, source_path, content);
            Extraction {
                facts: Facts::Views(views),
                diagnostics,
            }
        }
        ArtifactKind::Script => {
            let (fragments, diagnostics) =
                script::extract_fragments(module, source_path, content);
            Extraction {
                facts: Facts::Fragments(fragments),
                diagnostics,
            }
        }
    }
}

/// Classify a file by extension and, for Python, by content.
///
/// Returns `None` for files that carry no retrievable structure.
pub fn classify_file(file_name: &str, content: &str) -> Option<ArtifactKind> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".xml") {
        Some(ArtifactKind::ViewDefinition)
    } else if lower.ends_with(".py") {
        if model::declares_model_class(content) {
            Some(ArtifactKind::ModelDefinition)
        } else {
            Some(ArtifactKind::Script)
        }
    } else if lower.ends_with(".js") {
        Some(ArtifactKind::Script)
    } else {
        None
    }
}

/// Byte-offset to 1-based line number lookup.
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    pub(crate) fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension_and_content() {
        let model_src = "from odoo import models\n\nclass A(models.Model):\n    _name = 'a'\n";
        assert_eq!(
            classify_file("sale.py", model_src),
            Some(ArtifactKind::ModelDefinition)
        );
        assert_eq!(
            classify_file("utils.py", "def helper():\n    pass\n"),
            Some(ArtifactKind::Script)
        );
        assert_eq!(
            classify_file("views.XML", ""),
            Some(ArtifactKind::ViewDefinition)
        );
        assert_eq!(classify_file("widget.js", ""), Some(ArtifactKind::Script));
        assert_eq!(classify_file("style.scss", ""), None);
        assert_eq!(classify_file("access.csv", ""), None);
    }

    #[test]
    fn line_index_maps_offsets() {
        let idx = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(idx.line_of(0), 1);
        assert_eq!(idx.line_of(1), 1);
        assert_eq!(idx.line_of(3), 2);
        assert_eq!(idx.line_of(6), 3);
        assert_eq!(idx.line_of(7), 4);
    }
}
