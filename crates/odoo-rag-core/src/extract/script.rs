//! Script extractor: splits auxiliary Python and JavaScript files into
//! named top-level fragments with their leading comments.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ExtractionError;
use crate::models::{ScriptFragment, Span};

/// Longest fragment text kept verbatim; longer declarations are truncated.
pub const MAX_FRAGMENT_LINES: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    JavaScript,
}

fn py_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?:async\s+)?def\s+(\w+)|class\s+(\w+)|(\w+)\s*(?::[^=]*)?=[^=])")
            .expect("valid regex")
    })
}

fn js_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(?:export\s+(?:default\s+)?)?(?:(?:async\s+)?function\s*\*?\s*(\w+)|class\s+(\w+)|(?:const|let|var)\s+(\w+)\s*=|odoo\.define\(\s*['"]([^'"]+)['"])"#,
        )
        .expect("valid regex")
    })
}

/// Extract named top-level declarations from a `.py` or `.js` file.
pub fn extract_fragments(
    module: &str,
    source_path: &str,
    content: &str,
) -> (Vec<ScriptFragment>, Vec<ExtractionError>) {
    let language = if source_path.to_ascii_lowercase().ends_with(".js") {
        Language::JavaScript
    } else {
        Language::Python
    };
    let lines: Vec<&str> = content.lines().collect();
    let mut diagnostics = Vec::new();

    // (declaration name, first line of its leading block, declaration line)
    let mut starts: Vec<(String, usize, usize)> = Vec::new();
    let mut in_block_comment = false;
    for (idx, line) in lines.iter().enumerate() {
        if language == Language::JavaScript {
            if in_block_comment {
                if line.contains("*/") {
                    in_block_comment = false;
                }
                continue;
            }
            if line.trim_start().starts_with("/*") && !line.contains("*/") {
                in_block_comment = true;
                continue;
            }
        }
        if line.starts_with(char::is_whitespace) {
            continue;
        }
        match declaration_name(language, line) {
            Some(name) => {
                let lead = leading_block_start(language, &lines, idx);
                starts.push((name, lead, idx));
            }
            None if language == Language::Python
                && (line.starts_with("def ") || line.starts_with("class ")) =>
            {
                diagnostics.push(ExtractionError::malformed(
                    source_path,
                    idx + 1,
                    "declaration without a name",
                ));
            }
            None => {}
        }
    }

    let mut fragments = Vec::with_capacity(starts.len());
    for (i, (name, lead, decl)) in starts.iter().enumerate() {
        let limit = starts.get(i + 1).map_or(lines.len(), |next| next.1);
        let mut end = limit;
        while end > *decl + 1 && lines[end - 1].trim().is_empty() {
            end -= 1;
        }
        let body = &lines[*lead..end];
        let mut text = body
            .iter()
            .take(MAX_FRAGMENT_LINES)
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        if body.len() > MAX_FRAGMENT_LINES {
            text.push_str("\n...");
        }
        let mut doc = comment_text(language, &lines[*lead..*decl]);
        if language == Language::Python {
            if let Some(docstring) = python_docstring(&lines[*decl..end]) {
                if !doc.is_empty() {
                    doc.push('\n');
                }
                doc.push_str(&docstring);
            }
        }
        fragments.push(ScriptFragment {
            name: name.clone(),
            module: module.to_string(),
            doc,
            text,
            source_path: source_path.to_string(),
            span: Span::new(lead + 1, end),
        });
    }

    (fragments, diagnostics)
}

fn declaration_name(language: Language, line: &str) -> Option<String> {
    let caps = match language {
        Language::Python => py_decl_re().captures(line)?,
        Language::JavaScript => js_decl_re().captures(line)?,
    };
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str().to_string())
}

/// First line of the comment/decorator block directly above `decl`.
fn leading_block_start(language: Language, lines: &[&str], decl: usize) -> usize {
    let mut start = decl;
    let mut in_block = false;
    while start > 0 {
        let prev = lines[start - 1].trim_start();
        let attached = match language {
            Language::Python => prev.starts_with('#') || prev.starts_with('@'),
            Language::JavaScript => {
                if in_block {
                    if prev.starts_with("/*") {
                        in_block = false;
                    }
                    true
                } else if prev.ends_with("*/") {
                    in_block = !prev.starts_with("/*");
                    true
                } else {
                    prev.starts_with("//")
                }
            }
        };
        if !attached || prev.is_empty() {
            break;
        }
        start -= 1;
    }
    start
}

fn comment_text(language: Language, lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| language == Language::JavaScript || !l.starts_with('@'))
        .map(|l| {
            l.trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim_start_matches("//")
                .trim_start_matches('#')
                .trim_start_matches('*')
                .trim()
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn python_docstring(lines: &[&str]) -> Option<String> {
    let first = lines.iter().skip(1).find(|l| !l.trim().is_empty())?.trim();
    let quote = ["\"\"\"", "'''"].into_iter().find(|q| first.starts_with(q))?;
    let joined = lines.iter().skip(1).copied().collect::<Vec<_>>().join("\n");
    let open = joined.find(quote)? + quote.len();
    let close = joined[open..].find(quote)? + open;
    let doc = joined[open..close].trim();
    (!doc.is_empty()).then(|| doc.to_string())
}
