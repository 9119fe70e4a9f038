//! Module manifest parsing.
//!
//! Manifests are Python dictionary literals. They are read with patterns,
//! never evaluated: only string values and lists of strings are extracted.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::Manifest;

/// File names recognised as module manifests, in lookup order.
pub const MANIFEST_FILES: &[&str] = &["__manifest__.py", "__openerp__.py"];

fn string_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"['"](\w+)['"]\s*:\s*(?:'([^']*)'|"([^"]*)")"#).expect("valid regex")
    })
}

fn list_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)['"](\w+)['"]\s*:\s*\[(.*?)\]"#).expect("valid regex"))
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).expect("valid regex"))
}

/// Parse manifest text. Returns the reason when the text is not a dictionary literal.
pub fn parse_manifest(content: &str, source_path: &str) -> Result<Manifest, String> {
    let body = strip_comments(content);
    let open = body
        .find('{')
        .ok_or_else(|| "no dictionary literal found".to_string())?;
    let close = body
        .rfind('}')
        .ok_or_else(|| "unterminated dictionary literal".to_string())?;
    if close < open {
        return Err("unterminated dictionary literal".to_string());
    }
    let dict = &body[open..=close];

    let mut manifest = Manifest {
        source_path: source_path.to_string(),
        ..Manifest::default()
    };

    for caps in string_key_re().captures_iter(dict) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().trim().to_string());
        let slot = match &caps[1] {
            "name" => &mut manifest.title,
            "version" => &mut manifest.version,
            "summary" => &mut manifest.summary,
            "category" => &mut manifest.category,
            _ => continue,
        };
        if slot.is_none() {
            *slot = value.filter(|v| !v.is_empty());
        }
    }

    for caps in list_key_re().captures_iter(dict) {
        let items: Vec<String> = quoted_re()
            .captures_iter(&caps[2])
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
        match &caps[1] {
            "depends" => manifest.depends = items,
            "data" => manifest.data = items,
            _ => {}
        }
    }

    Ok(manifest)
}

fn strip_comments(content: &str) -> String {
    content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_keys() {
        let src = r#"
# -*- coding: utf-8 -*-
{
    'name': 'Sales',
    'version': '17.0.1.2',
    "summary": "From quotations to invoices",
    'category': 'Sales/Sales',
    'depends': ['base', 'product',
                'account'],
    'data': [
        'security/ir.model.access.csv',
        'views/sale_views.xml',
    ],
    'installable': True,
}
"#;
        let m = parse_manifest(src, "sale/__manifest__.py").unwrap();
        assert_eq!(m.title.as_deref(), Some("Sales"));
        assert_eq!(m.version.as_deref(), Some("17.0.1.2"));
        assert_eq!(m.summary.as_deref(), Some("From quotations to invoices"));
        assert_eq!(m.depends, vec!["base", "product", "account"]);
        assert_eq!(m.data.len(), 2);
        assert_eq!(m.source_path, "sale/__manifest__.py");
    }

    #[test]
    fn empty_dict_is_valid() {
        let m = parse_manifest("{}", "x/__manifest__.py").unwrap();
        assert!(m.depends.is_empty());
        assert!(m.title.is_none());
    }

    #[test]
    fn non_dict_is_malformed() {
        assert!(parse_manifest("print('hello')", "x/__manifest__.py").is_err());
        assert!(parse_manifest("} oops {", "x/__manifest__.py").is_err());
    }
}
