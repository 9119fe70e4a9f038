//! Model-definition extractor for Python model classes.
//!
//! A class is a model when one of its bases is `Model`, `TransientModel`, or
//! `AbstractModel` (usually through `models.`). The class body is walked one
//! logical statement at a time: bracket depth and string literals are
//! tracked so multi-line field declarations are read as a whole.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ExtractionError;
use crate::models::{Entity, Field, InheritKind, InheritRef, Span};

const RELATIONAL_TYPES: &[&str] = &["many2one", "one2many", "many2many"];

fn class_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^class\s+(\w+)\s*\(").expect("valid regex"))
}

fn model_base_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:models\.)?(?:Model|TransientModel|AbstractModel)\b").expect("valid regex")
    })
}

fn model_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^class\s+\w+\s*\(([^)]*)\)").expect("valid regex"))
}

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^(\w+)\s*(?::[^=\n]*)?=\s*(.*)$").expect("valid regex"))
}

fn field_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^fields\.(\w+)\s*\((.*)$").expect("valid regex"))
}

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:async\s+)?def\s+(\w+)").expect("valid regex"))
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).expect("valid regex"))
}

fn dict_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"['"]([^'"]+)['"]\s*:\s*['"]([^'"]+)['"]"#).expect("valid regex")
    })
}

fn comodel_kw_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\bcomodel_name\s*=\s*['"]([^'"]+)['"]"#).expect("valid regex"))
}

fn computed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:compute|related)\s*=").expect("valid regex"))
}

fn tracking_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\btracking\s*=\s*([\w'"]+)|\btrack_visibility\s*="#).expect("valid regex")
    })
}

/// Whether `content` declares at least one model class.
pub fn declares_model_class(content: &str) -> bool {
    model_class_re()
        .captures_iter(content)
        .any(|caps| model_base_re().is_match(&caps[1]))
}

/// Extract every model class declared in a Python file.
pub fn extract_entities(
    module: &str,
    source_path: &str,
    content: &str,
) -> (Vec<Entity>, Vec<ExtractionError>) {
    let lines: Vec<&str> = content.lines().collect();
    let mut entities = Vec::new();
    let mut diagnostics = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let Some(caps) = class_header_re().captures(lines[i]) else {
            i += 1;
            continue;
        };
        let class_name = caps[1].to_string();
        let header = match collect_statement(&lines, i) {
            Ok(stmt) => stmt,
            Err(reason) => {
                diagnostics.push(ExtractionError::malformed(source_path, i + 1, reason));
                i += 1;
                continue;
            }
        };
        let bases = header.text.split_once('(').map_or("", |(_, rest)| rest);
        if !model_base_re().is_match(bases) {
            i = header.end + 1;
            continue;
        }

        match read_class(&lines, i, header.end, &class_name, module, source_path) {
            Ok(ClassOutcome::Entity(entity, end)) => {
                i = end + 1;
                entities.push(entity);
            }
            Ok(ClassOutcome::Dynamic(end)) => i = end + 1,
            Err((line, reason)) => {
                diagnostics.push(ExtractionError::malformed(source_path, line, reason));
                i = header.end + 1;
            }
        }
    }

    (entities, diagnostics)
}

enum ClassOutcome {
    Entity(Entity, usize),
    /// The entity name is computed at runtime; nothing can be extracted.
    Dynamic(usize),
}

#[derive(Default)]
struct ClassBody {
    name: Option<String>,
    name_dynamic: bool,
    inherit: Vec<String>,
    inherit_dynamic: bool,
    inherits: Vec<(String, String)>,
    description: Option<String>,
    fields: Vec<Field>,
    methods: Vec<String>,
}

fn read_class(
    lines: &[&str],
    header_start: usize,
    header_end: usize,
    class_name: &str,
    module: &str,
    source_path: &str,
) -> Result<ClassOutcome, (usize, String)> {
    let mut body = ClassBody::default();
    let mut class_indent: Option<usize> = None;
    let mut last = header_end;
    let mut i = header_end + 1;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            i += 1;
            continue;
        }
        let indent = line.len() - trimmed.len();
        if indent == 0 {
            break;
        }
        let stmt = collect_statement(lines, i).map_err(|reason| (i + 1, reason))?;
        let indent_level = *class_indent.get_or_insert(indent);
        if indent == indent_level {
            let text = stmt.text.trim_start();
            if let Some(caps) = def_re().captures(text) {
                body.methods.push(caps[1].to_string());
            } else if let Some(caps) = assignment_re().captures(text) {
                let value = caps[2].trim();
                if !value.starts_with('=') {
                    body.read_assignment(&caps[1], value, i + 1);
                }
            }
        }
        last = stmt.end;
        i = stmt.end + 1;
    }

    if body.name_dynamic {
        return Ok(ClassOutcome::Dynamic(last));
    }
    let name = match (body.name.take(), body.inherit.first()) {
        (Some(name), _) => name,
        (None, Some(first)) => first.clone(),
        (None, None) if body.inherit_dynamic => return Ok(ClassOutcome::Dynamic(last)),
        (None, None) => {
            return Err((
                header_start + 1,
                format!("class {class_name} declares neither _name nor _inherit"),
            ))
        }
    };

    let mut parents: Vec<InheritRef> = body
        .inherit
        .into_iter()
        .map(|parent| InheritRef {
            name: parent,
            kind: InheritKind::Extension,
            via_field: None,
        })
        .collect();
    parents.extend(body.inherits.into_iter().map(|(parent, field)| InheritRef {
        name: parent,
        kind: InheritKind::Delegation,
        via_field: Some(field),
    }));

    Ok(ClassOutcome::Entity(
        Entity {
            name,
            module: module.to_string(),
            class_name: class_name.to_string(),
            description: body.description,
            parents,
            fields: body.fields,
            methods: body.methods,
            source_path: source_path.to_string(),
            span: Span::new(header_start + 1, last + 1),
        },
        last,
    ))
}

impl ClassBody {
    fn read_assignment(&mut self, target: &str, value: &str, line: usize) {
        match target {
            "_name" => match string_literal(value) {
                Some(name) => self.name = Some(name),
                None => self.name_dynamic = true,
            },
            "_inherit" => match string_list(value) {
                Some(names) => self.inherit = names,
                None => self.inherit_dynamic = true,
            },
            "_inherits" => {
                if value.starts_with('{') {
                    self.inherits = dict_pair_re()
                        .captures_iter(value)
                        .map(|c| (c[1].to_string(), c[2].to_string()))
                        .collect();
                }
            }
            "_description" => self.description = string_literal(value),
            _ => {
                if let Some(field) = parse_field(target, value, line) {
                    self.fields.push(field);
                }
            }
        }
    }
}

fn parse_field(name: &str, value: &str, line: usize) -> Option<Field> {
    let caps = field_call_re().captures(value)?;
    let type_tag = caps[1].to_ascii_lowercase();
    let args = caps[2].trim();

    let comodel = if RELATIONAL_TYPES.contains(&type_tag.as_str()) {
        comodel_kw_re()
            .captures(args)
            .map(|c| c[1].to_string())
            .or_else(|| string_literal(args))
    } else {
        None
    };
    let tracked = tracking_re().captures_iter(args).any(|c| {
        c.get(1)
            .map_or(true, |v| v.as_str() != "False" && v.as_str() != "0")
    });

    Some(Field {
        name: name.to_string(),
        type_tag,
        comodel,
        computed: computed_re().is_match(args),
        tracked,
        line,
    })
}

/// Leading string literal of `value`, or `None` when the value is not a literal.
fn string_literal(value: &str) -> Option<String> {
    let value = value.trim_start();
    let value = value.trim_start_matches(['r', 'R', 'u', 'U']);
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let triple: String = std::iter::repeat(quote).take(3).collect();
    if let Some(rest) = value.strip_prefix(triple.as_str()) {
        return rest.find(triple.as_str()).map(|end| rest[..end].to_string());
    }
    let rest = &value[1..];
    let mut escaped = false;
    for (idx, c) in rest.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            c if c == quote && !escaped => return Some(rest[..idx].to_string()),
            _ => escaped = false,
        }
    }
    None
}

/// A string or a list/tuple of strings.
fn string_list(value: &str) -> Option<Vec<String>> {
    if value.starts_with('[') || value.starts_with('(') {
        let items: Vec<String> = quoted_re()
            .captures_iter(value)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
        return Some(items);
    }
    string_literal(value).map(|s| vec![s])
}

pub(crate) struct Statement {
    pub(crate) text: String,
    /// Index of the last line of the statement.
    pub(crate) end: usize,
}

/// Collect one logical Python statement starting at line `start`.
///
/// Fails when a string literal or bracket is still open at end of input.
pub(crate) fn collect_statement(lines: &[&str], start: usize) -> Result<Statement, String> {
    let mut depth: i64 = 0;
    let mut open_string: Option<(char, bool)> = None;
    let mut text = String::new();

    for (idx, line) in lines.iter().enumerate().skip(start) {
        if idx > start {
            text.push('\n');
        }
        text.push_str(line);

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            match open_string {
                Some((quote, triple)) => {
                    if c == '\\' {
                        i += 1;
                    } else if triple {
                        if c == quote && chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                            open_string = None;
                            i += 2;
                        }
                    } else if c == quote {
                        open_string = None;
                    }
                }
                None => match c {
                    '#' => break,
                    '\'' | '"' => {
                        let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                        open_string = Some((c, triple));
                        if triple {
                            i += 2;
                        }
                    }
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' | '}' => {
                        depth -= 1;
                        if depth < 0 {
                            return Err("unbalanced closing bracket".to_string());
                        }
                    }
                    _ => {}
                },
            }
            i += 1;
        }

        if let Some((_, false)) = open_string {
            if !line.trim_end().ends_with('\\') {
                return Err("unterminated string literal".to_string());
            }
        }
        let continued = line.trim_end().ends_with('\\');
        if depth == 0 && open_string.is_none() && !continued {
            return Ok(Statement { text, end: idx });
        }
    }

    Err(match open_string {
        Some(_) => "unterminated string literal".to_string(),
        None => "unbalanced brackets".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALE: &str = r#"from odoo import api, fields, models


class SaleOrder(models.Model):
    _name = 'sale.order'
    _inherit = ['mail.thread', 'mail.activity.mixin']
    _description = "Sales Order"

    name = fields.Char(string='Order Reference', required=True)
    partner_id = fields.Many2one(
        'res.partner',
        string='Customer',
        tracking=1,
    )
    amount_total = fields.Monetary(compute='_compute_amounts', store=True)
    line_ids = fields.One2many(comodel_name='sale.order.line', inverse_name='order_id')

    @api.depends('line_ids')
    def _compute_amounts(self):
        for order in self:
            order.amount_total = sum(order.line_ids.mapped('price'))

    def action_confirm(self):
        return True


class SaleOrderLine(models.Model):
    _name = 'sale.order.line'

    price = fields.Float()
"#;

    #[test]
    fn extracts_entities_fields_and_methods() {
        let (entities, diags) = extract_entities("sale", "sale/models/sale.py", SALE);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(entities.len(), 2);

        let order = &entities[0];
        assert_eq!(order.name, "sale.order");
        assert_eq!(order.class_name, "SaleOrder");
        assert_eq!(order.description.as_deref(), Some("Sales Order"));
        let parents: Vec<&str> = order.parents.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(parents, vec!["mail.thread", "mail.activity.mixin"]);

        let names: Vec<&str> = order.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "partner_id", "amount_total", "line_ids"]);
        let partner = &order.fields[1];
        assert_eq!(partner.type_tag, "many2one");
        assert_eq!(partner.comodel.as_deref(), Some("res.partner"));
        assert!(partner.tracked);
        assert_eq!(partner.line, 10);
        assert!(order.fields[2].computed);
        assert_eq!(order.fields[3].comodel.as_deref(), Some("sale.order.line"));
        assert_eq!(order.fields[0].comodel, None);

        assert_eq!(order.methods, vec!["_compute_amounts", "action_confirm"]);
        assert_eq!(order.span.start_line, 4);
        assert_eq!(entities[1].name, "sale.order.line");
        assert_eq!(entities[1].span.start_line, 27);
    }

    #[test]
    fn inherit_without_name_extends_in_place() {
        let src = "class ResPartner(models.Model):\n    _inherit = 'res.partner'\n\n    x_loyalty = fields.Integer(tracking=False)\n";
        let (entities, diags) = extract_entities("crm_ext", "crm_ext/models/partner.py", src);
        assert!(diags.is_empty());
        assert_eq!(entities[0].name, "res.partner");
        assert_eq!(entities[0].parents[0].name, "res.partner");
        assert_eq!(entities[0].parents[0].kind, InheritKind::Extension);
        assert!(!entities[0].fields[0].tracked);
    }

    #[test]
    fn delegation_is_recorded_with_its_field() {
        let src = "class ResUsers(models.Model):\n    _name = 'res.users'\n    _inherits = {'res.partner': 'partner_id'}\n";
        let (entities, _) = extract_entities("base", "base/models/res_users.py", src);
        let parent = &entities[0].parents[0];
        assert_eq!(parent.kind, InheritKind::Delegation);
        assert_eq!(parent.name, "res.partner");
        assert_eq!(parent.via_field.as_deref(), Some("partner_id"));
    }

    #[test]
    fn malformed_class_is_skipped_and_the_rest_extracted() {
        let src = "class Broken(models.Model):\n    _description = 'nothing'\n\nclass Lead(models.Model):\n    _name = 'crm.lead'\n    name = fields.Char()\n";
        let (entities, diags) = extract_entities("crm", "crm/models/crm_lead.py", src);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "crm.lead");
        assert_eq!(diags.len(), 1);
        assert!(matches!(
            &diags[0],
            ExtractionError::MalformedDeclaration { line: 1, .. }
        ));
    }

    #[test]
    fn unterminated_string_is_a_diagnostic() {
        let src = "class Lead(models.Model):\n    _name = 'crm.lead\n    name = fields.Char()\n";
        let (entities, diags) = extract_entities("crm", "crm/models/crm_lead.py", src);
        assert!(entities.is_empty());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn dynamic_names_are_not_extracted() {
        let src = "class Dyn(models.Model):\n    _name = PREFIX + '.dyn'\n";
        let (entities, diags) = extract_entities("x", "x/models/dyn.py", src);
        assert!(entities.is_empty());
        assert!(diags.is_empty());
    }

    #[test]
    fn non_model_classes_are_ignored() {
        let src = "class Helper(object):\n    _name = 'not.a.model'\n";
        assert!(!declares_model_class(src));
        let (entities, diags) = extract_entities("x", "x/helper.py", src);
        assert!(entities.is_empty() && diags.is_empty());
    }

    #[test]
    fn string_literal_forms() {
        assert_eq!(string_literal("'a.b'"), Some("a.b".into()));
        assert_eq!(string_literal("\"\"\"doc\"\"\""), Some("doc".into()));
        assert_eq!(string_literal("u'x'  # c"), Some("x".into()));
        assert_eq!(string_literal("NAME"), None);
    }
}
