//! View-definition extractor for XML data files.
//!
//! Each `<record>` and `<template>` element is located textually and parsed
//! on its own, so one malformed record never hides its neighbours. Only
//! `ir.ui.view` records and QWeb templates become [`ViewRecord`]s.

use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use std::sync::OnceLock;

use super::LineIndex;
use crate::error::ExtractionError;
use crate::models::{PatchAction, PatchOp, Span, ViewRecord};

const VIEW_MODEL: &str = "ir.ui.view";

fn element_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(record|template)\b").expect("valid regex"))
}

/// Minimal element tree for one located segment.
#[derive(Debug, Default)]
struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
    text: String,
    line: usize,
}

impl Node {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn descendant_fields(&self, out: &mut Vec<String>) {
        for child in &self.children {
            if child.tag == "field" {
                if let Some(name) = child.attr("name") {
                    if !out.iter().any(|n| n == name) {
                        out.push(name.to_string());
                    }
                }
            }
            child.descendant_fields(out);
        }
    }
}

/// Extract every view record and template declared in an XML file.
pub fn extract_views(
    module: &str,
    source_path: &str,
    content: &str,
) -> (Vec<ViewRecord>, Vec<ExtractionError>) {
    let text = blank_comments(content);
    let lines = LineIndex::new(&text);
    let mut views = Vec::new();
    let mut diagnostics = Vec::new();

    let mut cursor = 0;
    while let Some(found) = element_start_re().captures_at(&text, cursor) {
        let whole = found.get(0).map_or(cursor..cursor + 1, |m| m.range());
        let start = whole.start;
        let start_line = lines.line_of(start);
        let is_record = &found[1] == "record";

        let Some(end) = segment_end(&text, start, is_record) else {
            diagnostics.push(ExtractionError::malformed(
                source_path,
                start_line,
                format!("unterminated <{}> element", &found[1]),
            ));
            cursor = whole.end;
            continue;
        };
        cursor = end;

        let root = match parse_segment(&text[start..end], start, &lines) {
            Ok(root) => root,
            Err(reason) => {
                diagnostics.push(ExtractionError::malformed(source_path, start_line, reason));
                continue;
            }
        };
        let span = Span::new(start_line, lines.line_of(end.saturating_sub(1)));
        let view = if is_record {
            record_view(&root, module, source_path, span)
        } else {
            template_view(&root, module, source_path, span)
        };
        match view {
            Ok(Some(view)) => views.push(view),
            Ok(None) => {}
            Err(reason) => {
                diagnostics.push(ExtractionError::malformed(source_path, start_line, reason))
            }
        }
    }

    (views, diagnostics)
}

/// Qualify an external id with its module unless it already is.
pub fn qualify(module: &str, id: &str) -> String {
    if id.contains('.') {
        id.to_string()
    } else {
        format!("{module}.{id}")
    }
}

fn record_view(
    root: &Node,
    module: &str,
    source_path: &str,
    span: Span,
) -> Result<Option<ViewRecord>, String> {
    if root.attr("model") != Some(VIEW_MODEL) {
        return Ok(None);
    }
    let id = root
        .attr("id")
        .ok_or_else(|| "view record without id".to_string())?;

    let mut view = ViewRecord {
        name: qualify(module, id),
        module: module.to_string(),
        title: None,
        model: None,
        view_type: None,
        inherit: None,
        patches: Vec::new(),
        fields: Vec::new(),
        source_path: source_path.to_string(),
        span,
    };
    let mut arch: Option<&Node> = None;
    for field in root.children.iter().filter(|c| c.tag == "field") {
        match field.attr("name") {
            Some("name") => view.title = non_empty(&field.text),
            Some("model") => view.model = non_empty(&field.text),
            Some("inherit_id") => {
                view.inherit = field
                    .attr("ref")
                    .or_else(|| non_empty_str(&field.text))
                    .map(|r| qualify(module, r))
            }
            Some("arch") => arch = Some(field),
            _ => {}
        }
    }

    if let Some(arch) = arch {
        if view.inherit.is_some() {
            view.patches = patches(&arch.children);
        } else {
            view.view_type = arch.children.first().map(|n| n.tag.clone());
            arch.descendant_fields(&mut view.fields);
        }
    }
    Ok(Some(view))
}

fn template_view(
    root: &Node,
    module: &str,
    source_path: &str,
    span: Span,
) -> Result<Option<ViewRecord>, String> {
    let id = root
        .attr("id")
        .ok_or_else(|| "template without id".to_string())?;
    let inherit = root.attr("inherit_id").map(|r| qualify(module, r));
    let mut view = ViewRecord {
        name: qualify(module, id),
        module: module.to_string(),
        title: root.attr("name").map(str::to_string),
        model: None,
        view_type: Some("qweb".to_string()),
        patches: Vec::new(),
        fields: Vec::new(),
        inherit,
        source_path: source_path.to_string(),
        span,
    };
    if view.inherit.is_some() {
        view.patches = patches(&root.children);
    } else {
        root.descendant_fields(&mut view.fields);
    }
    Ok(Some(view))
}

fn patches(children: &[Node]) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    for child in children {
        if child.tag == "data" {
            ops.extend(patches(&child.children));
        } else {
            ops.push(patch_op(child));
        }
    }
    ops
}

fn patch_op(node: &Node) -> PatchOp {
    let anchor = if node.tag == "xpath" {
        node.attr("expr").unwrap_or_default().to_string()
    } else {
        shorthand_anchor(node)
    };
    let action = match node.attr("position").unwrap_or("inside") {
        "before" => PatchAction::InsertBefore,
        "after" => PatchAction::InsertAfter,
        "attributes" => PatchAction::Attributes,
        "replace" if node.children.is_empty() && node.text.trim().is_empty() => {
            PatchAction::Remove
        }
        "replace" => PatchAction::Replace,
        _ => PatchAction::InsertInside,
    };
    let mut fields = Vec::new();
    node.descendant_fields(&mut fields);
    let attributes = if action == PatchAction::Attributes {
        node.children
            .iter()
            .filter(|c| c.tag == "attribute")
            .filter_map(|c| c.attr("name").map(str::to_string))
            .collect()
    } else {
        Vec::new()
    };
    PatchOp {
        action,
        anchor,
        fields,
        attributes,
        line: node.line,
    }
}

fn shorthand_anchor(node: &Node) -> String {
    if let Some(name) = node.attr("name") {
        return format!("{}[@name='{}']", node.tag, name);
    }
    match node.attrs.iter().find(|(k, _)| k != "position") {
        Some((k, v)) => format!("{}[@{}='{}']", node.tag, k, v),
        None => node.tag.clone(),
    }
}

fn segment_end(text: &str, start: usize, is_record: bool) -> Option<usize> {
    let (close, tag_end) = if is_record {
        ("</record>", None)
    } else {
        let gt = text[start..].find('>')? + start;
        ("</template>", Some(gt))
    };
    if let Some(gt) = tag_end {
        if text[..gt].ends_with('/') {
            return Some(gt + 1);
        }
    }
    text[start..].find(close).map(|i| start + i + close.len())
}

fn parse_segment(segment: &str, base: usize, lines: &LineIndex) -> Result<Node, String> {
    let mut reader = quick_xml::Reader::from_reader(segment.as_bytes());
    let mut buf = Vec::new();
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        let pos = reader.buffer_position() as usize;
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(node_from(&e, lines.line_of(base + pos))),
            Ok(Event::Empty(e)) => {
                let node = node_from(&e, lines.line_of(base + pos));
                attach(&mut stack, &mut root, node);
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| "unexpected closing tag".to_string())?;
                attach(&mut stack, &mut root, node);
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err("unclosed element".to_string());
    }
    root.ok_or_else(|| "empty element".to_string())
}

fn node_from(e: &BytesStart<'_>, line: usize) -> Node {
    let attrs = e
        .attributes()
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let value = a
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned());
            (key, value)
        })
        .collect();
    Node {
        tag: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        attrs,
        children: Vec::new(),
        text: String::new(),
        line,
    }
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

/// Replace XML comments with spaces, keeping offsets and line breaks intact.
fn blank_comments(content: &str) -> String {
    let mut bytes = content.as_bytes().to_vec();
    let mut from = 0;
    while let Some(open) = content[from..].find("<!--") {
        let start = from + open;
        let end = content[start..]
            .find("-->")
            .map_or(content.len(), |i| start + i + 3);
        for b in &mut bytes[start..end] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
        from = end;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn non_empty(text: &str) -> Option<String> {
    non_empty_str(text).map(str::to_string)
}

fn non_empty_str(text: &str) -> Option<&str> {
    let t = text.trim();
    (!t.is_empty()).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALE_VIEWS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<odoo>
    <!-- <record id="old_form" model="ir.ui.view"></record> -->
    <record id="view_order_form" model="ir.ui.view">
        <field name="name">sale.order.form</field>
        <field name="model">sale.order</field>
        <field name="arch" type="xml">
            <form string="Sales Order">
                <field name="partner_id"/>
                <field name="date_order"/>
            </form>
        </field>
    </record>

    <record id="action_orders" model="ir.actions.act_window">
        <field name="name">Orders</field>
    </record>
</odoo>
"#;

    const CUSTOM_VIEWS: &str = r#"<odoo>
    <record id="view_order_form_custom" model="ir.ui.view">
        <field name="name">sale.order.form.custom</field>
        <field name="model">sale.order</field>
        <field name="inherit_id" ref="sale.view_order_form"/>
        <field name="arch" type="xml">
            <xpath expr="//field[@name='partner_id']" position="after">
                <field name="x_priority"/>
            </xpath>
            <field name="date_order" position="replace"/>
            <field name="partner_id" position="attributes">
                <attribute name="readonly">1</attribute>
            </field>
        </field>
    </record>
    <template id="portal_extra" inherit_id="portal.portal_layout" name="Portal Extra">
        <xpath expr="//div[@id='wrap']" position="inside">
            <span>extra</span>
        </xpath>
    </template>
</odoo>
"#;

    #[test]
    fn extracts_base_view_and_ignores_other_records() {
        let (views, diags) = extract_views("sale", "sale/views/sale_views.xml", SALE_VIEWS);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(views.len(), 1);
        let v = &views[0];
        assert_eq!(v.name, "sale.view_order_form");
        assert_eq!(v.model.as_deref(), Some("sale.order"));
        assert_eq!(v.title.as_deref(), Some("sale.order.form"));
        assert_eq!(v.view_type.as_deref(), Some("form"));
        assert_eq!(v.fields, vec!["partner_id", "date_order"]);
        assert_eq!(v.inherit, None);
        assert_eq!(v.span, Span::new(4, 13));
    }

    #[test]
    fn extracts_patches_in_order() {
        let (views, diags) =
            extract_views("sale_custom", "sale_custom/views/sale.xml", CUSTOM_VIEWS);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(views.len(), 2);

        let v = &views[0];
        assert_eq!(v.name, "sale_custom.view_order_form_custom");
        assert_eq!(v.inherit.as_deref(), Some("sale.view_order_form"));
        let actions: Vec<PatchAction> = v.patches.iter().map(|p| p.action).collect();
        assert_eq!(
            actions,
            vec![
                PatchAction::InsertAfter,
                PatchAction::Remove,
                PatchAction::Attributes
            ]
        );
        assert_eq!(v.patches[0].anchor, "//field[@name='partner_id']");
        assert_eq!(v.patches[0].fields, vec!["x_priority"]);
        assert_eq!(v.patches[0].line, 7);
        assert_eq!(v.patches[1].anchor, "field[@name='date_order']");
        assert_eq!(v.patches[2].attributes, vec!["readonly"]);

        let t = &views[1];
        assert_eq!(t.name, "sale_custom.portal_extra");
        assert_eq!(t.inherit.as_deref(), Some("portal.portal_layout"));
        assert_eq!(t.patches[0].action, PatchAction::InsertInside);
    }

    #[test]
    fn malformed_record_does_not_hide_neighbours() {
        let src = r#"<odoo>
    <record id="broken" model="ir.ui.view">
        <field name="arch" type="xml"><form></field>
    </record>
    <record id="ok_tree" model="ir.ui.view">
        <field name="model">crm.lead</field>
        <field name="arch" type="xml"><tree><field name="name"/></tree></field>
    </record>
</odoo>"#;
        let (views, diags) = extract_views("crm", "crm/views/crm.xml", src);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "crm.ok_tree");
        assert_eq!(views[0].view_type.as_deref(), Some("tree"));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn qualifies_ids() {
        assert_eq!(qualify("sale", "view_x"), "sale.view_x");
        assert_eq!(qualify("sale", "base.view_x"), "base.view_x");
    }
}
