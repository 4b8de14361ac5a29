//! Markup writers for fragments.
//!
//! These functions produce strings so callers can route the markup into
//! whatever sink is current for the fragment being written.

use std::borrow::Cow;

use quick_xml::escape::{escape, partial_escape};

use crate::document::{NodeKind, NodeRef};

/// Markup options shared by every writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Re-escape `&`, `<` and `>` in character data.
    pub rewrite_entities: bool,
    /// Write childless elements as `<a/>`.
    pub close_empty_elements: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            rewrite_entities: true,
            close_empty_elements: false,
        }
    }
}

/// The start tag of an element, or an empty string for any other node.
///
/// With `self_close` the tag is written as an empty element (`<a/>`).
pub fn start_tag(node: NodeRef<'_>, self_close: bool) -> String {
    let Some(element) = node.element() else {
        return String::new();
    };
    let mut out = String::with_capacity(32);
    out.push('<');
    out.push_str(&element.name.qualified());
    for attr in &element.attributes {
        out.push(' ');
        out.push_str(&attr.name.qualified());
        out.push_str("=\"");
        out.push_str(&escape(attr.value.as_str()));
        out.push('"');
    }
    out.push_str(if self_close { "/>" } else { ">" });
    out
}

/// The end tag of an element, or an empty string for any other node.
pub fn end_tag(node: NodeRef<'_>) -> String {
    match node.name() {
        Some(name) => format!("</{}>", name.qualified()),
        None => String::new(),
    }
}

/// Markup for a character-data node (text, CDATA or comment).
pub fn character_data(node: NodeRef<'_>, options: WriteOptions) -> Cow<'_, str> {
    match node.kind() {
        NodeKind::Text(t) if options.rewrite_entities => partial_escape(t.as_str()),
        NodeKind::Text(t) => Cow::Borrowed(t.as_str()),
        NodeKind::CData(t) => Cow::Owned(format!("<![CDATA[{t}]]>")),
        NodeKind::Comment(t) => Cow::Owned(format!("<!--{t}-->")),
        _ => Cow::Borrowed(""),
    }
}

/// Descendant text of `node` without markup, escaped like character data.
pub fn text_content(node: NodeRef<'_>, options: WriteOptions) -> String {
    let text = node.text_content();
    if options.rewrite_entities {
        partial_escape(text.as_str()).into_owned()
    } else {
        text
    }
}

/// Whether an element would be written as a self-closing tag.
pub fn writes_as_empty(node: NodeRef<'_>, options: WriteOptions) -> bool {
    options.close_empty_elements && node.is_element() && !node.has_children()
}

/// Serialize a node and its subtree.
pub fn serialize(node: NodeRef<'_>, options: WriteOptions, out: &mut String) {
    match node.kind() {
        NodeKind::Document => serialize_children(node, options, out),
        NodeKind::Element(_) => {
            if writes_as_empty(node, options) {
                out.push_str(&start_tag(node, true));
            } else {
                out.push_str(&start_tag(node, false));
                serialize_children(node, options, out);
                out.push_str(&end_tag(node));
            }
        }
        _ => out.push_str(&character_data(node, options)),
    }
}

/// Serialize the children of a node without the node's own tags.
pub fn serialize_children(node: NodeRef<'_>, options: WriteOptions, out: &mut String) {
    for child in node.children() {
        serialize(child, options, out);
    }
}

/// Convenience: serialize a subtree with default options.
pub fn to_xml_string(node: NodeRef<'_>) -> String {
    let mut out = String::new();
    serialize(node, WriteOptions::default(), &mut out);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
