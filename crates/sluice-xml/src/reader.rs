//! XML reader: drives quick-xml events into a [`Document`].

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;

use sluice_types::{Result, SluiceError};

use crate::document::{Attribute, Document, NodeId, QName};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Parse an XML string into a [`Document`].
///
/// Whitespace text is preserved. Namespace prefixes are resolved against the
/// in-scope `xmlns` declarations; an unbound element prefix is a parse error.
pub fn parse(source: &str) -> Result<Document> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut doc = Document::new();
    let mut open: Vec<NodeId> = vec![doc.root_id()];
    let mut scopes: Vec<HashMap<String, String>> = vec![HashMap::new()];

    loop {
        let pos = reader.buffer_position();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_error(pos, e))?;
        let parent = *open.last().unwrap_or(&doc.root_id());
        match event {
            XmlEvent::Start(e) => {
                let (name, attributes, scope) = read_element(&e, &scopes, pos)?;
                let id = doc.append_element(parent, name, attributes);
                open.push(id);
                scopes.push(scope);
            }
            XmlEvent::Empty(e) => {
                let (name, attributes, _) = read_element(&e, &scopes, pos)?;
                doc.append_element(parent, name, attributes);
            }
            XmlEvent::Text(e) => {
                let text = e.unescape().map_err(|e| xml_error(pos, e))?;
                if open.len() > 1 || !text.trim().is_empty() {
                    doc.append_text(parent, text.into_owned());
                }
            }
            XmlEvent::CData(e) => {
                doc.append_cdata(parent, String::from_utf8_lossy(&e).into_owned());
            }
            XmlEvent::Comment(e) => {
                doc.append_comment(parent, String::from_utf8_lossy(&e).into_owned());
            }
            XmlEvent::End(_) => {
                if open.len() <= 1 {
                    return Err(xml_error(pos, "unexpected closing tag"));
                }
                open.pop();
                scopes.pop();
            }
            XmlEvent::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    if open.len() > 1 {
        return Err(xml_error(
            reader.buffer_position(),
            "unexpected end of input: unclosed element",
        ));
    }
    tracing::trace!(nodes = doc.len(), "parsed document");
    Ok(doc)
}

type ElementParts = (QName, Vec<Attribute>, HashMap<String, String>);

fn read_element(
    e: &BytesStart<'_>,
    scopes: &[HashMap<String, String>],
    pos: u64,
) -> Result<ElementParts> {
    let mut raw = Vec::new();
    let mut scope = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| xml_error(pos, e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| xml_error(pos, e))?
            .into_owned();
        if key == "xmlns" {
            scope.insert(String::new(), value.clone());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value.clone());
        }
        raw.push((key, value));
    }

    let resolve = |prefix: &str| -> Option<String> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE.to_string());
        }
        scope
            .get(prefix)
            .or_else(|| scopes.iter().rev().find_map(|s| s.get(prefix)))
            .filter(|uri| !uri.is_empty())
            .cloned()
    };

    let qualified = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let name = match qualified.split_once(':') {
        Some((prefix, local)) => {
            let namespace = resolve(prefix).ok_or_else(|| {
                xml_error(pos, format!("unbound namespace prefix '{prefix}'"))
            })?;
            QName::with_namespace(namespace, Some(prefix), local)
        }
        None => QName {
            namespace: resolve(""),
            prefix: None,
            local: qualified,
        },
    };

    let attributes = raw
        .into_iter()
        .map(|(key, value)| {
            let name = match key.split_once(':') {
                Some(("xmlns", local)) => QName {
                    namespace: None,
                    prefix: Some("xmlns".into()),
                    local: local.to_string(),
                },
                Some((prefix, local)) => QName {
                    namespace: resolve(prefix),
                    prefix: Some(prefix.to_string()),
                    local: local.to_string(),
                },
                None => QName::local(key),
            };
            Attribute { name, value }
        })
        .collect();

    Ok((name, attributes, scope))
}

fn xml_error(position: u64, e: impl std::fmt::Display) -> SluiceError {
    SluiceError::XmlParse {
        position,
        message: e.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
