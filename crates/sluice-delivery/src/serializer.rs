//! Default markup output and the built-in serializer visitors.

use serde_json::Value;
use sluice_types::Result;
use sluice_xml::{writer, NodeRef};

use crate::context::ExecutionContext;
use crate::visitor::{Capabilities, Visitor};

/// Write `element`'s start tag to the current output.
pub fn write_start_tag(element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
    if !element.is_element() {
        return Ok(());
    }
    let options = ctx.settings().write_options();
    ctx.write_out(&writer::start_tag(
        element,
        writer::writes_as_empty(element, options),
    ))
}

/// Write `element`'s end tag, unless it was written as an empty element.
pub fn write_end_tag(element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
    if !element.is_element() || writer::writes_as_empty(element, ctx.settings().write_options()) {
        return Ok(());
    }
    ctx.write_out(&writer::end_tag(element))
}

pub fn write_character_data(data: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
    let options = ctx.settings().write_options();
    ctx.write_out(&writer::character_data(data, options))
}

/// Used for fragments no serializer visitor is bound to.
pub(crate) struct DefaultSerializer;

impl Visitor for DefaultSerializer {
    fn capabilities(&self) -> Capabilities {
        Capabilities::SERIALIZER
    }
}

// ---------------------------------------------------------------------------
// Built-in serializer visitors
// ---------------------------------------------------------------------------

/// Writes the fragments it visits to the current output.
///
/// Useful in nested pipelines, where the pointer-driven inner pass performs
/// no default serialization of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleSerializerVisitor;

impl SimpleSerializerVisitor {
    pub const CLASS: &'static str = "SimpleSerializerVisitor";
}

impl Visitor for SimpleSerializerVisitor {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BEFORE | Capabilities::AFTER | Capabilities::CHILD_TEXT
    }

    fn visit_before(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        write_start_tag(element, ctx)
    }

    fn visit_child_text(&self, text: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        write_character_data(text, ctx)
    }

    fn visit_after(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        write_end_tag(element, ctx)
    }
}

/// Drops an element's own tags but keeps its content.
#[derive(Debug, Clone, Copy, Default)]
pub struct GhostElementSerializer;

impl GhostElementSerializer {
    pub const CLASS: &'static str = "GhostElementSerializer";
}

impl Visitor for GhostElementSerializer {
    fn capabilities(&self) -> Capabilities {
        Capabilities::SERIALIZER
    }

    fn write_start_element(
        &self,
        _element: NodeRef<'_>,
        _ctx: &mut ExecutionContext,
    ) -> Result<()> {
        Ok(())
    }

    fn write_end_element(&self, _element: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }
}

/// Replaces an element with its descendant text. Tags, comments and nested
/// markup are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSerializerVisitor;

impl TextSerializerVisitor {
    pub const CLASS: &'static str = "TextSerializerVisitor";
}

impl Visitor for TextSerializerVisitor {
    fn capabilities(&self) -> Capabilities {
        Capabilities::SERIALIZER
    }

    fn write_start_element(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let text = writer::text_content(element, ctx.settings().write_options());
        ctx.write_out(&text)
    }

    fn write_end_element(&self, _element: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn serializes_children(&self) -> bool {
        false
    }
}

/// Replaces an element with the bean named by its `key` attribute.
///
/// String beans are written as-is, other values as JSON. A missing bean
/// writes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextObjectSerializer;

impl ContextObjectSerializer {
    pub const CLASS: &'static str = "ContextObjectSerializer";
}

impl Visitor for ContextObjectSerializer {
    fn capabilities(&self) -> Capabilities {
        Capabilities::SERIALIZER
    }

    fn write_start_element(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let Some(key) = element.attribute("key") else {
            tracing::debug!(
                path = %element.path(),
                "Context object element has no 'key' attribute"
            );
            return Ok(());
        };
        let rendered = ctx
            .bean_context()
            .borrow()
            .get_by_name(key)
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        match rendered {
            Some(text) => ctx.write_out(&text),
            None => Ok(()),
        }
    }

    fn write_end_element(&self, _element: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn serializes_children(&self) -> bool {
        false
    }
}
