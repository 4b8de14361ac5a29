use std::sync::Arc;

use sluice_types::Result;
use sluice_xml::{NodeKind, NodeRef};

use crate::context::ExecutionContext;
use crate::delivery::ContentDeliveryConfig;
use crate::pointer::EventPointer;
use crate::serializer::DefaultSerializer;
use crate::visitor::{Capabilities, Visitor, VisitorBinding};

use super::{visit_pointer, Filter, FilterProvider};

/// Provides [`StreamFilter`]s. Compatible with every binding set.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamFilterProvider;

impl FilterProvider for StreamFilterProvider {
    fn name(&self) -> &str {
        "stream"
    }

    fn is_provider(&self, _bindings: &[Arc<VisitorBinding>]) -> bool {
        true
    }

    fn create_filter(&self) -> Box<dyn Filter> {
        Box::new(StreamFilter)
    }
}

/// Single depth-first pass. Each fragment is visited and written in turn:
/// BEFORE, start tag, children, AFTER, end tag, post-fragment.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamFilter;

impl Filter for StreamFilter {
    fn traverse(&self, source: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let config = ctx.content_delivery_config().clone();
        self.visit_node(source, ctx, &config, true)
    }
}

impl StreamFilter {
    fn visit_node(
        &self,
        node: NodeRef<'_>,
        ctx: &mut ExecutionContext,
        config: &ContentDeliveryConfig,
        serialize: bool,
    ) -> Result<()> {
        if EventPointer::is_pointer(node) {
            return visit_pointer(node, ctx, config);
        }

        let bindings = config.matching(node, &ctx.bean_context().borrow());
        tracing::trace!(path = %node.path(), bindings = bindings.len(), "Visiting fragment");

        for binding in bindings.iter().filter(|b| b.has(Capabilities::BEFORE)) {
            binding.visitor().visit_before(node, ctx)?;
        }

        let serialize_here = serialize
            && ctx.settings().default_serialization
            && !ctx.is_serialization_suppressed(node.key());
        let writer: Arc<dyn Visitor> = bindings
            .iter()
            .find(|b| b.has(Capabilities::SERIALIZER))
            .map(|b| b.visitor().clone())
            .unwrap_or_else(|| Arc::new(DefaultSerializer));
        let children_serialized = serialize_here && writer.serializes_children();

        if serialize_here {
            writer.write_start_element(node, ctx)?;
        }

        for child in node.children() {
            match child.kind() {
                NodeKind::Element(_) => {
                    self.visit_node(child, ctx, config, children_serialized)?;
                    for binding in bindings.iter().filter(|b| b.has(Capabilities::CHILD_ELEMENT)) {
                        binding.visitor().visit_child_element(node, child, ctx)?;
                    }
                }
                NodeKind::Text(_) | NodeKind::CData(_) => {
                    for binding in bindings.iter().filter(|b| b.has(Capabilities::CHILD_TEXT)) {
                        binding.visitor().visit_child_text(child, ctx)?;
                    }
                    if children_serialized {
                        writer.write_character_data(child, ctx)?;
                    }
                }
                NodeKind::Comment(_) => {
                    if children_serialized {
                        writer.write_character_data(child, ctx)?;
                    }
                }
                NodeKind::Document => {}
            }
        }

        for binding in bindings.iter().filter(|b| b.has(Capabilities::AFTER)) {
            binding.visitor().visit_after(node, ctx)?;
        }
        if serialize_here {
            writer.write_end_element(node, ctx)?;
        }
        for binding in bindings.iter().filter(|b| b.has(Capabilities::POST_FRAGMENT)) {
            binding.visitor().on_post_fragment(node, ctx)?;
        }

        ctx.mementos_mut().forget_fragment(node.key());
        ctx.clear_suppression(node.key());
        Ok(())
    }
}
