use std::collections::HashMap;
use std::sync::Arc;

use sluice_types::Result;
use sluice_xml::{NodeKey, NodeKind, NodeRef};

use crate::context::ExecutionContext;
use crate::delivery::ContentDeliveryConfig;
use crate::pointer::EventPointer;
use crate::serializer::DefaultSerializer;
use crate::visitor::{Capabilities, Visitor, VisitorBinding};

use super::{visit_pointer, Filter, FilterProvider};

/// Provides [`TreeFilter`]s for binding sets that never need interleaved
/// output: no child text, child element or streaming visitors.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeFilterProvider;

impl FilterProvider for TreeFilterProvider {
    fn name(&self) -> &str {
        "tree"
    }

    fn is_provider(&self, bindings: &[Arc<VisitorBinding>]) -> bool {
        let incompatible = bindings.iter().filter(|b| {
            b.capabilities().intersects(
                Capabilities::CHILD_TEXT | Capabilities::CHILD_ELEMENT | Capabilities::STREAMING,
            )
        });
        let mut compatible = true;
        for binding in incompatible {
            tracing::debug!(
                filter = "tree",
                handler = %binding.handler_name(),
                selector = %binding.config().selector_str(),
                "Binding needs interleaved visits"
            );
            compatible = false;
        }
        compatible
    }

    fn create_filter(&self) -> Box<dyn Filter> {
        Box::new(TreeFilter)
    }
}

/// Two phases: BEFORE, AFTER and post-fragment over the whole document,
/// then serialization of the document.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeFilter;

type Serializers = HashMap<NodeKey, Arc<dyn Visitor>>;

impl Filter for TreeFilter {
    fn traverse(&self, source: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let config = ctx.content_delivery_config().clone();
        let mut serializers = Serializers::new();
        self.visit(source, ctx, &config, &mut serializers)?;
        self.serialize(source, ctx, &serializers, true)
    }
}

impl TreeFilter {
    fn visit(
        &self,
        node: NodeRef<'_>,
        ctx: &mut ExecutionContext,
        config: &ContentDeliveryConfig,
        serializers: &mut Serializers,
    ) -> Result<()> {
        if EventPointer::is_pointer(node) {
            return visit_pointer(node, ctx, config);
        }

        let bindings = config.matching(node, &ctx.bean_context().borrow());
        if let Some(serializer) = bindings.iter().find(|b| b.has(Capabilities::SERIALIZER)) {
            serializers.insert(node.key(), serializer.visitor().clone());
        }

        for binding in bindings.iter().filter(|b| b.has(Capabilities::BEFORE)) {
            binding.visitor().visit_before(node, ctx)?;
        }
        for child in node.child_elements() {
            self.visit(child, ctx, config, serializers)?;
        }
        for binding in bindings.iter().filter(|b| b.has(Capabilities::AFTER)) {
            binding.visitor().visit_after(node, ctx)?;
        }
        for binding in bindings.iter().filter(|b| b.has(Capabilities::POST_FRAGMENT)) {
            binding.visitor().on_post_fragment(node, ctx)?;
        }
        ctx.mementos_mut().forget_fragment(node.key());
        Ok(())
    }

    fn serialize(
        &self,
        node: NodeRef<'_>,
        ctx: &mut ExecutionContext,
        serializers: &Serializers,
        serialize: bool,
    ) -> Result<()> {
        if EventPointer::is_pointer(node) {
            return Ok(());
        }
        let serialize_here = serialize
            && ctx.settings().default_serialization
            && !ctx.is_serialization_suppressed(node.key());
        let writer: Arc<dyn Visitor> = serializers
            .get(&node.key())
            .cloned()
            .unwrap_or_else(|| Arc::new(DefaultSerializer));
        let children_serialized = serialize_here && writer.serializes_children();

        if serialize_here {
            writer.write_start_element(node, ctx)?;
        }
        for child in node.children() {
            match child.kind() {
                NodeKind::Element(_) => {
                    self.serialize(child, ctx, serializers, children_serialized)?
                }
                NodeKind::Document => {}
                _ if children_serialized => writer.write_character_data(child, ctx)?,
                _ => {}
            }
        }
        if serialize_here {
            writer.write_end_element(node, ctx)?;
        }
        ctx.clear_suppression(node.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::visitor::ContentHandler;

    struct Caps(Capabilities);

    impl Visitor for Caps {
        fn capabilities(&self) -> Capabilities {
            self.0
        }
    }

    fn binding(capabilities: Capabilities) -> Arc<VisitorBinding> {
        let visitor = Arc::new(Caps(capabilities));
        let config = Arc::new(
            ResourceConfig::with_instance("a", ContentHandler::Visitor(visitor.clone())).unwrap(),
        );
        Arc::new(VisitorBinding::new(visitor.clone(), visitor, config))
    }

    #[test]
    fn tree_provider_rejects_interleaved_visitors() {
        let provider = TreeFilterProvider;
        assert!(provider.is_provider(&[binding(
            Capabilities::ELEMENT | Capabilities::POST_FRAGMENT
        )]));
        assert!(provider.is_provider(&[binding(Capabilities::SERIALIZER)]));
        for caps in [
            Capabilities::CHILD_TEXT,
            Capabilities::CHILD_ELEMENT,
            Capabilities::STREAMING,
        ] {
            assert!(
                !provider.is_provider(&[binding(Capabilities::BEFORE), binding(caps)]),
                "{caps:?} should need the stream filter"
            );
        }
    }
}
