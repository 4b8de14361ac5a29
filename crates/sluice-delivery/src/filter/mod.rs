//! Traversal drivers.
//!
//! - [`StreamFilter`]: one depth-first pass interleaving visits with output
//! - [`TreeFilter`]: visits the whole document, then serializes it
//!
//! A [`FilterProvider`] decides whether its filter can serve a set of
//! bindings. The content delivery config picks one provider when it is built.

mod stream;
mod tree;

use std::sync::Arc;

use sluice_types::{Result, VisitSequence};
use sluice_xml::NodeRef;

use crate::context::ExecutionContext;
use crate::delivery::ContentDeliveryConfig;
use crate::pointer::EventPointer;
use crate::visitor::{Capabilities, VisitorBinding};

pub use stream::{StreamFilter, StreamFilterProvider};
pub use tree::{TreeFilter, TreeFilterProvider};

/// Creates filters for the binding sets it is compatible with.
pub trait FilterProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the provider's filter can dispatch every binding in `bindings`.
    fn is_provider(&self, bindings: &[Arc<VisitorBinding>]) -> bool;

    fn create_filter(&self) -> Box<dyn Filter>;
}

/// Drives one pass over a source node.
pub trait Filter {
    /// Walk `source` and dispatch its fragments.
    fn traverse(&self, source: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()>;

    /// Run the pre-execution hooks, the traversal, and the post-execution
    /// hooks. Post-execution hooks run even when an earlier step failed.
    fn filter(&self, source: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let config = ctx.content_delivery_config().clone();
        let result = pre_execution(&config, ctx).and_then(|()| self.traverse(source, ctx));
        let post = post_execution(&config, ctx);
        result.and(post)
    }
}

fn pre_execution(config: &ContentDeliveryConfig, ctx: &mut ExecutionContext) -> Result<()> {
    for binding in config.with_capability(Capabilities::PRE_EXECUTION) {
        binding.visitor().on_pre_execution(ctx)?;
    }
    Ok(())
}

/// Runs every hook and returns the first failure.
fn post_execution(config: &ContentDeliveryConfig, ctx: &mut ExecutionContext) -> Result<()> {
    let mut first = None;
    for binding in config.with_capability(Capabilities::POST_EXECUTION) {
        if let Err(e) = binding.visitor().on_post_execution(ctx) {
            tracing::debug!(
                handler = %binding.handler_name(),
                error = %e,
                "Post-execution hook failed"
            );
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Dispatch a pointer element by its visit sequence.
///
/// Bindings are looked up by the node the pointer refers to (its parent for
/// character data) and receive the pointer itself. The pointer interceptor
/// around each visitor resolves it again.
pub(crate) fn visit_pointer(
    pointer: NodeRef<'_>,
    ctx: &mut ExecutionContext,
    config: &ContentDeliveryConfig,
) -> Result<()> {
    let event = EventPointer::from_node(pointer)?;
    let handle = event.dereference(ctx)?;
    let real = handle.node();
    let target = if real.is_element() || real.is_document() {
        real
    } else {
        match real.parent() {
            Some(parent) => parent,
            None => return Ok(()),
        }
    };
    let bindings = config.matching(target, &ctx.bean_context().borrow());
    tracing::trace!(
        visit = %event.visit(),
        path = %real.path(),
        bindings = bindings.len(),
        "Dispatching event pointer"
    );

    match event.visit() {
        VisitSequence::Before => {
            for binding in bindings.iter().filter(|b| b.has(Capabilities::BEFORE)) {
                binding.visitor().visit_before(pointer, ctx)?;
            }
        }
        VisitSequence::ChildText => {
            for binding in bindings.iter().filter(|b| b.has(Capabilities::CHILD_TEXT)) {
                binding.visitor().visit_after(pointer, ctx)?;
            }
        }
        VisitSequence::After => {
            for binding in bindings.iter().filter(|b| b.has(Capabilities::AFTER)) {
                binding.visitor().visit_after(pointer, ctx)?;
            }
            for binding in bindings.iter().filter(|b| b.has(Capabilities::POST_FRAGMENT)) {
                binding.visitor().on_post_fragment(pointer, ctx)?;
            }
            ctx.mementos_mut().forget_fragment(real.key());
        }
    }
    Ok(())
}
