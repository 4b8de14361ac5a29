use std::sync::Arc;

use sluice_types::{Result, VisitSequence};
use sluice_xml::NodeRef;

use crate::application::ApplicationContext;
use crate::config::ResourceConfig;
use crate::context::ExecutionContext;
use crate::pointer::EventPointer;
use crate::visitor::{Capabilities, Visitor};

/// Resolves event pointers before forwarding.
///
/// A pointer is dereferenced on the context and its real node is matched
/// against the target's selector (the parent is matched for character
/// data). Each pointer is forwarded to at most one target method, picked by
/// its visit sequence. Ordinary nodes are forwarded when the selector
/// matches them.
pub struct EventPointerInterceptor {
    target: Arc<dyn Visitor>,
    config: Arc<ResourceConfig>,
}

impl EventPointerInterceptor {
    pub fn new(target: Arc<dyn Visitor>, config: Arc<ResourceConfig>) -> Self {
        Self { target, config }
    }

    fn selects(&self, node: NodeRef<'_>) -> bool {
        self.config.selector_matches(node)
    }

    fn selects_text(&self, text: NodeRef<'_>) -> bool {
        text.parent().is_some_and(|p| self.selects(p))
    }

    /// Forward a pointer whose visit sequence is `expected` to `forward`
    /// with its real node, if the selector matches it.
    fn on_pointer(
        &self,
        pointer: NodeRef<'_>,
        ctx: &mut ExecutionContext,
        expected: VisitSequence,
        forward: impl FnOnce(&dyn Visitor, NodeRef<'_>, &mut ExecutionContext) -> Result<()>,
    ) -> Result<()> {
        let pointer = EventPointer::from_node(pointer)?;
        if pointer.visit() != expected {
            return Ok(());
        }
        let handle = pointer.dereference(ctx)?;
        let real = handle.node();
        let selected = match expected {
            VisitSequence::ChildText => self.selects_text(real),
            _ => self.selects(real),
        };
        if !selected {
            return Ok(());
        }
        tracing::trace!(
            visit = %expected,
            path = %real.path(),
            selector = %self.config.selector_str(),
            "Forwarding event pointer"
        );
        forward(self.target.as_ref(), real, ctx)
    }
}

impl Visitor for EventPointerInterceptor {
    fn capabilities(&self) -> Capabilities {
        self.target.capabilities()
    }

    fn visit_before(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        if EventPointer::is_pointer(element) {
            return self.on_pointer(element, ctx, VisitSequence::Before, |t, real, ctx| {
                t.visit_before(real, ctx)
            });
        }
        if self.selects(element) {
            self.target.visit_before(element, ctx)
        } else {
            Ok(())
        }
    }

    /// Also receives CHILD_TEXT pointers, which are forwarded as child text.
    fn visit_after(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        if EventPointer::is_pointer(element) {
            let visit = EventPointer::from_node(element)?.visit();
            return match visit {
                VisitSequence::ChildText => {
                    self.on_pointer(element, ctx, VisitSequence::ChildText, |t, real, ctx| {
                        t.visit_child_text(real, ctx)
                    })
                }
                VisitSequence::After => {
                    self.on_pointer(element, ctx, VisitSequence::After, |t, real, ctx| {
                        t.visit_after(real, ctx)
                    })
                }
                VisitSequence::Before => Ok(()),
            };
        }
        if self.selects(element) {
            self.target.visit_after(element, ctx)
        } else {
            Ok(())
        }
    }

    fn visit_child_text(&self, text: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        if self.selects_text(text) {
            self.target.visit_child_text(text, ctx)
        } else {
            Ok(())
        }
    }

    fn visit_child_element(
        &self,
        element: NodeRef<'_>,
        child: NodeRef<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        if self.selects(element) {
            self.target.visit_child_element(element, child, ctx)
        } else {
            Ok(())
        }
    }

    fn on_post_fragment(&self, fragment: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        if EventPointer::is_pointer(fragment) {
            return self.on_pointer(fragment, ctx, VisitSequence::After, |t, real, ctx| {
                t.on_post_fragment(real, ctx)
            });
        }
        if self.selects(fragment) {
            self.target.on_post_fragment(fragment, ctx)
        } else {
            Ok(())
        }
    }

    fn on_pre_execution(&self, ctx: &mut ExecutionContext) -> Result<()> {
        self.target.on_pre_execution(ctx)
    }

    fn on_post_execution(&self, ctx: &mut ExecutionContext) -> Result<()> {
        self.target.on_post_execution(ctx)
    }

    fn write_start_element(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        self.target.write_start_element(element, ctx)
    }

    fn write_end_element(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        self.target.write_end_element(element, ctx)
    }

    fn write_character_data(&self, data: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        self.target.write_character_data(data, ctx)
    }

    fn serializes_children(&self) -> bool {
        self.target.serializes_children()
    }

    fn consumes(&self, resource: &str) -> bool {
        self.target.consumes(resource)
    }

    fn handler_name(&self) -> String {
        self.target.handler_name()
    }

    fn initialize(&self, config: &ResourceConfig, app: &Arc<ApplicationContext>) -> Result<()> {
        self.target.initialize(config, app)
    }

    fn close(&self) {
        self.target.close()
    }

    fn expand(&self, config: &ResourceConfig) -> Result<Vec<ResourceConfig>> {
        self.target.expand(config)
    }
}
