use std::sync::Arc;

use chrono::Utc;
use sluice_types::{Result, SluiceError};
use sluice_xml::NodeRef;

use crate::application::ApplicationContext;
use crate::config::ResourceConfig;
use crate::context::ExecutionContext;
use crate::events::{ExecutionEvent, VisitEvent, VisitPhase};
use crate::pointer::EventPointer;
use crate::visitor::{Capabilities, Visitor};

/// Reports every visit call to the context's listeners and applies the
/// terminate-on-visitor-exception policy to failures.
pub struct ExceptionInterceptor {
    target: Arc<dyn Visitor>,
    config: Arc<ResourceConfig>,
}

impl ExceptionInterceptor {
    pub fn new(target: Arc<dyn Visitor>, config: Arc<ResourceConfig>) -> Self {
        Self { target, config }
    }

    fn guard(
        &self,
        phase: VisitPhase,
        node: NodeRef<'_>,
        ctx: &mut ExecutionContext,
        call: impl FnOnce(&dyn Visitor, &mut ExecutionContext) -> Result<()>,
    ) -> Result<()> {
        let result = call(self.target.as_ref(), ctx);
        ctx.notify(&ExecutionEvent::Visit(VisitEvent {
            phase,
            fragment: node,
            config: &self.config,
            visitor: self.target.as_ref(),
            error: result.as_ref().err(),
            timestamp: Utc::now(),
        }));

        let error = match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_termination() => return Err(e),
            Err(e) => e,
        };
        ctx.set_termination_error(error.clone());
        let path = report_path(node, ctx);

        if ctx.settings().terminate_on_visitor_exception {
            if error.is_structured() {
                return Err(error);
            }
            return Err(SluiceError::Visit {
                event: phase.label().to_string(),
                path,
                selector: self.config.selector_str().to_string(),
                handler: self.target.handler_name(),
                source: Box::new(error),
            });
        }

        tracing::error!(
            event = %phase,
            path = %path,
            selector = %self.config.selector_str(),
            handler = %self.target.handler_name(),
            error = %error,
            "Visitor failed; continuing because terminate.on.visitor.exception is false"
        );
        Ok(())
    }
}

/// The path of the node a failure belongs to. Event pointers report the
/// node they refer to.
fn report_path(node: NodeRef<'_>, ctx: &ExecutionContext) -> String {
    if !EventPointer::is_pointer(node) {
        return node.path();
    }
    match EventPointer::from_node(node).and_then(|p| p.dereference(ctx)) {
        Ok(handle) => handle.node().path(),
        Err(_) => node.path(),
    }
}

impl Visitor for ExceptionInterceptor {
    fn capabilities(&self) -> Capabilities {
        self.target.capabilities()
    }

    fn visit_before(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        self.guard(VisitPhase::Before, element, ctx, |t, ctx| t.visit_before(element, ctx))
    }

    fn visit_after(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        self.guard(VisitPhase::After, element, ctx, |t, ctx| t.visit_after(element, ctx))
    }

    fn visit_child_text(&self, text: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        self.guard(VisitPhase::ChildText, text, ctx, |t, ctx| t.visit_child_text(text, ctx))
    }

    fn visit_child_element(
        &self,
        element: NodeRef<'_>,
        child: NodeRef<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        self.guard(VisitPhase::ChildElement, child, ctx, |t, ctx| {
            t.visit_child_element(element, child, ctx)
        })
    }

    fn on_post_fragment(&self, fragment: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        self.guard(VisitPhase::PostFragment, fragment, ctx, |t, ctx| {
            t.on_post_fragment(fragment, ctx)
        })
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
