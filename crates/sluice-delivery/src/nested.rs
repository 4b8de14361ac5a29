//! Nested pipelines: run an inner [`Pipeline`] over each fragment a visitor
//! is bound to, and place the inner output in the outer pass.
//!
//! The inner pass never sees the outer tree. The fragment is detached into a
//! standalone document, and the inner pipeline is fed event pointers that
//! refer to nodes of that copy. The inner execution context is created once
//! per outer fragment and shares the outer bean context.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use sluice_types::{BeanId, Result, SluiceError, TypedKey, VisitSequence};
use sluice_xml::{writer, Document, NodeId, NodeKey, NodeKind, NodeRef};

use crate::application::ApplicationContext;
use crate::config::ResourceConfig;
use crate::context::ExecutionContext;
use crate::events::{ExecutionEvent, ExecutionEventListener, ListenerId, VisitPhase};
use crate::interceptor::InterceptorChain;
use crate::memento::Memento;
use crate::params::{ResolvedSettings, CLOSE_SINK};
use crate::pipeline::Pipeline;
use crate::pointer::{EventPointer, NodeHandle};
use crate::resource::ResourceWriter;
use crate::visitor::{Capabilities, Visitor, VisitorId};
use crate::writer::{OutputBuffer, SharedWriter};

const DETACHED: &str = "detached";
const PIPELINE_CONTEXT: &str = "pipeline-context";
const NODE_WRITER: &str = "writer";
const CHILD_LISTENER: &str = "child-listener";

/// Where the inner output of a fragment goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Replace the fragment.
    Replace,
    /// Before the fragment's start tag.
    PrependBefore,
    /// Right after the fragment's start tag.
    PrependAfter,
    /// Right before the fragment's end tag.
    AppendBefore,
    /// After the fragment's end tag.
    AppendAfter,
    /// Into a bean.
    BindTo,
    /// Into a named output resource.
    OutputTo,
}

impl Action {
    fn is_prepend(self) -> bool {
        matches!(self, Action::PrependBefore | Action::PrependAfter)
    }

    fn is_append(self) -> bool {
        matches!(self, Action::AppendBefore | Action::AppendAfter)
    }
}

/// What happens to an error raised by the inner pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InnerFailurePolicy {
    /// Return it from the visit call.
    #[default]
    Propagate,
    /// Record it as the outer termination error and carry on.
    Record,
}

/// The writer inner output is sent to, kept between BEFORE and AFTER.
#[derive(Clone)]
enum NodeSink {
    Outer,
    Resource(Option<SharedWriter>),
    Buffer(OutputBuffer),
}

impl NodeSink {
    fn writer(&self, ctx: &ExecutionContext) -> Option<SharedWriter> {
        match self {
            NodeSink::Outer => ctx.out(),
            NodeSink::Resource(writer) => writer.clone(),
            NodeSink::Buffer(buffer) => Some(buffer.writer()),
        }
    }

    fn buffer(&self) -> Option<&OutputBuffer> {
        match self {
            NodeSink::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }
}

type InnerContext = Rc<RefCell<ExecutionContext>>;

pub struct NestedPipelineVisitor {
    pipeline: Arc<Pipeline>,
    action: Option<Action>,
    bind_id: Option<String>,
    bean_id: OnceLock<BeanId>,
    output_resource: Option<String>,
    max_node_depth: Option<usize>,
    failure_policy: InnerFailurePolicy,
    pointer_key: TypedKey<NodeHandle>,
}

impl NestedPipelineVisitor {
    /// Wrap `pipeline`. Without an action, inner output goes straight to the
    /// outer stream.
    pub fn new(mut pipeline: Pipeline, action: Option<Action>) -> Result<Self> {
        pipeline.set_interceptors(InterceptorChain::nested())?;
        pipeline.add_resource_config(
            ResourceConfig::global_parameters()?.with_param(CLOSE_SINK, false),
        )?;
        Ok(Self {
            pipeline: Arc::new(pipeline),
            action,
            bind_id: None,
            bean_id: OnceLock::new(),
            output_resource: None,
            max_node_depth: None,
            failure_policy: InnerFailurePolicy::default(),
            pointer_key: TypedKey::unique(),
        })
    }

    pub fn bind_to(mut self, bind_id: impl Into<String>) -> Self {
        self.bind_id = Some(bind_id.into());
        self
    }

    pub fn output_to(mut self, resource: impl Into<String>) -> Self {
        self.output_resource = Some(resource.into());
        self
    }

    /// Levels of descendant elements copied into the detached fragment;
    /// `0` copies everything.
    pub fn max_node_depth(mut self, depth: usize) -> Self {
        self.max_node_depth = Some(depth);
        self
    }

    pub fn failure_policy(mut self, policy: InnerFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn action(&self) -> Option<Action> {
        self.action
    }

    /// Effective detach depth, `0` meaning unlimited.
    pub fn node_depth(&self, settings: &ResolvedSettings) -> usize {
        match self.action {
            Some(action) if action.is_prepend() => 0,
            _ => self.max_node_depth.unwrap_or(settings.max_node_depth),
        }
    }

    fn id(&self) -> VisitorId {
        VisitorId::of(self)
    }

    // --- inner passes ------------------------------------------------------

    /// The inner context of `fragment`, created on first use.
    fn inner_context(&self, fragment: NodeKey, ctx: &mut ExecutionContext) -> Result<InnerContext> {
        let mut memento: Memento<Option<InnerContext>> =
            Memento::new(fragment, self.id(), PIPELINE_CONTEXT, None);
        if ctx.mementos().exists(&memento) {
            ctx.mementos().restore(&mut memento)?;
            if let Some(inner) = memento.state {
                return Ok(inner);
            }
        }
        let mut inner = self.pipeline.create_execution_context()?;
        inner.set_bean_context(ctx.bean_context());
        let inner = Rc::new(RefCell::new(inner));
        memento.state = Some(inner.clone());
        ctx.mementos_mut().capture(&memento);
        Ok(inner)
    }

    /// Run the inner pipeline over a `visit` pointer to `node`.
    fn drive(
        &self,
        inner: &InnerContext,
        node: NodeHandle,
        visit: VisitSequence,
        sink: &NodeSink,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let pointer = EventPointer::new(self.pointer_key.clone(), visit).to_document();
        let Some(source) = pointer.document_element() else {
            return Ok(());
        };
        let writer = sink.writer(ctx);
        let mut inner = inner.borrow_mut();
        inner.put(&self.pointer_key, node);
        let result = self.pipeline.filter_source(&mut inner, source, writer);
        self.settle(result, &mut inner, ctx)
    }

    /// Drive every child of `node`: text as CHILD_TEXT, elements as BEFORE,
    /// their own children, then AFTER.
    fn drive_children(
        &self,
        inner: &InnerContext,
        document: &Rc<Document>,
        node: NodeRef<'_>,
        sink: &NodeSink,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        for child in node.children() {
            let handle = NodeHandle::new(document.clone(), child.id());
            match child.kind() {
                NodeKind::Element(_) => {
                    self.drive(inner, handle.clone(), VisitSequence::Before, sink, ctx)?;
                    self.drive_children(inner, document, child, sink, ctx)?;
                    self.drive(inner, handle, VisitSequence::After, sink, ctx)?;
                }
                NodeKind::Text(_) | NodeKind::CData(_) => {
                    self.drive(inner, handle, VisitSequence::ChildText, sink, ctx)?;
                }
                NodeKind::Comment(_) | NodeKind::Document => {}
            }
        }
        Ok(())
    }

    fn settle(
        &self,
        result: Result<()>,
        inner: &mut ExecutionContext,
        outer: &mut ExecutionContext,
    ) -> Result<()> {
        match self.failure_policy {
            InnerFailurePolicy::Propagate => result,
            InnerFailurePolicy::Record => {
                let error = match result {
                    Err(e) => Some(e),
                    Ok(()) => inner.take_termination_error(),
                };
                if let Some(error) = error {
                    tracing::warn!(
                        error = %error,
                        "Nested pipeline failed; recorded on the outer pass"
                    );
                    outer.set_termination_error(error);
                }
                Ok(())
            }
        }
    }

    // --- output placement --------------------------------------------------

    fn open_sink(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<NodeSink> {
        let serialize = ctx.settings().default_serialization;
        Ok(match self.action {
            None => NodeSink::Outer,
            Some(Action::OutputTo) => {
                let resource = self.output_resource.as_deref().unwrap_or_default();
                let writer = ResourceWriter::open(ctx, resource)?;
                if writer.is_none() {
                    tracing::debug!(
                        resource = %resource,
                        path = %element.path(),
                        "Output resource not bound; nested output discarded"
                    );
                }
                NodeSink::Resource(writer)
            }
            Some(Action::PrependAfter) => {
                let buffer = OutputBuffer::new();
                if serialize {
                    buffer.write_str(&writer::start_tag(element, false));
                }
                NodeSink::Buffer(buffer)
            }
            Some(Action::PrependBefore | Action::Replace | Action::BindTo) => {
                NodeSink::Buffer(OutputBuffer::new())
            }
            Some(Action::AppendBefore | Action::AppendAfter) => {
                if serialize {
                    ctx.write_out(&writer::start_tag(element, false))?;
                }
                NodeSink::Outer
            }
        })
    }

    fn place(&self, root: NodeRef<'_>, sink: &NodeSink, ctx: &mut ExecutionContext) -> Result<()> {
        let Some(action) = self.action else {
            return Ok(());
        };
        let Some(buffer) = sink.buffer() else {
            return Ok(());
        };
        match action {
            Action::PrependBefore | Action::PrependAfter => {
                if ctx.settings().default_serialization {
                    if action == Action::PrependBefore {
                        buffer.write_str(&writer::start_tag(root, false));
                    }
                    let mut children = String::new();
                    writer::serialize_children(root, ctx.settings().write_options(), &mut children);
                    buffer.write_str(&children);
                    buffer.write_str(&writer::end_tag(root));
                }
                ctx.write_out(&buffer.take())
            }
            Action::Replace => ctx.write_out(&buffer.take()),
            Action::BindTo => {
                if let Some(bean_id) = self.bean_id.get() {
                    ctx.bean_context().borrow_mut().add_bean(
                        bean_id.clone(),
                        Value::String(buffer.take()),
                        Some(root.key()),
                    );
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// The node of a detached copy that stands for the visited fragment.
fn detached_root(fragment: NodeRef<'_>, document: &Document) -> NodeId {
    match document.document_element() {
        Some(element) if !fragment.is_document() => element.id(),
        _ => document.root_id(),
    }
}

impl Visitor for NestedPipelineVisitor {
    fn capabilities(&self) -> Capabilities {
        let base = Capabilities::BEFORE
            | Capabilities::AFTER
            | Capabilities::POST_FRAGMENT
            | Capabilities::STREAMING;
        match self.action {
            Some(Action::Replace) => base | Capabilities::SERIALIZER,
            Some(action) if action.is_prepend() || action.is_append() => {
                base | Capabilities::SERIALIZER
            }
            _ => base,
        }
    }

    fn visit_before(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let key = element.key();
        let listener = ctx.add_listener(ChildEventListener {
            fragment: key,
            resource: self.output_resource.clone(),
        });
        ctx.mementos_mut()
            .capture(&Memento::new(key, self.id(), CHILD_LISTENER, listener));

        let detached = Rc::new(Document::detach(element, self.node_depth(ctx.settings())));
        let root = detached_root(element, &detached);
        ctx.mementos_mut()
            .capture(&Memento::new(key, self.id(), DETACHED, detached.clone()));

        let sink = self.open_sink(element, ctx)?;
        ctx.mementos_mut()
            .capture(&Memento::new(key, self.id(), NODE_WRITER, sink.clone()));

        let inner = self.inner_context(key, ctx)?;
        tracing::trace!(path = %element.path(), action = ?self.action, "Nested pipeline: before");
        self.drive(&inner, NodeHandle::new(detached, root), VisitSequence::Before, &sink, ctx)
    }

    fn visit_after(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let key = element.key();
        let mut detached = Memento::new(key, self.id(), DETACHED, Rc::new(Document::new()));
        ctx.mementos().restore(&mut detached)?;
        let document = detached.state;
        let root = detached_root(element, &document);
        let mut sink = Memento::new(key, self.id(), NODE_WRITER, NodeSink::Outer);
        ctx.mementos().restore(&mut sink)?;
        let sink = sink.state;

        let inner = self.inner_context(key, ctx)?;
        let root_node = document.node(root);
        self.drive_children(&inner, &document, root_node, &sink, ctx)?;

        let handle = NodeHandle::new(document.clone(), root);
        let serialize = ctx.settings().default_serialization;
        match self.action {
            Some(Action::AppendAfter) => {
                if serialize {
                    ctx.write_out(&writer::end_tag(root_node))?;
                }
                self.drive(&inner, handle, VisitSequence::After, &sink, ctx)?;
            }
            Some(Action::AppendBefore) => {
                self.drive(&inner, handle, VisitSequence::After, &sink, ctx)?;
                if serialize {
                    ctx.write_out(&writer::end_tag(root_node))?;
                }
            }
            _ => self.drive(&inner, handle, VisitSequence::After, &sink, ctx)?,
        }
        tracing::trace!(path = %element.path(), action = ?self.action, "Nested pipeline: after");
        self.place(root_node, &sink, ctx)
    }

    fn on_post_fragment(&self, fragment: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        let mut listener = Memento::new(fragment.key(), self.id(), CHILD_LISTENER, ListenerId(0));
        if !ctx.mementos().exists(&listener) {
            return Ok(());
        }
        ctx.mementos().restore(&mut listener)?;
        ctx.remove_listener(listener.state);
        Ok(())
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

    fn serializes_children(&self) -> bool {
        !matches!(
            self.action,
            Some(Action::Replace | Action::PrependBefore | Action::PrependAfter)
        )
    }

    fn consumes(&self, resource: &str) -> bool {
        self.output_resource.as_deref() == Some(resource)
    }

    fn handler_name(&self) -> String {
        match self.action {
            Some(action) => format!("NestedPipelineVisitor({action:?})"),
            None => "NestedPipelineVisitor".to_string(),
        }
    }

    fn initialize(&self, config: &ResourceConfig, app: &Arc<ApplicationContext>) -> Result<()> {
        match self.action {
            Some(Action::BindTo) => {
                let Some(name) = self.bind_id.as_deref() else {
                    return Err(SluiceError::Config(format!(
                        "nested pipeline on '{}' binds to a bean but has no bind id",
                        config.selector_str()
                    )));
                };
                let id = app.bean_id_store().register(name);
                if let Err(id) = self.bean_id.set(id) {
                    if self.bean_id.get() != Some(&id) {
                        return Err(SluiceError::Config(format!(
                            "nested pipeline on '{}' rebinds bean '{}' under another id",
                            config.selector_str(),
                            id
                        )));
                    }
                }
            }
            Some(Action::OutputTo) if self.output_resource.is_none() => {
                return Err(SluiceError::Config(format!(
                    "nested pipeline on '{}' outputs to a resource but names none",
                    config.selector_str()
                )));
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&self) {
        self.pipeline.close();
    }
}

/// Suppresses outer serialization of descendants of `fragment` whose
/// visitors consume `resource`, for as long as it is registered.
struct ChildEventListener {
    fragment: NodeKey,
    resource: Option<String>,
}

impl ExecutionEventListener for ChildEventListener {
    fn on_event(&self, event: &ExecutionEvent<'_>, ctx: &mut ExecutionContext) {
        let ExecutionEvent::Visit(visit) = event else {
            return;
        };
        let Some(resource) = self.resource.as_deref() else {
            return;
        };
        if visit.phase != VisitPhase::Before || visit.error.is_some() {
            return;
        }
        let descendant = visit.fragment.ancestors().any(|a| a.key() == self.fragment);
        if descendant && visit.visitor.consumes(resource) {
            tracing::trace!(
                path = %visit.fragment.path(),
                resource = %resource,
                "Descendant output claimed by resource"
            );
            ctx.suppress_serialization(visit.fragment.key());
        }
    }
}
