//! Visitor trait, capability flags, content handler variants, and bindings.

use std::fmt;
use std::sync::Arc;

use sluice_types::Result;
use sluice_xml::NodeRef;

use crate::application::ApplicationContext;
use crate::config::ResourceConfig;
use crate::context::ExecutionContext;
use crate::serializer;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

bitflags::bitflags! {
    /// The visit protocol a visitor takes part in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        const BEFORE = 1;
        const AFTER = 1 << 1;
        const CHILD_TEXT = 1 << 2;
        const CHILD_ELEMENT = 1 << 3;
        /// Takes over markup output for the fragments it is bound to.
        const SERIALIZER = 1 << 4;
        const POST_FRAGMENT = 1 << 5;
        const PRE_EXECUTION = 1 << 6;
        const POST_EXECUTION = 1 << 7;
        /// Synthesizes further resource configs at build time.
        const EXPANDER = 1 << 8;
        /// Writes to the output stream while visiting, so visits must stay
        /// interleaved with serialization.
        const STREAMING = 1 << 9;

        const ELEMENT = Self::BEFORE.bits() | Self::AFTER.bits();
    }
}

// ---------------------------------------------------------------------------
// Visitor
// ---------------------------------------------------------------------------

/// A content handler invoked by the dispatch engine.
///
/// Only the methods whose [`Capabilities`] flag is reported are ever called.
/// Visitors are shared across concurrent passes, so per-fragment state
/// belongs in the execution context's memento store, not in `self`.
pub trait Visitor: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn visit_before(&self, _element: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn visit_after(&self, _element: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// Called once per text or CDATA child of a matched element.
    fn visit_child_text(&self, _text: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// Called on the parent's visitors once `child`'s subtree has been visited.
    fn visit_child_element(
        &self,
        _element: NodeRef<'_>,
        _child: NodeRef<'_>,
        _ctx: &mut ExecutionContext,
    ) -> Result<()> {
        Ok(())
    }

    /// Fires exactly once per fragment, after every AFTER visit.
    fn on_post_fragment(&self, _fragment: NodeRef<'_>, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn on_pre_execution(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn on_post_execution(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn write_start_element(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        serializer::write_start_tag(element, ctx)
    }

    fn write_end_element(&self, element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        serializer::write_end_tag(element, ctx)
    }

    fn write_character_data(&self, data: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        serializer::write_character_data(data, ctx)
    }

    /// Whether descendants of a fragment this visitor serializes are written.
    fn serializes_children(&self) -> bool {
        true
    }

    /// Whether the visitor takes its input from the named output resource.
    fn consumes(&self, _resource: &str) -> bool {
        false
    }

    fn handler_name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    fn initialize(&self, _config: &ResourceConfig, _app: &Arc<ApplicationContext>) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}

    /// Build-time expansion for visitors reporting [`Capabilities::EXPANDER`].
    fn expand(&self, _config: &ResourceConfig) -> Result<Vec<ResourceConfig>> {
        Ok(Vec::new())
    }
}

/// Synthesizes further resource configs from one config.
pub trait ResourceConfigExpander: Send + Sync {
    fn expand(&self, config: &ResourceConfig) -> Result<Vec<ResourceConfig>>;
}

/// Contributes ready-made visitor bindings.
pub trait VisitorAppender: Send + Sync {
    fn visitors(&self, config: &ResourceConfig) -> Result<Vec<(Arc<dyn Visitor>, ResourceConfig)>>;
}

/// What a content handler factory produces.
#[derive(Clone)]
pub enum ContentHandler {
    Visitor(Arc<dyn Visitor>),
    Expander(Arc<dyn ResourceConfigExpander>),
    Appender(Arc<dyn VisitorAppender>),
}

impl ContentHandler {
    pub fn visitor(visitor: impl Visitor + 'static) -> Self {
        ContentHandler::Visitor(Arc::new(visitor))
    }
}

impl fmt::Debug for ContentHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentHandler::Visitor(v) => write!(f, "Visitor({})", v.handler_name()),
            ContentHandler::Expander(_) => f.write_str("Expander"),
            ContentHandler::Appender(_) => f.write_str("Appender"),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity and bindings
// ---------------------------------------------------------------------------

/// Identity of a visitor instance, used to scope mementos.
///
/// Derived from the instance address, so it is stable for as long as the
/// instance lives. Bound visitors each sit in their own `Arc` allocation and
/// get distinct ids, zero-sized types included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisitorId(usize);

impl VisitorId {
    pub fn of<V: ?Sized>(visitor: &V) -> Self {
        Self(visitor as *const V as *const () as usize)
    }
}

/// An instantiated visitor (possibly wrapped in interceptors) and the config
/// that produced it.
pub struct VisitorBinding {
    visitor: Arc<dyn Visitor>,
    target: Arc<dyn Visitor>,
    config: Arc<ResourceConfig>,
}

impl VisitorBinding {
    pub fn new(
        visitor: Arc<dyn Visitor>,
        target: Arc<dyn Visitor>,
        config: Arc<ResourceConfig>,
    ) -> Self {
        Self {
            visitor,
            target,
            config,
        }
    }

    /// The invocation entry point, including interceptors.
    pub fn visitor(&self) -> &Arc<dyn Visitor> {
        &self.visitor
    }

    /// The unwrapped visitor.
    pub fn target(&self) -> &Arc<dyn Visitor> {
        &self.target
    }

    pub fn config(&self) -> &Arc<ResourceConfig> {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.visitor.capabilities()
    }

    pub fn has(&self, capability: Capabilities) -> bool {
        self.capabilities().contains(capability)
    }

    pub fn handler_name(&self) -> String {
        self.target.handler_name()
    }
}

impl fmt::Debug for VisitorBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisitorBinding")
            .field("handler", &self.handler_name())
            .field("selector", &self.config.selector_str())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
