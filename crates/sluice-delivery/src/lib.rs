//! Content delivery engine: binds visitors to document fragments through
//! selectors and drives them over a document in a fixed visit sequence.
//!
//! This crate implements the Sluice dispatch engine: resource configs and the
//! registry, content delivery config building (selector index, handler
//! extraction, filter-provider selection), the stream and tree traversal
//! drivers, execution contexts with mementos and beans, interceptors, event
//! pointers, and nested pipelines.
//!
//! # Example
//! ```
//! use sluice_delivery::{Capabilities, ExecutionContext, Pipeline, Visitor};
//! use sluice_types::Result;
//! use sluice_xml::NodeRef;
//!
//! struct Shout;
//!
//! impl Visitor for Shout {
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::BEFORE
//!     }
//!
//!     fn visit_before(&self, _element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
//!         ctx.write_out("!")
//!     }
//! }
//!
//! let mut pipeline = Pipeline::new().unwrap();
//! pipeline.add_visitor(Shout, "b").unwrap();
//! assert_eq!(pipeline.filter_str("<a><b/></a>").unwrap(), "<a>!<b></b></a>");
//! ```

pub mod application;
pub mod beans;
pub mod condition;
pub mod config;
pub mod context;
pub mod delivery;
pub mod events;
pub mod factory;
pub mod filter;
pub mod interceptor;
pub mod memento;
pub mod nested;
pub mod params;
pub mod pipeline;
pub mod pointer;
pub mod profile;
pub mod registry;
pub mod resource;
pub mod serializer;
pub mod visitor;
pub mod writer;

pub use application::{ApplicationContext, ApplicationContextBuilder};
pub use beans::{Bean, BeanContext};
pub use condition::{evaluate_condition, parse_condition, Clause, ConditionExpr, Operator};
pub use config::{ResourceConfig, ResourceConfigLoader, ResourceConfigSeq};
pub use context::ExecutionContext;
pub use delivery::{ContentDeliveryConfig, ContentDeliveryConfigBuilder, SelectorIndex};
pub use events::{
    ExecutionEvent, ExecutionEventListener, ListenerId, TracingEventListener, VisitEvent,
    VisitPhase,
};
pub use factory::{ClassHandlerFactory, ContentHandlerFactory, FileOutputStreamFactory};
pub use filter::{
    Filter, FilterProvider, StreamFilter, StreamFilterProvider, TreeFilter, TreeFilterProvider,
};
pub use interceptor::{InterceptorChain, InterceptorDefinition};
pub use memento::{Memento, MementoCaretaker};
pub use nested::{Action, InnerFailurePolicy, NestedPipelineVisitor};
pub use params::{FilterSettings, GlobalParams, ResolvedSettings};
pub use pipeline::Pipeline;
pub use pointer::{EventPointer, NodeHandle};
pub use profile::{ProfileSet, ProfileStore, DEFAULT_PROFILE};
pub use registry::{BeanIdStore, Registry};
pub use resource::{
    FileOutputStreamResource, MemoryOutputStreamResource, OutputResourceVisitor,
    OutputStreamResource, ResourceWriter,
};
pub use serializer::{
    ContextObjectSerializer, GhostElementSerializer, SimpleSerializerVisitor, TextSerializerVisitor,
};
pub use visitor::{
    Capabilities, ContentHandler, ResourceConfigExpander, Visitor, VisitorAppender, VisitorBinding,
    VisitorId,
};
pub use writer::{OutputBuffer, SharedWriter};
