//! Execution events for observability.
//!
//! Listeners registered on an [`ExecutionContext`] receive an
//! [`ExecutionEvent`] for the start and end of every filter run and for
//! every guarded visit call, successful or not.

use std::fmt;

use chrono::{DateTime, Utc};
use sluice_types::{SluiceError, VisitSequence};
use sluice_xml::NodeRef;

use crate::config::ResourceConfig;
use crate::context::ExecutionContext;
use crate::visitor::Visitor;

/// The visit method an event reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisitPhase {
    Before,
    ChildText,
    ChildElement,
    After,
    PostFragment,
}

impl VisitPhase {
    /// The event label used in visit error reports.
    pub fn label(&self) -> &'static str {
        match self {
            VisitPhase::Before => "start",
            VisitPhase::ChildText => "text",
            VisitPhase::ChildElement => "child",
            VisitPhase::After => "end",
            VisitPhase::PostFragment => "post",
        }
    }

    /// The visit sequence the phase belongs to, if any.
    pub fn sequence(&self) -> Option<VisitSequence> {
        match self {
            VisitPhase::Before => Some(VisitSequence::Before),
            VisitPhase::ChildText => Some(VisitSequence::ChildText),
            VisitPhase::After => Some(VisitSequence::After),
            VisitPhase::ChildElement | VisitPhase::PostFragment => None,
        }
    }
}

impl fmt::Display for VisitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One dispatched visit call.
pub struct VisitEvent<'a> {
    pub phase: VisitPhase,
    pub fragment: NodeRef<'a>,
    pub config: &'a ResourceConfig,
    pub visitor: &'a dyn Visitor,
    pub error: Option<&'a SluiceError>,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Debug for VisitEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisitEvent")
            .field("phase", &self.phase)
            .field("fragment", &self.fragment.path())
            .field("selector", &self.config.selector_str())
            .field("handler", &self.visitor.handler_name())
            .field("error", &self.error)
            .finish()
    }
}

#[derive(Debug)]
pub enum ExecutionEvent<'a> {
    FilterStarted {
        timestamp: DateTime<Utc>,
    },
    Visit(VisitEvent<'a>),
    FilterCompleted {
        error: Option<&'a SluiceError>,
        timestamp: DateTime<Utc>,
    },
}

/// Receives execution events. Listeners may act on the context they are
/// notified through.
pub trait ExecutionEventListener {
    fn on_event(&self, event: &ExecutionEvent<'_>, ctx: &mut ExecutionContext);
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventListener;

impl ExecutionEventListener for TracingEventListener {
    fn on_event(&self, event: &ExecutionEvent<'_>, _ctx: &mut ExecutionContext) {
        match event {
            ExecutionEvent::FilterStarted { .. } => tracing::debug!("Filtering started"),
            ExecutionEvent::FilterCompleted { error, .. } => match error {
                Some(e) => tracing::debug!(error = %e, "Filtering completed with error"),
                None => tracing::debug!("Filtering completed"),
            },
            ExecutionEvent::Visit(visit) => match visit.error {
                Some(e) => tracing::debug!(
                    event = %visit.phase,
                    path = %visit.fragment.path(),
                    selector = %visit.config.selector_str(),
                    handler = %visit.visitor.handler_name(),
                    error = %e,
                    "Visit failed"
                ),
                None => tracing::debug!(
                    event = %visit.phase,
                    path = %visit.fragment.path(),
                    selector = %visit.config.selector_str(),
                    handler = %visit.visitor.handler_name(),
                    "Visit"
                ),
            },
        }
    }
}
