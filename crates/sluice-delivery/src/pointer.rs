//! Event pointers.
//!
//! A pointer is a marker element `{urn:sluice:engine}pointer` that stands in
//! for a node of another pass. Its `reference` attribute names a
//! [`TypedKey`] under which a [`NodeHandle`] is stored on the execution
//! context, and its `visit` attribute names the visit sequence to replay.

use std::rc::Rc;

use sluice_types::{Result, SluiceError, TypedKey, VisitSequence};
use sluice_xml::{Attribute, Document, NodeId, NodeRef, QName};

use crate::context::ExecutionContext;

pub const POINTER_NAMESPACE: &str = "urn:sluice:engine";
pub const POINTER_LOCAL_NAME: &str = "pointer";
const POINTER_PREFIX: &str = "sl";
const VISIT_ATTR: &str = "visit";
const REFERENCE_ATTR: &str = "reference";

/// A node of a shared document.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    document: Rc<Document>,
    node: NodeId,
}

impl NodeHandle {
    pub fn new(document: Rc<Document>, node: NodeId) -> Self {
        Self { document, node }
    }

    pub fn node(&self) -> NodeRef<'_> {
        self.document.node(self.node)
    }

    pub fn document(&self) -> &Rc<Document> {
        &self.document
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPointer {
    reference: TypedKey<NodeHandle>,
    visit: VisitSequence,
}

impl EventPointer {
    pub fn new(reference: TypedKey<NodeHandle>, visit: VisitSequence) -> Self {
        Self { reference, visit }
    }

    pub fn reference(&self) -> &TypedKey<NodeHandle> {
        &self.reference
    }

    pub fn visit(&self) -> VisitSequence {
        self.visit
    }

    /// Whether `node` is a pointer marker element.
    pub fn is_pointer(node: NodeRef<'_>) -> bool {
        node.name().is_some_and(|n| {
            n.local == POINTER_LOCAL_NAME && n.namespace.as_deref() == Some(POINTER_NAMESPACE)
        })
    }

    /// Read the pointer a marker element encodes.
    pub fn from_node(node: NodeRef<'_>) -> Result<Self> {
        if !Self::is_pointer(node) {
            return Err(SluiceError::NotAPointer { path: node.path() });
        }
        let visit = node
            .attribute(VISIT_ATTR)
            .ok_or_else(|| SluiceError::NotAPointer { path: node.path() })?
            .parse()?;
        let reference = node
            .attribute(REFERENCE_ATTR)
            .ok_or_else(|| SluiceError::NotAPointer { path: node.path() })?;
        Ok(Self::new(TypedKey::new(reference), visit))
    }

    /// A standalone document whose only element is this pointer.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        let root = doc.root_id();
        doc.append_element(
            root,
            QName::with_namespace(POINTER_NAMESPACE, Some(POINTER_PREFIX), POINTER_LOCAL_NAME),
            vec![
                Attribute {
                    name: QName {
                        namespace: None,
                        prefix: Some("xmlns".to_string()),
                        local: POINTER_PREFIX.to_string(),
                    },
                    value: POINTER_NAMESPACE.to_string(),
                },
                Attribute::new(VISIT_ATTR, self.visit.to_string()),
                Attribute::new(REFERENCE_ATTR, self.reference.name()),
            ],
        );
        doc
    }

    /// The node the pointer refers to on `ctx`.
    pub fn dereference(&self, ctx: &ExecutionContext) -> Result<NodeHandle> {
        ctx.get(&self.reference)
            .cloned()
            .ok_or_else(|| SluiceError::PointerDereference {
                reference: self.reference.name().to_string(),
            })
    }
}
