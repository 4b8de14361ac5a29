//! Arena-backed document model.
//!
//! A [`Document`] owns every node in a flat `Vec`. Fragments are addressed by
//! [`NodeId`] and viewed through the borrowed, `Copy` handle [`NodeRef`].
//! Every document gets a process-wide unique [`DocumentId`], so a
//! [`NodeKey`] identifies a fragment across all documents of a pass,
//! including detached copies.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Identity of a fragment: two fragments are the same iff their keys are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub document: DocumentId,
    pub node: NodeId,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document.0, self.node.0)
    }
}

// ---------------------------------------------------------------------------
// Names and node data
// ---------------------------------------------------------------------------

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            prefix: None,
            local: local.into(),
        }
    }

    pub fn with_namespace(
        namespace: impl Into<String>,
        prefix: Option<&str>,
        local: impl Into<String>,
    ) -> Self {
        Self {
            namespace: Some(namespace.into()),
            prefix: prefix.map(String::from),
            local: local.into(),
        }
    }

    /// `prefix:local`, or just `local` when unprefixed.
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// An element attribute. Namespace declarations are kept as plain attributes
/// so a serialized element round-trips its `xmlns` bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: QName::local(name),
            value: value.into(),
        }
    }

    pub fn is_namespace_declaration(&self) -> bool {
        self.name.prefix.as_deref() == Some("xmlns")
            || (self.name.prefix.is_none() && self.name.local == "xmlns")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub name: QName,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(ElementData),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// An owned document tree. Node `0` is always the document node.
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    nodes: Vec<NodeData>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            id: DocumentId(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed)),
            nodes: vec![NodeData {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn root_id(&self) -> NodeId {
        NodeId(0)
    }

    /// The document node.
    pub fn root(&self) -> NodeRef<'_> {
        self.node(NodeId(0))
    }

    /// The first element child of the document node.
    pub fn document_element(&self) -> Option<NodeRef<'_>> {
        self.root().children().find(|n| n.is_element())
    }

    /// View a node by id.
    ///
    /// Ids are only meaningful for the document that issued them.
    pub fn node(&self, id: NodeId) -> NodeRef<'_> {
        debug_assert!(id.0 < self.nodes.len(), "node id out of range");
        NodeRef { doc: self, id }
    }

    pub fn get(&self, id: NodeId) -> Option<NodeRef<'_>> {
        (id.0 < self.nodes.len()).then(|| NodeRef { doc: self, id })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn append_element(
        &mut self,
        parent: NodeId,
        name: QName,
        attributes: Vec<Attribute>,
    ) -> NodeId {
        self.push(parent, NodeKind::Element(ElementData { name, attributes }))
    }

    pub fn append_text(&mut self, parent: NodeId, text: impl Into<String>) -> NodeId {
        self.push(parent, NodeKind::Text(text.into()))
    }

    pub fn append_cdata(&mut self, parent: NodeId, text: impl Into<String>) -> NodeId {
        self.push(parent, NodeKind::CData(text.into()))
    }

    pub fn append_comment(&mut self, parent: NodeId, text: impl Into<String>) -> NodeId {
        self.push(parent, NodeKind::Comment(text.into()))
    }

    /// Sets (or replaces) an unqualified attribute on an element node.
    pub fn set_attribute(&mut self, element: NodeId, name: &str, value: impl Into<String>) {
        if let NodeKind::Element(data) = &mut self.nodes[element.0].kind {
            let value = value.into();
            match data
                .attributes
                .iter_mut()
                .find(|a| a.name.prefix.is_none() && a.name.local == name)
            {
                Some(existing) => existing.value = value,
                None => data.attributes.push(Attribute::new(name, value)),
            }
        }
    }

    /// Deep-copies `source` (from any document) under `parent`.
    ///
    /// `max_depth` bounds how many levels of descendant elements are copied:
    /// `0` means unlimited and `1` copies `source` with its direct child
    /// elements. Character data of every copied element is always kept.
    pub fn import(&mut self, parent: NodeId, source: NodeRef<'_>, max_depth: usize) -> NodeId {
        self.import_level(parent, source, 1, max_depth)
    }

    fn import_level(
        &mut self,
        parent: NodeId,
        source: NodeRef<'_>,
        level: usize,
        max_depth: usize,
    ) -> NodeId {
        let copy = self.push(parent, source.kind().clone());
        for child in source.children() {
            if !child.is_element() {
                self.push(copy, child.kind().clone());
            } else if max_depth == 0 || level <= max_depth {
                self.import_level(copy, child, level + 1, max_depth);
            }
        }
        copy
    }

    /// Detaches a depth-limited deep copy of `source` into a standalone
    /// document whose document node is the copy's only ancestor.
    pub fn detach(source: NodeRef<'_>, max_depth: usize) -> Document {
        let mut doc = Document::new();
        let root = doc.root_id();
        if source.is_document() {
            for child in source.children() {
                doc.import(root, child, max_depth);
            }
        } else {
            doc.import(root, source, max_depth);
        }
        doc
    }
}

// ---------------------------------------------------------------------------
// NodeRef
// ---------------------------------------------------------------------------

/// A borrowed view of one node in a [`Document`].
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    doc: &'a Document,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    fn data(&self) -> &'a NodeData {
        &self.doc.nodes[self.id.0]
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn key(&self) -> NodeKey {
        NodeKey {
            document: self.doc.id,
            node: self.id,
        }
    }

    pub fn document(&self) -> &'a Document {
        self.doc
    }

    pub fn kind(&self) -> &'a NodeKind {
        &self.data().kind
    }

    pub fn is_document(&self) -> bool {
        matches!(self.data().kind, NodeKind::Document)
    }

    pub fn is_element(&self) -> bool {
        matches!(self.data().kind, NodeKind::Element(_))
    }

    /// Text or CDATA.
    pub fn is_text(&self) -> bool {
        matches!(self.data().kind, NodeKind::Text(_) | NodeKind::CData(_))
    }

    pub fn element(&self) -> Option<&'a ElementData> {
        match &self.data().kind {
            NodeKind::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&'a QName> {
        self.element().map(|e| &e.name)
    }

    pub fn local_name(&self) -> Option<&'a str> {
        self.name().map(|n| n.local.as_str())
    }

    pub fn attributes(&self) -> &'a [Attribute] {
        self.element().map(|e| e.attributes.as_slice()).unwrap_or(&[])
    }

    /// Attribute value by qualified name (`id`, `xlink:href`).
    pub fn attribute(&self, name: &str) -> Option<&'a str> {
        self.attributes()
            .iter()
            .find(|a| a.name.qualified() == name)
            .map(|a| a.value.as_str())
    }

    pub fn attribute_ns(&self, namespace: &str, local: &str) -> Option<&'a str> {
        self.attributes()
            .iter()
            .find(|a| a.name.namespace.as_deref() == Some(namespace) && a.name.local == local)
            .map(|a| a.value.as_str())
    }

    /// Character content of a text, CDATA or comment node.
    pub fn text(&self) -> Option<&'a str> {
        match &self.data().kind {
            NodeKind::Text(t) | NodeKind::CData(t) | NodeKind::Comment(t) => Some(t),
            _ => None,
        }
    }

    /// Concatenated descendant text.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match &self.data().kind {
            NodeKind::Text(t) | NodeKind::CData(t) => out.push_str(t),
            NodeKind::Comment(_) => {}
            _ => self.children().for_each(|c| c.collect_text(out)),
        }
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.data().parent.map(|id| self.doc.node(id))
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let doc = self.doc;
        self.data().children.iter().map(move |&id| doc.node(id))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        self.children().filter(|c| c.is_element())
    }

    pub fn has_children(&self) -> bool {
        !self.data().children.is_empty()
    }

    /// Ancestors from the parent up to and including the document node.
    pub fn ancestors(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        std::iter::successors(self.parent(), |n| n.parent())
    }

    /// Number of element ancestors.
    pub fn depth(&self) -> usize {
        self.ancestors().filter(|a| a.is_element()).count()
    }

    /// 1-based position among element siblings with the same name.
    pub fn element_position(&self) -> usize {
        let Some(name) = self.name() else {
            return 0;
        };
        let Some(parent) = self.parent() else {
            return 1;
        };
        parent
            .child_elements()
            .take_while(|s| s.id != self.id)
            .filter(|s| {
                s.name()
                    .is_some_and(|n| n.local == name.local && n.namespace == name.namespace)
            })
            .count()
            + 1
    }

    /// Slash-separated element path, e.g. `/a/b/c` or `/a/b/#text`.
    pub fn path(&self) -> String {
        match &self.data().kind {
            NodeKind::Document => "/".to_string(),
            NodeKind::Text(_) | NodeKind::CData(_) | NodeKind::Comment(_) => {
                let leaf = if matches!(self.data().kind, NodeKind::Comment(_)) {
                    "#comment"
                } else {
                    "#text"
                };
                match self.parent() {
                    Some(p) if !p.is_document() => format!("{}/{leaf}", p.path()),
                    _ => format!("/{leaf}"),
                }
            }
            NodeKind::Element(e) => {
                let mut segments = vec![e.name.qualified()];
                segments.extend(
                    self.ancestors()
                        .filter_map(|a| a.name().map(|n| n.qualified())),
                );
                segments.reverse();
                format!("/{}", segments.join("/"))
            }
        }
    }

    /// Resolves a namespace prefix by walking `xmlns` declarations up the tree.
    pub fn lookup_namespace(&self, prefix: Option<&str>) -> Option<&'a str> {
        let wanted = match prefix {
            Some(p) => (Some("xmlns"), p),
            None => (None, "xmlns"),
        };
        std::iter::once(*self)
            .chain(self.ancestors())
            .flat_map(|n| n.attributes().iter())
            .find(|a| a.name.prefix.as_deref() == wanted.0 && a.name.local == wanted.1)
            .map(|a| a.value.as_str())
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for NodeRef<'_> {}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({} @ {})", self.path(), self.key())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
