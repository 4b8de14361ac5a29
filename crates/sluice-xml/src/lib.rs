//! Document model, XML reading/writing, and selector paths for Sluice.
//!
//! - [`Document`] / [`NodeRef`]: an arena tree with stable fragment identity ([`NodeKey`])
//! - [`parse`]: quick-xml driven reader with namespace resolution
//! - [`writer`]: start/end tag and character-data markup
//! - [`SelectorPath`]: path selectors used to bind content handlers to fragments
//!
//! # Example
//! ```
//! let doc = sluice_xml::parse("<order><item/></order>").unwrap();
//! let item = doc.document_element().unwrap().child_elements().next().unwrap();
//! let selector = sluice_xml::SelectorPath::parse("order/item").unwrap();
//! assert!(selector.matches(item, &Default::default()));
//! assert_eq!(item.path(), "/order/item");
//! ```

pub mod document;
mod reader;
pub mod selector;
pub mod writer;

pub use document::{
    Attribute, Document, DocumentId, ElementData, NodeId, NodeKey, NodeKind, NodeRef, QName,
};
pub use reader::parse;
pub use selector::{
    ElementStep, NameTest, Predicate, SelectorExpr, SelectorPath, Step, DOCUMENT_SELECTOR,
};
pub use writer::WriteOptions;
