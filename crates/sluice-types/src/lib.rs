//! Shared types and errors for the Sluice content delivery engine.
//!
//! This crate provides the foundational types used across the other Sluice crates:
//! - `SluiceError`: unified error taxonomy
//! - `VisitSequence`: the before / child-text / after phases of a fragment visit
//! - `TypedKey` / `TypedMap`: type-safe keys for registries and execution contexts
//! - `BeanId`: a registered bean identifier

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

/// Unified error type for all Sluice subsystems.
///
/// The enum is `Clone` so that the first failure of a pass can be recorded on
/// the execution context and still be returned to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SluiceError {
    // === Configuration Errors ===
    #[error("Invalid selector '{selector}' at position {position}: {message}")]
    SelectorSyntax {
        selector: String,
        position: usize,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Filter type '{requested}' is not compatible with the configured content handlers. \
         Compatible filter types: [{}]. Enable debug logging to see why each filter was rejected",
        .compatible.join(", ")
    )]
    NoCompatibleFilter {
        requested: String,
        compatible: Vec<String>,
    },

    #[error("No content handler factory registered for resource type '{resource_type}'")]
    UnknownFactory { resource_type: String },

    #[error("Unknown content handler class '{class}'")]
    UnknownClass { class: String },

    #[error("Duplicate registered object for object with key [{key}]")]
    DuplicateRegistration { key: String },

    // === Visit Errors ===
    #[error(
        "Error while processing {event} event\n\nError Context\n\
         ------------------------------------------------------------\n\
         Event => {path}\n\
         Selector => {selector}\n\
         Content handler => {handler}\n\
         ------------------------------------------------------------\n"
    )]
    Visit {
        event: String,
        path: String,
        selector: String,
        handler: String,
        source: Box<SluiceError>,
    },

    #[error("Content handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    #[error("Filtering terminated")]
    Terminate,

    // === Execution Errors ===
    #[error("No memento '{key}' captured for fragment {fragment}")]
    MementoNotFound { fragment: String, key: String },

    #[error("Memento '{key}' for fragment {fragment} holds a different state type")]
    MementoTypeMismatch { fragment: String, key: String },

    #[error("Event pointer reference '{reference}' is not set on the execution context")]
    PointerDereference { reference: String },

    #[error("Fragment '{path}' is not an event pointer")]
    NotAPointer { path: String },

    #[error(
        "Output resource [{resource}] not bound to context. \
         Hint: configure an output stream resource or re-order resources"
    )]
    OutputResourceNotBound { resource: String },

    // === Document Errors ===
    #[error("XML parse error at byte {position}: {message}")]
    XmlParse { position: u64, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("{0}")]
    Other(String),
}

impl SluiceError {
    /// Shorthand for an unstructured failure raised by a content handler.
    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        SluiceError::Handler {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for the deliberate early-exit signal.
    pub fn is_termination(&self) -> bool {
        matches!(self, SluiceError::Terminate)
    }

    /// Returns `true` if the error already belongs to the engine's own taxonomy
    /// and can be rethrown without wrapping.
    pub fn is_structured(&self) -> bool {
        !matches!(
            self,
            SluiceError::Handler { .. }
                | SluiceError::Io(_)
                | SluiceError::Json(_)
                | SluiceError::Other(_)
        )
    }

    /// Returns `true` for errors raised while building a content delivery configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SluiceError::SelectorSyntax { .. }
                | SluiceError::Config(_)
                | SluiceError::NoCompatibleFilter { .. }
                | SluiceError::UnknownFactory { .. }
                | SluiceError::UnknownClass { .. }
                | SluiceError::DuplicateRegistration { .. }
        )
    }

    /// Strips any `Visit` wrappers and returns the innermost cause.
    pub fn root_cause(&self) -> &SluiceError {
        match self {
            SluiceError::Visit { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for SluiceError {
    fn from(e: std::io::Error) -> Self {
        SluiceError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for SluiceError {
    fn from(e: serde_json::Error) -> Self {
        SluiceError::Json(Arc::new(e))
    }
}

/// A convenience alias for `Result<T, SluiceError>`.
pub type Result<T> = std::result::Result<T, SluiceError>;

// ---------------------------------------------------------------------------
// VisitSequence
// ---------------------------------------------------------------------------

/// The phase of a fragment visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitSequence {
    Before,
    ChildText,
    After,
}

impl VisitSequence {
    /// The event label used in visit error reports.
    pub fn event_label(&self) -> &'static str {
        match self {
            VisitSequence::Before => "start",
            VisitSequence::ChildText => "text",
            VisitSequence::After => "end",
        }
    }
}

impl fmt::Display for VisitSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VisitSequence::Before => "BEFORE",
            VisitSequence::ChildText => "CHILD_TEXT",
            VisitSequence::After => "AFTER",
        };
        f.write_str(s)
    }
}

impl FromStr for VisitSequence {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BEFORE" => Ok(VisitSequence::Before),
            "CHILD_TEXT" => Ok(VisitSequence::ChildText),
            "AFTER" => Ok(VisitSequence::After),
            other => Err(SluiceError::Other(format!(
                "unknown visit sequence '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TypedKey / TypedMap
// ---------------------------------------------------------------------------

/// A named key that carries the type of the value stored under it.
pub struct TypedKey<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// A key with a freshly generated, globally unique name.
    pub fn unique() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<T> PartialEq for TypedKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for TypedKey<T> {}

impl<T> Hash for TypedKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl<T> fmt::Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedKey({})", self.name)
    }
}

impl<T> fmt::Display for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Heterogeneous map addressed by [`TypedKey`]s.
#[derive(Default)]
pub struct TypedMap {
    values: HashMap<String, Box<dyn Any>>,
}

impl TypedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value, returning the previous one if it had the same type.
    pub fn put<T: 'static>(&mut self, key: &TypedKey<T>, value: T) -> Option<T> {
        self.values
            .insert(key.name.clone(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn get<T: 'static>(&self, key: &TypedKey<T>) -> Option<&T> {
        self.values.get(&key.name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: 'static>(&mut self, key: &TypedKey<T>) -> Option<&mut T> {
        self.values
            .get_mut(&key.name)
            .and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove<T: 'static>(&mut self, key: &TypedKey<T>) -> Option<T> {
        self.values
            .remove(&key.name)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn contains<T>(&self, key: &TypedKey<T>) -> bool {
        self.values.contains_key(&key.name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for TypedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("TypedMap").field("keys", &keys).finish()
    }
}

// ---------------------------------------------------------------------------
// BeanId
// ---------------------------------------------------------------------------

/// Identifier of a bean registered with an application's bean id store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeanId {
    pub name: String,
    pub index: usize,
}

impl fmt::Display for BeanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visit_error_renders_context_block() {
        let err = SluiceError::Visit {
            event: "start".into(),
            path: "/a/b/c".into(),
            selector: "b/c".into(),
            handler: "my::Visitor".into(),
            source: Box::new(SluiceError::handler("my::Visitor", "boom")),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Error while processing start event"));
        assert!(msg.contains("Event => /a/b/c\n"));
        assert!(msg.contains("Selector => b/c\n"));
        assert!(msg.contains("Content handler => my::Visitor\n"));
        assert!(matches!(err.root_cause(), SluiceError::Handler { .. }));
    }

    #[test]
    fn structured_classification() {
        assert!(SluiceError::Terminate.is_structured());
        assert!(SluiceError::Terminate.is_termination());
        assert!(SluiceError::Config("x".into()).is_structured());
        assert!(SluiceError::Config("x".into()).is_configuration());
        assert!(!SluiceError::handler("h", "m").is_structured());
        assert!(!SluiceError::Other("x".into()).is_structured());
        let io: SluiceError = std::io::Error::other("disk").into();
        assert!(!io.is_structured());
    }

    #[test]
    fn no_compatible_filter_lists_candidates() {
        let err = SluiceError::NoCompatibleFilter {
            requested: "tree".into(),
            compatible: vec!["stream".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("[stream]"), "got: {msg}");
        assert!(msg.contains("debug logging"), "got: {msg}");
    }

    #[test]
    fn visit_sequence_names_round_trip() {
        for seq in [
            VisitSequence::Before,
            VisitSequence::ChildText,
            VisitSequence::After,
        ] {
            assert_eq!(seq.to_string().parse::<VisitSequence>().unwrap(), seq);
        }
        assert!("MIDDLE".parse::<VisitSequence>().is_err());
        assert_eq!(
            serde_json::to_string(&VisitSequence::ChildText).unwrap(),
            "\"CHILD_TEXT\""
        );
    }

    #[test]
    fn typed_map_is_type_safe() {
        let mut map = TypedMap::new();
        let count: TypedKey<u32> = TypedKey::new("count");
        let label: TypedKey<String> = TypedKey::new("label");

        assert!(map.put(&count, 3).is_none());
        map.put(&label, "x".to_string());
        assert_eq!(map.get(&count), Some(&3));
        assert_eq!(map.put(&count, 4), Some(3));

        // Same name, different type: lookup misses instead of panicking.
        let wrong: TypedKey<String> = TypedKey::new("count");
        assert!(map.get(&wrong).is_none());
        assert!(map.contains(&wrong));

        *map.get_mut(&count).unwrap() += 1;
        assert_eq!(map.remove(&count), Some(5));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn unique_keys_differ() {
        let a: TypedKey<()> = TypedKey::unique();
        let b: TypedKey<()> = TypedKey::unique();
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }
}
