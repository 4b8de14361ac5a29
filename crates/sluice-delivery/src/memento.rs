//! Per-fragment, per-visitor transient state.
//!
//! A [`Memento`] is addressed by the fragment it belongs to, the visitor
//! instance that captured it, and a key. The [`MementoCaretaker`] lives on
//! the execution context and is discarded with it.

use std::any::Any;
use std::collections::HashMap;

use sluice_types::{Result, SluiceError};
use sluice_xml::NodeKey;

use crate::visitor::VisitorId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MementoKey {
    fragment: NodeKey,
    visitor: VisitorId,
    key: String,
}

/// Captured state for one `(fragment, visitor, key)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Memento<T> {
    fragment: NodeKey,
    visitor: VisitorId,
    key: String,
    pub state: T,
}

impl<T> Memento<T> {
    pub fn new(fragment: NodeKey, visitor: VisitorId, key: impl Into<String>, state: T) -> Self {
        Self {
            fragment,
            visitor,
            key: key.into(),
            state,
        }
    }

    pub fn fragment(&self) -> NodeKey {
        self.fragment
    }

    pub fn visitor(&self) -> VisitorId {
        self.visitor
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn store_key(&self) -> MementoKey {
        MementoKey {
            fragment: self.fragment,
            visitor: self.visitor,
            key: self.key.clone(),
        }
    }
}

#[derive(Default)]
pub struct MementoCaretaker {
    mementos: HashMap<MementoKey, Box<dyn Any>>,
}

impl MementoCaretaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the memento's state, replacing any earlier capture.
    pub fn capture<T: Clone + 'static>(&mut self, memento: &Memento<T>) {
        self.mementos
            .insert(memento.store_key(), Box::new(memento.state.clone()));
    }

    /// Overwrite `memento.state` with the captured state.
    pub fn restore<T: Clone + 'static>(&self, memento: &mut Memento<T>) -> Result<()> {
        let stored = self
            .mementos
            .get(&memento.store_key())
            .ok_or_else(|| SluiceError::MementoNotFound {
                fragment: memento.fragment.to_string(),
                key: memento.key.clone(),
            })?;
        let state = stored
            .downcast_ref::<T>()
            .ok_or_else(|| SluiceError::MementoTypeMismatch {
                fragment: memento.fragment.to_string(),
                key: memento.key.clone(),
            })?;
        memento.state = state.clone();
        Ok(())
    }

    pub fn exists<T>(&self, memento: &Memento<T>) -> bool {
        self.mementos.contains_key(&memento.store_key())
    }

    /// Restore if captured, otherwise keep the given state; apply `update`,
    /// capture the result and return it.
    pub fn stash<T: Clone + 'static>(
        &mut self,
        mut memento: Memento<T>,
        update: impl FnOnce(&mut T),
    ) -> Result<Memento<T>> {
        if self.exists(&memento) {
            self.restore(&mut memento)?;
        }
        update(&mut memento.state);
        self.capture(&memento);
        Ok(memento)
    }

    pub fn forget<T>(&mut self, memento: &Memento<T>) {
        self.mementos.remove(&memento.store_key());
    }

    /// Drop every memento captured for `fragment`.
    pub fn forget_fragment(&mut self, fragment: NodeKey) {
        self.mementos.retain(|k, _| k.fragment != fragment);
    }

    pub fn len(&self) -> usize {
        self.mementos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mementos.is_empty()
    }
}

impl std::fmt::Debug for MementoCaretaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MementoCaretaker")
            .field("len", &self.mementos.len())
            .finish()
    }
}
