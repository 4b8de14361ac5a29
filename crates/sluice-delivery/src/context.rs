//! Per-pass execution state.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use sluice_types::{Result, SluiceError, TypedKey, TypedMap};
use sluice_xml::NodeKey;

use crate::application::ApplicationContext;
use crate::beans::BeanContext;
use crate::delivery::ContentDeliveryConfig;
use crate::events::{ExecutionEvent, ExecutionEventListener, ListenerId};
use crate::memento::MementoCaretaker;
use crate::params::ResolvedSettings;
use crate::profile::ProfileSet;
use crate::writer::{self, SharedWriter};

/// Everything one document pass needs.
///
/// A context belongs to exactly one pass and is not shared between threads.
/// Nested passes get their own context but share the bean context of the
/// outer pass.
pub struct ExecutionContext {
    app: Arc<ApplicationContext>,
    config: Arc<ContentDeliveryConfig>,
    attributes: TypedMap,
    mementos: MementoCaretaker,
    beans: Rc<RefCell<BeanContext>>,
    termination_error: Option<SluiceError>,
    listeners: Vec<(ListenerId, Rc<dyn ExecutionEventListener>)>,
    next_listener: u64,
    out: Vec<Option<SharedWriter>>,
    suppressed: HashSet<NodeKey>,
}

impl ExecutionContext {
    pub fn new(app: Arc<ApplicationContext>, config: Arc<ContentDeliveryConfig>) -> Self {
        Self {
            app,
            config,
            attributes: TypedMap::new(),
            mementos: MementoCaretaker::new(),
            beans: Rc::new(RefCell::new(BeanContext::default())),
            termination_error: None,
            listeners: Vec::new(),
            next_listener: 0,
            out: Vec::new(),
            suppressed: HashSet::new(),
        }
    }

    pub fn application(&self) -> &Arc<ApplicationContext> {
        &self.app
    }

    pub fn content_delivery_config(&self) -> &Arc<ContentDeliveryConfig> {
        &self.config
    }

    pub fn settings(&self) -> &ResolvedSettings {
        self.config.settings()
    }

    pub fn profile(&self) -> &ProfileSet {
        self.config.profile()
    }

    // --- typed attributes --------------------------------------------------

    pub fn put<T: 'static>(&mut self, key: &TypedKey<T>, value: T) -> Option<T> {
        self.attributes.put(key, value)
    }

    pub fn get<T: 'static>(&self, key: &TypedKey<T>) -> Option<&T> {
        self.attributes.get(key)
    }

    pub fn remove<T: 'static>(&mut self, key: &TypedKey<T>) -> Option<T> {
        self.attributes.remove(key)
    }

    // --- mementos and beans ------------------------------------------------

    pub fn mementos(&self) -> &MementoCaretaker {
        &self.mementos
    }

    pub fn mementos_mut(&mut self) -> &mut MementoCaretaker {
        &mut self.mementos
    }

    pub fn bean_context(&self) -> Rc<RefCell<BeanContext>> {
        self.beans.clone()
    }

    /// Share another context's beans with this one.
    pub fn set_bean_context(&mut self, beans: Rc<RefCell<BeanContext>>) {
        self.beans = beans;
    }

    // --- termination error -------------------------------------------------

    /// The last visitor failure recorded during the pass, if any.
    pub fn termination_error(&self) -> Option<&SluiceError> {
        self.termination_error.as_ref()
    }

    pub fn set_termination_error(&mut self, error: SluiceError) {
        self.termination_error = Some(error);
    }

    pub fn take_termination_error(&mut self) -> Option<SluiceError> {
        self.termination_error.take()
    }

    // --- listeners ---------------------------------------------------------

    pub fn add_listener(&mut self, listener: impl ExecutionEventListener + 'static) -> ListenerId {
        self.add_listener_rc(Rc::new(listener))
    }

    pub fn add_listener_rc(&mut self, listener: Rc<dyn ExecutionEventListener>) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver `event` to every listener registered when the call starts.
    pub fn notify(&mut self, event: &ExecutionEvent<'_>) {
        let listeners: Vec<_> = self.listeners.iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener.on_event(event, self);
        }
    }

    // --- output ------------------------------------------------------------

    /// The current output writer. `None` means output is discarded.
    pub fn out(&self) -> Option<SharedWriter> {
        self.out.last().cloned().flatten()
    }

    pub fn write_out(&self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        if let Some(w) = self.out() {
            writer::write_to(&w, s)?;
        }
        Ok(())
    }

    pub fn push_out(&mut self, writer: Option<SharedWriter>) {
        self.out.push(writer);
    }

    pub fn pop_out(&mut self) -> Option<SharedWriter> {
        self.out.pop().flatten()
    }

    // --- serialization suppression -----------------------------------------

    /// Stop the fragment (and its subtree) from being serialized to the output.
    pub fn suppress_serialization(&mut self, fragment: NodeKey) {
        self.suppressed.insert(fragment);
    }

    pub fn is_serialization_suppressed(&self, fragment: NodeKey) -> bool {
        self.suppressed.contains(&fragment)
    }

    pub(crate) fn clear_suppression(&mut self, fragment: NodeKey) {
        self.suppressed.remove(&fragment);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("profile", &self.profile().base())
            .field("attributes", &self.attributes)
            .field("mementos", &self.mementos)
            .field("termination_error", &self.termination_error)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
