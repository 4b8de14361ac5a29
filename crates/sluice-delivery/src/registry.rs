//! Typed object registry, resource config storage and visitor lifecycle.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use sluice_types::{BeanId, Result, SluiceError, TypedKey};

use crate::config::{ResourceConfig, ResourceConfigSeq};
use crate::visitor::{Visitor, VisitorId};

/// Name of the sequence that configs added one at a time are appended to.
pub const USER_CONFIG_SEQ: &str = "user";

/// Application-scoped registry.
///
/// Holds arbitrary shared objects addressed by [`TypedKey`]s, the resource
/// config sequences that make up the application's configuration, configs
/// synthesized by expanders, and the visitors to close on shutdown.
#[derive(Default)]
pub struct Registry {
    objects: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    seqs: RwLock<Vec<ResourceConfigSeq>>,
    expanded: RwLock<Vec<ResourceConfig>>,
    lifecycle: Mutex<Vec<Arc<dyn Visitor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // --- typed objects -----------------------------------------------------

    /// Register `value` under `key`. Registering a second object under the
    /// same key is an error.
    pub fn register<T: Any + Send + Sync>(&self, key: &TypedKey<T>, value: T) -> Result<Arc<T>> {
        let value = Arc::new(value);
        self.register_arc(key, value.clone())?;
        Ok(value)
    }

    pub fn register_arc<T: Any + Send + Sync>(
        &self,
        key: &TypedKey<T>,
        value: Arc<T>,
    ) -> Result<()> {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        if objects.contains_key(key.name()) {
            return Err(SluiceError::DuplicateRegistration {
                key: key.name().to_string(),
            });
        }
        objects.insert(key.name().to_string(), value);
        Ok(())
    }

    pub fn lookup<T: Any + Send + Sync>(&self, key: &TypedKey<T>) -> Option<Arc<T>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.get(key.name()).cloned()?.downcast::<T>().ok()
    }

    pub fn deregister<T: Any + Send + Sync>(&self, key: &TypedKey<T>) -> Option<Arc<T>> {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.remove(key.name())?.downcast::<T>().ok()
    }

    pub fn contains<T>(&self, key: &TypedKey<T>) -> bool {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key.name())
    }

    // --- resource configs --------------------------------------------------

    pub fn add_resource_config_seq(&self, seq: ResourceConfigSeq) {
        tracing::debug!(
            seq = %seq.name(),
            configs = seq.len(),
            system = seq.is_system(),
            "Resource config sequence added"
        );
        self.seqs.write().unwrap_or_else(|e| e.into_inner()).push(seq);
    }

    /// Append one config to the user sequence, creating it on first use.
    pub fn add_resource_config(&self, config: ResourceConfig) {
        let mut seqs = self.seqs.write().unwrap_or_else(|e| e.into_inner());
        match seqs.iter_mut().find(|s| s.name() == USER_CONFIG_SEQ && !s.is_system()) {
            Some(seq) => seq.push(config),
            None => {
                let mut seq = ResourceConfigSeq::new(USER_CONFIG_SEQ);
                seq.push(config);
                seqs.push(seq);
            }
        }
    }

    /// Record a config synthesized by an expander.
    pub fn register_resource_config(&self, config: ResourceConfig) {
        tracing::debug!(selector = %config.selector_str(), "Expanded resource config registered");
        self.expanded
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(config);
    }

    /// Every config of every sequence, in registration order. Expanded
    /// configs are not included.
    pub fn resource_configs(&self) -> Vec<ResourceConfig> {
        self.seqs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .flat_map(|s| s.iter().cloned())
            .collect()
    }

    pub fn expanded_resource_configs(&self) -> Vec<ResourceConfig> {
        self.expanded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The `global-parameters` configs, sequences first, then expanded ones.
    pub fn global_parameter_configs(&self) -> Vec<ResourceConfig> {
        let mut configs = self.resource_configs();
        configs.extend(self.expanded_resource_configs());
        configs.retain(ResourceConfig::is_global_parameters);
        configs
    }

    // --- lifecycle ---------------------------------------------------------

    /// Track a visitor so that [`Registry::close`] reaches it. A visitor
    /// instance is tracked once however often it is registered.
    pub fn register_lifecycle(&self, visitor: Arc<dyn Visitor>) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        let id = VisitorId::of(visitor.as_ref());
        if !lifecycle.iter().any(|v| VisitorId::of(v.as_ref()) == id) {
            lifecycle.push(visitor);
        }
    }

    /// Close every tracked visitor. Visitors are released afterwards, so a
    /// second call closes nothing.
    pub fn close(&self) {
        let visitors: Vec<_> = self
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for visitor in visitors {
            tracing::debug!(handler = %visitor.handler_name(), "Closing visitor");
            visitor.close();
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<&String> = objects.keys().collect();
        keys.sort();
        f.debug_struct("Registry")
            .field("objects", &keys)
            .field("configs", &self.resource_configs().len())
            .field("expanded", &self.expanded_resource_configs().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BeanIdStore
// ---------------------------------------------------------------------------

/// Hands out one [`BeanId`] per bean name.
#[derive(Debug, Default)]
pub struct BeanIdStore {
    ids: RwLock<HashMap<String, BeanId>>,
}

impl BeanIdStore {
    /// The id for `name`, registering it on first use.
    pub fn register(&self, name: &str) -> BeanId {
        let mut ids = self.ids.write().unwrap_or_else(|e| e.into_inner());
        let next = ids.len();
        ids.entry(name.to_string())
            .or_insert_with(|| BeanId {
                name: name.to_string(),
                index: next,
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<BeanId> {
        self.ids
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::Capabilities;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn typed_registration_and_lookup() {
        let registry = Registry::new();
        let key: TypedKey<String> = TypedKey::new("greeting");
        registry.register(&key, "hello".to_string()).unwrap();
        assert_eq!(registry.lookup(&key).as_deref().map(String::as_str), Some("hello"));

        let wrong: TypedKey<u32> = TypedKey::new("greeting");
        assert!(registry.lookup(&wrong).is_none(), "type mismatch yields nothing");

        let err = registry.register(&key, "again".to_string()).unwrap_err();
        assert!(matches!(err, SluiceError::DuplicateRegistration { ref key } if key == "greeting"));

        assert!(registry.deregister(&key).is_some());
        assert!(!registry.contains(&key));
        registry.register(&key, "again".to_string()).unwrap();
    }

    #[test]
    fn configs_keep_sequences_and_expansions_apart() {
        let registry = Registry::new();
        let mut system = ResourceConfigSeq::system("defaults");
        system.push(ResourceConfig::global_parameters().unwrap().with_param("x", "1"));
        registry.add_resource_config_seq(system);
        registry.add_resource_config(ResourceConfig::new("a").unwrap());
        registry.add_resource_config(ResourceConfig::new("b").unwrap());
        registry.register_resource_config(ResourceConfig::new("c").unwrap());

        let selectors: Vec<String> = registry
            .resource_configs()
            .iter()
            .map(|c| c.selector_str().to_string())
            .collect();
        assert_eq!(selectors, vec!["global-parameters", "a", "b"]);
        assert_eq!(registry.expanded_resource_configs().len(), 1);
        assert_eq!(registry.global_parameter_configs().len(), 1);
    }

    struct Closing(Arc<AtomicUsize>);

    impl Visitor for Closing {
        fn capabilities(&self) -> Capabilities {
            Capabilities::BEFORE
        }

        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn lifecycle_close_reaches_each_visitor_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let registry = Registry::new();
        let visitor: Arc<dyn Visitor> = Arc::new(Closing(count.clone()));
        registry.register_lifecycle(visitor.clone());
        registry.register_lifecycle(visitor);
        registry.register_lifecycle(Arc::new(Closing(count.clone())));
        registry.close();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        registry.close();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn bean_ids_are_stable() {
        let store = BeanIdStore::default();
        let a = store.register("order");
        let b = store.register("customer");
        assert_eq!(store.register("order"), a);
        assert_eq!(b.index, 1);
        assert_eq!(store.get("customer"), Some(b));
        assert_eq!(store.len(), 2);
    }
}
