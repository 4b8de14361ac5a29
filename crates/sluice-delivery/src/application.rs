//! Application-scoped state shared by every pass of a pipeline.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use sluice_types::Result;

use crate::config::ResourceConfig;
use crate::factory::{ClassHandlerFactory, ContentHandlerFactory, FileOutputStreamFactory};
use crate::filter::{FilterProvider, StreamFilterProvider, TreeFilterProvider};
use crate::params::{self, GlobalParams};
use crate::profile::{ProfileSet, ProfileStore};
use crate::registry::{BeanIdStore, Registry};
use crate::visitor::ContentHandler;

/// Registry, handler factories, filter providers, bean ids, profiles and
/// system properties of one application.
pub struct ApplicationContext {
    registry: Registry,
    factories: RwLock<HashMap<String, Arc<dyn ContentHandlerFactory>>>,
    providers: Vec<Arc<dyn FilterProvider>>,
    bean_ids: BeanIdStore,
    profiles: ProfileStore,
    system_properties: HashMap<String, String>,
    read_env: bool,
}

impl ApplicationContext {
    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::new()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bean_id_store(&self) -> &BeanIdStore {
        &self.bean_ids
    }

    pub fn profile_store(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn filter_providers(&self) -> &[Arc<dyn FilterProvider>] {
        &self.providers
    }

    pub fn factory(&self, resource_type: &str) -> Option<Arc<dyn ContentHandlerFactory>> {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(resource_type)
            .cloned()
    }

    /// Register (or replace) the factory for its resource type.
    pub fn register_factory(&self, factory: Arc<dyn ContentHandlerFactory>) {
        let resource_type = factory.resource_type().to_string();
        tracing::debug!(resource_type = %resource_type, "Content handler factory registered");
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource_type, factory);
    }

    /// A system property: an explicitly configured one, or else the
    /// `SLUICE_*` environment variable for `name`.
    pub fn system_property(&self, name: &str) -> Option<String> {
        if let Some(value) = self.system_properties.get(name) {
            return Some(value.clone());
        }
        if self.read_env {
            std::env::var(params::env_var_name(name)).ok()
        } else {
            None
        }
    }

    /// Global parameters resolved from the registry's configs.
    pub fn global_params(&self) -> GlobalParams {
        GlobalParams::resolve(&self.registry.global_parameter_configs(), &|name| {
            self.system_property(name)
        })
    }
}

impl fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        let mut types: Vec<&String> = factories.keys().collect();
        types.sort();
        f.debug_struct("ApplicationContext")
            .field("registry", &self.registry)
            .field("factories", &types)
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct ApplicationContextBuilder {
    classes: ClassHandlerFactory,
    factories: Vec<Arc<dyn ContentHandlerFactory>>,
    providers: Option<Vec<Arc<dyn FilterProvider>>>,
    profiles: Vec<ProfileSet>,
    system_properties: HashMap<String, String>,
    read_env: bool,
}

impl ApplicationContextBuilder {
    pub fn new() -> Self {
        Self {
            classes: ClassHandlerFactory::with_builtins(),
            factories: Vec::new(),
            providers: None,
            profiles: Vec::new(),
            system_properties: HashMap::new(),
            read_env: true,
        }
    }

    pub fn with_system_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.system_properties.insert(name.into(), value.into());
        self
    }

    /// Stop system properties from being read from the environment.
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// Make a class name constructible through `"class"` resource configs.
    pub fn with_class<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ResourceConfig) -> Result<ContentHandler> + Send + Sync + 'static,
    {
        self.classes.register(name, constructor);
        self
    }

    pub fn with_factory(mut self, factory: impl ContentHandlerFactory + 'static) -> Self {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Replace the filter providers. Providers are tried in the given order.
    pub fn with_filter_providers(mut self, providers: Vec<Arc<dyn FilterProvider>>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn with_profile_set(mut self, set: ProfileSet) -> Self {
        self.profiles.push(set);
        self
    }

    pub fn build(self) -> Result<Arc<ApplicationContext>> {
        let providers = self.providers.unwrap_or_else(|| {
            vec![
                Arc::new(StreamFilterProvider) as Arc<dyn FilterProvider>,
                Arc::new(TreeFilterProvider),
            ]
        });
        let app = ApplicationContext {
            registry: Registry::new(),
            factories: RwLock::new(HashMap::new()),
            providers,
            bean_ids: BeanIdStore::default(),
            profiles: ProfileStore::default(),
            system_properties: self.system_properties,
            read_env: self.read_env,
        };
        app.registry
            .add_resource_config_seq(params::default_parameters()?);
        app.register_factory(Arc::new(self.classes));
        app.register_factory(Arc::new(FileOutputStreamFactory));
        for factory in self.factories {
            app.register_factory(factory);
        }
        for set in self.profiles {
            app.profiles.add(set);
        }
        Ok(Arc::new(app))
    }
}

impl Default for ApplicationContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
