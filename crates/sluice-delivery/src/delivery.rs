//! Content delivery configuration: the frozen set of visitor bindings for one
//! profile, indexed by target element, plus the chosen filter provider.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sluice_types::{Result, SluiceError};
use sluice_xml::{NodeRef, DOCUMENT_SELECTOR};

use crate::application::ApplicationContext;
use crate::beans::BeanContext;
use crate::config::ResourceConfig;
use crate::filter::{Filter, FilterProvider};
use crate::interceptor::{interceptor_chain_key, InterceptorChain};
use crate::params::{ResolvedSettings, ANY_FILTER};
use crate::profile::ProfileSet;
use crate::visitor::{Capabilities, ContentHandler, Visitor, VisitorBinding};

const WILDCARD: &str = "*";

// ---------------------------------------------------------------------------
// SelectorIndex
// ---------------------------------------------------------------------------

/// Bindings grouped by target key (element local name, `*` or `#document`).
#[derive(Debug, Default)]
pub struct SelectorIndex {
    groups: HashMap<String, Vec<Arc<VisitorBinding>>>,
}

impl SelectorIndex {
    fn insert(&mut self, binding: Arc<VisitorBinding>) {
        let key = binding.config().selector().target_key();
        self.groups.entry(key).or_default().push(binding);
    }

    /// Order each group by descending selector specificity, breaking ties
    /// by profile specificity. The sort is stable, so registration order
    /// decides what remains.
    fn sort(&mut self, profile: &ProfileSet) {
        for group in self.groups.values_mut() {
            group.sort_by(|a, b| {
                let (a, b) = (a.config(), b.config());
                b.selector()
                    .specificity()
                    .cmp(&a.selector().specificity())
                    .then_with(|| {
                        let weight = |c: &ResourceConfig| {
                            profile.match_weight(c.target_profile()).unwrap_or(0)
                        };
                        weight(b).cmp(&weight(a))
                    })
            });
        }
    }

    pub fn group(&self, key: &str) -> &[Arc<VisitorBinding>] {
        self.groups.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Candidate bindings for `node`: its own group, then the `*` group.
    /// Character data uses its parent's groups.
    pub fn candidates(&self, node: NodeRef<'_>) -> Vec<Arc<VisitorBinding>> {
        let node = if node.is_document() || node.is_element() {
            node
        } else {
            match node.parent() {
                Some(p) => p,
                None => return Vec::new(),
            }
        };
        let own = match node.local_name() {
            Some(local) => self.group(local),
            None => self.group(DOCUMENT_SELECTOR),
        };
        own.iter().chain(self.group(WILDCARD)).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// ContentDeliveryConfig
// ---------------------------------------------------------------------------

pub struct ContentDeliveryConfig {
    profile: ProfileSet,
    bindings: Vec<Arc<VisitorBinding>>,
    index: SelectorIndex,
    settings: ResolvedSettings,
    provider: Arc<dyn FilterProvider>,
}

impl ContentDeliveryConfig {
    pub fn profile(&self) -> &ProfileSet {
        &self.profile
    }

    /// Every binding, in registration order.
    pub fn bindings(&self) -> &[Arc<VisitorBinding>] {
        &self.bindings
    }

    pub fn index(&self) -> &SelectorIndex {
        &self.index
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    pub fn filter_provider(&self) -> &Arc<dyn FilterProvider> {
        &self.provider
    }

    pub fn create_filter(&self) -> Box<dyn Filter> {
        self.provider.create_filter()
    }

    /// Bindings whose selector and condition hold for `node`, in dispatch order.
    pub fn matching(&self, node: NodeRef<'_>, beans: &BeanContext) -> Vec<Arc<VisitorBinding>> {
        let mut candidates = self.index.candidates(node);
        candidates.retain(|b| {
            b.config().selector_matches(node) && b.config().condition_holds(node, beans)
        });
        candidates
    }

    /// Bindings with `capability`, in registration order.
    pub fn with_capability(
        &self,
        capability: Capabilities,
    ) -> impl Iterator<Item = &Arc<VisitorBinding>> {
        self.bindings.iter().filter(move |b| b.has(capability))
    }
}

impl fmt::Debug for ContentDeliveryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentDeliveryConfig")
            .field("profile", &self.profile.base())
            .field("bindings", &self.bindings)
            .field("settings", &self.settings)
            .field("filter", &self.provider.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds the content delivery config for one profile set.
pub struct ContentDeliveryConfigBuilder {
    app: Arc<ApplicationContext>,
    profile: ProfileSet,
    chain: InterceptorChain,
    bindings: Vec<Arc<VisitorBinding>>,
}

impl ContentDeliveryConfigBuilder {
    pub fn new(app: Arc<ApplicationContext>, profile: ProfileSet) -> Self {
        let chain = app
            .registry()
            .lookup(&interceptor_chain_key())
            .map(|c| c.as_ref().clone())
            .unwrap_or_default();
        Self {
            app,
            profile,
            chain,
            bindings: Vec::new(),
        }
    }

    pub fn build(mut self) -> Result<ContentDeliveryConfig> {
        let settings = ResolvedSettings::from_params(&self.app.global_params());
        tracing::debug!(
            profile = %self.profile.base(),
            ?settings,
            "Building content delivery config"
        );

        for config in self.app.registry().resource_configs() {
            if config.is_global_parameters() {
                continue;
            }
            if self.profile.match_weight(config.target_profile()).is_none() {
                tracing::debug!(
                    selector = %config.selector_str(),
                    target_profile = ?config.target_profile(),
                    "Resource config not targeted at this profile"
                );
                continue;
            }
            self.extract(Arc::new(config))?;
        }

        let mut index = SelectorIndex::default();
        for binding in &self.bindings {
            index.insert(binding.clone());
        }
        if settings.sort_resources {
            index.sort(&self.profile);
        }

        let provider = self.select_provider(&settings.filter_type)?;
        tracing::debug!(
            filter = %provider.name(),
            bindings = self.bindings.len(),
            "Content delivery config built"
        );

        Ok(ContentDeliveryConfig {
            profile: self.profile,
            bindings: self.bindings,
            index,
            settings,
            provider,
        })
    }

    /// Turn one config into bindings.
    fn extract(&mut self, config: Arc<ResourceConfig>) -> Result<()> {
        let handler = match config.handler() {
            Some(handler) => handler.clone(),
            None => match self.create_handler(&config)? {
                Some(handler) => handler,
                None => return Ok(()),
            },
        };

        match handler {
            ContentHandler::Visitor(visitor) => {
                self.add_visitor(visitor.clone(), config.clone())?;
                if visitor.capabilities().contains(Capabilities::EXPANDER) {
                    let expanded = visitor.expand(&config)?;
                    self.extract_expanded(expanded)?;
                }
            }
            ContentHandler::Expander(expander) => {
                let expanded = expander.expand(&config)?;
                self.extract_expanded(expanded)?;
            }
            ContentHandler::Appender(appender) => {
                for (visitor, visitor_config) in appender.visitors(&config)? {
                    self.add_visitor(visitor, Arc::new(visitor_config))?;
                }
            }
        }
        Ok(())
    }

    fn create_handler(&self, config: &ResourceConfig) -> Result<Option<ContentHandler>> {
        if config.resource().is_none() {
            return Ok(None);
        }
        let resource_type = if config.is_class_resource() {
            crate::config::CLASS_RESOURCE_TYPE
        } else {
            config.resource_type().unwrap_or_default()
        };
        match self.app.factory(resource_type) {
            Some(factory) => factory.create(config).map(Some),
            None if config.is_class_resource() => Err(SluiceError::UnknownFactory {
                resource_type: resource_type.to_string(),
            }),
            None => {
                tracing::debug!(
                    selector = %config.selector_str(),
                    resource_type = %resource_type,
                    "No content handler factory for resource type; config ignored"
                );
                Ok(None)
            }
        }
    }

    fn extract_expanded(&mut self, configs: Vec<ResourceConfig>) -> Result<()> {
        for expanded in configs {
            self.app.registry().register_resource_config(expanded.clone());
            if self.profile.match_weight(expanded.target_profile()).is_some() {
                self.extract(Arc::new(expanded))?;
            }
        }
        Ok(())
    }

    fn add_visitor(
        &mut self,
        visitor: Arc<dyn Visitor>,
        config: Arc<ResourceConfig>,
    ) -> Result<()> {
        visitor.initialize(&config, &self.app)?;
        self.app.registry().register_lifecycle(visitor.clone());
        if (visitor.capabilities() - Capabilities::EXPANDER).is_empty() {
            return Ok(());
        }
        let wrapped = self.chain.apply(visitor.clone(), &config);
        tracing::debug!(
            selector = %config.selector_str(),
            handler = %visitor.handler_name(),
            capabilities = ?visitor.capabilities(),
            "Visitor bound"
        );
        self.bindings
            .push(Arc::new(VisitorBinding::new(wrapped, visitor, config)));
        Ok(())
    }

    fn select_provider(&self, filter_type: &str) -> Result<Arc<dyn FilterProvider>> {
        let compatible: Vec<&Arc<dyn FilterProvider>> = self
            .app
            .filter_providers()
            .iter()
            .filter(|p| p.is_provider(&self.bindings))
            .collect();
        let names = || compatible.iter().map(|p| p.name().to_string()).collect::<Vec<_>>();

        let chosen = if filter_type == ANY_FILTER {
            compatible.first()
        } else {
            compatible.iter().find(|p| p.name() == filter_type)
        };
        chosen.map(|p| Arc::clone(p)).ok_or_else(|| SluiceError::NoCompatibleFilter {
            requested: filter_type.to_string(),
            compatible: names(),
        })
    }
}
