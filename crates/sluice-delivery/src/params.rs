//! Global parameters and filter settings.
//!
//! Global parameters are carried by `global-parameters` resource configs.
//! A name resolves with this precedence:
//! 1. an explicit (non-system) config,
//! 2. a system property,
//! 3. a system-default config.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sluice_types::Result;
use sluice_xml::WriteOptions;

use crate::config::{ResourceConfig, ResourceConfigSeq};

pub const FILTER_TYPE: &str = "stream.filter.type";
pub const DEFAULT_SERIALIZATION: &str = "default.serialization.on";
pub const TERMINATE_ON_VISITOR_EXCEPTION: &str = "terminate.on.visitor.exception";
pub const REWRITE_ENTITIES: &str = "entities.rewrite";
pub const CLOSE_SINK: &str = "close.sink";
pub const CLOSE_EMPTY_ELEMENTS: &str = "close.empty.elements";
pub const MAX_NODE_DEPTH: &str = "max.node.depth";
pub const SORT_RESOURCES: &str = "sort.resources";

/// Filter type that accepts the first compatible provider.
pub const ANY_FILTER: &str = "any";

/// Environment variable a system property is read from: `SLUICE_` followed
/// by the upper-cased name with dots replaced by underscores.
pub fn env_var_name(param: &str) -> String {
    format!("SLUICE_{}", param.replace(['.', '-'], "_").to_uppercase())
}

// ---------------------------------------------------------------------------
// GlobalParams
// ---------------------------------------------------------------------------

/// Resolved view of the global parameters of one application.
#[derive(Debug, Clone, Default)]
pub struct GlobalParams {
    values: HashMap<String, String>,
}

impl GlobalParams {
    /// Resolve parameters from `configs` in registration order.
    ///
    /// `system_property` yields the system property for a name, if set. It
    /// is consulted for names defined by system configs and for names no
    /// config defines at all.
    pub fn resolve(
        configs: &[ResourceConfig],
        system_property: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let mut explicit: HashMap<String, String> = HashMap::new();
        let mut defaults: HashMap<String, String> = HashMap::new();
        for config in configs.iter().filter(|c| c.is_global_parameters()) {
            let target = if config.is_system() {
                &mut defaults
            } else {
                &mut explicit
            };
            for name in config.params().keys() {
                if let Some(value) = config.param_str(name) {
                    target.insert(name.clone(), value);
                }
            }
        }

        let mut values = defaults;
        for (name, value) in values.iter_mut() {
            if let Some(property) = system_property(name) {
                *value = property;
            }
        }
        values.extend(explicit);
        for name in [
            FILTER_TYPE,
            DEFAULT_SERIALIZATION,
            TERMINATE_ON_VISITOR_EXCEPTION,
            REWRITE_ENTITIES,
            CLOSE_SINK,
            CLOSE_EMPTY_ELEMENTS,
            MAX_NODE_DEPTH,
            SORT_RESOURCES,
        ] {
            if !values.contains_key(name) {
                if let Some(property) = system_property(name) {
                    values.insert(name.to_string(), property);
                }
            }
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_usize(&self, name: &str, default: usize) -> usize {
        self.get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

// ---------------------------------------------------------------------------
// FilterSettings
// ---------------------------------------------------------------------------

/// User-facing filter settings, applied as an explicit `global-parameters` config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub filter_type: String,
    pub default_serialization: bool,
    pub terminate_on_visitor_exception: bool,
    pub rewrite_entities: bool,
    pub close_sink: bool,
    pub close_empty_elements: bool,
    pub max_node_depth: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            filter_type: ANY_FILTER.to_string(),
            default_serialization: true,
            terminate_on_visitor_exception: true,
            rewrite_entities: true,
            close_sink: true,
            close_empty_elements: false,
            max_node_depth: 1,
        }
    }
}

impl FilterSettings {
    pub fn stream() -> Self {
        Self {
            filter_type: "stream".to_string(),
            ..Self::default()
        }
    }

    pub fn tree() -> Self {
        Self {
            filter_type: "tree".to_string(),
            ..Self::default()
        }
    }

    pub fn to_config(&self) -> Result<ResourceConfig> {
        Ok(ResourceConfig::global_parameters()?
            .with_param(FILTER_TYPE, self.filter_type.clone())
            .with_param(DEFAULT_SERIALIZATION, self.default_serialization)
            .with_param(TERMINATE_ON_VISITOR_EXCEPTION, self.terminate_on_visitor_exception)
            .with_param(REWRITE_ENTITIES, self.rewrite_entities)
            .with_param(CLOSE_SINK, self.close_sink)
            .with_param(CLOSE_EMPTY_ELEMENTS, self.close_empty_elements)
            .with_param(MAX_NODE_DEPTH, self.max_node_depth))
    }
}

/// The engine's default parameters, as a system sequence.
pub fn default_parameters() -> Result<ResourceConfigSeq> {
    let mut seq = ResourceConfigSeq::system("sluice-defaults");
    seq.push(
        FilterSettings::default()
            .to_config()?
            .with_param(SORT_RESOURCES, true),
    );
    Ok(seq)
}

// ---------------------------------------------------------------------------
// ResolvedSettings
// ---------------------------------------------------------------------------

/// Settings a content delivery config was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub filter_type: String,
    pub default_serialization: bool,
    pub terminate_on_visitor_exception: bool,
    pub rewrite_entities: bool,
    pub close_sink: bool,
    pub close_empty_elements: bool,
    pub max_node_depth: usize,
    pub sort_resources: bool,
}

impl ResolvedSettings {
    pub fn from_params(params: &GlobalParams) -> Self {
        let defaults = FilterSettings::default();
        Self {
            filter_type: params
                .get(FILTER_TYPE)
                .map(|t| t.trim().to_lowercase())
                .unwrap_or(defaults.filter_type),
            default_serialization: params
                .get_bool(DEFAULT_SERIALIZATION, defaults.default_serialization),
            terminate_on_visitor_exception: params.get_bool(
                TERMINATE_ON_VISITOR_EXCEPTION,
                defaults.terminate_on_visitor_exception,
            ),
            rewrite_entities: params.get_bool(REWRITE_ENTITIES, defaults.rewrite_entities),
            close_sink: params.get_bool(CLOSE_SINK, defaults.close_sink),
            close_empty_elements: params
                .get_bool(CLOSE_EMPTY_ELEMENTS, defaults.close_empty_elements),
            max_node_depth: params.get_usize(MAX_NODE_DEPTH, defaults.max_node_depth),
            sort_resources: params.get_bool(SORT_RESOURCES, true),
        }
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            rewrite_entities: self.rewrite_entities,
            close_empty_elements: self.close_empty_elements,
        }
    }
}

impl Default for ResolvedSettings {
    fn default() -> Self {
        Self::from_params(&GlobalParams::default())
    }
}
