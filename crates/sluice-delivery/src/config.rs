//! Resource configs: the declarative description of one handler binding.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::Value;
use sluice_types::Result;
use sluice_xml::{NodeRef, SelectorPath};

use crate::beans::BeanContext;
use crate::condition::{evaluate_condition, parse_condition, ConditionExpr};
use crate::visitor::ContentHandler;

/// Selector of configs that only carry global parameters.
pub const GLOBAL_PARAMETERS: &str = "global-parameters";

/// Resource type resolved through the class handler factory.
pub const CLASS_RESOURCE_TYPE: &str = "class";

/// One handler binding: a selector, the handler to bind, and its parameters.
#[derive(Clone)]
pub struct ResourceConfig {
    selector: SelectorPath,
    resource: Option<String>,
    resource_type: Option<String>,
    params: BTreeMap<String, Value>,
    namespaces: HashMap<String, String>,
    condition: Option<(String, ConditionExpr)>,
    target_profile: Option<String>,
    system: bool,
    handler: Option<ContentHandler>,
}

impl ResourceConfig {
    pub fn new(selector: &str) -> Result<Self> {
        Ok(Self {
            selector: SelectorPath::parse(selector)?,
            resource: None,
            resource_type: None,
            params: BTreeMap::new(),
            namespaces: HashMap::new(),
            condition: None,
            target_profile: None,
            system: false,
            handler: None,
        })
    }

    /// A config for the named class, resolved through the `"class"` factory.
    pub fn class(selector: &str, class: impl Into<String>) -> Result<Self> {
        Ok(Self::new(selector)?.with_resource(class))
    }

    /// A config bound to an already constructed handler.
    pub fn with_instance(selector: &str, handler: ContentHandler) -> Result<Self> {
        let mut config = Self::new(selector)?;
        config.handler = Some(handler);
        Ok(config)
    }

    pub fn global_parameters() -> Result<Self> {
        Self::new(GLOBAL_PARAMETERS)
    }

    // --- builder -----------------------------------------------------------

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), uri.into());
        self
    }

    pub fn with_condition(mut self, condition: &str) -> Result<Self> {
        let expr = parse_condition(condition)?;
        self.condition = Some((condition.to_string(), expr));
        Ok(self)
    }

    pub fn with_target_profile(mut self, profile: impl Into<String>) -> Self {
        self.target_profile = Some(profile.into());
        self
    }

    pub fn with_system(mut self, system: bool) -> Self {
        self.system = system;
        self
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(name.into(), value.into());
    }

    // --- accessors ---------------------------------------------------------

    pub fn selector(&self) -> &SelectorPath {
        &self.selector
    }

    pub fn selector_str(&self) -> &str {
        self.selector.as_str()
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// A parameter rendered as text. String values are returned unquoted.
    pub fn param_str(&self, name: &str) -> Option<String> {
        self.params.get(name).map(value_text)
    }

    pub fn param_bool(&self, name: &str) -> Option<bool> {
        match self.params.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_usize(&self, name: &str) -> Option<usize> {
        match self.params.get(name)? {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn namespaces(&self) -> &HashMap<String, String> {
        &self.namespaces
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_ref().map(|(source, _)| source.as_str())
    }

    pub fn target_profile(&self) -> Option<&str> {
        self.target_profile.as_deref()
    }

    pub fn is_system(&self) -> bool {
        self.system
    }

    pub fn handler(&self) -> Option<&ContentHandler> {
        self.handler.as_ref()
    }

    /// True when a resource is set and the type is absent or `"class"`.
    pub fn is_class_resource(&self) -> bool {
        self.resource.is_some()
            && self
                .resource_type
                .as_deref()
                .map_or(true, |t| t == CLASS_RESOURCE_TYPE)
    }

    pub fn is_global_parameters(&self) -> bool {
        self.selector.as_str() == GLOBAL_PARAMETERS
    }

    // --- matching ----------------------------------------------------------

    pub fn selector_matches(&self, node: NodeRef<'_>) -> bool {
        self.selector.matches(node, &self.namespaces)
    }

    /// Evaluates the config's condition, if any, for `node`.
    ///
    /// `attr.*` keys read the node's attributes (the parent's for character
    /// data), `param.*` keys read this config and `context.*` keys read beans.
    pub fn condition_holds(&self, node: NodeRef<'_>, beans: &BeanContext) -> bool {
        let Some((_, expr)) = &self.condition else {
            return true;
        };
        let element = if node.is_element() {
            Some(node)
        } else {
            node.parent()
        };
        evaluate_condition(expr, &|key: &str| {
            let (scope, name) = key.split_once('.')?;
            match scope {
                "attr" => element.and_then(|e| e.attribute(name)).map(str::to_string),
                "param" => self.param_str(name),
                "context" => beans.get_by_name(name).map(value_text),
                _ => None,
            }
        })
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Debug for ResourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("selector", &self.selector.as_str())
            .field("resource", &self.resource)
            .field("resource_type", &self.resource_type)
            .field("params", &self.params)
            .field("condition", &self.condition())
            .field("target_profile", &self.target_profile)
            .field("system", &self.system)
            .field("handler", &self.handler)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config sequences and loaders
// ---------------------------------------------------------------------------

/// An ordered, named list of resource configs.
#[derive(Debug, Clone, Default)]
pub struct ResourceConfigSeq {
    name: String,
    system: bool,
    configs: Vec<ResourceConfig>,
}

impl ResourceConfigSeq {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system: false,
            configs: Vec::new(),
        }
    }

    /// A sequence of engine defaults. Every config pushed to it is marked system.
    pub fn system(name: impl Into<String>) -> Self {
        Self {
            system: true,
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_system(&self) -> bool {
        self.system
    }

    pub fn push(&mut self, config: ResourceConfig) {
        let config = if self.system {
            config.with_system(true)
        } else {
            config
        };
        self.configs.push(config);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceConfig> {
        self.configs.iter()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

impl<'a> IntoIterator for &'a ResourceConfigSeq {
    type Item = &'a ResourceConfig;
    type IntoIter = std::slice::Iter<'a, ResourceConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.configs.iter()
    }
}

/// Produces a config sequence from a raw configuration source.
pub trait ResourceConfigLoader: Send + Sync {
    fn load(&self, name: &str, source: &str) -> Result<ResourceConfigSeq>;
}
