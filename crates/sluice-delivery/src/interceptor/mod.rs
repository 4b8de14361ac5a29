//! Interceptors: decorators wrapped around visitors when bindings are built.
//!
//! - [`ExceptionInterceptor`]: reports every visit and applies the failure policy
//! - [`EventPointerInterceptor`]: resolves event pointers in nested passes
//!
//! A chain is applied outermost first: the first definition sees each call
//! before the others do.

mod exception;
mod pointer_proxy;

use std::fmt;
use std::sync::Arc;

use sluice_types::TypedKey;

use crate::config::ResourceConfig;
use crate::visitor::Visitor;

pub use exception::ExceptionInterceptor;
pub use pointer_proxy::EventPointerInterceptor;

pub type InterceptorFn =
    Arc<dyn Fn(Arc<dyn Visitor>, Arc<ResourceConfig>) -> Arc<dyn Visitor> + Send + Sync>;

/// One layer of an interceptor chain.
#[derive(Clone)]
pub enum InterceptorDefinition {
    Exception,
    EventPointer,
    Custom { name: String, wrap: InterceptorFn },
}

impl InterceptorDefinition {
    pub fn custom<F>(name: impl Into<String>, wrap: F) -> Self
    where
        F: Fn(Arc<dyn Visitor>, Arc<ResourceConfig>) -> Arc<dyn Visitor> + Send + Sync + 'static,
    {
        InterceptorDefinition::Custom {
            name: name.into(),
            wrap: Arc::new(wrap),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            InterceptorDefinition::Exception => "exception",
            InterceptorDefinition::EventPointer => "event-pointer",
            InterceptorDefinition::Custom { name, .. } => name,
        }
    }

    fn wrap(&self, target: Arc<dyn Visitor>, config: &Arc<ResourceConfig>) -> Arc<dyn Visitor> {
        match self {
            InterceptorDefinition::Exception => {
                Arc::new(ExceptionInterceptor::new(target, config.clone()))
            }
            InterceptorDefinition::EventPointer => {
                Arc::new(EventPointerInterceptor::new(target, config.clone()))
            }
            InterceptorDefinition::Custom { wrap, .. } => wrap(target, config.clone()),
        }
    }
}

impl fmt::Debug for InterceptorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct InterceptorChain {
    definitions: Vec<InterceptorDefinition>,
}

impl InterceptorChain {
    pub fn new(definitions: Vec<InterceptorDefinition>) -> Self {
        Self { definitions }
    }

    /// The chain used by nested (inner) pipelines.
    pub fn nested() -> Self {
        Self::new(vec![
            InterceptorDefinition::Exception,
            InterceptorDefinition::EventPointer,
        ])
    }

    pub fn definitions(&self) -> &[InterceptorDefinition] {
        &self.definitions
    }

    /// Wrap `target`, the first definition ending up outermost.
    pub fn apply(
        &self,
        target: Arc<dyn Visitor>,
        config: &Arc<ResourceConfig>,
    ) -> Arc<dyn Visitor> {
        self.definitions
            .iter()
            .rev()
            .fold(target, |inner, definition| definition.wrap(inner, config))
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new(vec![InterceptorDefinition::Exception])
    }
}

/// Registry key of an application's interceptor chain.
pub fn interceptor_chain_key() -> TypedKey<InterceptorChain> {
    TypedKey::new("interceptor-chain")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::Capabilities;

    struct Target;

    impl Visitor for Target {
        fn capabilities(&self) -> Capabilities {
            Capabilities::BEFORE | Capabilities::CHILD_TEXT
        }

        fn handler_name(&self) -> String {
            "Target".into()
        }
    }

    #[test]
    fn decorators_report_the_target_capabilities() {
        let config = Arc::new(ResourceConfig::new("a").unwrap());
        let wrapped = InterceptorChain::nested().apply(Arc::new(Target), &config);
        assert_eq!(wrapped.capabilities(), Capabilities::BEFORE | Capabilities::CHILD_TEXT);
        assert_eq!(wrapped.handler_name(), "Target");
    }

    #[test]
    fn first_definition_is_outermost() {
        let config = Arc::new(ResourceConfig::new("a").unwrap());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let tag = |label: &'static str, order: Arc<std::sync::Mutex<Vec<&'static str>>>| {
            InterceptorDefinition::custom(label, move |inner, _| {
                order.lock().unwrap().push(label);
                inner
            })
        };
        let chain =
            InterceptorChain::new(vec![tag("outer", order.clone()), tag("inner", order.clone())]);
        chain.apply(Arc::new(Target), &config);
        assert_eq!(*order.lock().unwrap(), vec!["inner", "outer"], "inner layers wrap first");
        assert_eq!(
            chain.definitions().iter().map(|d| d.name()).collect::<Vec<_>>(),
            vec!["outer", "inner"]
        );
    }
}
