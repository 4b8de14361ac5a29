//! The [`Pipeline`] facade: configure visitors, then filter documents.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use sluice_types::{Result, SluiceError};
use sluice_xml::NodeRef;

use crate::application::ApplicationContext;
use crate::config::ResourceConfig;
use crate::context::ExecutionContext;
use crate::delivery::{ContentDeliveryConfig, ContentDeliveryConfigBuilder};
use crate::events::ExecutionEvent;
use crate::interceptor::{interceptor_chain_key, InterceptorChain};
use crate::params::FilterSettings;
use crate::profile::DEFAULT_PROFILE;
use crate::visitor::{ContentHandler, Visitor};
use crate::writer::{self, OutputBuffer, SharedWriter};

/// Entry point for configuring and running document passes.
///
/// Visitors and configs must be added before the first pass: the content
/// delivery config of each profile is built once, on first use, and then
/// shared by every pass.
pub struct Pipeline {
    app: Arc<ApplicationContext>,
    configs: RwLock<HashMap<String, Arc<ContentDeliveryConfig>>>,
}

impl Pipeline {
    /// A pipeline over a default application context.
    pub fn new() -> Result<Self> {
        Ok(Self::with_application_context(ApplicationContext::builder().build()?))
    }

    pub fn with_application_context(app: Arc<ApplicationContext>) -> Self {
        Self {
            app,
            configs: RwLock::new(HashMap::new()),
        }
    }

    pub fn application_context(&self) -> &Arc<ApplicationContext> {
        &self.app
    }

    fn ensure_unbuilt(&self) -> Result<()> {
        let built = !self
            .configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty();
        if built {
            return Err(SluiceError::Config(
                "pipeline already in use: add visitors before the first filter call".into(),
            ));
        }
        Ok(())
    }

    // --- configuration -----------------------------------------------------

    /// Bind `visitor` to `selector`.
    pub fn add_visitor(&mut self, visitor: impl Visitor + 'static, selector: &str) -> Result<()> {
        self.add_visitor_arc(Arc::new(visitor), selector)
    }

    pub fn add_visitor_arc(&mut self, visitor: Arc<dyn Visitor>, selector: &str) -> Result<()> {
        self.add_resource_config(ResourceConfig::with_instance(
            selector,
            ContentHandler::Visitor(visitor),
        )?)
    }

    pub fn add_resource_config(&mut self, config: ResourceConfig) -> Result<()> {
        self.ensure_unbuilt()?;
        tracing::debug!(selector = %config.selector_str(), "Resource config added");
        self.app.registry().add_resource_config(config);
        Ok(())
    }

    /// Override the filter settings. Later calls win.
    pub fn set_filter_settings(&mut self, settings: FilterSettings) -> Result<()> {
        self.add_resource_config(settings.to_config()?)
    }

    /// Replace the interceptor chain wrapped around every visitor.
    pub fn set_interceptors(&mut self, chain: InterceptorChain) -> Result<()> {
        self.ensure_unbuilt()?;
        let key = interceptor_chain_key();
        self.app.registry().deregister(&key);
        self.app.registry().register(&key, chain)?;
        Ok(())
    }

    // --- execution ---------------------------------------------------------

    /// The content delivery config for `profile`, built on first use.
    pub fn content_delivery_config(&self, profile: &str) -> Result<Arc<ContentDeliveryConfig>> {
        {
            let configs = self.configs.read().unwrap_or_else(|e| e.into_inner());
            if let Some(config) = configs.get(profile) {
                return Ok(config.clone());
            }
        }

        let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
        if let Some(config) = configs.get(profile) {
            return Ok(config.clone());
        }
        let set = self.app.profile_store().get(profile);
        let config = Arc::new(ContentDeliveryConfigBuilder::new(self.app.clone(), set).build()?);
        configs.insert(profile.to_string(), config.clone());
        Ok(config)
    }

    pub fn create_execution_context(&self) -> Result<ExecutionContext> {
        self.create_execution_context_for_profile(DEFAULT_PROFILE)
    }

    pub fn create_execution_context_for_profile(&self, profile: &str) -> Result<ExecutionContext> {
        let config = self.content_delivery_config(profile)?;
        Ok(ExecutionContext::new(self.app.clone(), config))
    }

    /// Run one pass over `source`, writing markup to `sink`.
    ///
    /// Without a sink the output is discarded. A [`SluiceError::Terminate`]
    /// raised by a visitor ends the pass early and is not an error.
    pub fn filter_source(
        &self,
        ctx: &mut ExecutionContext,
        source: NodeRef<'_>,
        sink: Option<SharedWriter>,
    ) -> Result<()> {
        ctx.push_out(sink);
        ctx.notify(&ExecutionEvent::FilterStarted {
            timestamp: Utc::now(),
        });

        let filter = ctx.content_delivery_config().create_filter();
        let mut result = match filter.filter(source, ctx) {
            Err(e) if e.is_termination() => {
                tracing::debug!(path = %source.path(), "Filtering terminated early");
                Ok(())
            }
            other => other,
        };

        if let Some(out) = ctx.pop_out() {
            if ctx.settings().close_sink {
                let flushed = writer::flush(&out);
                result = result.and(flushed.map_err(SluiceError::from));
            }
        }

        ctx.notify(&ExecutionEvent::FilterCompleted {
            error: result.as_ref().err(),
            timestamp: Utc::now(),
        });
        result
    }

    /// Filter an XML string with a fresh default-profile context.
    pub fn filter_str(&self, xml: &str) -> Result<String> {
        let mut ctx = self.create_execution_context()?;
        self.filter_str_with(&mut ctx, xml)
    }

    pub fn filter_str_with(&self, ctx: &mut ExecutionContext, xml: &str) -> Result<String> {
        let document = sluice_xml::parse(xml)?;
        let out = OutputBuffer::new();
        self.filter_source(ctx, document.root(), Some(out.writer()))?;
        Ok(out.take())
    }

    /// Close every visitor created for this pipeline.
    pub fn close(&self) {
        self.app.registry().close();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let configs = self.configs.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Pipeline")
            .field("app", &self.app)
            .field("profiles", &configs.keys().collect::<Vec<_>>())
            .finish()
    }
}
