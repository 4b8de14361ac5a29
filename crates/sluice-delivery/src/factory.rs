//! Content handler factories.
//!
//! Factories are looked up by resource type string. The `"class"` factory
//! maps class names to explicit constructors; there is no reflection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sluice_types::{Result, SluiceError};

use crate::config::{ResourceConfig, CLASS_RESOURCE_TYPE};
use crate::resource::{FileOutputStreamResource, OutputResourceVisitor};
use crate::serializer::{
    ContextObjectSerializer, GhostElementSerializer, SimpleSerializerVisitor, TextSerializerVisitor,
};
use crate::visitor::ContentHandler;

/// Builds content handlers for resource configs of one resource type.
pub trait ContentHandlerFactory: Send + Sync {
    fn resource_type(&self) -> &str;

    fn create(&self, config: &ResourceConfig) -> Result<ContentHandler>;
}

pub type HandlerConstructor =
    Arc<dyn Fn(&ResourceConfig) -> Result<ContentHandler> + Send + Sync>;

/// Resolves class resources through registered constructors.
#[derive(Clone, Default)]
pub struct ClassHandlerFactory {
    constructors: HashMap<String, HandlerConstructor>,
}

impl ClassHandlerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that knows the built-in serializer visitors.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register(SimpleSerializerVisitor::CLASS, |_| {
            Ok(ContentHandler::visitor(SimpleSerializerVisitor))
        });
        factory.register(GhostElementSerializer::CLASS, |_| {
            Ok(ContentHandler::visitor(GhostElementSerializer))
        });
        factory.register(TextSerializerVisitor::CLASS, |_| {
            Ok(ContentHandler::visitor(TextSerializerVisitor))
        });
        factory.register(ContextObjectSerializer::CLASS, |_| {
            Ok(ContentHandler::visitor(ContextObjectSerializer))
        });
        factory
    }

    pub fn register<F>(&mut self, class: impl Into<String>, constructor: F)
    where
        F: Fn(&ResourceConfig) -> Result<ContentHandler> + Send + Sync + 'static,
    {
        self.constructors.insert(class.into(), Arc::new(constructor));
    }

    pub fn has(&self, class: &str) -> bool {
        self.constructors.contains_key(class)
    }
}

impl ContentHandlerFactory for ClassHandlerFactory {
    fn resource_type(&self) -> &str {
        CLASS_RESOURCE_TYPE
    }

    fn create(&self, config: &ResourceConfig) -> Result<ContentHandler> {
        let class = config
            .resource()
            .ok_or_else(|| SluiceError::Config("class resource config has no class name".into()))?;
        let constructor = self
            .constructors
            .get(class)
            .ok_or_else(|| SluiceError::UnknownClass {
                class: class.to_string(),
            })?;
        constructor(config)
    }
}

impl fmt::Debug for ClassHandlerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<&String> = self.constructors.keys().collect();
        classes.sort();
        f.debug_struct("ClassHandlerFactory")
            .field("classes", &classes)
            .finish()
    }
}

/// Binds a file output stream resource.
///
/// The config's resource is the resource name and its `file` parameter the
/// path to write.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOutputStreamFactory;

impl FileOutputStreamFactory {
    pub const RESOURCE_TYPE: &'static str = "file-output-stream";
}

impl ContentHandlerFactory for FileOutputStreamFactory {
    fn resource_type(&self) -> &str {
        Self::RESOURCE_TYPE
    }

    fn create(&self, config: &ResourceConfig) -> Result<ContentHandler> {
        let name = config
            .resource()
            .ok_or_else(|| SluiceError::Config("file output stream has no resource name".into()))?;
        let path = config.param_str("file").ok_or_else(|| {
            SluiceError::Config(format!("file output stream '{name}' has no 'file' parameter"))
        })?;
        Ok(ContentHandler::visitor(OutputResourceVisitor::new(
            FileOutputStreamResource::new(name, path),
        )))
    }
}
