//! Named output stream resources.
//!
//! An [`OutputResourceVisitor`] binds its resource to the execution context
//! when the fragment it is bound to starts. Visitors then open the resource
//! by name through [`ResourceWriter`]. The writer is closed when the binding
//! fragment completes, or at the end of the pass.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use sluice_types::{Result, SluiceError, TypedKey};
use sluice_xml::NodeRef;

use crate::context::ExecutionContext;
use crate::visitor::{Capabilities, Visitor};
use crate::writer::SharedWriter;

/// A named destination for output.
pub trait OutputStreamResource: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self) -> Result<SharedWriter>;
}

fn resource_key(name: &str) -> TypedKey<Arc<dyn OutputStreamResource>> {
    TypedKey::new(format!("resource:{name}"))
}

fn writer_key(name: &str) -> TypedKey<SharedWriter> {
    TypedKey::new(format!("output-stream:{name}"))
}

// ---------------------------------------------------------------------------
// ResourceWriter
// ---------------------------------------------------------------------------

/// Opens and closes named output resources on an execution context.
pub struct ResourceWriter;

impl ResourceWriter {
    /// The writer for `name`, opened on first use. `None` if no resource of
    /// that name is bound to the context.
    pub fn open(ctx: &mut ExecutionContext, name: &str) -> Result<Option<SharedWriter>> {
        if let Some(writer) = ctx.get(&writer_key(name)) {
            return Ok(Some(writer.clone()));
        }
        let Some(resource) = ctx.get(&resource_key(name)).cloned() else {
            return Ok(None);
        };
        let writer = resource.open()?;
        tracing::debug!(resource = %name, "Output resource opened");
        ctx.put(&writer_key(name), writer.clone());
        Ok(Some(writer))
    }

    /// Like [`ResourceWriter::open`], failing if the resource is not bound.
    pub fn open_required(ctx: &mut ExecutionContext, name: &str) -> Result<SharedWriter> {
        Self::open(ctx, name)?.ok_or_else(|| SluiceError::OutputResourceNotBound {
            resource: name.to_string(),
        })
    }

    pub fn is_bound(ctx: &ExecutionContext, name: &str) -> bool {
        ctx.get(&resource_key(name)).is_some()
    }

    /// Flush and release the writer for `name`, if one was opened.
    pub fn close(ctx: &mut ExecutionContext, name: &str) -> Result<()> {
        if let Some(writer) = ctx.remove(&writer_key(name)) {
            writer.borrow_mut().flush()?;
            tracing::debug!(resource = %name, "Output resource closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OutputResourceVisitor
// ---------------------------------------------------------------------------

pub struct OutputResourceVisitor {
    resource: Arc<dyn OutputStreamResource>,
}

impl OutputResourceVisitor {
    pub fn new(resource: impl OutputStreamResource + 'static) -> Self {
        Self {
            resource: Arc::new(resource),
        }
    }

    pub fn resource_name(&self) -> &str {
        self.resource.name()
    }

    fn unbind(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let name = self.resource.name();
        ResourceWriter::close(ctx, name)?;
        ctx.remove(&resource_key(name));
        Ok(())
    }
}

impl Visitor for OutputResourceVisitor {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BEFORE | Capabilities::POST_FRAGMENT | Capabilities::POST_EXECUTION
    }

    fn visit_before(&self, _element: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.put(&resource_key(self.resource.name()), self.resource.clone());
        Ok(())
    }

    fn on_post_fragment(&self, _fragment: NodeRef<'_>, ctx: &mut ExecutionContext) -> Result<()> {
        self.unbind(ctx)
    }

    fn on_post_execution(&self, ctx: &mut ExecutionContext) -> Result<()> {
        self.unbind(ctx)
    }

    fn handler_name(&self) -> String {
        format!("OutputResourceVisitor({})", self.resource.name())
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Collects output in memory. Clones share the same content.
#[derive(Debug, Clone)]
pub struct MemoryOutputStreamResource {
    name: String,
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryOutputStreamResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

struct MemoryWriter(Arc<Mutex<Vec<u8>>>);

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputStreamResource for MemoryOutputStreamResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<SharedWriter> {
        Ok(Rc::new(RefCell::new(MemoryWriter(self.bytes.clone()))))
    }
}

/// Writes to a file, created (or truncated) when the resource is first opened.
#[derive(Debug, Clone)]
pub struct FileOutputStreamResource {
    name: String,
    path: PathBuf,
}

impl FileOutputStreamResource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl OutputStreamResource for FileOutputStreamResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<SharedWriter> {
        let file = File::create(&self.path)?;
        Ok(Rc::new(RefCell::new(BufWriter::new(file))))
    }
}
