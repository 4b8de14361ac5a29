//! Output writers used during a pass.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

/// A writer shared by the contexts of one pass and its nested passes.
pub type SharedWriter = Rc<RefCell<dyn Write>>;

/// An in-memory writer whose content is read back once a fragment completes.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`SharedWriter`] appending to this buffer.
    pub fn writer(&self) -> SharedWriter {
        self.bytes.clone()
    }

    pub fn write_str(&self, s: &str) {
        self.bytes.borrow_mut().extend_from_slice(s.as_bytes());
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }

    /// Return the content and empty the buffer.
    pub fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.bytes.borrow_mut());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.borrow().is_empty()
    }
}

pub(crate) fn write_to(writer: &SharedWriter, s: &str) -> io::Result<()> {
    writer.borrow_mut().write_all(s.as_bytes())
}

pub(crate) fn flush(writer: &SharedWriter) -> io::Result<()> {
    writer.borrow_mut().flush()
}
