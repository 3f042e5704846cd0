//! Progress reporting seam.

/// Receives progress events from the send and receive loops.
///
/// Rendering is up to the embedder; every method has an empty default.
pub trait ProgressCallback: Send {
    fn on_file_count(&mut self, _count: u64) {}
    fn on_file_name(&mut self, _name: &str) {}
    fn on_file_size(&mut self, _size: u64) {}
    /// Bytes of the current file transferred so far.
    fn on_step(&mut self, _bytes: u64) {}
    fn on_file_done(&mut self) {}
}

/// Optional callback wrapper so the loops don't branch on every event.
pub(crate) struct Progress<'a> {
    inner: Option<&'a mut dyn ProgressCallback>,
}

impl<'a> Progress<'a> {
    pub(crate) fn new(inner: Option<&'a mut dyn ProgressCallback>) -> Self {
        Self { inner }
    }

    pub(crate) fn file_count(&mut self, count: u64) {
        if let Some(p) = &mut self.inner {
            p.on_file_count(count);
        }
    }

    pub(crate) fn file_name(&mut self, name: &str) {
        if let Some(p) = &mut self.inner {
            p.on_file_name(name);
        }
    }

    pub(crate) fn file_size(&mut self, size: u64) {
        if let Some(p) = &mut self.inner {
            p.on_file_size(size);
        }
    }

    pub(crate) fn step(&mut self, bytes: u64) {
        if let Some(p) = &mut self.inner {
            p.on_step(bytes);
        }
    }

    pub(crate) fn file_done(&mut self) {
        if let Some(p) = &mut self.inner {
            p.on_file_done();
        }
    }
}
