//! Raw storage representation of the CPU backend.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kitsune_backend::RawStorage;
use kitsune_layout::Layout;

/// A CPU raw storage: a layout plus a reference-counted `f32` buffer.
///
/// Shallow copies clone the buffer handle, so every copy reads and writes the same allocation
/// while carrying its own layout. The buffer outlives the views into it; releasing it is an
/// explicit backend operation performed once per aliasing group.
pub struct CpuStorage {
    layout: Cell<Layout>,
    buffer: Rc<RefCell<Vec<f32>>>,
}

impl CpuStorage {
    /// Creates a storage over a freshly allocated zero-filled buffer.
    pub(crate) fn new(layout: Layout, len: usize) -> Self {
        Self {
            layout: Cell::new(layout),
            buffer: Rc::new(RefCell::new(vec![0.0; len])),
        }
    }

    /// Creates a storage aliasing the buffer of `other`.
    pub(crate) fn alias(other: &CpuStorage) -> Self {
        Self {
            layout: Cell::new(other.layout.get()),
            buffer: Rc::clone(&other.buffer),
        }
    }

    /// The shared buffer handle.
    pub(crate) fn buffer(&self) -> &RefCell<Vec<f32>> {
        &self.buffer
    }

    /// Drops the buffer contents. Views over the same buffer observe the release.
    pub(crate) fn release(&self) {
        *self.buffer.borrow_mut() = Vec::new();
    }
}

impl RawStorage for CpuStorage {
    fn layout(&self) -> Layout {
        self.layout.get()
    }

    fn set_layout(&self, layout: Layout) {
        self.layout.set(layout);
    }
}
