//! The library context: the entry point users see first.
//!
//! The original design kept the graph, the storage registry, the backend registry, and the
//! gradient-mode flag in process-wide globals. Here they are explicit state owned by a
//! [`Kitsune`] value; tensors hold a reference-counted handle to the context and route every
//! operation through it. Nothing in the crate touches global mutable state, and two contexts
//! never interfere.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use kitsune_backend::{Backend, BackendRegistry};
use kitsune_backend_cpu::CPU;
use kitsune_storage::StorageRegistry;
use tracing::trace;

use crate::builder::Builder;
use crate::graph::Graph;
use crate::Result;

/// The Kitsune library context.
///
/// Owns the backend registry, the storage registry, the computation graph, and the gradient
/// mode. The context is single-threaded by contract; interior mutability serializes access
/// within one thread and nothing here is `Sync`.
pub struct Kitsune {
    backends: BackendRegistry,
    storages: RefCell<StorageRegistry>,
    graph: RefCell<Graph>,
    grad_enabled: Cell<bool>,
}

// NOTE: Construction interface.

impl Kitsune {
    /// Creates a context with the CPU backend registered. Gradient mode starts enabled.
    pub fn new() -> Result<Rc<Self>> {
        Self::with_backends(&[])
    }

    /// Creates a context with the CPU backend plus the given extra backends. Registration
    /// happens here, before any storage can exist, which keeps the registration-first invariant
    /// by construction.
    pub fn with_backends(extra: &[&'static dyn Backend]) -> Result<Rc<Self>> {
        let mut backends = BackendRegistry::new();
        backends.register(&CPU)?;
        for &backend in extra {
            backends.register(backend)?;
        }
        trace!("context created with {} backends", backends.len());
        Ok(Rc::new(Self {
            backends,
            storages: RefCell::new(StorageRegistry::new()),
            graph: RefCell::new(Graph::new()),
            grad_enabled: Cell::new(true),
        }))
    }

    /// Starts building a tensor with the given user shape.
    pub fn tensor(self: &Rc<Self>, shape: impl Into<Vec<usize>>) -> Builder {
        Builder::new(self, shape)
    }

    pub(crate) fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Runs a closure with exclusive access to the graph and the storage registry.
    pub(crate) fn scope<T>(&self, call: impl FnOnce(&mut Graph, &mut StorageRegistry) -> T) -> T {
        let mut graph = self.graph.borrow_mut();
        let mut storages = self.storages.borrow_mut();
        call(&mut graph, &mut storages)
    }
}

// NOTE: Gradient mode interface.

impl Kitsune {
    /// Newly created leaves will require gradients.
    pub fn enable_grad(&self) {
        self.grad_enabled.set(true);
    }

    /// Newly created leaves will not require gradients.
    pub fn disable_grad(&self) {
        self.grad_enabled.set(false);
    }

    /// Returns the current gradient mode.
    pub fn is_grad_enabled(&self) -> bool {
        self.grad_enabled.get()
    }

    /// Zeroes every gradient accumulator in the graph.
    pub fn zero_grad_all(&self) -> Result<()> {
        self.graph.borrow_mut().zero_grad_all()
    }
}

// NOTE: Introspection interface.

impl Kitsune {
    /// Number of live graph nodes.
    pub fn node_count(&self) -> usize {
        self.graph.borrow().node_count()
    }

    /// Number of live storages.
    pub fn storage_count(&self) -> usize {
        self.storages.borrow().len()
    }

    /// Renders the graph in Graphviz syntax.
    pub fn to_dot(&self) -> String {
        self.graph.borrow().to_dot()
    }

    /// Writes the Graphviz rendering to a file.
    pub fn dump_dot(&self, path: impl AsRef<Path>) -> Result<()> {
        self.graph.borrow().dump_dot(path)
    }
}

// NOTE: Teardown interface.

impl Kitsune {
    /// Frees every remaining node and storage. Anything still live is logged as an error and
    /// released anyway; teardown always completes.
    pub fn cleanup(&self) {
        let mut graph = self.graph.borrow_mut();
        let mut storages = self.storages.borrow_mut();
        graph.clear(&mut storages);
        storages.clear();
    }
}

impl Drop for Kitsune {
    fn drop(&mut self) {
        self.cleanup();
    }
}
