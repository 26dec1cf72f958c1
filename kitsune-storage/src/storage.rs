//! The storage handle and its backend-dispatched operations.

use std::fmt::Debug;
use std::rc::Rc;

use kitsune_backend::{Backend, BackendRegistry, RawStorage};
use kitsune_layout::Layout;
use tracing::trace;
use uuid::Uuid;

use crate::{Result, StorageRegistry};

/// A handle to a numeric buffer plus its layout.
///
/// Handles are cheap to clone: the buffer itself lives behind the backend's raw state and is
/// shared between every storage of the same bucket. Identity is the UUID — two handles with the
/// same id are the same storage.
pub struct Storage {
    id: Uuid,
    backend: &'static dyn Backend,
    raw: Rc<dyn RawStorage>,
}

// NOTE: Construction interface.

impl Storage {
    /// Creates a fresh storage on the named backend and registers it as a new bucket root.
    ///
    /// # Parameters
    /// - `shape`: the user shape of the new storage.
    /// - `backend_name`: which backend to allocate on.
    /// - `backends`: the backend registry used to resolve the name.
    /// - `registry`: the storage registry the new storage is recorded in.
    pub fn init(
        shape: &[usize],
        backend_name: &str,
        backends: &BackendRegistry,
        registry: &mut StorageRegistry,
    ) -> Result<Self> {
        let backend = backends.get(backend_name)?;
        Self::with_backend(shape, backend, registry)
    }

    /// Creates a fresh storage on an already-resolved backend and registers it as a new bucket
    /// root.
    pub fn with_backend(
        shape: &[usize],
        backend: &'static dyn Backend,
        registry: &mut StorageRegistry,
    ) -> Result<Self> {
        let layout = Layout::new(shape)?;
        let raw = backend.storage_init(layout)?;
        let storage = Self {
            id: Uuid::new_v4(),
            backend,
            raw,
        };
        registry.register(&storage, None)?;
        trace!("created storage {} on '{}' with {layout}", storage.id, backend.name());
        Ok(storage)
    }

    /// Wraps a raw handle produced by the backend under a fresh UUID. The caller is responsible
    /// for registering the result.
    pub(crate) fn from_raw(backend: &'static dyn Backend, raw: Rc<dyn RawStorage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            raw,
        }
    }

    /// Returns the stable identity of this storage.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the backend descriptor this storage was allocated on.
    pub fn backend(&self) -> &'static dyn Backend {
        self.backend
    }

    /// Returns the backend-opaque raw state.
    pub fn raw(&self) -> &dyn RawStorage {
        self.raw.as_ref()
    }

    /// Returns the current layout.
    pub fn layout(&self) -> Layout {
        self.raw.layout()
    }
}

// NOTE: Copy and lifetime interface.

impl Storage {
    /// Creates a shallow copy: a new handle over the same buffer with an independent layout,
    /// registered into this storage's bucket.
    ///
    /// # Returns
    /// `ParentNotRegistered` if this storage is not in the registry.
    pub fn shallow_copy(&self, registry: &mut StorageRegistry) -> Result<Self> {
        let raw = self.backend.shallow_copy(self.raw())?;
        let copy = Self::from_raw(self.backend, raw);
        registry.register(&copy, Some(self))?;
        Ok(copy)
    }

    /// Returns a storage with the same elements in contiguous order.
    ///
    /// A contiguous source yields a shallow copy in the same bucket; anything else allocates a
    /// fresh bucket root of the same shape and copies elementwise across strides.
    pub fn contiguous(&self, registry: &mut StorageRegistry) -> Result<Self> {
        let layout = self.layout();
        if layout.is_contiguous() {
            return self.shallow_copy(registry);
        }
        let dense = Self::with_backend(&layout.shape()[..], self.backend, registry)?;
        if let Err(error) = self.backend.contiguous_copy(self.raw(), dense.raw()) {
            let _ = dense.free(registry);
            return Err(error.into());
        }
        Ok(dense)
    }

    /// Frees this storage. The buffer is released only when this is the last member of its
    /// bucket; otherwise the handle is simply deregistered and the buffer stays with the
    /// remaining members.
    pub fn free(self, registry: &mut StorageRegistry) -> Result<()> {
        registry.free_storage(self.id)
    }
}

// NOTE: Numeric interface.

impl Storage {
    /// Sets every element to `value`.
    pub fn fill(&self, value: f32) -> Result<()> {
        Ok(self.backend.fill(self.raw(), value)?)
    }

    /// Sets every element to a uniformly distributed random value.
    pub fn fill_rand(&self) -> Result<()> {
        Ok(self.backend.fill_rand(self.raw())?)
    }

    /// Reads one element.
    pub fn get(&self, indices: &[usize]) -> Result<f32> {
        Ok(self.backend.get(self.raw(), indices)?)
    }

    /// Writes one element.
    pub fn set(&self, indices: &[usize], value: f32) -> Result<()> {
        Ok(self.backend.set(self.raw(), indices, value)?)
    }

    /// Reads every element in logical row-major order.
    pub fn retrieve(&self) -> Result<Vec<f32>> {
        let layout = self.layout();
        (0..layout.size())
            .map(|nth| self.get(&layout.coords(nth)))
            .collect()
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            backend: self.backend,
            raw: Rc::clone(&self.raw),
        }
    }
}

impl PartialEq for Storage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Storage {}

impl Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("layout", &self.layout())
            .finish()
    }
}
