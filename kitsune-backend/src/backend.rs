//! The backend operation table and the raw storage contract.

use std::rc::Rc;

use as_any::AsAny;
use kitsune_layout::Layout;

use crate::Result;

/// Backend-opaque per-storage state.
///
/// A raw storage couples a [`Layout`] with whatever buffer representation the owning backend
/// chose. The engine reads and rewrites the layout when it creates views (transposes, reshapes,
/// broadcasts) but never inspects the buffer; backends downcast handles back to their concrete
/// type before touching data. Shallow copies produced by [`Backend::shallow_copy`] alias the
/// buffer of their source while carrying an independent layout.
pub trait RawStorage: AsAny {
    /// Returns the current layout of this storage.
    fn layout(&self) -> Layout;

    /// Replaces the layout of this storage. The buffer is untouched, so the new layout must
    /// address the same allocation.
    fn set_layout(&self, layout: Layout);
}

/// The operation table a storage backend provides.
///
/// Implementations are `'static` descriptor values registered once into a
/// [`BackendRegistry`](crate::BackendRegistry) and dispatched through `&'static dyn Backend`.
/// All numeric operations are single-precision. Operands passed to the numeric methods are
/// guaranteed by the caller to originate from this backend; a handle from another backend is
/// reported as `ForeignHandle`.
pub trait Backend {
    /// The unique name this backend registers under.
    fn name(&self) -> &'static str;

    /// Allocates a fresh buffer for the given layout and returns its raw storage.
    fn storage_init(&self, layout: Layout) -> Result<Rc<dyn RawStorage>>;

    /// Duplicates a handle: the copy holds the same buffer but an independent layout.
    fn shallow_copy(&self, src: &dyn RawStorage) -> Result<Rc<dyn RawStorage>>;

    /// Copies the elements of `src` into `dst` following both layouts. `dst` is expected to be
    /// contiguous with the same shape as `src`.
    fn contiguous_copy(&self, src: &dyn RawStorage, dst: &dyn RawStorage) -> Result<()>;

    /// Releases the buffer allocated by [`storage_init`](Backend::storage_init). The handle
    /// itself stays owned by the storage layer and is reclaimed when its last reference drops.
    fn storage_free(&self, handle: &dyn RawStorage) -> Result<()>;

    /// Sets every element to `value`.
    fn fill(&self, handle: &dyn RawStorage, value: f32) -> Result<()>;

    /// Sets every element to a uniformly distributed random value in `[0, 1)`.
    fn fill_rand(&self, handle: &dyn RawStorage) -> Result<()>;

    /// Computes `r = alpha * x + y` elementwise over the layouts of the operands. The operand
    /// layouts must share one shape; zero strides repeat elements. `r` may alias `y`.
    fn axpy(&self, alpha: f32, x: &dyn RawStorage, y: &dyn RawStorage, r: &dyn RawStorage) -> Result<()>;

    /// Computes `c = alpha * a . b + beta * c`, a matrix product over the two trailing axes
    /// batched over the leading ones. Batch strides may be zero to broadcast.
    fn gemm(
        &self,
        alpha: f32,
        a: &dyn RawStorage,
        b: &dyn RawStorage,
        beta: f32,
        c: &dyn RawStorage,
    ) -> Result<()>;

    /// Reads one element at the given multi-dimensional index.
    fn get(&self, handle: &dyn RawStorage, indices: &[usize]) -> Result<f32>;

    /// Writes one element at the given multi-dimensional index.
    fn set(&self, handle: &dyn RawStorage, indices: &[usize], value: f32) -> Result<()>;
}
