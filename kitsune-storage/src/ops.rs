//! Broadcastable numeric operations over storages.
//!
//! These free functions are what the compute graph dispatches to. Each one resolves layouts,
//! creates whatever views it needs (shallow copies with rewritten layouts), and hands the actual
//! arithmetic to the backend. Multi-step operations run inside an allocation record so that
//! every scratch storage is released before returning, even on a partial failure; only the
//! detached output survives the record.

use kitsune_layout::{Layout, MAX_RANK};
use tracing::trace;

use crate::registry::RecordId;
use crate::{Error, Result, Storage, StorageRegistry};

/// `r = alpha * x + y`, broadcasting `x` and `y` against each other across every axis.
///
/// # Parameters
/// - `out`: the destination storage; allocated fresh when `None`, otherwise its shape must
///   match the broadcast shape.
///
/// # Returns
/// The destination storage.
pub fn axpy(
    alpha: f32,
    x: &Storage,
    y: &Storage,
    out: Option<&Storage>,
    registry: &mut StorageRegistry,
) -> Result<Storage> {
    same_backend(x, y)?;
    let record = registry.start_record();
    let result = axpy_scoped(alpha, x, y, out, registry);
    conclude(registry, record, result)
}

fn axpy_scoped(
    alpha: f32,
    x: &Storage,
    y: &Storage,
    out: Option<&Storage>,
    registry: &mut StorageRegistry,
) -> Result<Storage> {
    let mut lx = x.layout();
    let mut ly = y.layout();
    Layout::broadcast(&mut lx, &mut ly, 0, MAX_RANK)?;
    let destination = destination(&lx, x, out, registry)?;
    let xv = view(x, lx, registry)?;
    let yv = view(y, ly, registry)?;
    x.backend().axpy(alpha, xv.raw(), yv.raw(), destination.raw())?;
    Ok(destination)
}

/// `c = alpha * a . b + beta * c`, a matrix product over the two trailing axes with the leading
/// batch axes broadcast against each other.
///
/// # Parameters
/// - `out`: the destination storage; allocated fresh (zero-filled, so `beta` is moot) when
///   `None`, otherwise its shape must match the result shape.
pub fn gemm(
    alpha: f32,
    a: &Storage,
    b: &Storage,
    beta: f32,
    out: Option<&Storage>,
    registry: &mut StorageRegistry,
) -> Result<Storage> {
    same_backend(a, b)?;
    let record = registry.start_record();
    let result = gemm_scoped(alpha, a, b, beta, out, registry);
    conclude(registry, record, result)
}

fn gemm_scoped(
    alpha: f32,
    a: &Storage,
    b: &Storage,
    beta: f32,
    out: Option<&Storage>,
    registry: &mut StorageRegistry,
) -> Result<Storage> {
    let (la, lb, lc) = gemm_layouts(a.layout(), b.layout())?;
    let destination = destination(&lc, a, out, registry)?;
    let av = view(a, la, registry)?;
    let bv = view(b, lb, registry)?;
    a.backend().gemm(alpha, av.raw(), bv.raw(), beta, destination.raw())?;
    Ok(destination)
}

/// Resolves the operand and result layouts of a batched matrix product: batch axes broadcast,
/// inner extents must agree.
pub fn gemm_layouts(mut la: Layout, mut lb: Layout) -> Result<(Layout, Layout, Layout)> {
    Layout::broadcast(&mut la, &mut lb, 0, MAX_RANK - 2)?;
    if la.shape()[MAX_RANK - 1] != lb.shape()[MAX_RANK - 2] {
        return Err(Error::ShapeMismatch(la, lb));
    }
    let mut shape = *la.shape();
    shape[MAX_RANK - 1] = lb.shape()[MAX_RANK - 1];
    let lc = Layout::new(&shape)?;
    Ok((la, lb, lc))
}

/// Returns a view of `src` with the last `perm.len()` axes permuted. No data moves; the view
/// joins the source's bucket.
pub fn transpose(src: &Storage, perm: &[usize], registry: &mut StorageRegistry) -> Result<Storage> {
    let mut layout = src.layout();
    layout.transpose(perm)?;
    let view = src.shallow_copy(registry)?;
    view.raw().set_layout(layout);
    Ok(view)
}

/// Returns a storage with the requested shape over the same elements.
///
/// A regular source yields a zero-copy view in the source's bucket. A non-regular source (a
/// broadcast or otherwise strided view) is materialized contiguously first, so the result is a
/// fresh bucket root.
pub fn reshape(src: &Storage, new_shape: &[isize], registry: &mut StorageRegistry) -> Result<Storage> {
    let record = registry.start_record();
    let result = reshape_scoped(src, new_shape, registry);
    conclude(registry, record, result)
}

fn reshape_scoped(src: &Storage, new_shape: &[isize], registry: &mut StorageRegistry) -> Result<Storage> {
    if src.layout().is_regular() {
        let layout = src.layout().reshape(new_shape)?;
        let view = src.shallow_copy(registry)?;
        view.raw().set_layout(layout);
        return Ok(view);
    }
    let dense = src.contiguous(registry)?;
    let layout = dense.layout().reshape(new_shape)?;
    dense.raw().set_layout(layout);
    Ok(dense)
}

/// Sums across the masked axes: bit `i` of `mask` collapses the `i`-th of the last `ndim` axes.
///
/// The reduction is the canonical recipe: transpose the masked axes to the tail, materialize
/// contiguously, reshape to a `[kept, collapsed]` matrix, multiply by a ones-vector, and
/// reshape the resulting column back to the reduced layout. Every intermediate goes through the
/// enclosing allocation record.
pub fn sum(src: &Storage, mask: u32, ndim: usize, registry: &mut StorageRegistry) -> Result<Storage> {
    let record = registry.start_record();
    let result = sum_scoped(src, mask, ndim, registry);
    conclude(registry, record, result)
}

fn sum_scoped(src: &Storage, mask: u32, ndim: usize, registry: &mut StorageRegistry) -> Result<Storage> {
    let layout = src.layout();
    let reduced = layout.reduce(mask, ndim)?;
    let base = MAX_RANK - ndim;
    let kept = (0..ndim).filter(|axis| mask & (1 << axis) == 0);
    let masked = (0..ndim).filter(|axis| mask & (1 << axis) != 0);
    let perm: Vec<usize> = kept.chain(masked.clone()).collect();
    let collapsed: usize = masked.map(|axis| layout.shape()[base + axis]).product();
    trace!("sum over mask {mask:#b}: {layout} -> {reduced}");

    let rotated = transpose(src, &perm, registry)?;
    let dense = rotated.contiguous(registry)?;
    let rows = (layout.size() / collapsed) as isize;
    let matrix = reshape(&dense, &[rows, collapsed as isize], registry)?;
    let ones = Storage::with_backend(&[collapsed, 1], src.backend(), registry)?;
    ones.fill(1.0)?;
    let column = gemm(1.0, &matrix, &ones, 0.0, None, registry)?;
    let shape: Vec<isize> = reduced.shape().iter().map(|&extent| extent as isize).collect();
    reshape(&column, &shape, registry)
}

// NOTE: Helpers.

/// Fails unless both storages live on the same backend.
fn same_backend(a: &Storage, b: &Storage) -> Result<()> {
    if a.backend().name() != b.backend().name() {
        return Err(Error::BackendMismatch(a.backend().name(), b.backend().name()));
    }
    Ok(())
}

/// Resolves the destination of an operation: validates the shape of a caller-provided storage
/// or allocates a fresh contiguous one.
fn destination(
    layout: &Layout,
    like: &Storage,
    out: Option<&Storage>,
    registry: &mut StorageRegistry,
) -> Result<Storage> {
    match out {
        Some(out) => {
            same_backend(like, out)?;
            if out.layout().shape() != layout.shape() {
                return Err(Error::ShapeMismatch(out.layout(), *layout));
            }
            Ok(out.clone())
        }
        None => Storage::with_backend(&layout.shape()[..], like.backend(), registry),
    }
}

/// Shallow copy of `src` retargeted to the given layout.
fn view(src: &Storage, layout: Layout, registry: &mut StorageRegistry) -> Result<Storage> {
    let view = src.shallow_copy(registry)?;
    view.raw().set_layout(layout);
    Ok(view)
}

/// Detaches the operation's output from the record, then frees everything the record still
/// holds. The operation's own error wins over any cleanup error.
fn conclude(
    registry: &mut StorageRegistry,
    record: RecordId,
    result: Result<Storage>,
) -> Result<Storage> {
    if let Ok(ref output) = result {
        let _ = registry.detach(record, output);
    }
    let _ = registry.stop_record(record);
    let cleanup = registry.free_all(record);
    let output = result?;
    cleanup?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use kitsune_backend_cpu::CPU;
    use pretty_assertions::assert_eq;

    use super::*;

    fn filled(shape: &[usize], value: f32, registry: &mut StorageRegistry) -> Storage {
        let storage = Storage::with_backend(shape, &CPU, registry).unwrap();
        storage.fill(value).unwrap();
        storage
    }

    #[test]
    fn axpy_adds_with_broadcast() {
        let mut registry = StorageRegistry::new();
        let x = filled(&[2, 1], 2.0, &mut registry);
        let y = filled(&[1, 3], 3.0, &mut registry);
        let r = axpy(1.0, &x, &y, None, &mut registry).unwrap();
        assert_eq!(r.layout().shape(), &[1, 1, 2, 3]);
        assert_eq!(r.retrieve().unwrap(), vec![5.0; 6]);
        // Only inputs and output remain; the broadcast views are gone.
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn axpy_rejects_mismatched_destination() {
        let mut registry = StorageRegistry::new();
        let x = filled(&[2, 2], 1.0, &mut registry);
        let y = filled(&[2, 2], 1.0, &mut registry);
        let out = filled(&[3, 3], 0.0, &mut registry);
        assert!(matches!(
            axpy(1.0, &x, &y, Some(&out), &mut registry),
            Err(Error::ShapeMismatch(..))
        ));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn axpy_accumulates_in_place() {
        let mut registry = StorageRegistry::new();
        let x = filled(&[2], 1.0, &mut registry);
        let y = filled(&[2], 5.0, &mut registry);
        let r = axpy(3.0, &x, &y, Some(&y), &mut registry).unwrap();
        assert_eq!(r, y);
        assert_eq!(y.retrieve().unwrap(), vec![8.0, 8.0]);
    }

    #[test]
    fn gemm_multiplies_matrices() {
        let mut registry = StorageRegistry::new();
        let a = filled(&[2, 3], 1.0, &mut registry);
        let b = filled(&[3, 2], 2.0, &mut registry);
        let c = gemm(1.0, &a, &b, 0.0, None, &mut registry).unwrap();
        assert_eq!(c.layout().shape(), &[1, 1, 2, 2]);
        assert_eq!(c.retrieve().unwrap(), vec![6.0; 4]);
    }

    #[test]
    fn gemm_broadcasts_batches() {
        let mut registry = StorageRegistry::new();
        let a = filled(&[4, 2, 3], 1.0, &mut registry);
        let b = filled(&[3, 2], 1.0, &mut registry);
        let c = gemm(1.0, &a, &b, 0.0, None, &mut registry).unwrap();
        assert_eq!(c.layout().shape(), &[1, 4, 2, 2]);
        assert_eq!(c.retrieve().unwrap(), vec![3.0; 16]);
    }

    #[test]
    fn gemm_rejects_inner_mismatch() {
        let mut registry = StorageRegistry::new();
        let a = filled(&[2, 3], 1.0, &mut registry);
        let b = filled(&[2, 2], 1.0, &mut registry);
        assert!(matches!(
            gemm(1.0, &a, &b, 0.0, None, &mut registry),
            Err(Error::ShapeMismatch(..))
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn transpose_is_a_view() {
        let mut registry = StorageRegistry::new();
        let src = Storage::with_backend(&[2, 2], &CPU, &mut registry).unwrap();
        for (nth, value) in [1.0, 2.0, 3.0, 4.0].iter().enumerate() {
            src.set(&[nth / 2, nth % 2], *value).unwrap();
        }
        let t = transpose(&src, &[1, 0], &mut registry).unwrap();
        assert_eq!(registry.bucket_size(&src).unwrap(), 2);
        assert_eq!(t.retrieve().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
        // Writes through the view land in the shared buffer.
        t.set(&[0, 1], 9.0).unwrap();
        assert_eq!(src.get(&[1, 0]).unwrap(), 9.0);
    }

    #[test]
    fn reshape_of_regular_source_is_a_view() {
        let mut registry = StorageRegistry::new();
        let src = filled(&[2, 6], 1.0, &mut registry);
        let reshaped = reshape(&src, &[3, 4], &mut registry).unwrap();
        assert_eq!(reshaped.layout().shape(), &[1, 1, 3, 4]);
        assert_eq!(registry.bucket_size(&src).unwrap(), 2);
    }

    #[test]
    fn reshape_of_transposed_source_copies() {
        let mut registry = StorageRegistry::new();
        let src = Storage::with_backend(&[2, 3], &CPU, &mut registry).unwrap();
        for nth in 0..6 {
            src.set(&[nth / 3, nth % 3], nth as f32).unwrap();
        }
        let t = transpose(&src, &[1, 0], &mut registry).unwrap();
        let reshaped = reshape(&t, &[6], &mut registry).unwrap();
        // Materialized: a new bucket root, not a member of the source's bucket.
        assert_eq!(registry.bucket_size(&reshaped).unwrap(), 1);
        assert_eq!(reshaped.retrieve().unwrap(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn sum_collapses_masked_axes() {
        let mut registry = StorageRegistry::new();
        let src = filled(&[2, 3], 1.0, &mut registry);
        let total = sum(&src, 0b11, 2, &mut registry).unwrap();
        assert_eq!(total.layout().shape(), &[1, 1, 1, 1]);
        assert_eq!(total.retrieve().unwrap(), vec![6.0]);
    }

    #[test]
    fn sum_keeps_unmasked_axes() {
        let mut registry = StorageRegistry::new();
        let src = Storage::with_backend(&[2, 3], &CPU, &mut registry).unwrap();
        for nth in 0..6 {
            src.set(&[nth / 3, nth % 3], nth as f32).unwrap();
        }
        // Collapse the column axis only.
        let rows = sum(&src, 0b10, 2, &mut registry).unwrap();
        assert_eq!(rows.layout().shape(), &[1, 1, 2, 1]);
        assert_eq!(rows.retrieve().unwrap(), vec![3.0, 12.0]);
    }

    #[test]
    fn sum_releases_scratch_storages() {
        let mut registry = StorageRegistry::new();
        let src = filled(&[2, 2], 1.0, &mut registry);
        let before = registry.len();
        let total = sum(&src, 0b11, 2, &mut registry).unwrap();
        // One surviving output beyond the input.
        assert_eq!(registry.len(), before + 1);
        total.free(&mut registry).unwrap();
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn backend_mismatch_is_detected() {
        use std::cell::Cell;
        use std::rc::Rc;

        use kitsune_backend::{Backend, RawStorage};
        use kitsune_layout::Layout;

        struct StubStorage(Cell<Layout>);
        impl RawStorage for StubStorage {
            fn layout(&self) -> Layout {
                self.0.get()
            }
            fn set_layout(&self, layout: Layout) {
                self.0.set(layout);
            }
        }

        struct Stub;
        impl Backend for Stub {
            fn name(&self) -> &'static str {
                "stub"
            }
            fn storage_init(&self, layout: Layout) -> kitsune_backend::Result<Rc<dyn RawStorage>> {
                Ok(Rc::new(StubStorage(Cell::new(layout))))
            }
            fn shallow_copy(&self, src: &dyn RawStorage) -> kitsune_backend::Result<Rc<dyn RawStorage>> {
                Ok(Rc::new(StubStorage(Cell::new(src.layout()))))
            }
            fn contiguous_copy(
                &self,
                _src: &dyn RawStorage,
                _dst: &dyn RawStorage,
            ) -> kitsune_backend::Result<()> {
                Err(kitsune_backend::Error::NotImplemented("stub"))
            }
            fn storage_free(&self, _handle: &dyn RawStorage) -> kitsune_backend::Result<()> {
                Ok(())
            }
            fn fill(&self, _handle: &dyn RawStorage, _value: f32) -> kitsune_backend::Result<()> {
                Ok(())
            }
            fn fill_rand(&self, _handle: &dyn RawStorage) -> kitsune_backend::Result<()> {
                Ok(())
            }
            fn axpy(
                &self,
                _alpha: f32,
                _x: &dyn RawStorage,
                _y: &dyn RawStorage,
                _r: &dyn RawStorage,
            ) -> kitsune_backend::Result<()> {
                Err(kitsune_backend::Error::NotImplemented("stub"))
            }
            fn gemm(
                &self,
                _alpha: f32,
                _a: &dyn RawStorage,
                _b: &dyn RawStorage,
                _beta: f32,
                _c: &dyn RawStorage,
            ) -> kitsune_backend::Result<()> {
                Err(kitsune_backend::Error::NotImplemented("stub"))
            }
            fn get(&self, _handle: &dyn RawStorage, _indices: &[usize]) -> kitsune_backend::Result<f32> {
                Err(kitsune_backend::Error::NotImplemented("stub"))
            }
            fn set(
                &self,
                _handle: &dyn RawStorage,
                _indices: &[usize],
                _value: f32,
            ) -> kitsune_backend::Result<()> {
                Err(kitsune_backend::Error::NotImplemented("stub"))
            }
        }

        static STUB: Stub = Stub;
        let mut registry = StorageRegistry::new();
        let x = filled(&[2], 1.0, &mut registry);
        let y = Storage::with_backend(&[2], &STUB, &mut registry).unwrap();
        assert!(matches!(
            axpy(1.0, &x, &y, None, &mut registry),
            Err(Error::BackendMismatch("cpu", "stub"))
        ));
    }
}
