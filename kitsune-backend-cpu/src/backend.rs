//! The CPU backend descriptor.

use std::rc::Rc;

use as_any::Downcast;
use kitsune_backend::{Backend, Error, RawStorage, Result};
use kitsune_layout::Layout;
use rand::Rng;
use tracing::trace;

use crate::kernels;
use crate::storage::CpuStorage;

/// Name the CPU backend registers under.
const NAME: &str = "cpu";

/// The CPU backend descriptor. A single static instance, [`CPU`], is registered by the library
/// context; the descriptor itself carries no state.
pub struct Cpu;

/// The static CPU backend descriptor instance.
pub static CPU: Cpu = Cpu;

/// Downcasts a raw storage back to the CPU representation.
fn cpu(handle: &dyn RawStorage) -> Result<&CpuStorage> {
    handle
        .downcast_ref::<CpuStorage>()
        .ok_or(Error::ForeignHandle(NAME))
}

/// Number of buffer elements a layout addresses: one past the largest reachable offset.
fn span(layout: &Layout) -> usize {
    let last: usize = layout
        .shape()
        .iter()
        .zip(layout.strides())
        .map(|(&extent, &stride)| (extent - 1) * stride)
        .sum();
    last + 1
}

impl Backend for Cpu {
    fn name(&self) -> &'static str {
        NAME
    }

    fn storage_init(&self, layout: Layout) -> Result<Rc<dyn RawStorage>> {
        let len = span(&layout);
        trace!("cpu: allocating {len} elements for {layout}");
        Ok(Rc::new(CpuStorage::new(layout, len)))
    }

    fn shallow_copy(&self, src: &dyn RawStorage) -> Result<Rc<dyn RawStorage>> {
        Ok(Rc::new(CpuStorage::alias(cpu(src)?)))
    }

    fn contiguous_copy(&self, src: &dyn RawStorage, dst: &dyn RawStorage) -> Result<()> {
        let src = cpu(src)?;
        let dst = cpu(dst)?;
        let layout = src.layout();
        let snapshot = src.buffer().borrow().clone();
        let mut buffer = dst.buffer().borrow_mut();
        kernels::gather(&snapshot, &layout, &mut buffer)?;
        Ok(())
    }

    fn storage_free(&self, handle: &dyn RawStorage) -> Result<()> {
        trace!("cpu: releasing buffer for {}", handle.layout());
        cpu(handle)?.release();
        Ok(())
    }

    fn fill(&self, handle: &dyn RawStorage, value: f32) -> Result<()> {
        let storage = cpu(handle)?;
        let layout = storage.layout();
        let mut buffer = storage.buffer().borrow_mut();
        for nth in 0..layout.size() {
            buffer[layout.offset(nth)] = value;
        }
        Ok(())
    }

    fn fill_rand(&self, handle: &dyn RawStorage) -> Result<()> {
        let storage = cpu(handle)?;
        let layout = storage.layout();
        let mut buffer = storage.buffer().borrow_mut();
        let mut rng = rand::thread_rng();
        for nth in 0..layout.size() {
            buffer[layout.offset(nth)] = rng.gen();
        }
        Ok(())
    }

    fn axpy(&self, alpha: f32, x: &dyn RawStorage, y: &dyn RawStorage, r: &dyn RawStorage) -> Result<()> {
        let (x, y, r) = (cpu(x)?, cpu(y)?, cpu(r)?);
        let (lx, ly, lr) = (x.layout(), y.layout(), r.layout());
        // Inputs are snapshot so that r may alias either of them.
        let xb = x.buffer().borrow().clone();
        let yb = y.buffer().borrow().clone();
        let mut rb = r.buffer().borrow_mut();
        kernels::axpy(alpha, &xb, &lx, &yb, &ly, &mut rb, &lr)?;
        Ok(())
    }

    fn gemm(
        &self,
        alpha: f32,
        a: &dyn RawStorage,
        b: &dyn RawStorage,
        beta: f32,
        c: &dyn RawStorage,
    ) -> Result<()> {
        let (a, b, c) = (cpu(a)?, cpu(b)?, cpu(c)?);
        let (la, lb, lc) = (a.layout(), b.layout(), c.layout());
        let ab = a.buffer().borrow().clone();
        let bb = b.buffer().borrow().clone();
        let mut cb = c.buffer().borrow_mut();
        kernels::gemm(alpha, &ab, &la, &bb, &lb, beta, &mut cb, &lc)?;
        Ok(())
    }

    fn get(&self, handle: &dyn RawStorage, indices: &[usize]) -> Result<f32> {
        let storage = cpu(handle)?;
        let offset = storage.layout().flat_index(indices)?;
        Ok(storage.buffer().borrow()[offset])
    }

    fn set(&self, handle: &dyn RawStorage, indices: &[usize], value: f32) -> Result<()> {
        let storage = cpu(handle)?;
        let offset = storage.layout().flat_index(indices)?;
        storage.buffer().borrow_mut()[offset] = value;
        Ok(())
    }
}
