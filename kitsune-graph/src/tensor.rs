//! The public tensor handle.
//!
//! A tensor is a thin reference to one node of the computation graph: the context handle, the
//! node id, and a snapshot of the node's output layout for shape arithmetic. Operations never
//! compute anything — each call records a new node and returns a handle to it. Cloning a handle
//! bumps the node's reference count; dropping it releases the reference, cascading through the
//! graph when a node loses its last one.

use std::fmt::Display;
use std::rc::Rc;

use itertools::Itertools;
use kitsune_layout::{Layout, MAX_RANK};
use kitsune_storage::{ops, Storage};
use tracing::error;
use uuid::Uuid;

use crate::kitsune::Kitsune;
use crate::ops::OpKind;
use crate::{Error, Result};

/// A handle to one node of the computation graph.
pub struct Tensor {
    kitsune: Rc<Kitsune>,
    node: Uuid,
    layout: Layout,
}

// NOTE: Construction interface.

impl Tensor {
    pub(crate) fn new(kitsune: &Rc<Kitsune>, node: Uuid, layout: Layout) -> Self {
        Self {
            kitsune: Rc::clone(kitsune),
            node,
            layout,
        }
    }

    /// Returns the id of the underlying graph node.
    pub fn node(&self) -> Uuid {
        self.node
    }

    /// Returns the full right-aligned output shape.
    pub fn shape(&self) -> &[usize; MAX_RANK] {
        self.layout.shape()
    }

    /// Returns the number of elements.
    pub fn count(&self) -> usize {
        self.layout.size()
    }

    /// Records a new operation node over the given inputs and wraps it in a handle.
    fn record(&self, kind: OpKind, layout: Layout, inputs: &[Uuid]) -> Result<Tensor> {
        let node = self
            .kitsune
            .scope(|graph, _| graph.add_op(kind, layout, inputs))?;
        Ok(Tensor::new(&self.kitsune, node, layout))
    }
}

// NOTE: Imperative leaf initialization.

impl Tensor {
    /// Sets every element to `value`. The tensor must be materialized (leaves always are).
    pub fn fill(&self, value: f32) -> Result<()> {
        let storage = self.storage().ok_or(Error::ForwardNotExecuted)?;
        Ok(storage.fill(value)?)
    }

    /// Sets every element to a uniform random value.
    pub fn fill_rand(&self) -> Result<()> {
        let storage = self.storage().ok_or(Error::ForwardNotExecuted)?;
        Ok(storage.fill_rand()?)
    }

    /// Loads values elementwise in row-major order.
    pub fn load(&self, data: &[f32]) -> Result<()> {
        if data.len() != self.layout.size() {
            return Err(Error::DataLength {
                expected: self.layout.size(),
                got: data.len(),
            });
        }
        let storage = self.storage().ok_or(Error::ForwardNotExecuted)?;
        for (nth, &value) in data.iter().enumerate() {
            storage.set(&self.layout.coords(nth), value)?;
        }
        Ok(())
    }
}

// NOTE: Operation recording interface.

impl Tensor {
    /// Records `self + other`, broadcasting across every axis.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        let layout = self.broadcast_layout(other)?;
        self.record(OpKind::Axpy { alpha: 1.0 }, layout, &[self.node, other.node])
    }

    /// Records `self - other`, broadcasting across every axis. Lowered to AXPY with an alpha
    /// of -1 applied to `other`.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        let layout = self.broadcast_layout(other)?;
        self.record(OpKind::Axpy { alpha: -1.0 }, layout, &[other.node, self.node])
    }

    /// Records the batched matrix product `self . other`.
    pub fn gemm(&self, other: &Tensor) -> Result<Tensor> {
        let (_, _, layout) = ops::gemm_layouts(self.layout, other.layout)?;
        self.record(OpKind::Gemm, layout, &[self.node, other.node])
    }

    /// Records a permutation of the last `perm.len()` axes.
    pub fn transpose(&self, perm: &[usize]) -> Result<Tensor> {
        let mut permuted = self.layout;
        permuted.transpose(perm)?;
        let layout = Layout::new(&permuted.shape()[..])?;
        self.record(
            OpKind::Transpose {
                perm: perm.to_vec(),
            },
            layout,
            &[self.node],
        )
    }

    /// Records a reshape; `new_shape` may contain one `-1` placeholder.
    pub fn reshape(&self, new_shape: &[isize]) -> Result<Tensor> {
        let layout = self.layout.reshape(new_shape)?;
        self.record(
            OpKind::Reshape {
                shape: new_shape.to_vec(),
            },
            layout,
            &[self.node],
        )
    }

    /// Records a sum across the given axes, counted within the last `ndim` dimensions.
    pub fn reduce_sum(&self, axes: &[usize], ndim: usize) -> Result<Tensor> {
        // Out-of-range axes land on a bit outside `ndim`, which `reduce` rejects.
        let mask = axes
            .iter()
            .fold(0u32, |mask, &axis| mask | 1u32 << axis.min(31));
        let layout = self.layout.reduce(mask, ndim)?;
        self.record(OpKind::ReduceSum { mask, ndim }, layout, &[self.node])
    }

    fn broadcast_layout(&self, other: &Tensor) -> Result<Layout> {
        let mut lhs = self.layout;
        let mut rhs = other.layout;
        Layout::broadcast(&mut lhs, &mut rhs, 0, MAX_RANK)?;
        Ok(Layout::new(&lhs.shape()[..])?)
    }
}

// NOTE: Execution interface.

impl Tensor {
    /// Materializes this tensor and every ancestor it depends on.
    pub fn execute(&self) -> Result<()> {
        self.kitsune.scope(|graph, storages| graph.execute(self.node, storages))
    }

    /// Returns the output storage, if the tensor has been materialized.
    pub fn storage(&self) -> Option<Storage> {
        self.kitsune.scope(|graph, _| {
            graph
                .node(self.node)
                .ok()
                .and_then(|node| node.storage().cloned())
        })
    }

    /// Materializes if needed, then reads one element.
    pub fn get(&self, indices: &[usize]) -> Result<f32> {
        self.execute()?;
        let storage = self.storage().ok_or(Error::ForwardNotExecuted)?;
        Ok(storage.get(indices)?)
    }

    /// Materializes if needed, then reads every element in row-major order.
    pub fn retrieve(&self) -> Result<Vec<f32>> {
        self.execute()?;
        let storage = self.storage().ok_or(Error::ForwardNotExecuted)?;
        Ok(storage.retrieve()?)
    }
}

// NOTE: Autograd interface.

impl Tensor {
    /// Marks whether gradients should flow into this tensor.
    pub fn set_requires_grad(&self, value: bool) -> Result<()> {
        self.kitsune.scope(|graph, _| {
            graph.node_mut(self.node).map(|node| node.requires_grad = value)
        })
    }

    /// Returns whether gradients flow into this tensor.
    pub fn requires_grad(&self) -> bool {
        self.kitsune.scope(|graph, _| {
            graph
                .node(self.node)
                .map(|node| node.requires_grad())
                .unwrap_or(false)
        })
    }

    /// Runs reverse-mode differentiation from this tensor.
    pub fn backward(&self) -> Result<()> {
        self.kitsune.scope(|graph, storages| graph.backward(self.node, storages))
    }

    /// Returns the gradient accumulator, if any gradient has arrived.
    pub fn grad(&self) -> Option<Storage> {
        self.kitsune.scope(|graph, _| {
            graph
                .node(self.node)
                .ok()
                .and_then(|node| node.grad().cloned())
        })
    }

    /// Reads the gradient elementwise, if present.
    pub fn retrieve_grad(&self) -> Result<Option<Vec<f32>>> {
        match self.grad() {
            Some(grad) => Ok(Some(grad.retrieve()?)),
            None => Ok(None),
        }
    }

    /// Zeroes the gradient accumulator; a tensor without one is left alone.
    pub fn zero_grad(&self) -> Result<()> {
        self.kitsune.scope(|graph, _| graph.zero_grad(self.node))
    }
}

// NOTE: Handle semantics.

impl Clone for Tensor {
    fn clone(&self) -> Self {
        if let Err(err) = self.kitsune.scope(|graph, _| graph.ref_inc(self.node)) {
            error!("failed to retain tensor node {}: {err}", self.node);
        }
        Self {
            kitsune: Rc::clone(&self.kitsune),
            node: self.node,
            layout: self.layout,
        }
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        if let Err(err) = self
            .kitsune
            .scope(|graph, storages| graph.ref_dec(self.node, storages))
        {
            error!("failed to release tensor node {}: {err}", self.node);
        }
    }
}

impl Display for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = self.significant_shape();
        match self.storage().map(|storage| storage.retrieve()) {
            Some(Ok(values)) => render(f, &values, shape),
            Some(Err(_)) => write!(f, "Tensor({}, unreadable)", shape.iter().join("x")),
            None => write!(f, "Tensor({}, pending)", shape.iter().join("x")),
        }
    }
}

impl Tensor {
    /// The trailing shape starting at the first axis with more than one element.
    fn significant_shape(&self) -> &[usize] {
        let shape = &self.layout.shape()[..];
        let start = shape
            .iter()
            .position(|&extent| extent != 1)
            .unwrap_or(MAX_RANK - 1);
        &shape[start..]
    }
}

/// Renders values as nested bracketed lists following the given shape.
fn render(f: &mut std::fmt::Formatter<'_>, values: &[f32], shape: &[usize]) -> std::fmt::Result {
    if shape.len() <= 1 {
        return write!(f, "[{}]", values.iter().join(", "));
    }
    let chunk = values.len() / shape[0];
    write!(f, "[")?;
    for (nth, part) in values.chunks(chunk).enumerate() {
        if nth > 0 {
            write!(f, ", ")?;
        }
        render(f, part, &shape[1..])?;
    }
    write!(f, "]")
}
