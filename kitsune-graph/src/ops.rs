//! Operation descriptors: per-kind forward and backward implementations.
//!
//! This module is the descriptor table of the engine. [`forward`] and [`backward`] dispatch on
//! [`OpKind`] to the per-operation submodules; both run inside an allocation record so that
//! every scratch storage a descriptor creates — broadcast views, transposed views, intermediate
//! products — is released before returning, no matter where a failure happens. Forward detaches
//! its output (and any context storages) from the record; backward produces no output at all,
//! it only accumulates into the gradient slots handed to it.

use itertools::Itertools;
use kitsune_layout::{Layout, MAX_RANK};
use kitsune_storage::{ops, Storage, StorageRegistry};

use crate::{Error, Result};

mod axpy;
mod gemm;
mod reduce;
mod reshape;
mod transpose;

/// The kind of a graph node, carrying the operation parameters.
///
/// Addition and subtraction are both expressed as [`Axpy`](OpKind::Axpy) with `alpha` of 1 and
/// -1 respectively; there is no separate descriptor for them.
#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    /// A materialized input node; has no descriptor.
    Leaf,
    /// `c = alpha * x + y` with full broadcasting.
    Axpy { alpha: f32 },
    /// Batched matrix product over the two trailing axes.
    Gemm,
    /// Permutation of the trailing axes.
    Transpose { perm: Vec<usize> },
    /// Shape rewrite over the same elements.
    Reshape { shape: Vec<isize> },
    /// Sum across the masked trailing axes.
    ReduceSum { mask: u32, ndim: usize },
}

impl OpKind {
    /// Number of inputs the operation consumes.
    pub fn arity(&self) -> usize {
        match self {
            OpKind::Leaf => 0,
            OpKind::Axpy { .. } | OpKind::Gemm => 2,
            OpKind::Transpose { .. } | OpKind::Reshape { .. } | OpKind::ReduceSum { .. } => 1,
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Leaf => write!(f, "Leaf"),
            OpKind::Axpy { alpha } => write!(f, "Axpy({alpha})"),
            OpKind::Gemm => write!(f, "Gemm"),
            OpKind::Transpose { perm } => write!(f, "Transpose([{}])", perm.iter().join(", ")),
            OpKind::Reshape { shape } => write!(f, "Reshape([{}])", shape.iter().join(", ")),
            OpKind::ReduceSum { mask, ndim } => write!(f, "ReduceSum({mask:#b}/{ndim})"),
        }
    }
}

/// Per-operation state computed by forward and consumed by backward.
///
/// Only GEMM needs one: it stashes the broadcast operand views so backward multiplies against
/// the exact layouts forward saw. The storages are owned by the node and released with it.
#[derive(Clone, Debug)]
pub enum OpContext {
    Gemm { lhs: Storage, rhs: Storage },
}

impl OpContext {
    /// Releases the storages held by the context.
    pub(crate) fn free(self, registry: &mut StorageRegistry) -> Result<()> {
        match self {
            OpContext::Gemm { lhs, rhs } => {
                lhs.free(registry)?;
                rhs.free(registry)?;
            }
        }
        Ok(())
    }
}

/// Runs the forward descriptor of an operation.
///
/// # Parameters
/// - `inputs`: materialized input storages in slot order.
///
/// # Returns
/// The freshly computed output storage and the optional per-operation context.
pub(crate) fn forward(
    kind: &OpKind,
    inputs: &[Storage],
    registry: &mut StorageRegistry,
) -> Result<(Storage, Option<OpContext>)> {
    let record = registry.start_record();
    let result = match kind {
        OpKind::Leaf => Err(Error::LeafOperation),
        OpKind::Axpy { alpha } => axpy::forward(*alpha, inputs, registry),
        OpKind::Gemm => gemm::forward(inputs, registry),
        OpKind::Transpose { perm } => transpose::forward(perm, inputs, registry),
        OpKind::Reshape { shape } => reshape::forward(shape, inputs, registry),
        OpKind::ReduceSum { mask, ndim } => reduce::forward(*mask, *ndim, inputs, registry),
    };
    if let Ok((output, ctx)) = &result {
        let _ = registry.detach(record, output);
        if let Some(OpContext::Gemm { lhs, rhs }) = ctx {
            let _ = registry.detach(record, lhs);
            let _ = registry.detach(record, rhs);
        }
    }
    let _ = registry.stop_record(record);
    let cleanup = registry.free_all(record);
    let output = result?;
    cleanup?;
    Ok(output)
}

/// Runs the backward descriptor of an operation.
///
/// For each input whose `requires` flag is set and whose gradient slot is populated, the
/// descriptor adds its contribution into that slot; nothing is overwritten. Scratch created
/// along the way is released through the enclosing record.
#[allow(clippy::too_many_arguments)]
pub(crate) fn backward(
    kind: &OpKind,
    inputs: &[Storage],
    _output: &Storage,
    grad_output: &Storage,
    ctx: Option<&OpContext>,
    grads: &[Option<Storage>],
    requires: &[bool],
    registry: &mut StorageRegistry,
) -> Result<()> {
    let record = registry.start_record();
    let result = match kind {
        OpKind::Leaf => Err(Error::LeafOperation),
        OpKind::Axpy { alpha } => axpy::backward(*alpha, grad_output, grads, requires, registry),
        OpKind::Gemm => gemm::backward(grad_output, ctx, grads, requires, registry),
        OpKind::Transpose { perm } => transpose::backward(perm, grad_output, grads, requires, registry),
        OpKind::Reshape { .. } => reshape::backward(inputs, grad_output, grads, requires, registry),
        OpKind::ReduceSum { .. } => reduce::backward(inputs, grad_output, grads, requires, registry),
    };
    let _ = registry.stop_record(record);
    let cleanup = registry.free_all(record);
    result?;
    cleanup?;
    Ok(())
}

/// Adds `alpha * contribution` into a gradient slot.
///
/// When the contribution carries broadcast axes the slot does not have (the input was expanded
/// during forward), those axes are summed away first so the addition lands in the input-shaped
/// accumulator.
pub(crate) fn accumulate(
    alpha: f32,
    contribution: &Storage,
    slot: &Storage,
    registry: &mut StorageRegistry,
) -> Result<()> {
    let source = contribution.layout();
    let target = slot.layout();
    if source.shape() == target.shape() {
        ops::axpy(alpha, contribution, slot, Some(slot), registry)?;
        return Ok(());
    }
    let mask = (0..MAX_RANK)
        .filter(|&axis| target.shape()[axis] == 1 && source.shape()[axis] != 1)
        .fold(0, |mask, axis| mask | 1 << axis);
    let reduced = ops::sum(contribution, mask, MAX_RANK, registry)?;
    ops::axpy(alpha, &reduced, slot, Some(slot), registry)?;
    Ok(())
}

/// Shallow copy of `src` retargeted to the given layout.
pub(crate) fn view(src: &Storage, layout: Layout, registry: &mut StorageRegistry) -> Result<Storage> {
    let view = src.shallow_copy(registry)?;
    view.raw().set_layout(layout);
    Ok(view)
}
