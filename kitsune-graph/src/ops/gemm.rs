//! GEMM descriptor: batched matrix product over the two trailing axes.
//!
//! Forward stashes the broadcast operand views in the operation context so that backward
//! multiplies against the exact layouts the product was computed with.

use kitsune_storage::{ops, Storage, StorageRegistry};

use crate::ops::{accumulate, view, OpContext};
use crate::{Error, Result};

pub fn forward(
    inputs: &[Storage],
    registry: &mut StorageRegistry,
) -> Result<(Storage, Option<OpContext>)> {
    let [a, b] = inputs else {
        return Err(Error::Arity {
            expected: 2,
            got: inputs.len(),
        });
    };
    let (la, lb, _) = ops::gemm_layouts(a.layout(), b.layout())?;
    let lhs = view(a, la, registry)?;
    let rhs = view(b, lb, registry)?;
    let output = ops::gemm(1.0, &lhs, &rhs, 0.0, None, registry)?;
    Ok((output, Some(OpContext::Gemm { lhs, rhs })))
}

/// `grad_a += grad_c . b^T`, `grad_b += a^T . grad_c`, with batch-broadcast inputs receiving
/// their contribution summed back to their own shape.
pub fn backward(
    grad_output: &Storage,
    ctx: Option<&OpContext>,
    grads: &[Option<Storage>],
    requires: &[bool],
    registry: &mut StorageRegistry,
) -> Result<()> {
    let Some(OpContext::Gemm { lhs, rhs }) = ctx else {
        return Err(Error::MissingContext);
    };
    if requires.first().copied().unwrap_or(false) {
        if let Some(Some(slot)) = grads.first() {
            let transposed = ops::transpose(rhs, &[1, 0], registry)?;
            let contribution = ops::gemm(1.0, grad_output, &transposed, 0.0, None, registry)?;
            accumulate(1.0, &contribution, slot, registry)?;
        }
    }
    if requires.get(1).copied().unwrap_or(false) {
        if let Some(Some(slot)) = grads.get(1) {
            let transposed = ops::transpose(lhs, &[1, 0], registry)?;
            let contribution = ops::gemm(1.0, &transposed, grad_output, 0.0, None, registry)?;
            accumulate(1.0, &contribution, slot, registry)?;
        }
    }
    Ok(())
}
