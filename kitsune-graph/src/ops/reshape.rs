//! Reshape descriptor: the same elements under a new shape.
//!
//! A regular input yields a zero-copy view; a strided input is materialized contiguously first,
//! which is observable as a fresh allocation and deliberate.

use kitsune_storage::{ops, Storage, StorageRegistry};

use crate::ops::{accumulate, OpContext};
use crate::{Error, Result};

pub fn forward(
    shape: &[isize],
    inputs: &[Storage],
    registry: &mut StorageRegistry,
) -> Result<(Storage, Option<OpContext>)> {
    let [src] = inputs else {
        return Err(Error::Arity {
            expected: 1,
            got: inputs.len(),
        });
    };
    let output = ops::reshape(src, shape, registry)?;
    Ok((output, None))
}

/// `grad_in += reshape(grad_out, in.shape)`. The gradient accumulator is contiguous, so the
/// reshape back is always a view.
pub fn backward(
    inputs: &[Storage],
    grad_output: &Storage,
    grads: &[Option<Storage>],
    requires: &[bool],
    registry: &mut StorageRegistry,
) -> Result<()> {
    if !requires.first().copied().unwrap_or(false) {
        return Ok(());
    }
    let (Some(Some(slot)), Some(src)) = (grads.first(), inputs.first()) else {
        return Ok(());
    };
    let shape: Vec<isize> = src.layout().shape().iter().map(|&extent| extent as isize).collect();
    let contribution = ops::reshape(grad_output, &shape, registry)?;
    accumulate(1.0, &contribution, slot, registry)?;
    Ok(())
}
