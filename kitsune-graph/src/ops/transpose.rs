//! Transpose descriptor: a zero-copy view with permuted trailing axes.

use kitsune_storage::{ops, Storage, StorageRegistry};

use crate::ops::{accumulate, OpContext};
use crate::{Error, Result};

pub fn forward(
    perm: &[usize],
    inputs: &[Storage],
    registry: &mut StorageRegistry,
) -> Result<(Storage, Option<OpContext>)> {
    let [src] = inputs else {
        return Err(Error::Arity {
            expected: 1,
            got: inputs.len(),
        });
    };
    let output = ops::transpose(src, perm, registry)?;
    Ok((output, None))
}

/// `grad_in += transpose(grad_out, perm^-1)`.
pub fn backward(
    perm: &[usize],
    grad_output: &Storage,
    grads: &[Option<Storage>],
    requires: &[bool],
    registry: &mut StorageRegistry,
) -> Result<()> {
    if !requires.first().copied().unwrap_or(false) {
        return Ok(());
    }
    let Some(Some(slot)) = grads.first() else {
        return Ok(());
    };
    let mut inverse = vec![0; perm.len()];
    for (slot_index, &axis) in perm.iter().enumerate() {
        inverse[axis] = slot_index;
    }
    let contribution = ops::transpose(grad_output, &inverse, registry)?;
    accumulate(1.0, &contribution, slot, registry)?;
    Ok(())
}
