//! Masked-sum descriptor.
//!
//! Forward delegates to the canonical reduction recipe in the storage layer; backward
//! re-expands the reduced gradient across the collapsed axes with a zero-stride broadcast view.

use kitsune_layout::{Layout, MAX_RANK};
use kitsune_storage::{ops, Storage, StorageRegistry};

use crate::ops::{accumulate, view, OpContext};
use crate::{Error, Result};

pub fn forward(
    mask: u32,
    ndim: usize,
    inputs: &[Storage],
    registry: &mut StorageRegistry,
) -> Result<(Storage, Option<OpContext>)> {
    let [src] = inputs else {
        return Err(Error::Arity {
            expected: 1,
            got: inputs.len(),
        });
    };
    let output = ops::sum(src, mask, ndim, registry)?;
    Ok((output, None))
}

/// `grad_in += broadcast(grad_out, in.shape)`.
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
    let mut expanded = grad_output.layout();
    let mut input_layout = src.layout();
    Layout::broadcast(&mut expanded, &mut input_layout, 0, MAX_RANK)?;
    let contribution = view(grad_output, expanded, registry)?;
    accumulate(1.0, &contribution, slot, registry)?;
    Ok(())
}
