//! AXPY descriptor: `c = alpha * x + y` with full broadcasting.
//!
//! Addition and subtraction both lower to this: `a + b` is `Axpy(1)` over `(a, b)` and `a - b`
//! is `Axpy(-1)` over `(b, a)`.

use kitsune_storage::{ops, Storage, StorageRegistry};

use crate::ops::{accumulate, OpContext};
use crate::{Error, Result};

pub fn forward(
    alpha: f32,
    inputs: &[Storage],
    registry: &mut StorageRegistry,
) -> Result<(Storage, Option<OpContext>)> {
    let [x, y] = inputs else {
        return Err(Error::Arity {
            expected: 2,
            got: inputs.len(),
        });
    };
    let output = ops::axpy(alpha, x, y, None, registry)?;
    Ok((output, None))
}

/// `grad_x += alpha * grad_c`, `grad_y += grad_c`. Broadcast inputs receive their contribution
/// summed back to their own shape.
pub fn backward(
    alpha: f32,
    grad_output: &Storage,
    grads: &[Option<Storage>],
    requires: &[bool],
    registry: &mut StorageRegistry,
) -> Result<()> {
    for (index, scale) in [alpha, 1.0].into_iter().enumerate() {
        if !requires.get(index).copied().unwrap_or(false) {
            continue;
        }
        if let Some(Some(slot)) = grads.get(index) {
            accumulate(scale, grad_output, slot, registry)?;
        }
    }
    Ok(())
}
