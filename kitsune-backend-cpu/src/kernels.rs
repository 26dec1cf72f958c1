//! Strided numeric kernels.
//!
//! Each kernel walks operand layouts directly, so zero strides (broadcast views) and permuted
//! strides (transposes) need no special casing. Callers hand in input snapshots and a mutable
//! destination slice; every destination offset is written exactly once.

use anyhow::{ensure, Result};
use kitsune_layout::{Layout, MAX_RANK};

/// `r = alpha * x + y` elementwise. The three layouts must share one shape.
pub fn axpy(
    alpha: f32,
    x: &[f32],
    lx: &Layout,
    y: &[f32],
    ly: &Layout,
    r: &mut [f32],
    lr: &Layout,
) -> Result<()> {
    ensure!(
        lx.shape() == ly.shape() && ly.shape() == lr.shape(),
        "axpy operand shapes differ: {lx} vs {ly} vs {lr}"
    );
    for nth in 0..lr.size() {
        r[lr.offset(nth)] = alpha * x[lx.offset(nth)] + y[ly.offset(nth)];
    }
    Ok(())
}

/// `c = alpha * a . b + beta * c` over the two trailing axes, batched over the leading ones.
///
/// Batch extents of `a` and `b` must equal the corresponding extent of `c` or be 1, in which
/// case the operand is broadcast across that batch axis.
pub fn gemm(
    alpha: f32,
    a: &[f32],
    la: &Layout,
    b: &[f32],
    lb: &Layout,
    beta: f32,
    c: &mut [f32],
    lc: &Layout,
) -> Result<()> {
    let m = la.shape()[MAX_RANK - 2];
    let k = la.shape()[MAX_RANK - 1];
    let n = lb.shape()[MAX_RANK - 1];
    ensure!(
        lb.shape()[MAX_RANK - 2] == k,
        "gemm inner extents differ: {la} vs {lb}"
    );
    ensure!(
        lc.shape()[MAX_RANK - 2] == m && lc.shape()[MAX_RANK - 1] == n,
        "gemm output shape mismatch: {lc} for {la} . {lb}"
    );
    let batch: usize = lc.shape()[..MAX_RANK - 2].iter().product();
    let (sa_m, sa_k) = (la.strides()[MAX_RANK - 2], la.strides()[MAX_RANK - 1]);
    let (sb_k, sb_n) = (lb.strides()[MAX_RANK - 2], lb.strides()[MAX_RANK - 1]);
    let (sc_m, sc_n) = (lc.strides()[MAX_RANK - 2], lc.strides()[MAX_RANK - 1]);
    for nth in 0..batch {
        let off_a = batch_offset(la, lc, nth)?;
        let off_b = batch_offset(lb, lc, nth)?;
        let off_c = batch_offset(lc, lc, nth)?;
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0;
                for p in 0..k {
                    acc += a[off_a + i * sa_m + p * sa_k] * b[off_b + p * sb_k + j * sb_n];
                }
                let slot = off_c + i * sc_m + j * sc_n;
                c[slot] = alpha * acc + beta * c[slot];
            }
        }
    }
    Ok(())
}

/// Gathers the elements of `src` in logical row-major order into the contiguous `dst`.
pub fn gather(src: &[f32], ls: &Layout, dst: &mut [f32]) -> Result<()> {
    ensure!(
        dst.len() >= ls.size(),
        "gather destination holds {} elements, need {}",
        dst.len(),
        ls.size()
    );
    for nth in 0..ls.size() {
        dst[nth] = src[ls.offset(nth)];
    }
    Ok(())
}

/// Offset of the `nth` batch of `operand`, where `nth` enumerates the batch axes of `reference`.
/// Operand batch extents must match the reference or be 1 (broadcast, contributing no offset).
fn batch_offset(operand: &Layout, reference: &Layout, nth: usize) -> Result<usize> {
    let mut rest = nth;
    let mut offset = 0;
    for axis in (0..MAX_RANK - 2).rev() {
        let extent = reference.shape()[axis];
        let coord = rest % extent;
        rest /= extent;
        if operand.shape()[axis] == extent {
            offset += coord * operand.strides()[axis];
        } else {
            ensure!(
                operand.shape()[axis] == 1,
                "gemm batch extent {} does not broadcast to {}",
                operand.shape()[axis],
                extent
            );
        }
    }
    Ok(offset)
}
