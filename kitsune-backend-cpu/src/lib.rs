//! Single-precision CPU backend for the Kitsune tensor framework.
//!
//! This crate provides the reference implementation of the `kitsune-backend` contract. Buffers
//! are plain `Vec<f32>` values shared between shallow copies through reference counting; kernels
//! are strided loops that walk layouts directly, so broadcast views with zero strides and
//! transposed views with permuted strides work without materialization. The kernels stand in for
//! a BLAS: `axpy` and a batched `gemm` carry all of the arithmetic, and `contiguous_copy` plays
//! the role of a strided SCOPY.

mod backend;
mod kernels;
mod storage;

pub use backend::{Cpu, CPU};
pub use storage::CpuStorage;
