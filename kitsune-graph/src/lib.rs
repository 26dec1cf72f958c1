//! Lazy tensor computation graph with reverse-mode automatic differentiation.
//!
//! This crate is the user-facing surface of the Kitsune framework. Tensor operations never
//! compute eagerly: each call records a node into a directed acyclic graph, and the graph is
//! materialized on demand by a topological forward pass and differentiated by a reverse-mode
//! backward pass. The numeric work itself is delegated through `kitsune-storage` to a pluggable
//! backend; the single-precision CPU backend ships by default.
//!
//! # Key modules
//!
//! - `kitsune`: the [`Kitsune`] library context owning the backend registry, the storage
//!   registry, the graph, and the gradient-mode flag. Everything the original design kept in
//!   globals lives here as explicit state.
//! - `tensor`: the [`Tensor`] handle, a thin reference to one graph node. Cloning a tensor
//!   bumps the node's reference count and dropping it releases the node, cascading through the
//!   graph when the count reaches zero.
//! - `graph`: the node-addressed DAG with topological execution, result caching and
//!   reference-counted lifetime.
//! - `ops`: the per-operation forward and backward descriptors (AXPY, GEMM, transpose, reshape,
//!   masked sum).
//! - `autograd`: the reverse-topological gradient accumulation pass.
//!
//! # Usage
//!
//! ```no_run
//! use kitsune_graph::Kitsune;
//!
//! fn main() -> kitsune_graph::Result<()> {
//!     let kitsune = Kitsune::new()?;
//!     let a = kitsune.tensor([2, 2]).fill(2.0)?;
//!     let b = kitsune.tensor([2, 2]).fill(3.0)?;
//!     let c = a.add(&b)?;
//!     c.execute()?;
//!     assert_eq!(c.get(&[0, 0])?, 5.0);
//!     c.backward()?;
//!     assert_eq!(a.retrieve_grad()?, Some(vec![1.0; 4]));
//!     Ok(())
//! }
//! ```

mod autograd;
mod builder;
mod error;
mod graph;
mod kitsune;
mod node;
mod ops;
mod tensor;

pub use builder::Builder;
pub use error::{Error, Result};
pub use graph::{Graph, MAX_INPUTS};
pub use kitsune::Kitsune;
pub use ops::OpKind;
pub use tensor::Tensor;

pub use kitsune_layout::{Layout, MAX_RANK};
pub use kitsune_storage::Storage;
