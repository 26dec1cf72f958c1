//! Backend interface for the Kitsune tensor framework.
//!
//! This crate defines the contract every storage backend must fulfill and the registry through
//! which backends are located by name. A backend is a named provider of buffer allocation and
//! single-precision numeric primitives: it creates and frees raw storages, fills them, and runs
//! the AXPY and GEMM kernels the rest of the engine is built from. The reference implementation
//! lives in `kitsune-backend-cpu`; the trait is designed so that non-CPU providers can be
//! registered alongside it without the engine noticing.
//!
//! Two traits make up the contract:
//!
//! - [`RawStorage`]: the backend-opaque per-storage state. The engine only sees its [`Layout`];
//!   everything else is private to the owning backend, which downcasts handles back to its
//!   concrete type.
//! - [`Backend`]: the operation table itself, implemented by `'static` descriptor values and
//!   dispatched through `&'static dyn Backend` references held in storages and graph nodes.
//!
//! [`Layout`]: kitsune_layout::Layout

mod backend;
mod error;
mod registry;

pub use backend::{Backend, RawStorage};
pub use error::{Error, Result};
pub use registry::BackendRegistry;
