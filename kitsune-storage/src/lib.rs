//! Storage handles, aliasing registry, and broadcastable storage operations for the Kitsune
//! tensor framework.
//!
//! A [`Storage`] is a small value handle: a stable UUID, a reference to the backend descriptor
//! that owns the buffer, and the backend's raw state. Several storages may alias one underlying
//! buffer — shallow copies, transposes, reshaped and broadcast views all share the allocation of
//! the storage they were derived from. The [`StorageRegistry`] tracks these aliasing groups as
//! *buckets*: every bucket has a root storage whose allocation backs every member, and the
//! buffer is released exactly when the last member of its bucket is freed.
//!
//! The registry also provides *records*, scoped allocation logs used by multi-step operations.
//! While a record is active every registered storage is appended to it (to all active records,
//! when several are nested); freeing the record afterwards releases every scratch storage that
//! was not explicitly detached, even when the operation failed half-way.
//!
//! The [`ops`] module builds the numeric operations the compute graph consumes out of these
//! pieces: broadcasting AXPY, batched GEMM, transpose and reshape views, and the reduction
//! recipe that expresses a masked sum as `transpose + contiguous + reshape + GEMM` against a
//! ones-vector.

mod error;
pub mod ops;
mod registry;
mod storage;

pub use error::{Error, Result};
pub use registry::{RecordId, StorageRegistry};
pub use storage::Storage;
