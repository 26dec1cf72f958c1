//! Shape and stride metadata algebra for the Kitsune tensor framework.
//!
//! This crate defines the `Layout` type, a pure value describing how the elements of a dense
//! tensor are laid out in a linear buffer: a fixed-rank shape, element strides, and the logical
//! element count. Every transformation offered here — broadcasting, transposition, reshaping,
//! reduction — rewrites metadata only and never touches a buffer. Storage layers and backends
//! build on these transformations to implement views, broadcast arithmetic, and reductions
//! without copying data.
//!
//! All layouts carry exactly [`MAX_RANK`] dimensions. Shapes of lower rank are right-aligned and
//! padded on the left with size-1 dimensions, so a `[2, 3]` matrix is stored as `1x1x2x3`. A
//! stride of zero is produced only by broadcasting and marks a dimension whose elements all alias
//! a single underlying value; such layouts are intentionally rejected by [`Layout::reshape`] and
//! by the regularity predicates.

mod error;
mod layout;

pub use error::{Error, Result};
pub use layout::{Layout, MAX_RANK};
