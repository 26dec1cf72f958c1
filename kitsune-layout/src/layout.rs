//! The `Layout` value type and its metadata transformations.
//!
//! A layout is a fixed-rank `(shape, strides, size)` triple in element units. Transformations
//! come in two flavors: in-place rewrites of an existing layout (`broadcast`, `transpose`) used
//! to retarget a view, and derivations that produce a fresh layout (`reshape`, `reduce`). The
//! regularity predicates classify layouts by whether a single-unit-step traversal can reach every
//! element, which is what decides when a reshape is possible without a copy.

use itertools::Itertools;
use std::fmt::Display;

use crate::{Error, Result};

/// Maximum number of dimensions a layout can carry. Shapes of lower rank are right-aligned and
/// padded on the left with size-1 dimensions.
pub const MAX_RANK: usize = 4;

/// Shape, strides and element count of a dense tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    shape: [usize; MAX_RANK],
    strides: [usize; MAX_RANK],
    size: usize,
}

// NOTE: Construction interface.

impl Layout {
    /// Creates a contiguous row-major layout from a user shape.
    ///
    /// # Parameters
    /// - `shape`: the user shape; its length is the user rank and must be between 1 and
    ///   [`MAX_RANK`]. Every extent must be positive.
    ///
    /// # Returns
    /// A new right-aligned layout with contiguous strides, or an error if the shape is invalid.
    pub fn new(shape: &[usize]) -> Result<Self> {
        let ndim = shape.len();
        if ndim == 0 || ndim > MAX_RANK {
            return Err(Error::InvalidRank(ndim));
        }
        if shape.iter().any(|&extent| extent == 0) {
            return Err(Error::InvalidShape);
        }
        let mut full = [1; MAX_RANK];
        full[MAX_RANK - ndim..].copy_from_slice(shape);
        let strides = contiguous_strides(&full, 1);
        let size = full.iter().product();
        Ok(Self {
            shape: full,
            strides,
            size,
        })
    }

    /// Returns the full right-aligned shape.
    pub fn shape(&self) -> &[usize; MAX_RANK] {
        &self.shape
    }

    /// Returns the strides, in element units.
    pub fn strides(&self) -> &[usize; MAX_RANK] {
        &self.strides
    }

    /// Returns the logical element count. With zero strides present this may exceed the number
    /// of distinct underlying elements.
    pub fn size(&self) -> usize {
        self.size
    }
}

// NOTE: Indexing interface.

impl Layout {
    /// Computes the flat buffer offset of a multi-dimensional index.
    ///
    /// # Parameters
    /// - `indices`: the index per axis; right-aligned like shapes, so fewer than [`MAX_RANK`]
    ///   entries index the trailing axes.
    ///
    /// # Returns
    /// The offset in element units, or `IndexOutOfBounds` if any entry exceeds its extent.
    pub fn flat_index(&self, indices: &[usize]) -> Result<usize> {
        let ndim = indices.len();
        if ndim == 0 || ndim > MAX_RANK {
            return Err(Error::InvalidRank(ndim));
        }
        let mut full = [0; MAX_RANK];
        full[MAX_RANK - ndim..].copy_from_slice(indices);
        let mut offset = 0;
        for (axis, (&index, (&extent, &stride))) in full
            .iter()
            .zip(self.shape.iter().zip(self.strides.iter()))
            .enumerate()
        {
            if index >= extent {
                return Err(Error::IndexOutOfBounds {
                    axis,
                    index,
                    extent,
                });
            }
            offset += index * stride;
        }
        Ok(offset)
    }

    /// Maps the `nth` element of a logical row-major enumeration to its buffer offset.
    ///
    /// The caller guarantees `nth < size`; the result is unspecified otherwise. Zero strides are
    /// honored, so broadcast layouts map many logical positions to one offset.
    pub fn offset(&self, nth: usize) -> usize {
        debug_assert!(nth < self.size, "position {nth} outside layout of size {}", self.size);
        let mut rest = nth;
        let mut offset = 0;
        for axis in (0..MAX_RANK).rev() {
            let extent = self.shape[axis];
            offset += (rest % extent) * self.strides[axis];
            rest /= extent;
        }
        offset
    }

    /// Maps the `nth` element of a logical row-major enumeration to its multi-dimensional index.
    ///
    /// The caller guarantees `nth < size`; the result is unspecified otherwise.
    pub fn coords(&self, nth: usize) -> [usize; MAX_RANK] {
        debug_assert!(nth < self.size, "position {nth} outside layout of size {}", self.size);
        let mut rest = nth;
        let mut coords = [0; MAX_RANK];
        for axis in (0..MAX_RANK).rev() {
            coords[axis] = rest % self.shape[axis];
            rest /= self.shape[axis];
        }
        coords
    }
}

// NOTE: Transformation interface.

impl Layout {
    /// Broadcasts two layouts against each other in place over the axis range `[start, end)`.
    ///
    /// Equal extents pass through. Where exactly one side has extent 1, that side takes the other
    /// side's extent with a stride of zero. Anything else fails with `Broadcast`.
    pub fn broadcast(a: &mut Layout, b: &mut Layout, start: usize, end: usize) -> Result<()> {
        if start > end || end > MAX_RANK {
            return Err(Error::AxisRange(start, end));
        }
        for axis in start..end {
            let (extent_a, extent_b) = (a.shape[axis], b.shape[axis]);
            if extent_a == extent_b {
                continue;
            } else if extent_a == 1 {
                a.shape[axis] = extent_b;
                a.strides[axis] = 0;
            } else if extent_b == 1 {
                b.shape[axis] = extent_a;
                b.strides[axis] = 0;
            } else {
                return Err(Error::Broadcast(extent_a, extent_b, axis));
            }
        }
        a.size = a.shape.iter().product();
        b.size = b.shape.iter().product();
        Ok(())
    }

    /// Permutes the last `perm.len()` axes in place; leading axes are untouched.
    ///
    /// # Parameters
    /// - `perm`: a permutation of `0..perm.len()`; duplicate or out-of-range entries are
    ///   rejected.
    pub fn transpose(&mut self, perm: &[usize]) -> Result<()> {
        let ndim = perm.len();
        if ndim == 0 || ndim > MAX_RANK {
            return Err(Error::InvalidRank(ndim));
        }
        let mut seen = [false; MAX_RANK];
        for &axis in perm {
            if axis >= ndim || seen[axis] {
                return Err(Error::InvalidPermutation(perm.to_vec()));
            }
            seen[axis] = true;
        }
        let base = MAX_RANK - ndim;
        let (shape, strides) = (self.shape, self.strides);
        for (slot, &axis) in perm.iter().enumerate() {
            self.shape[base + slot] = shape[base + axis];
            self.strides[base + slot] = strides[base + axis];
        }
        Ok(())
    }

    /// Derives a layout with a new shape over the same traversal order.
    ///
    /// Requires the layout to be regular. The new shape may contain a single `-1` placeholder
    /// which is inferred from the element count; the resolved count must match `size`. The new
    /// strides are contiguous row-major scaled by the original unit step, so a stride-k
    /// traversal stays a stride-k traversal.
    pub fn reshape(&self, new_shape: &[isize]) -> Result<Layout> {
        let ndim = new_shape.len();
        if ndim == 0 || ndim > MAX_RANK {
            return Err(Error::InvalidRank(ndim));
        }
        if !self.is_regular() {
            return Err(Error::NotRegular);
        }
        let mut placeholder = None;
        let mut known = 1usize;
        for (slot, &extent) in new_shape.iter().enumerate() {
            match extent {
                -1 if placeholder.is_none() => placeholder = Some(slot),
                extent if extent > 0 => known *= extent as usize,
                _ => return Err(Error::InvalidShape),
            }
        }
        let mut resolved = [1; MAX_RANK];
        for (slot, &extent) in new_shape.iter().enumerate() {
            resolved[MAX_RANK - ndim + slot] = extent.max(1) as usize;
        }
        if let Some(slot) = placeholder {
            if known == 0 || self.size % known != 0 {
                return Err(Error::Reshape(self.size, known));
            }
            resolved[MAX_RANK - ndim + slot] = self.size / known;
        } else if known != self.size {
            return Err(Error::Reshape(self.size, known));
        }
        let unit = self.strides[MAX_RANK - 1];
        let strides = contiguous_strides(&resolved, unit);
        Ok(Layout {
            shape: resolved,
            strides,
            size: self.size,
        })
    }

    /// Derives a layout with the masked axes collapsed to extent 1.
    ///
    /// # Parameters
    /// - `mask`: bit `i` collapses the `i`-th of the last `ndim` axes, counted left to right.
    /// - `ndim`: how many trailing axes the mask covers.
    ///
    /// The resulting strides are recomputed contiguously.
    pub fn reduce(&self, mask: u32, ndim: usize) -> Result<Layout> {
        if ndim == 0 || ndim > MAX_RANK {
            return Err(Error::InvalidRank(ndim));
        }
        if mask.checked_shr(ndim as u32).unwrap_or(0) != 0 {
            return Err(Error::Mask(mask, ndim));
        }
        let base = MAX_RANK - ndim;
        let mut shape = self.shape;
        for axis in 0..ndim {
            if mask & (1 << axis) != 0 {
                shape[base + axis] = 1;
            }
        }
        let strides = contiguous_strides(&shape, 1);
        let size = shape.iter().product();
        Ok(Layout {
            shape,
            strides,
            size,
        })
    }
}

// NOTE: Predicate interface.

impl Layout {
    /// True iff the strides form a single-unit-step sequence: there is a unit step `k >= 1` with
    /// `strides[MAX_RANK - 1] = k` and every other stride the product of the next stride and
    /// extent. Zero strides never qualify.
    pub fn is_regular(&self) -> bool {
        if self.strides[MAX_RANK - 1] < 1 {
            return false;
        }
        (0..MAX_RANK - 1).all(|axis| self.strides[axis] == self.strides[axis + 1] * self.shape[axis + 1])
    }

    /// True iff the layout is regular with a unit step of exactly 1: row-major with no gaps.
    pub fn is_contiguous(&self) -> bool {
        self.is_regular() && self.strides[MAX_RANK - 1] == 1
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}]",
            self.shape.iter().join("x"),
            self.strides.iter().join(", ")
        )
    }
}

/// Row-major strides for a full shape, scaled by `unit`.
fn contiguous_strides(shape: &[usize; MAX_RANK], unit: usize) -> [usize; MAX_RANK] {
    let mut strides = [unit; MAX_RANK];
    for axis in (0..MAX_RANK - 1).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_right_aligns_and_strides() {
        let layout = Layout::new(&[2, 3]).unwrap();
        assert_eq!(layout.shape(), &[1, 1, 2, 3]);
        assert_eq!(layout.strides(), &[6, 6, 3, 1]);
        assert_eq!(layout.size(), 6);
    }

    #[test]
    fn size_is_shape_product() {
        for shape in [&[5][..], &[2, 3][..], &[2, 3, 4][..], &[2, 3, 4, 5][..]] {
            let layout = Layout::new(shape).unwrap();
            assert_eq!(layout.size(), layout.shape().iter().product::<usize>());
        }
    }

    #[test]
    fn new_rejects_bad_shapes() {
        assert_eq!(Layout::new(&[]), Err(Error::InvalidRank(0)));
        assert_eq!(Layout::new(&[1, 2, 3, 4, 5]), Err(Error::InvalidRank(5)));
        assert_eq!(Layout::new(&[2, 0]), Err(Error::InvalidShape));
    }

    #[test]
    fn flat_index_right_aligns() {
        let layout = Layout::new(&[2, 3]).unwrap();
        assert_eq!(layout.flat_index(&[1, 2]).unwrap(), 5);
        assert_eq!(layout.flat_index(&[0, 0, 1, 0]).unwrap(), 3);
    }

    #[test]
    fn flat_index_bounds() {
        let layout = Layout::new(&[2, 3]).unwrap();
        let error = layout.flat_index(&[2, 0]).unwrap_err();
        assert_eq!(
            error,
            Error::IndexOutOfBounds {
                axis: 2,
                index: 2,
                extent: 2
            }
        );
    }

    #[test]
    fn offset_walks_strides() {
        let mut layout = Layout::new(&[2, 2]).unwrap();
        layout.transpose(&[1, 0]).unwrap();
        let offsets: Vec<_> = (0..4).map(|nth| layout.offset(nth)).collect();
        assert_eq!(offsets, vec![0, 2, 1, 3]);
    }

    #[test]
    fn coords_enumerate_row_major() {
        let layout = Layout::new(&[2, 3]).unwrap();
        assert_eq!(layout.coords(0), [0, 0, 0, 0]);
        assert_eq!(layout.coords(4), [0, 0, 1, 1]);
        assert_eq!(layout.coords(5), [0, 0, 1, 2]);
    }

    #[test]
    fn broadcast_sets_zero_strides() {
        let mut a = Layout::new(&[2, 1]).unwrap();
        let mut b = Layout::new(&[1, 3]).unwrap();
        Layout::broadcast(&mut a, &mut b, 0, MAX_RANK).unwrap();
        assert_eq!(a.shape(), &[1, 1, 2, 3]);
        assert_eq!(b.shape(), &[1, 1, 2, 3]);
        assert_eq!(a.strides()[3], 0);
        assert_eq!(b.strides()[2], 0);
        assert_eq!(a.size(), 6);
    }

    #[test]
    fn broadcast_is_symmetric() {
        let mut a1 = Layout::new(&[2, 1]).unwrap();
        let mut b1 = Layout::new(&[2, 3]).unwrap();
        Layout::broadcast(&mut a1, &mut b1, 0, MAX_RANK).unwrap();
        let mut b2 = Layout::new(&[2, 3]).unwrap();
        let mut a2 = Layout::new(&[2, 1]).unwrap();
        Layout::broadcast(&mut b2, &mut a2, 0, MAX_RANK).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
    }

    #[test]
    fn broadcast_incompatible() {
        let mut a = Layout::new(&[2, 2]).unwrap();
        let mut b = Layout::new(&[2, 3]).unwrap();
        let error = Layout::broadcast(&mut a, &mut b, 0, MAX_RANK).unwrap_err();
        assert_eq!(error, Error::Broadcast(2, 3, 3));
    }

    #[test]
    fn transpose_swaps_axes() {
        let mut layout = Layout::new(&[2, 3]).unwrap();
        layout.transpose(&[1, 0]).unwrap();
        assert_eq!(layout.shape(), &[1, 1, 3, 2]);
        assert_eq!(layout.strides(), &[6, 6, 1, 3]);
    }

    #[test]
    fn transpose_is_involutive() {
        let original = Layout::new(&[2, 3, 4]).unwrap();
        let mut layout = original;
        layout.transpose(&[0, 2, 1]).unwrap();
        layout.transpose(&[0, 2, 1]).unwrap();
        assert_eq!(layout, original);
    }

    #[test]
    fn transpose_rejects_bad_permutations() {
        let mut layout = Layout::new(&[2, 3]).unwrap();
        assert_eq!(
            layout.transpose(&[0, 0]),
            Err(Error::InvalidPermutation(vec![0, 0]))
        );
        assert_eq!(
            layout.transpose(&[0, 2]),
            Err(Error::InvalidPermutation(vec![0, 2]))
        );
    }

    #[test]
    fn reshape_round_trips() {
        let layout = Layout::new(&[2, 6]).unwrap();
        let reshaped = layout.reshape(&[3, 4]).unwrap();
        assert_eq!(reshaped.shape(), &[1, 1, 3, 4]);
        let back = reshaped.reshape(&[2, 6]).unwrap();
        assert_eq!(back, layout);
    }

    #[test]
    fn reshape_infers_placeholder() {
        let layout = Layout::new(&[2, 6]).unwrap();
        let reshaped = layout.reshape(&[4, -1]).unwrap();
        assert_eq!(reshaped.shape(), &[1, 1, 4, 3]);
        assert_eq!(layout.reshape(&[5, -1]), Err(Error::Reshape(12, 5)));
    }

    #[test]
    fn reshape_recomputes_contiguous_strides() {
        let reshaped = Layout::new(&[12]).unwrap().reshape(&[3, 4]).unwrap();
        assert_eq!(reshaped.strides(), &[12, 12, 4, 1]);
        assert!(reshaped.is_contiguous());
    }

    #[test]
    fn reshape_rejects_broadcast_layouts() {
        let mut a = Layout::new(&[2, 1]).unwrap();
        let mut b = Layout::new(&[2, 3]).unwrap();
        Layout::broadcast(&mut a, &mut b, 0, MAX_RANK).unwrap();
        assert_eq!(a.reshape(&[6]), Err(Error::NotRegular));
    }

    #[test]
    fn reshape_rejects_count_mismatch() {
        let layout = Layout::new(&[2, 3]).unwrap();
        assert_eq!(layout.reshape(&[7]), Err(Error::Reshape(6, 7)));
        assert_eq!(layout.reshape(&[0, 6]), Err(Error::InvalidShape));
    }

    #[test]
    fn reduce_collapses_masked_axes() {
        let layout = Layout::new(&[2, 3, 4]).unwrap();
        let reduced = layout.reduce(0b101, 3).unwrap();
        assert_eq!(reduced.shape(), &[1, 1, 3, 1]);
        assert_eq!(reduced.size(), 3);
        assert!(reduced.is_contiguous());
    }

    #[test]
    fn reduce_rejects_wide_masks() {
        let layout = Layout::new(&[2, 3]).unwrap();
        assert_eq!(layout.reduce(0b100, 2), Err(Error::Mask(0b100, 2)));
    }

    #[test]
    fn contiguity_predicates() {
        let layout = Layout::new(&[2, 3]).unwrap();
        assert!(layout.is_regular());
        assert!(layout.is_contiguous());

        let mut transposed = layout;
        transposed.transpose(&[1, 0]).unwrap();
        assert!(!transposed.is_regular());

        let mut a = Layout::new(&[1, 3]).unwrap();
        let mut b = Layout::new(&[2, 3]).unwrap();
        Layout::broadcast(&mut a, &mut b, 0, MAX_RANK).unwrap();
        assert!(!a.is_regular());
        assert!(!a.is_contiguous());
    }

    #[test]
    fn display_renders_shape_and_strides() {
        let layout = Layout::new(&[2, 3]).unwrap();
        assert_eq!(layout.to_string(), "1x1x2x3 [6, 6, 3, 1]");
    }
}
