use thiserror::Error;

use crate::layout::MAX_RANK;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("shape must have between 1 and {MAX_RANK} dimensions, got {0}")]
    InvalidRank(usize),
    #[error("shape extents must be positive")]
    InvalidShape,
    #[error("invalid axis range {0}..{1}")]
    AxisRange(usize, usize),
    #[error("index {index} is out of bounds for extent {extent} at axis {axis}")]
    IndexOutOfBounds {
        axis: usize,
        index: usize,
        extent: usize,
    },
    #[error("cannot broadcast extents {0} and {1} at axis {2}")]
    Broadcast(usize, usize, usize),
    #[error("invalid permutation {0:?}")]
    InvalidPermutation(Vec<usize>),
    #[error("cannot reshape layout of {0} elements into {1} elements")]
    Reshape(usize, usize),
    #[error("layout is not regular")]
    NotRegular,
    #[error("reduce mask {0:#b} has bits outside the last {1} axes")]
    Mask(u32, usize),
}

pub type Result<T> = std::result::Result<T, self::Error>;
