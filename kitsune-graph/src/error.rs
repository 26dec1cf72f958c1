use thiserror::Error;
use uuid::Uuid;

use crate::graph::MAX_INPUTS;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    StorageError(#[from] kitsune_storage::Error),
    #[error("backend error: {0}")]
    BackendError(#[from] kitsune_backend::Error),
    #[error("layout error: {0}")]
    LayoutError(#[from] kitsune_layout::Error),
    #[error("node {0} does not exist in the graph")]
    NodeNotFound(Uuid),
    #[error("operations take at most {MAX_INPUTS} inputs, got {0}")]
    TooManyInputs(usize),
    #[error("operation expects {expected} inputs, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("inputs belong to different backends: '{0}' and '{1}'")]
    BackendMismatch(&'static str, &'static str),
    #[error("graph contains a cycle")]
    Cycle,
    #[error("forward pass has not been executed")]
    ForwardNotExecuted,
    #[error("leaf nodes have no operation descriptor")]
    LeafOperation,
    #[error("operation context is missing")]
    MissingContext,
    #[error("data length {got} does not match tensor size {expected}")]
    DataLength { expected: usize, got: usize },
    #[error("failed to write dot file: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;
