use thiserror::Error;
use uuid::Uuid;

use kitsune_layout::Layout;

use crate::registry::RecordId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("layout error: {0}")]
    LayoutError(#[from] kitsune_layout::Error),
    #[error("backend error: {0}")]
    BackendError(#[from] kitsune_backend::Error),
    #[error("operand shapes do not match: {0} vs {1}")]
    ShapeMismatch(Layout, Layout),
    #[error("storages belong to different backends: '{0}' and '{1}'")]
    BackendMismatch(&'static str, &'static str),
    #[error("parent storage {0} is not registered")]
    ParentNotRegistered(Uuid),
    #[error("storage {0} is not registered")]
    NotRegistered(Uuid),
    #[error("bucket of storage {0} is not empty")]
    BucketNotEmpty(Uuid),
    #[error("{0} does not exist")]
    RecordNotFound(RecordId),
}

pub type Result<T> = std::result::Result<T, self::Error>;
