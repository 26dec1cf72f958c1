use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("backend '{0}' is not registered")]
    NotFound(String),
    #[error("backend '{0}' is already registered")]
    AlreadyRegistered(&'static str),
    #[error("storage handle does not belong to backend '{0}'")]
    ForeignHandle(&'static str),
    #[error("operation not implemented by backend '{0}'")]
    NotImplemented(&'static str),
    #[error("layout error: {0}")]
    LayoutError(#[from] kitsune_layout::Error),
    #[error("kernel error: {0}")]
    KernelError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;
