use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObservationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("Invalid key path: {0:?}")]
    InvalidPath(String),
    #[error("Index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("Attribute {0} is not a list")]
    NotAList(String),
}

pub type Result<T, E = ObservationError> = std::result::Result<T, E>;
