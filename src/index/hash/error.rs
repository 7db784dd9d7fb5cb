use thiserror::Error;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum HashIndexError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid page format: {0}")]
    InvalidPageFormat(String),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}
