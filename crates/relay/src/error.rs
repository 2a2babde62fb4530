use thiserror::Error;

use crate::record::DecodeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid event record: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error("durability buffer is closed")]
    BufferClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
