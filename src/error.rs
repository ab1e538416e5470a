use crate::primitives::Va;
use std::{
    io,
    path::PathBuf,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The address is not mapped or not readable. Decoders turn this into "not found".
    #[error("address {0} is not readable")]
    Unreadable(Va),

    #[error("failed to read {len} bytes at {address}")]
    ReadFailure {
        address: Va,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("the destination file already exists: {0:?}")]
    AlreadyExists(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("failed to parse image: {0}")]
    Image(#[from] pelite::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
