//! Bus error types.

use crate::codec::CodecError;
use crate::manager::Mode;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is already running in {0} mode")]
    AlreadyRunning(Mode),

    #[error("bus is stopping")]
    Stopping,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("dispatch pool unavailable: {0}")]
    Pool(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
