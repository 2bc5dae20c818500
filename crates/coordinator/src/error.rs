//! Error types for coordinator

use thiserror::Error;

use crate::frame::FrameError;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Master unavailable at {0}")]
    MasterUnavailable(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}
