use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RtspcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("sdp error: {0}")]
    Sdp(String),

    #[error("depacketization error: {0}")]
    Depacketization(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

pub type Result<T> = std::result::Result<T, RtspcError>;
