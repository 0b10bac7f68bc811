use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("link closed")]
    Closed,
    #[error("link i/o timeout")]
    Timeout,
    #[error("no peer connected within {0:?}")]
    AcceptTimeout(Duration),
    #[error("bad address: {0}")]
    Address(String),
    #[error("device fault: {0}")]
    Device(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
