use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Error type for opening backend streams
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Connection error: {0}")]
    Connect(#[from] std::io::Error),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl StreamError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, StreamError::InvalidAddress(_))
    }
}

pub type StreamResult<T> = Result<T, StreamError>;

/// A bidirectional byte stream to a backend.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Streamer opens a raw bidirectional byte stream to a backend
#[async_trait]
pub trait Streamer: Send + Sync + 'static {
    /// Open a fresh stream. Every call yields an independent connection.
    async fn connect(&self) -> StreamResult<BoxedStream>;
}
