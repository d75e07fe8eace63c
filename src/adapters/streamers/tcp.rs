use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;

use crate::{
    config::models::parse_duration_or,
    core::registry::{ConstructError, parse_config},
    ports::{BoxedStream, StreamError, StreamResult, Streamer},
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct TcpStreamerConfig {
    pub address: String,
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Opens a plain TCP connection per `connect` call.
#[derive(Debug, Clone)]
pub struct TcpStreamer {
    address: String,
    connect_timeout: Duration,
}

impl TcpStreamer {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConstructError> {
        let config: TcpStreamerConfig = parse_config(config)?;
        if config.address.trim().is_empty() {
            return Err(ConstructError::invalid("tcp streamer needs an `address`"));
        }
        Ok(Self::new(
            config.address.trim(),
            parse_duration_or(config.timeout.as_deref(), DEFAULT_CONNECT_TIMEOUT),
        ))
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Streamer for TcpStreamer {
    async fn connect(&self) -> StreamResult<BoxedStream> {
        if self.address.is_empty() {
            return Err(StreamError::InvalidAddress(self.address.clone()));
        }
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| StreamError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        tracing::debug!("Connected TCP stream to {}", self.address);
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    #[tokio::test]
    async fn connects_and_carries_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello\n").await.unwrap();
        });

        let streamer = TcpStreamer::new(address, Duration::from_secs(1));
        let mut stream = streamer.connect().await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello\n");
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        // Bind then drop to get a port nobody listens on.
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = TcpStreamer::new(address, Duration::from_secs(1))
            .connect()
            .await
            .err()
            .unwrap();
        assert!(err.is_transient());
    }

    #[test]
    fn config_requires_address() {
        assert!(TcpStreamer::from_config(&serde_json::json!({ "address": " " })).is_err());
        let streamer =
            TcpStreamer::from_config(&serde_json::json!({ "address": "127.0.0.1:27015" })).unwrap();
        assert_eq!(streamer.address(), "127.0.0.1:27015");
    }
}
