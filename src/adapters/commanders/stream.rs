//! Line-oriented commander over any [`Streamer`].
//!
//! Sends `command\n` on a fresh stream and collects whatever comes back until
//! the peer stays quiet for the idle timeout or closes the stream. Suits
//! console-style backends that have no framing of their own.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    config::models::parse_duration_or,
    core::registry::{ConstructError, Resolver, parse_config},
    ports::{CommandError, CommandResult, Commander, Streamer},
};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
pub struct StreamCommanderConfig {
    /// Nested `{type, config}` streamer envelope
    pub streamer: Value,
    #[serde(default)]
    pub timeout: Option<String>,
}

pub struct StreamCommander {
    streamer: Arc<dyn Streamer>,
    idle_timeout: Duration,
}

impl StreamCommander {
    pub fn new(streamer: Arc<dyn Streamer>, idle_timeout: Duration) -> Self {
        Self {
            streamer,
            idle_timeout,
        }
    }

    pub fn from_config(config: &Value, resolver: &Resolver<'_>) -> Result<Self, ConstructError> {
        let config: StreamCommanderConfig = parse_config(config)?;
        let streamer = resolver.streamer(&config.streamer)?;
        Ok(Self::new(
            streamer,
            parse_duration_or(config.timeout.as_deref(), DEFAULT_IDLE_TIMEOUT),
        ))
    }
}

#[async_trait]
impl Commander for StreamCommander {
    async fn execute(&self, command: &str) -> CommandResult<String> {
        let mut stream = self.streamer.connect().await?;
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        let mut output = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match tokio::time::timeout(self.idle_timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => output.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => return Err(CommandError::Io(e)),
            }
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}
