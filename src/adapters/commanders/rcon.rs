//! Source engine RCON client.
//!
//! Wire format: every packet is `size:i32 | id:i32 | type:i32 | body | 0 | 0`,
//! little-endian, where `size` counts everything after itself. Each call opens
//! a fresh TCP connection, authenticates, runs one command and collects the
//! reply. Long replies arrive split over several packets, so an empty
//! `RESPONSE_VALUE` packet is sent right after the command; the server echoes
//! it back once the real reply has been flushed, which marks the end.
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::Instrument;

use crate::{
    config::models::parse_duration_or,
    core::registry::{ConstructError, parse_config},
    ports::{CommandError, CommandResult, Commander},
    tracing_setup::create_backend_span,
};

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

const AUTH_ID: i32 = 1;
const EXEC_ID: i32 = 2;
const MIRROR_ID: i32 = 3;

/// id + type + two terminating nulls
const MIN_PACKET_SIZE: i32 = 10;
const MAX_PACKET_SIZE: i32 = 64 * 1024;

const DEFAULT_PORT: u16 = 27015;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
pub struct RconConfig {
    /// `host:port`; takes precedence over `server` / `port`
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub timeout: Option<String>,
}

impl RconConfig {
    fn address(&self) -> Option<String> {
        match (&self.address, &self.server) {
            (Some(address), _) if !address.trim().is_empty() => Some(address.trim().to_string()),
            (_, Some(server)) if !server.trim().is_empty() => Some(format!(
                "{}:{}",
                server.trim(),
                self.port.unwrap_or(DEFAULT_PORT)
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Packet {
    id: i32,
    kind: i32,
    body: Vec<u8>,
}

impl Packet {
    fn new(id: i32, kind: i32, body: &str) -> Self {
        Self {
            id,
            kind,
            body: body.as_bytes().to_vec(),
        }
    }

    fn encode(&self) -> BytesMut {
        let size = self.body.len() as i32 + MIN_PACKET_SIZE;
        let mut buf = BytesMut::with_capacity(size as usize + 4);
        buf.put_i32_le(size);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.kind);
        buf.put_slice(&self.body);
        buf.put_u8(0);
        buf.put_u8(0);
        buf
    }
}

async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> CommandResult<()> {
    writer.write_all(&packet.encode()).await?;
    Ok(())
}

async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> CommandResult<Packet> {
    let size = reader.read_i32_le().await?;
    if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
        return Err(CommandError::Protocol(format!(
            "packet size {size} out of range"
        )));
    }

    let mut payload = vec![0u8; size as usize];
    reader.read_exact(&mut payload).await?;

    let id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let kind = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let mut body = payload[8..].to_vec();
    // Drop the body terminator and the empty trailing string.
    while body.last() == Some(&0) {
        body.pop();
    }

    Ok(Packet { id, kind, body })
}

/// Authenticate and run one command over an already open stream.
async fn exchange<S>(stream: &mut S, password: &str, command: &str) -> CommandResult<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_packet(stream, &Packet::new(AUTH_ID, SERVERDATA_AUTH, password)).await?;
    loop {
        let packet = read_packet(stream).await?;
        if packet.kind != SERVERDATA_AUTH_RESPONSE {
            // The server sends an empty RESPONSE_VALUE ahead of the verdict.
            continue;
        }
        if packet.id == -1 {
            return Err(CommandError::Auth("server rejected the RCON password".to_string()));
        }
        if packet.id != AUTH_ID {
            return Err(CommandError::Protocol(format!(
                "unexpected auth response id {}",
                packet.id
            )));
        }
        break;
    }

    write_packet(stream, &Packet::new(EXEC_ID, SERVERDATA_EXECCOMMAND, command)).await?;
    write_packet(stream, &Packet::new(MIRROR_ID, SERVERDATA_RESPONSE_VALUE, "")).await?;
    stream.flush().await?;

    let mut reply = Vec::new();
    loop {
        let packet = read_packet(stream).await?;
        match packet.id {
            MIRROR_ID => break,
            EXEC_ID => reply.extend_from_slice(&packet.body),
            other => tracing::debug!(id = other, "Ignoring stray RCON packet"),
        }
    }

    Ok(String::from_utf8_lossy(&reply).into_owned())
}

pub struct RconCommander {
    address: String,
    password: String,
    timeout: Duration,
}

impl RconCommander {
    pub fn new(address: impl Into<String>, password: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            timeout,
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConstructError> {
        let config: RconConfig = parse_config(config)?;
        let address = config
            .address()
            .ok_or_else(|| ConstructError::invalid("rcon needs `address` or `server`"))?;
        let timeout = parse_duration_or(config.timeout.as_deref(), DEFAULT_TIMEOUT);
        Ok(Self::new(address, config.password, timeout))
    }

    async fn run(&self, command: &str) -> CommandResult<String> {
        let mut stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        exchange(&mut stream, &self.password, command).await
    }
}

#[async_trait]
impl Commander for RconCommander {
    async fn execute(&self, command: &str) -> CommandResult<String> {
        let span = create_backend_span("rcon", &self.address);
        tokio::time::timeout(self.timeout, self.run(command).instrument(span))
            .await
            .map_err(|_| CommandError::Timeout(self.timeout))?
    }
}
