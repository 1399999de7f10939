//! Client for the MaRCoS server protocol.
//!
//! Every message is a single msgpack array. Requests are
//! `[kind, packet_idx, 0, version, {command: args, ...}]` and replies are
//! `[128, packet_idx, 0, version, results, status]`, where `status` may
//! carry `infos`, `warnings` and `errors`.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{HwError, Result};

/// Protocol version spoken by this client.
pub const PROTOCOL_VERSION: (u8, u8, u8) = (1, 0, 5);

const REQUEST: u32 = 0;
const EMERGENCY_STOP: u32 = 1;
const CLOSE_SERVER: u32 = 2;
const REPLY: u32 = 128;

const READ_CHUNK: usize = 4096;

fn version_word() -> u32 {
    let (major, minor, debug) = PROTOCOL_VERSION;
    (u32::from(major) << 16) | (u32::from(minor) << 8) | u32::from(debug)
}

/// Messages the server attached to a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub infos: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Forward the messages to the log.
    pub fn log(&self) {
        for info in &self.infos {
            log::info!("server: {info}");
        }
        for warning in &self.warnings {
            log::warn!("server: {warning}");
        }
        for error in &self.errors {
            log::error!("server: {error}");
        }
    }
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub packet_idx: u32,
    pub results: Value,
    pub status: Status,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawReply(u32, u32, u32, u32, Value, Status);

/// What the server runs on, as answered to `are_you_real`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Hardware,
    Simulation,
    Software,
}

impl ServerKind {
    fn parse(answer: &str) -> Option<Self> {
        match answer {
            "hardware" => Some(Self::Hardware),
            "simulation" => Some(Self::Simulation),
            "software" => Some(Self::Software),
            _ => None,
        }
    }
}

/// Connection to a MaRCoS server.
#[derive(Debug)]
pub struct MarcosClient<S = TcpStream> {
    stream: S,
    packet_idx: u32,
    timeout: Duration,
    buffer: Vec<u8>,
}

impl MarcosClient<TcpStream> {
    /// Connect to the server at `addr`. `timeout` bounds the connection
    /// attempt and every later command.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| HwError::Timeout {
                action: format!("connecting to {addr}"),
            })??;
        stream.set_nodelay(true)?;
        log::info!("Connected to MaRCoS server at {addr}");
        Ok(Self::from_stream(stream, timeout))
    }
}

impl<S> MarcosClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Speak the protocol over an already connected stream.
    pub fn from_stream(stream: S, timeout: Duration) -> Self {
        Self {
            stream,
            packet_idx: 0,
            timeout,
            buffer: Vec::new(),
        }
    }

    /// Send `commands` and return the reply. Errors in the status are
    /// returned as [`HwError::Server`].
    pub async fn command(&mut self, commands: Map<String, Value>) -> Result<Reply> {
        let reply = self.command_tolerant(commands).await?;
        if reply.status.is_ok() {
            Ok(reply)
        } else {
            Err(HwError::Server {
                errors: reply.status.errors,
            })
        }
    }

    /// Send `commands` and return the reply whatever its status.
    pub async fn command_tolerant(&mut self, commands: Map<String, Value>) -> Result<Reply> {
        let idx = self.send(REQUEST, Value::Object(commands)).await?;
        let reply = self.receive().await?;
        if reply.packet_idx != idx {
            log::warn!(
                "Reply to packet {} arrived while waiting for {idx}",
                reply.packet_idx
            );
        }
        reply.status.log();
        Ok(reply)
    }

    /// Ask the server what it is running on.
    pub async fn are_you_real(&mut self) -> Result<ServerKind> {
        let mut commands = Map::new();
        commands.insert("are_you_real".to_string(), Value::from(0));
        let reply = self.command(commands).await?;
        let answer = reply
            .results
            .get("are_you_real")
            .and_then(Value::as_str)
            .ok_or_else(|| HwError::Protocol("missing answer to are_you_real".to_string()))?;
        ServerKind::parse(answer)
            .ok_or_else(|| HwError::Protocol(format!("unknown server kind '{answer}'")))
    }

    /// Halt the sequencer immediately.
    pub async fn emergency_stop(&mut self) -> Result<()> {
        self.send(EMERGENCY_STOP, Value::Object(Map::new())).await?;
        Ok(())
    }

    /// Ask the server process to shut down.
    pub async fn close_server(&mut self) -> Result<()> {
        self.send(CLOSE_SERVER, Value::Object(Map::new())).await?;
        Ok(())
    }

    /// Close the connection.
    pub async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        log::debug!("Closed MaRCoS connection");
        Ok(())
    }

    async fn send(&mut self, kind: u32, payload: Value) -> Result<u32> {
        let idx = self.packet_idx;
        self.packet_idx = self.packet_idx.wrapping_add(1);
        let packet = rmp_serde::to_vec(&(kind, idx, 0u32, version_word(), payload))?;
        log::trace!("Sending packet {idx} ({} bytes)", packet.len());
        tokio::time::timeout(self.timeout, self.stream.write_all(&packet))
            .await
            .map_err(|_| HwError::Timeout {
                action: "sending a packet".to_string(),
            })??;
        Ok(idx)
    }

    /// Read until one complete msgpack value has been decoded.
    async fn receive(&mut self) -> Result<Reply> {
        loop {
            if !self.buffer.is_empty() {
                if let Some(reply) = self.decode_buffered()? {
                    return Ok(reply);
                }
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = tokio::time::timeout(self.timeout, self.stream.read(&mut chunk))
                .await
                .map_err(|_| HwError::Timeout {
                    action: "waiting for a reply".to_string(),
                })??;
            if n == 0 {
                return Err(HwError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn decode_buffered(&mut self) -> Result<Option<Reply>> {
        let mut cursor = Cursor::new(self.buffer.as_slice());
        let raw = {
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            RawReply::deserialize(&mut de)
        };
        match raw {
            Ok(RawReply(kind, packet_idx, _, version, results, status)) => {
                let consumed = cursor.position() as usize;
                self.buffer.drain(..consumed);
                if kind != REPLY {
                    return Err(HwError::Protocol(format!("unexpected packet kind {kind}")));
                }
                if version != version_word() {
                    log::warn!(
                        "Server speaks protocol version {version:#08x}, client {:#08x}",
                        version_word()
                    );
                }
                Ok(Some(Reply {
                    packet_idx,
                    results,
                    status,
                }))
            }
            Err(err) if is_incomplete(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn is_incomplete(err: &rmp_serde::decode::Error) -> bool {
    use rmp_serde::decode::Error;
    match err {
        Error::InvalidMarkerRead(io) | Error::InvalidDataRead(io) => {
            io.kind() == std::io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}
