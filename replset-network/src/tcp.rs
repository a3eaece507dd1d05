//! TCP transport for the administrative command interface
//!
//! Each message travels as a frame: a 4-byte big-endian length followed by a
//! JSON body. A client opens one connection per session, authenticates with
//! the first frame, then exchanges one request frame for one response frame.
//! There is no pooling and no reconnection; a session is short-lived by
//! construction and its socket is shut down on close or dropped with it.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use uuid::Uuid;

use replset_core::{
    with_timeout, AdminCommand, AdminConnector, AdminReply, AdminSession, Candidate,
    CommandFailure, ReplSetError, Result,
};

/// Configuration for the TCP admin transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpAdminConfig {
    /// Maximum frame payload size (in bytes)
    pub max_frame_size: usize,
    /// Disable Nagle's algorithm on client sockets
    pub nodelay: bool,
    /// How long an endpoint waits for the login frame of a new connection
    pub login_timeout: Duration,
}

impl Default for TcpAdminConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024, // 16MB
            nodelay: true,
            login_timeout: Duration::from_secs(10),
        }
    }
}

/// A command addressed to a node, tagged for response matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRequest {
    pub request_id: Uuid,
    pub command: AdminCommand,
}

/// Outcome of a command as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireResult {
    Ok(AdminReply),
    Err(CommandFailure),
}

/// Response to an [`AdminRequest`] with the same `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminResponse {
    pub request_id: Uuid,
    pub result: WireResult,
}

/// Message frame structure for TCP transport
#[derive(Debug)]
struct MessageFrame {
    length: u32,
    payload: Bytes,
}

impl MessageFrame {
    fn new(payload: Bytes, max_frame_size: usize) -> Result<Self> {
        if payload.len() > max_frame_size || payload.len() > u32::MAX as usize {
            return Err(ReplSetError::network(format!(
                "Message too large: {} bytes",
                payload.len()
            )));
        }

        Ok(Self {
            length: payload.len() as u32,
            payload,
        })
    }

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.payload.len());
        buf.put_u32(self.length);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    async fn from_stream<R>(reader: &mut R, max_frame_size: usize) -> Result<Self>
    where
        R: AsyncReadExt + Unpin,
    {
        let length = reader
            .read_u32()
            .await
            .map_err(|e| ReplSetError::network(format!("Failed to read frame length: {}", e)))?;

        if length as usize > max_frame_size {
            return Err(ReplSetError::network(format!(
                "Frame too large: {} bytes",
                length
            )));
        }

        let mut payload = vec![0u8; length as usize];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| ReplSetError::network(format!("Failed to read frame payload: {}", e)))?;

        Ok(Self {
            length,
            payload: Bytes::from(payload),
        })
    }
}

/// Serializes `message` as JSON and writes it as one frame.
pub(crate) async fn write_message<W, T>(
    writer: &mut W,
    message: &T,
    max_frame_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    let frame = MessageFrame::new(Bytes::from(body), max_frame_size)?;
    writer
        .write_all(&frame.to_bytes())
        .await
        .map_err(|e| ReplSetError::network(format!("Failed to write frame: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| ReplSetError::network(format!("Failed to flush frame: {}", e)))
}

/// Reads one frame and decodes its JSON body.
pub(crate) async fn read_message<R, T>(reader: &mut R, max_frame_size: usize) -> Result<T>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let frame = MessageFrame::from_stream(reader, max_frame_size).await?;
    Ok(serde_json::from_slice(&frame.payload)?)
}

/// Opens [`TcpAdminSession`]s.
#[derive(Debug, Clone, Default)]
pub struct TcpAdminConnector {
    config: TcpAdminConfig,
}

impl TcpAdminConnector {
    pub fn new(config: TcpAdminConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpAdminConfig {
        &self.config
    }
}

#[async_trait]
impl AdminConnector for TcpAdminConnector {
    type Session = TcpAdminSession;

    async fn connect(&self, candidate: &Candidate, timeout: Duration) -> Result<TcpAdminSession> {
        let address = candidate.address.clone();
        let config = self.config.clone();
        let credentials = candidate.credentials.clone();

        with_timeout(timeout, &format!("connect to {}", address), async move {
            let stream = TcpStream::connect(address.as_str()).await.map_err(|e| {
                ReplSetError::network(format!("Failed to connect to {}: {}", address, e))
            })?;
            if config.nodelay {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY on {}: {}", address, e);
                }
            }

            let mut session = TcpAdminSession {
                address,
                stream,
                config,
            };

            let login = AdminCommand::Authenticate {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
                source: credentials.auth_source.clone(),
            };
            match session.execute(login).await {
                Ok(_) => {}
                Err(ReplSetError::CommandFailed { failure, .. }) if failure.is_auth_failure() => {
                    return Err(ReplSetError::authentication(format!(
                        "{} rejected {}: {}",
                        session.address, credentials.username, failure
                    )));
                }
                Err(e) => return Err(e),
            }

            debug!("Opened admin session to {}", session.address);
            Ok(session)
        })
        .await
    }
}

/// One authenticated connection to one node.
#[derive(Debug)]
pub struct TcpAdminSession {
    address: String,
    stream: TcpStream,
    config: TcpAdminConfig,
}

#[async_trait]
impl AdminSession for TcpAdminSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn execute(&mut self, command: AdminCommand) -> Result<AdminReply> {
        let name = command.name();
        let request = AdminRequest {
            request_id: Uuid::new_v4(),
            command,
        };

        write_message(&mut self.stream, &request, self.config.max_frame_size).await?;
        let response: AdminResponse =
            read_message(&mut self.stream, self.config.max_frame_size).await?;

        if response.request_id != request.request_id {
            return Err(ReplSetError::network(format!(
                "Response id mismatch from {}: expected {}, got {}",
                self.address, request.request_id, response.request_id
            )));
        }

        match response.result {
            WireResult::Ok(reply) => Ok(reply),
            WireResult::Err(failure) => Err(ReplSetError::command_failed(name, failure)),
        }
    }

    async fn close(mut self) -> Result<()> {
        debug!("Closing admin session to {}", self.address);
        self.stream
            .shutdown()
            .await
            .map_err(|e| ReplSetError::network(format!("Failed to close {}: {}", self.address, e)))
    }
}
