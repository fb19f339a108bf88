//! Client connection handling

use crate::game::ConnectionId;
use crate::protocol::{
    check_frame_len, deserialize, serialize_and_frame, ClientMessage, ServerMessage,
};
use anyhow::{anyhow, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Outbound queue of a connected client
#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// Unique client identifier
    id: ConnectionId,

    /// Channel to send messages to this client
    sender: mpsc::Sender<ServerMessage>,
}

impl ClientConnection {
    /// Create a new client connection with a fresh id
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self::with_id(Uuid::new_v4(), sender)
    }

    pub fn with_id(id: ConnectionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { id, sender }
    }

    /// Get client ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message without waiting. Fails if the queue is full or the
    /// writer is gone.
    pub fn try_send(&self, msg: ServerMessage) -> Result<()> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => anyhow!("Outbound queue full for client {}", self.id),
            TrySendError::Closed(_) => anyhow!("Client {} is gone", self.id),
        })
    }
}

/// Read a length-prefixed message from a stream
pub async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];

    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = check_frame_len(u32::from_be_bytes(len_bytes))?;

    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;

    Ok(Some(buffer))
}

/// Write a message as one length-prefixed frame
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &ServerMessage,
) -> Result<()> {
    let framed = serialize_and_frame(msg)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Task to write outgoing messages to the client
pub async fn client_writer_task(
    mut writer: OwnedWriteHalf,
    mut receiver: mpsc::Receiver<ServerMessage>,
) {
    while let Some(msg) = receiver.recv().await {
        if let Err(e) = write_message(&mut writer, &msg).await {
            tracing::error!("Failed to write message to client: {}", e);
            break;
        }
    }

    tracing::debug!("Client writer task finished");
}

/// Parse a client message from bytes
pub fn parse_client_message(bytes: &[u8]) -> Result<ClientMessage> {
    deserialize(bytes)
}

/// Create a welcome message for a new client
pub fn create_welcome_message(connection_id: ConnectionId) -> ServerMessage {
    ServerMessage::Welcome {
        connection_id,
        protocol_version: crate::protocol::PROTOCOL_VERSION,
    }
}

/// Create an error message
pub fn create_error_message(message: String) -> ServerMessage {
    ServerMessage::Error { message }
}
