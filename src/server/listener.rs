//! TCP listener and server main loop

use super::connection::{
    client_writer_task, create_error_message, parse_client_message, read_message,
    ClientConnection,
};
use super::dispatcher::{Dispatcher, Inbound};
use crate::config::Config;
use crate::game::{ConnectionId, ParticipantDirectory, SessionRegistry};
use crate::protocol::ServerMessage;
use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Capacity of the dispatcher queue shared by all connections
const INBOUND_CAPACITY: usize = 1024;

/// How long a closing connection may spend flushing queued replies
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// TCP game server
pub struct ServerListener {
    listener: TcpListener,
    config: Config,
}

impl ServerListener {
    /// Bind the configured address
    pub async fn bind(config: Config) -> Result<Self> {
        let listener = TcpListener::bind(config.server.bind_addr).await?;
        Ok(Self { listener, config })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        tracing::info!("Server listening on {}", self.local_addr()?);

        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(INBOUND_CAPACITY);
        let dispatcher = Dispatcher::new(
            SessionRegistry::new(self.config.game.clone()),
            ParticipantDirectory::new(),
            &inbound_tx,
        );
        let dispatcher_handle = tokio::spawn(dispatcher.run(inbound_rx));

        loop {
            tokio::select! {
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }

                // Accept new connections
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let inbound = inbound_tx.clone();
                            let capacity = self.config.server.outbox_capacity;
                            tokio::spawn(async move {
                                let result = handle_client(stream, addr, inbound, capacity).await;
                                if let Err(e) = result {
                                    tracing::error!("Client error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        drop(inbound_tx);
        dispatcher_handle.abort();
        tracing::info!("Server stopped");

        Ok(())
    }
}

/// Handle a single client connection
async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    inbound: mpsc::Sender<Inbound>,
    outbox_capacity: usize,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, writer) = stream.into_split();

    // Create message channel for this client
    let (tx, rx) = mpsc::channel::<ServerMessage>(outbox_capacity);
    let client = ClientConnection::new(tx.clone());
    let connection_id = client.id();

    tracing::debug!("Accepted {} from {}", connection_id, addr);

    let mut writer_handle = tokio::spawn(client_writer_task(writer, rx));

    inbound
        .send(Inbound::Connected { connection: client })
        .await?;

    let result = read_commands(&mut reader, connection_id, &inbound, &tx).await;

    // Always tell the dispatcher, even after a read error
    let _ = inbound
        .send(Inbound::Disconnected { connection_id })
        .await;

    // The writer ends once the dispatcher has dropped its outbox handle
    drop(tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle)
        .await
        .is_err()
    {
        tracing::debug!("Writer for {} did not drain in time", connection_id);
        writer_handle.abort();
    }

    tracing::debug!("Client handler finished: {}", connection_id);

    result
}

/// Forward decoded commands until the peer hangs up
async fn read_commands(
    reader: &mut OwnedReadHalf,
    connection_id: ConnectionId,
    inbound: &mpsc::Sender<Inbound>,
    outbox: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    loop {
        match read_message(reader).await? {
            Some(bytes) => match parse_client_message(&bytes) {
                Ok(message) => {
                    inbound
                        .send(Inbound::Command {
                            connection_id,
                            message,
                        })
                        .await?;
                }
                Err(e) => {
                    tracing::warn!("Failed to parse message from {}: {}", connection_id, e);
                    let _ = outbox
                        .send(create_error_message(format!("Invalid message: {}", e)))
                        .await;
                }
            },
            None => return Ok(()),
        }
    }
}
