//! TCP session transport: length-prefixed JSON frames in both directions.
//! Each connection is its own command origin for debouncing.

use crate::core::OrchestratorHandle;
use crate::BroadcastMessage;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use tuner_proto::protocol::{Broadcast, FrameError, Message, PROTOCOL_VERSION};
use tuner_proto::state::StateManager;

pub struct ClientHandle {
    pub id: usize,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    orchestrator: OrchestratorHandle,
    clients: Arc<RwLock<Vec<ClientHandle>>>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, orchestrator, clients, broadcast_tx).await;
    })
}

/// Accept loop on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    orchestrator: OrchestratorHandle,
    clients: Arc<RwLock<Vec<ClientHandle>>>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;

                let client_count = {
                    let mut guard = clients.write().await;
                    guard.push(ClientHandle { id });
                    guard.len()
                };
                info!("Client {} connected from {} ({} connected)", id, peer, client_count);

                let orchestrator = orchestrator.clone();
                let bcast_rx = broadcast_tx.subscribe();
                let clients_ref = clients.clone();

                tokio::spawn(async move {
                    let origin = format!("client-{}", id);
                    handle_client(stream, &orchestrator, &origin, bcast_rx).await;
                    orchestrator.origin_closed(&origin).await;

                    let client_count = {
                        let mut guard = clients_ref.write().await;
                        guard.retain(|c| c.id != id);
                        guard.len()
                    };
                    info!("Client {} disconnected ({} connected)", id, client_count);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    orchestrator: &OrchestratorHandle,
    origin: &str,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let state_manager = orchestrator.state_manager();
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Hello: version, current snapshot and queue
    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("{} closed connection", origin);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    debug!("{} sent command: {:?}", origin, cmd.kind());
                                    if orchestrator.send(origin, cmd).await.is_err() {
                                        warn!("Orchestrator gone, dropping {}", origin);
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(FrameError::Incomplete) => break,
                                Err(FrameError::Malformed { consumed, source }) => {
                                    read_buf.drain(..consumed);
                                    warn!("{} sent a malformed frame: {}", origin, source);
                                    let reply = Broadcast::Error {
                                        message: format!("malformed frame: {source}"),
                                    };
                                    if send_broadcast(&mut write_half, reply).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e @ FrameError::TooLarge(_)) => {
                                    warn!("Dropping {}: {}", origin, e);
                                    let reply = Broadcast::Error { message: e.to_string() };
                                    let _ = send_broadcast(&mut write_half, reply).await;
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from {}: {}", origin, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let broadcast = match msg {
                    Ok(message) => to_broadcast(message),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("{} missed {} broadcast messages", origin, n);
                        Broadcast::State { data: state_manager.get_state().await }
                    }
                    Err(_) => break,
                };
                if send_broadcast(&mut write_half, broadcast).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_broadcast<W>(writer: &mut W, broadcast: Broadcast) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    match Message::Broadcast(broadcast).encode() {
        Ok(encoded) => writer.write_all(&encoded).await,
        Err(e) => {
            warn!("Failed to encode broadcast: {}", e);
            Ok(())
        }
    }
}

fn to_broadcast(message: BroadcastMessage) -> Broadcast {
    match message {
        BroadcastMessage::StateUpdated(snapshot) => Broadcast::State {
            data: (*snapshot).clone(),
        },
        BroadcastMessage::MetadataUpdated(song) => Broadcast::Metadata { song },
        BroadcastMessage::QueueUpdated(items) => Broadcast::Queue {
            items: (*items).clone(),
        },
        BroadcastMessage::Log(message) => Broadcast::Log { message },
        BroadcastMessage::Error(message) => Broadcast::Error { message },
    }
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    let queue = state_manager.get_queue().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        daemon_rev: state.rev,
        state,
        queue,
    })
    .encode()
}
