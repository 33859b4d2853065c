//! WebSocket handler for client tunnels.
//!
//! Each client socket is paired with one TCP connection to the display
//! server. Client text frames are written to the display server as-is;
//! display server output is cut into whole instructions before it is sent
//! to the client. The tunnel's quota ticker shares the client writer with
//! the relay.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{Stream, StreamExt};
use gw_protocol::{GatewayStatus, Instruction, InstructionCodec};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::tunnel::{self, GatewayTunnel, TunnelError, TunnelHandle};
use crate::workers::quota_ticker::TickerHandle;
use crate::ws::registry::TunnelEntry;
use crate::ws::writer::{OutboundWriter, PeerWriter};
use crate::AppState;

/// Subprotocol offered by browser display clients.
const SUBPROTOCOL: &str = "guacamole";

/// Read buffer size for display server output.
const READ_CHUNK: usize = 8 * 1024;

/// Most instructions sent to the client in one message.
const BATCH_MAX: usize = 64;

/// Why a tunnel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TunnelEnd {
    ClientClosed,
    BackendClosed,
    BackendFailed,
    Killed,
    Quota(GatewayStatus),
}

/// Tunnel WebSocket upgrade.
pub async fn tunnel_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_tunnel_socket(socket, state))
}

async fn handle_tunnel_socket(socket: WebSocket, state: Arc<AppState>) {
    let (ws_sender, ws_receiver) = socket.split();
    let writer = Arc::new(PeerWriter::new(Box::pin(ws_sender)));
    let backend = tunnel::connect_backend(&state.config.backend).await;
    serve_tunnel(state, writer, ws_receiver, backend).await;
}

/// Run one tunnel from backend connect to cleanup. Returns `None` when the
/// tunnel never started.
async fn serve_tunnel<S>(
    state: Arc<AppState>,
    writer: Arc<PeerWriter>,
    client: S,
    backend: Result<TcpStream, TunnelError>,
) -> Option<TunnelEnd>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let backend = match backend {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("Tunnel rejected: {}", e);
            let status = e.status();
            let _ = writer.send_text(Instruction::close(status).encode()).await;
            writer.close(Some(close_frame(status))).await;
            return None;
        }
    };

    let tunnel = GatewayTunnel::from_quota(&state.config.quota);
    let tunnel_id = tunnel.uuid();

    // Tell the client which tunnel it is on before anything else
    let announce = Instruction::internal([tunnel_id.to_string()]).encode();
    if let Err(e) = writer.send_text(announce).await {
        tracing::warn!(%tunnel_id, "Client gone before tunnel start: {}", e);
        return None;
    }

    let ticker = state.scheduler.spawn(writer.clone(), &tunnel);
    let kill = CancellationToken::new();
    state.registry.register(TunnelEntry {
        tunnel_id,
        connected_at: tunnel.connected_at(),
        ticker: ticker.clone(),
        kill: kill.clone(),
    });

    tracing::info!(%tunnel_id, "Tunnel connected");

    let (backend_read, backend_write) = backend.into_split();
    let end = relay(
        tunnel_id,
        client,
        backend_read,
        backend_write,
        writer.clone(),
        ticker,
        kill,
    )
    .await;

    // ── Cleanup ──────────────────────────────────────────────
    state.registry.unregister(&tunnel_id);
    if end == TunnelEnd::BackendFailed {
        let close = Instruction::close(GatewayStatus::UpstreamError).encode();
        let _ = writer.send_text(close).await;
    }
    writer.close(end_close_frame(end)).await;
    tracing::info!(%tunnel_id, ?end, "Tunnel closed");
    Some(end)
}

/// Pump data both ways until one side ends the tunnel.
async fn relay<S, R, W, O>(
    tunnel_id: Uuid,
    mut client: S,
    backend_read: R,
    mut backend_write: W,
    writer: Arc<O>,
    mut ticker: TickerHandle,
    kill: CancellationToken,
) -> TunnelEnd
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    O: OutboundWriter + ?Sized + 'static,
{
    let mut upstream = tokio::spawn(backend_to_client(tunnel_id, backend_read, writer));

    let end = loop {
        tokio::select! {
            msg = client.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    // Internal-opcode frames are meant for the gateway only
                    if text.as_str().starts_with("0.") {
                        tracing::debug!(%tunnel_id, "Internal client frame consumed");
                        continue;
                    }
                    if let Err(e) = backend_write.write_all(text.as_str().as_bytes()).await {
                        tracing::error!(%tunnel_id, "Display server write failed: {}", e);
                        break TunnelEnd::BackendFailed;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break TunnelEnd::ClientClosed,
                Some(Err(e)) => {
                    tracing::warn!(%tunnel_id, "Client WebSocket error: {}", e);
                    break TunnelEnd::ClientClosed;
                }
                Some(Ok(_)) => {}
            },
            result = &mut upstream => {
                break match result {
                    Ok(end) => end,
                    Err(e) => {
                        tracing::error!(%tunnel_id, "Display server relay task failed: {}", e);
                        TunnelEnd::BackendFailed
                    }
                };
            }
            condition = ticker.expired() => {
                let status = condition.status().unwrap_or(GatewayStatus::ServerError);
                break TunnelEnd::Quota(status);
            }
            _ = kill.cancelled() => break TunnelEnd::Killed,
        }
    };

    ticker.cancel();
    upstream.abort();
    let _ = backend_write.shutdown().await;
    end
}

/// Forward display server output to the client, batching the whole
/// instructions that are already decoded into one message.
async fn backend_to_client<R, O>(tunnel_id: Uuid, backend: R, writer: Arc<O>) -> TunnelEnd
where
    R: AsyncRead + Unpin,
    O: OutboundWriter + ?Sized,
{
    let mut frames = FramedRead::with_capacity(backend, InstructionCodec::new(), READ_CHUNK)
        .ready_chunks(BATCH_MAX);

    while let Some(chunk) = frames.next().await {
        let mut batch = String::new();
        let mut failure = None;
        for item in chunk {
            match item {
                Ok(instruction) => batch.push_str(&instruction.encode()),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !batch.is_empty() {
            if let Err(e) = writer.send_text(batch).await {
                tracing::info!(%tunnel_id, "Client send failed: {}", e);
                return TunnelEnd::ClientClosed;
            }
        }
        if let Some(e) = failure {
            tracing::error!(%tunnel_id, "Display server output failed: {}", e);
            return TunnelEnd::BackendFailed;
        }
    }
    TunnelEnd::BackendClosed
}

fn close_frame(status: GatewayStatus) -> CloseFrame {
    CloseFrame {
        code: status.ws_close_code(),
        reason: status.message().into(),
    }
}

fn end_close_frame(end: TunnelEnd) -> Option<CloseFrame> {
    match end {
        TunnelEnd::Quota(status) => Some(close_frame(status)),
        TunnelEnd::BackendFailed => Some(close_frame(GatewayStatus::UpstreamError)),
        TunnelEnd::ClientClosed | TunnelEnd::BackendClosed | TunnelEnd::Killed => None,
    }
}
