//! Outbound text sender for the client side of a tunnel.
//!
//! A WebSocket sink only tolerates one sender at a time. Every send looks up
//! the *current* peer and holds that peer's sink lock for one message, so
//! after [`PeerWriter::replace_peer`] sends queue on the new peer's lock
//! instead of the old one.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message};
use futures_util::{Sink, SinkExt};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Boxed sink of WebSocket messages, usually the send half of a split socket.
pub type PeerSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("websocket send failed: {0}")]
    Transport(#[from] axum::Error),
}

/// Something that can deliver one text frame to the client.
#[async_trait]
pub trait OutboundWriter: Send + Sync {
    async fn send_text(&self, frame: String) -> Result<(), SendError>;
}

struct Peer {
    id: Uuid,
    sink: Mutex<PeerSink>,
}

impl Peer {
    fn new(sink: PeerSink) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            sink: Mutex::new(sink),
        })
    }
}

pub struct PeerWriter {
    current: RwLock<Arc<Peer>>,
}

impl PeerWriter {
    pub fn new(sink: PeerSink) -> Self {
        Self {
            current: RwLock::new(Peer::new(sink)),
        }
    }

    /// Identity of the peer sends currently go to.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn peer_id(&self) -> Uuid {
        self.current.read().await.id
    }

    /// Point the writer at a new socket. A send already holding the old
    /// peer's lock finishes on the old socket. Meant for a client that
    /// reconnects to a live tunnel; nothing reconnects yet.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn replace_peer(&self, sink: PeerSink) -> Uuid {
        let peer = Peer::new(sink);
        let id = peer.id;
        *self.current.write().await = peer;
        tracing::debug!(peer_id = %id, "Outbound peer replaced");
        id
    }

    /// Send a close frame and flush the current peer.
    pub async fn close(&self, frame: Option<CloseFrame>) {
        let peer = self.current.read().await.clone();
        let mut sink = peer.sink.lock().await;
        let _ = sink.send(Message::Close(frame)).await;
        let _ = sink.close().await;
    }
}

#[async_trait]
impl OutboundWriter for PeerWriter {
    async fn send_text(&self, frame: String) -> Result<(), SendError> {
        let peer = self.current.read().await.clone();
        let mut sink = peer.sink.lock().await;
        sink.send(Message::Text(frame.into())).await?;
        Ok(())
    }
}
