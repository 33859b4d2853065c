//! In-memory registry of live tunnels on **this** gateway instance.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::quota::{TickerState, INFINITY};
use crate::workers::quota_ticker::TickerHandle;

/// Bookkeeping for one connected tunnel.
#[derive(Debug, Clone)]
pub struct TunnelEntry {
    pub tunnel_id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub ticker: TickerHandle,
    /// Cancelled to force the tunnel closed from outside its handler.
    pub kill: CancellationToken,
}

/// Serializable view of a tunnel for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelSummary {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub quota_state: TickerState,
    /// `None` when the axis has no limit.
    pub daily_remaining_ms: Option<i64>,
    pub monthly_remaining_ms: Option<i64>,
}

impl From<&TunnelEntry> for TunnelSummary {
    fn from(entry: &TunnelEntry) -> Self {
        let status = entry.ticker.status();
        let finite = |ms: i64| (ms != INFINITY).then_some(ms);
        Self {
            id: entry.tunnel_id,
            connected_at: entry.connected_at,
            quota_state: status.state,
            daily_remaining_ms: finite(status.remaining.daily_ms()),
            monthly_remaining_ms: finite(status.remaining.monthly_ms()),
        }
    }
}

#[derive(Debug, Default)]
pub struct TunnelRegistry {
    /// tunnel_id → entry
    tunnels: DashMap<Uuid, TunnelEntry>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            tunnels: DashMap::new(),
        }
    }

    pub fn register(&self, entry: TunnelEntry) {
        tracing::info!(tunnel_id = %entry.tunnel_id, "Tunnel registered");
        self.tunnels.insert(entry.tunnel_id, entry);
    }

    /// Remove a tunnel (on disconnect) and stop its ticker.
    pub fn unregister(&self, tunnel_id: &Uuid) {
        if let Some((_, entry)) = self.tunnels.remove(tunnel_id) {
            entry.ticker.cancel();
            tracing::info!(%tunnel_id, "Tunnel unregistered");
        }
    }

    /// Ask a tunnel's handler to shut it down. Returns `false` if unknown.
    pub fn kill(&self, tunnel_id: &Uuid) -> bool {
        match self.tunnels.get(tunnel_id) {
            Some(entry) => {
                entry.kill.cancel();
                tracing::info!(%tunnel_id, "Tunnel kill requested");
                true
            }
            None => false,
        }
    }

    pub fn summary(&self, tunnel_id: &Uuid) -> Option<TunnelSummary> {
        self.tunnels.get(tunnel_id).map(|e| TunnelSummary::from(e.value()))
    }

    /// All tunnels, oldest first.
    pub fn summaries(&self) -> Vec<TunnelSummary> {
        let mut all: Vec<TunnelSummary> = self
            .tunnels
            .iter()
            .map(|e| TunnelSummary::from(e.value()))
            .collect();
        all.sort_by_key(|s| s.connected_at);
        all
    }

    pub fn active_tunnel_count(&self) -> usize {
        self.tunnels.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::quota::RemainingTime;
    use crate::tunnel::{GatewayTunnel, TunnelHandle};
    use crate::workers::quota_ticker::TickerScheduler;
    use crate::ws::writer::testing::RecordingWriter;

    fn entry(scheduler: &TickerScheduler, remaining: RemainingTime) -> TunnelEntry {
        let tunnel = GatewayTunnel::new(remaining);
        TunnelEntry {
            tunnel_id: tunnel.uuid(),
            connected_at: tunnel.connected_at(),
            ticker: scheduler.spawn(Arc::new(RecordingWriter::default()), &tunnel),
            kill: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn summary_hides_infinite_axes() {
        let scheduler = TickerScheduler::new();
        let registry = TunnelRegistry::new();
        let e = entry(&scheduler, RemainingTime::new(5000, INFINITY).unwrap());
        let id = e.tunnel_id;
        registry.register(e);

        let summary = registry.summary(&id).unwrap();
        assert_eq!(summary.daily_remaining_ms, Some(5000));
        assert_eq!(summary.monthly_remaining_ms, None);
        assert_eq!(registry.active_tunnel_count(), 1);
        assert_eq!(registry.summaries().len(), 1);
    }

    #[tokio::test]
    async fn kill_cancels_token_and_unregister_cancels_ticker() {
        let scheduler = TickerScheduler::new();
        let registry = TunnelRegistry::new();
        let e = entry(&scheduler, RemainingTime::new(5000, 5000).unwrap());
        let id = e.tunnel_id;
        let kill = e.kill.clone();
        let ticker = e.ticker.clone();
        registry.register(e);

        assert!(registry.kill(&id));
        assert!(kill.is_cancelled());
        assert!(!registry.kill(&Uuid::new_v4()));

        registry.unregister(&id);
        assert!(registry.summary(&id).is_none());
        scheduler.shutdown().await;
        assert_eq!(ticker.status().state, TickerState::Cancelled);
    }
}
