//! Tunnel identity and the display-server side of a tunnel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gw_common::config::{BackendConfig, QuotaConfig};
use gw_protocol::GatewayStatus;
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::quota::RemainingTime;

/// Read-only view of a tunnel, as seen by its quota ticker.
pub trait TunnelHandle {
    /// Identifier stable for the tunnel's whole lifetime.
    fn uuid(&self) -> Uuid;

    /// Budgets the tunnel was opened with.
    fn remaining_time(&self) -> RemainingTime;
}

/// A client ↔ display server tunnel opened by this gateway.
#[derive(Debug, Clone)]
pub struct GatewayTunnel {
    id: Uuid,
    remaining: RemainingTime,
    connected_at: DateTime<Utc>,
}

impl GatewayTunnel {
    pub fn new(remaining: RemainingTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            remaining,
            connected_at: Utc::now(),
        }
    }

    /// New tunnel with the budgets configured for every connection.
    pub fn from_quota(quota: &QuotaConfig) -> Self {
        Self::new(RemainingTime::from_limits(
            quota.daily_limit_secs.map(Duration::from_secs),
            quota.monthly_limit_secs.map(Duration::from_secs),
        ))
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

impl TunnelHandle for GatewayTunnel {
    fn uuid(&self) -> Uuid {
        self.id
    }

    fn remaining_time(&self) -> RemainingTime {
        self.remaining
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("display server {addr} did not accept within {secs}s")]
    ConnectTimeout { addr: String, secs: u64 },

    #[error("display server {addr} unreachable: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl TunnelError {
    /// Status sent to the client before its socket is closed.
    pub fn status(&self) -> GatewayStatus {
        match self {
            Self::ConnectTimeout { .. } => GatewayStatus::UpstreamTimeout,
            Self::Connect { .. } => GatewayStatus::UpstreamUnavailable,
        }
    }
}

/// Open the TCP connection to the display server.
pub async fn connect_backend(config: &BackendConfig) -> Result<TcpStream, TunnelError> {
    let addr = config.address();
    let timeout = Duration::from_secs(config.connect_timeout_secs);

    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            tracing::info!(%addr, "Connected to display server");
            Ok(stream)
        }
        Ok(Err(source)) => Err(TunnelError::Connect { addr, source }),
        Err(_) => Err(TunnelError::ConnectTimeout {
            addr,
            secs: config.connect_timeout_secs,
        }),
    }
}
