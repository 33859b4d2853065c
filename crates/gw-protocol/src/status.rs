//! Status codes carried by gateway termination frames.
//!
//! The code travels as a literal six-character payload (`0x` followed by
//! four upper-case hex digits), never as an encoded integer.

use std::fmt;

/// WebSocket close code for policy violations (RFC 6455).
pub const WS_CLOSE_POLICY: u16 = 1008;

/// WebSocket close code for unexpected server conditions (RFC 6455).
pub const WS_CLOSE_INTERNAL: u16 = 1011;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayStatus {
    /// The gateway failed for an unspecified reason.
    ServerError,
    /// The display server did not answer in time.
    UpstreamTimeout,
    /// The display server reported an error or sent garbage.
    UpstreamError,
    /// The display server could not be reached.
    UpstreamUnavailable,
    /// The client used up its daily time budget.
    ClientDayTimeLimit,
    /// The client used up its monthly time budget.
    ClientMonthTimeLimit,
}

impl GatewayStatus {
    pub const ALL: [GatewayStatus; 6] = [
        Self::ServerError,
        Self::UpstreamTimeout,
        Self::UpstreamError,
        Self::UpstreamUnavailable,
        Self::ClientDayTimeLimit,
        Self::ClientMonthTimeLimit,
    ];

    pub fn code(self) -> u16 {
        match self {
            Self::ServerError => 0x0200,
            Self::UpstreamTimeout => 0x0202,
            Self::UpstreamError => 0x0203,
            Self::UpstreamUnavailable => 0x0208,
            Self::ClientDayTimeLimit => 0x015A,
            Self::ClientMonthTimeLimit => 0x015B,
        }
    }

    /// Wire payload, e.g. `"0x015A"`.
    pub fn hex(self) -> &'static str {
        match self {
            Self::ServerError => "0x0200",
            Self::UpstreamTimeout => "0x0202",
            Self::UpstreamError => "0x0203",
            Self::UpstreamUnavailable => "0x0208",
            Self::ClientDayTimeLimit => "0x015A",
            Self::ClientMonthTimeLimit => "0x015B",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::ServerError => "internal server error",
            Self::UpstreamTimeout => "upstream timeout",
            Self::UpstreamError => "upstream error",
            Self::UpstreamUnavailable => "upstream unavailable",
            Self::ClientDayTimeLimit => "client day time limit",
            Self::ClientMonthTimeLimit => "client month time limit",
        }
    }

    /// Close code used when the gateway closes the client WebSocket.
    pub fn ws_close_code(self) -> u16 {
        match self {
            Self::ClientDayTimeLimit | Self::ClientMonthTimeLimit => WS_CLOSE_POLICY,
            _ => WS_CLOSE_INTERNAL,
        }
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.hex() == hex)
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_matches_numeric_code() {
        for status in GatewayStatus::ALL {
            assert_eq!(status.hex().len(), 6);
            assert_eq!(status.hex(), format!("0x{:04X}", status.code()));
            assert_eq!(GatewayStatus::from_hex(status.hex()), Some(status));
        }
    }

    #[test]
    fn quota_limits_close_with_policy_code() {
        assert_eq!(GatewayStatus::ClientDayTimeLimit.ws_close_code(), 1008);
        assert_eq!(GatewayStatus::ClientMonthTimeLimit.ws_close_code(), 1008);
        assert_eq!(GatewayStatus::UpstreamUnavailable.ws_close_code(), 1011);
        assert_eq!(GatewayStatus::from_hex("0x015a"), None);
    }
}
