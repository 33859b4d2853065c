//! Per-tunnel time quotas.
//!
//! A [`QuotaTicker`] owns a copy of the tunnel's remaining daily and monthly
//! budgets. Each tick it counts both down by [`TICK_MS`] and produces the
//! status frame to show the client, or the close frame once a budget is
//! spent. Scheduling lives in `workers::quota_ticker`; this module is pure
//! state.

use std::fmt;
use std::time::Duration;

use gw_common::time::{format_hms, SECS_DAY, SECS_MONTH};
use gw_protocol::{GatewayStatus, Instruction};
use serde::Serialize;
use uuid::Uuid;

/// Sentinel meaning "no limit on this axis".
pub const INFINITY: i64 = i64::MAX;

/// Tick period in milliseconds.
pub const TICK_MS: i64 = 1000;

/// Status text sent when neither budget is close enough to show.
pub const UNLIMITED_TEXT: &str = "Unlimited";

const DAILY_VISIBLE_MS: i64 = (SECS_DAY * 1000) as i64;
const MONTHLY_VISIBLE_MS: i64 = (SECS_MONTH * 1000) as i64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("{axis} budget cannot be negative (got {value} ms)")]
    NegativeBudget { axis: &'static str, value: i64 },
}

/// Named quota conditions visible to the rest of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCondition {
    /// Not an error: the tunnel has no quota at all.
    Unlimited,
    DailyTimeLimitExceeded,
    MonthlyTimeLimitExceeded,
}

impl QuotaCondition {
    /// Status put on the wire when this condition ends a tunnel.
    pub fn status(self) -> Option<GatewayStatus> {
        match self {
            Self::Unlimited => None,
            Self::DailyTimeLimitExceeded => Some(GatewayStatus::ClientDayTimeLimit),
            Self::MonthlyTimeLimitExceeded => Some(GatewayStatus::ClientMonthTimeLimit),
        }
    }
}

impl fmt::Display for QuotaCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Some(status) => f.write_str(status.message()),
            None => f.write_str("unlimited"),
        }
    }
}

/// Remaining daily and monthly budget in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingTime {
    daily_ms: i64,
    monthly_ms: i64,
}

impl RemainingTime {
    pub fn new(daily_ms: i64, monthly_ms: i64) -> Result<Self, QuotaError> {
        if daily_ms < 0 {
            return Err(QuotaError::NegativeBudget {
                axis: "daily",
                value: daily_ms,
            });
        }
        if monthly_ms < 0 {
            return Err(QuotaError::NegativeBudget {
                axis: "monthly",
                value: monthly_ms,
            });
        }
        Ok(Self {
            daily_ms,
            monthly_ms,
        })
    }

    pub const fn unlimited() -> Self {
        Self {
            daily_ms: INFINITY,
            monthly_ms: INFINITY,
        }
    }

    /// Build from optional limits; `None` means unlimited on that axis.
    pub fn from_limits(daily: Option<Duration>, monthly: Option<Duration>) -> Self {
        let to_ms = |limit: Option<Duration>| {
            limit
                .map(|d| i64::try_from(d.as_millis()).unwrap_or(INFINITY))
                .unwrap_or(INFINITY)
        };
        Self {
            daily_ms: to_ms(daily),
            monthly_ms: to_ms(monthly),
        }
    }

    pub fn daily_ms(&self) -> i64 {
        self.daily_ms
    }

    pub fn monthly_ms(&self) -> i64 {
        self.monthly_ms
    }

    pub fn is_unlimited(&self) -> bool {
        self.daily_ms == INFINITY && self.monthly_ms == INFINITY
    }

    fn min_ms(&self) -> i64 {
        self.daily_ms.min(self.monthly_ms)
    }

    /// Count finite axes down by `ms`. Infinite axes are left alone.
    fn decrement(&mut self, ms: i64) {
        if self.daily_ms != INFINITY {
            self.daily_ms = self.daily_ms.saturating_sub(ms);
        }
        if self.monthly_ms != INFINITY {
            self.monthly_ms = self.monthly_ms.saturating_sub(ms);
        }
    }

    /// Which budget is spent, if any. Daily wins when both are.
    pub fn exhausted(&self) -> Option<QuotaCondition> {
        let min = self.min_ms();
        if min > 0 {
            None
        } else if self.daily_ms == min {
            Some(QuotaCondition::DailyTimeLimitExceeded)
        } else {
            Some(QuotaCondition::MonthlyTimeLimitExceeded)
        }
    }

    /// Human-readable countdown shown to the client.
    ///
    /// An axis is only shown once it is within a day (daily) or a month
    /// (monthly) of running out; both thresholds are inclusive.
    pub fn status_text(&self) -> String {
        let mut segments = Vec::with_capacity(2);
        if self.daily_ms <= DAILY_VISIBLE_MS {
            segments.push(format!("Daily Time Left: {}", format_axis(self.daily_ms)));
        }
        if self.monthly_ms <= MONTHLY_VISIBLE_MS {
            segments.push(format!(
                "Monthly Time Left: {}",
                format_axis(self.monthly_ms)
            ));
        }
        if segments.is_empty() {
            UNLIMITED_TEXT.to_string()
        } else {
            segments.join(" - ")
        }
    }
}

fn format_axis(ms: i64) -> String {
    format_hms(u64::try_from(ms).unwrap_or(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickerState {
    Armed,
    Unlimited,
    Ticking,
    Expired,
    Cancelled,
}

impl TickerState {
    /// No more ticks will ever run in this state.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Unlimited | Self::Expired | Self::Cancelled)
    }
}

/// Countdown state for one tunnel.
#[derive(Debug)]
pub struct QuotaTicker {
    tunnel_id: Uuid,
    remaining: RemainingTime,
    state: TickerState,
}

impl QuotaTicker {
    pub fn new(tunnel_id: Uuid, remaining: RemainingTime) -> Self {
        Self {
            tunnel_id,
            remaining,
            state: TickerState::Armed,
        }
    }

    pub fn tunnel_id(&self) -> Uuid {
        self.tunnel_id
    }

    pub fn state(&self) -> TickerState {
        self.state
    }

    pub fn current_remaining(&self) -> RemainingTime {
        self.remaining
    }

    /// First activation. Returns the `Unlimited` frame when neither axis has
    /// a limit; the ticker then never ticks.
    pub fn arm(&mut self) -> Option<Instruction> {
        if self.state != TickerState::Armed {
            return None;
        }
        if self.remaining.is_unlimited() {
            self.state = TickerState::Unlimited;
            Some(self.status_frame(UNLIMITED_TEXT))
        } else {
            self.state = TickerState::Ticking;
            None
        }
    }

    /// One tick. Returns the frame to send, or `None` when not ticking.
    ///
    /// Exhaustion is checked before counting down, so a budget of exactly
    /// zero closes the tunnel without another countdown frame.
    pub fn tick(&mut self) -> Option<Instruction> {
        if self.state != TickerState::Ticking {
            return None;
        }

        if let Some(status) = self.remaining.exhausted().and_then(QuotaCondition::status) {
            self.state = TickerState::Expired;
            return Some(Instruction::close(status));
        }

        self.remaining.decrement(TICK_MS);
        Some(self.status_frame(&self.remaining.status_text()))
    }

    /// Stop ticking. Idempotent; an expired ticker stays expired.
    pub fn cancel(&mut self) {
        if matches!(
            self.state,
            TickerState::Armed | TickerState::Ticking | TickerState::Unlimited
        ) {
            self.state = TickerState::Cancelled;
        }
    }

    /// The condition that ended the tunnel, once expired.
    pub fn expired_by(&self) -> Option<QuotaCondition> {
        if self.state == TickerState::Expired {
            self.remaining.exhausted()
        } else {
            None
        }
    }

    fn status_frame(&self, text: &str) -> Instruction {
        Instruction::time(&self.tunnel_id.to_string(), text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = (SECS_DAY * 1000) as i64;
    const MONTH_MS: i64 = (SECS_MONTH * 1000) as i64;

    fn ticker(daily: i64, monthly: i64) -> QuotaTicker {
        let mut t = QuotaTicker::new(Uuid::new_v4(), RemainingTime::new(daily, monthly).unwrap());
        assert_eq!(t.arm(), None);
        t
    }

    /// Tick until the close frame, returning every frame emitted.
    fn run_to_close(t: &mut QuotaTicker) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = t.tick() {
            frames.push(frame.encode());
            assert!(frames.len() < 10_000, "ticker never expired");
        }
        frames
    }

    fn text_of(frame: &Instruction) -> &str {
        &frame.args()[1]
    }

    #[test]
    fn rejects_negative_budgets() {
        assert_eq!(
            RemainingTime::new(-1, 0),
            Err(QuotaError::NegativeBudget {
                axis: "daily",
                value: -1
            })
        );
        assert!(RemainingTime::new(0, -5).is_err());
        assert!(RemainingTime::new(0, 0).is_ok());
    }

    #[test]
    fn limits_map_to_milliseconds() {
        let r = RemainingTime::from_limits(Some(Duration::from_secs(60)), None);
        assert_eq!(r.daily_ms(), 60_000);
        assert_eq!(r.monthly_ms(), INFINITY);
        assert!(RemainingTime::from_limits(None, None).is_unlimited());
    }

    #[test]
    fn unlimited_emits_single_frame_and_never_ticks() {
        let id = Uuid::new_v4();
        let mut t = QuotaTicker::new(id, RemainingTime::unlimited());
        let frame = t.arm().unwrap();
        assert_eq!(frame.encode(), format!("4.time,36.{id},9.Unlimited;"));
        assert_eq!(t.state(), TickerState::Unlimited);
        assert_eq!(t.tick(), None);
        assert_eq!(t.arm(), None);
        assert_eq!(t.current_remaining(), RemainingTime::unlimited());

        t.cancel();
        assert_eq!(t.state(), TickerState::Cancelled);
    }

    #[test]
    fn daily_budget_counts_down_then_closes() {
        let mut t = ticker(5000, INFINITY);
        let frames = run_to_close(&mut t);
        let id = t.tunnel_id();
        assert_eq!(
            frames,
            vec![
                format!("4.time,36.{id},25.Daily Time Left: 00:00:04;"),
                format!("4.time,36.{id},25.Daily Time Left: 00:00:03;"),
                format!("4.time,36.{id},25.Daily Time Left: 00:00:02;"),
                format!("4.time,36.{id},25.Daily Time Left: 00:00:01;"),
                format!("4.time,36.{id},25.Daily Time Left: 00:00:00;"),
                "5.error,5.close,6.0x015A;".to_string(),
            ]
        );
        assert_eq!(t.state(), TickerState::Expired);
        assert_eq!(t.expired_by(), Some(QuotaCondition::DailyTimeLimitExceeded));
        assert_eq!(t.current_remaining().monthly_ms(), INFINITY);
    }

    #[test]
    fn monthly_budget_closes_with_month_code() {
        let mut t = ticker(INFINITY, 3000);
        let frames = run_to_close(&mut t);
        assert_eq!(frames.len(), 4);
        assert!(frames[2].ends_with(",27.Monthly Time Left: 00:00:00;"));
        assert_eq!(frames[3], "5.error,5.close,6.0x015B;");
        assert_eq!(
            t.expired_by(),
            Some(QuotaCondition::MonthlyTimeLimitExceeded)
        );
    }

    #[test]
    fn daily_wins_tie() {
        let mut t = ticker(2000, 2000);
        let frames = run_to_close(&mut t);
        assert_eq!(frames.len(), 3);
        assert!(frames[1].ends_with("Daily Time Left: 00:00:00 - Monthly Time Left: 00:00:00;"));
        assert_eq!(frames[2], "5.error,5.close,6.0x015A;");
    }

    #[test]
    fn zero_budget_closes_on_first_tick() {
        let mut t = ticker(10_000, 0);
        assert_eq!(t.tick().unwrap().encode(), "5.error,5.close,6.0x015B;");
        assert_eq!(t.current_remaining().daily_ms(), 10_000);
    }

    #[test]
    fn cancelled_before_arming_stays_silent() {
        let mut t = QuotaTicker::new(Uuid::new_v4(), RemainingTime::unlimited());
        t.cancel();
        assert_eq!(t.state(), TickerState::Cancelled);
        assert_eq!(t.arm(), None);
        assert_eq!(t.tick(), None);
    }

    #[test]
    fn nothing_after_close() {
        let mut t = ticker(1000, INFINITY);
        run_to_close(&mut t);
        assert_eq!(t.tick(), None);
        t.cancel();
        assert_eq!(t.state(), TickerState::Expired);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let at_day = RemainingTime::new(DAY_MS, 2 * MONTH_MS).unwrap();
        assert_eq!(at_day.status_text(), "Daily Time Left: 24:00:00");

        let at_month = RemainingTime::new(2 * DAY_MS, MONTH_MS).unwrap();
        assert_eq!(at_month.status_text(), "Monthly Time Left: 720:00:00");

        let above = RemainingTime::new(DAY_MS + 1, MONTH_MS + 1).unwrap();
        assert_eq!(above.status_text(), UNLIMITED_TEXT);
    }

    #[test]
    fn first_tick_at_day_budget_shows_daily_only() {
        let mut t = ticker(DAY_MS, 2 * MONTH_MS);
        let frame = t.tick().unwrap();
        assert_eq!(text_of(&frame), "Daily Time Left: 23:59:59");
    }

    #[test]
    fn first_tick_at_month_budget_shows_three_digit_hours() {
        let mut t = ticker(2 * DAY_MS, MONTH_MS);
        let frame = t.tick().unwrap();
        assert_eq!(text_of(&frame), "Monthly Time Left: 719:59:59");
    }

    #[test]
    fn far_budgets_report_unlimited_text() {
        let mut t = ticker(2 * DAY_MS, INFINITY);
        let frame = t.tick().unwrap();
        assert_eq!(text_of(&frame), UNLIMITED_TEXT);
        assert_eq!(t.current_remaining().daily_ms(), 2 * DAY_MS - TICK_MS);
    }

    #[test]
    fn countdown_is_strictly_monotone() {
        let mut t = ticker(7000, 9000);
        let mut previous = t.current_remaining();
        while t.tick().is_some() {
            let now = t.current_remaining();
            if t.state() == TickerState::Ticking {
                assert_eq!(now.daily_ms(), previous.daily_ms() - TICK_MS);
                assert_eq!(now.monthly_ms(), previous.monthly_ms() - TICK_MS);
            }
            previous = now;
        }
    }

    #[test]
    fn infinite_axis_never_reported() {
        let mut t = ticker(3000, INFINITY);
        for frame in std::iter::from_fn(|| t.tick()) {
            assert!(!frame.encode().contains("Monthly"));
        }
        assert_eq!(t.current_remaining().monthly_ms(), INFINITY);
    }

    #[test]
    fn every_frame_parses_and_has_one_terminator() {
        let mut t = ticker(2500, 4000);
        let frames = run_to_close(&mut t);
        assert_eq!(frames.iter().filter(|f| f.starts_with("5.error")).count(), 1);
        for frame in &frames {
            assert!(frame.ends_with(';') && !frame.ends_with(";;"));
            let parsed = Instruction::parse(frame).unwrap();
            assert!(matches!(parsed.opcode(), "time" | "error"));
        }
    }

    #[test]
    fn partial_second_budget_clamps_display_at_zero() {
        let mut t = ticker(1500, INFINITY);
        assert_eq!(text_of(&t.tick().unwrap()), "Daily Time Left: 00:00:00");
        assert_eq!(text_of(&t.tick().unwrap()), "Daily Time Left: 00:00:00");
        assert_eq!(t.current_remaining().daily_ms(), -500);
        assert_eq!(t.tick().unwrap().encode(), "5.error,5.close,6.0x015A;");
    }

    #[test]
    fn conditions_map_to_status() {
        assert_eq!(QuotaCondition::Unlimited.status(), None);
        assert_eq!(
            QuotaCondition::DailyTimeLimitExceeded.to_string(),
            "client day time limit"
        );
        assert_eq!(
            QuotaCondition::MonthlyTimeLimitExceeded.status(),
            Some(GatewayStatus::ClientMonthTimeLimit)
        );
    }
}
