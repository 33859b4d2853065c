//! Quota ticker driver: one task per tunnel, every second.
//!
//! Each task owns a [`QuotaTicker`] and forwards the frames it produces to
//! the tunnel's client. Send failures are logged and the countdown goes on.
//! A task stops ticking once its ticker expires, and stops entirely when
//! cancelled through its [`TickerHandle`] or when the scheduler shuts down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gw_protocol::Instruction;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::quota::{QuotaCondition, QuotaTicker, RemainingTime, TickerState, TICK_MS};
use crate::tunnel::TunnelHandle;
use crate::ws::writer::OutboundWriter;

/// Snapshot published after every state change.
#[derive(Debug, Clone, Copy)]
pub struct TickerStatus {
    pub state: TickerState,
    pub remaining: RemainingTime,
    pub expired_by: Option<QuotaCondition>,
}

impl TickerStatus {
    fn of(ticker: &QuotaTicker) -> Self {
        Self {
            state: ticker.state(),
            remaining: ticker.current_remaining(),
            expired_by: ticker.expired_by(),
        }
    }
}

/// Owner's handle on a running ticker.
#[derive(Debug, Clone)]
pub struct TickerHandle {
    cancel: CancellationToken,
    status: watch::Receiver<TickerStatus>,
}

impl TickerHandle {
    /// Stop the ticker. A tick already sending completes; no tick starts
    /// afterwards. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn current_remaining(&self) -> RemainingTime {
        self.status.borrow().remaining
    }

    pub fn status(&self) -> TickerStatus {
        *self.status.borrow()
    }

    /// Resolves once the ticker has sent its close frame. Never resolves
    /// for a ticker that is cancelled or unlimited.
    pub async fn expired(&mut self) -> QuotaCondition {
        let expired = self
            .status
            .wait_for(|s| s.state == TickerState::Expired)
            .await
            .ok()
            .and_then(|s| s.expired_by);
        match expired {
            Some(condition) => condition,
            None => std::future::pending().await,
        }
    }
}

/// Shared scheduler for every tunnel's quota ticker.
pub struct TickerScheduler {
    period: Duration,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    counting: Arc<AtomicUsize>,
}

/// Held by a ticker task for as long as it counts down.
struct Counting(Arc<AtomicUsize>);

impl Counting {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self(count.clone())
    }
}

impl Drop for Counting {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for TickerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TickerScheduler {
    pub fn new() -> Self {
        Self {
            period: Duration::from_millis(TICK_MS as u64),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            counting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Tickers still counting down. Unlimited, expired and cancelled
    /// tickers are not included.
    pub fn active_tickers(&self) -> usize {
        self.counting.load(Ordering::Relaxed)
    }

    /// Start the ticker for `tunnel`, sending its frames through `writer`.
    ///
    /// The budgets are copied out of the tunnel here; the tunnel never sees
    /// the countdown.
    pub fn spawn<W, T>(&self, writer: Arc<W>, tunnel: &T) -> TickerHandle
    where
        W: OutboundWriter + ?Sized + 'static,
        T: TunnelHandle + ?Sized,
    {
        let ticker = QuotaTicker::new(tunnel.uuid(), tunnel.remaining_time());
        let cancel = self.shutdown.child_token();
        let (status_tx, status_rx) = watch::channel(TickerStatus::of(&ticker));
        let schedule = Schedule {
            first: Instant::now() + self.period,
            period: self.period,
        };
        let counting = (!ticker.current_remaining().is_unlimited())
            .then(|| Counting::enter(&self.counting));

        self.tasks.spawn(run(
            ticker,
            writer,
            schedule,
            cancel.clone(),
            status_tx,
            counting,
        ));

        TickerHandle {
            cancel,
            status: status_rx,
        }
    }

    /// Cancel every ticker and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Quota tickers stopped");
    }
}

/// Tick times, fixed when the ticker is created.
#[derive(Debug, Clone, Copy)]
struct Schedule {
    first: Instant,
    period: Duration,
}

async fn run<W>(
    mut ticker: QuotaTicker,
    writer: Arc<W>,
    schedule: Schedule,
    cancel: CancellationToken,
    status: watch::Sender<TickerStatus>,
    _counting: Option<Counting>,
) where
    W: OutboundWriter + ?Sized,
{
    let tunnel_id = ticker.tunnel_id();

    if cancel.is_cancelled() {
        ticker.cancel();
        status.send_replace(TickerStatus::of(&ticker));
        return;
    }

    if let Some(frame) = ticker.arm() {
        deliver(writer.as_ref(), tunnel_id, &frame).await;
        status.send_replace(TickerStatus::of(&ticker));
        tracing::debug!(%tunnel_id, "Tunnel has no quota, ticker parked");
        cancel.cancelled().await;
        ticker.cancel();
        status.send_replace(TickerStatus::of(&ticker));
        return;
    }
    status.send_replace(TickerStatus::of(&ticker));

    let remaining = ticker.current_remaining();
    tracing::info!(
        %tunnel_id,
        daily_ms = remaining.daily_ms(),
        monthly_ms = remaining.monthly_ms(),
        "Quota ticker started"
    );

    // Fixed rate: a slow send never stretches the budget
    let mut interval = tokio::time::interval_at(schedule.first, schedule.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                ticker.cancel();
                status.send_replace(TickerStatus::of(&ticker));
                tracing::debug!(%tunnel_id, "Quota ticker cancelled");
                return;
            }
            _ = interval.tick() => {}
        }

        if let Some(frame) = ticker.tick() {
            deliver(writer.as_ref(), tunnel_id, &frame).await;
        }
        status.send_replace(TickerStatus::of(&ticker));

        if ticker.state().is_final() {
            if let Some(condition) = ticker.expired_by() {
                tracing::info!(%tunnel_id, %condition, "Quota exhausted, close frame sent");
            }
            return;
        }
    }
}

async fn deliver<W>(writer: &W, tunnel_id: Uuid, frame: &Instruction)
where
    W: OutboundWriter + ?Sized,
{
    if let Err(e) = writer.send_text(frame.encode()).await {
        tracing::info!(%tunnel_id, "Quota frame not delivered: {}", e);
    }
}
