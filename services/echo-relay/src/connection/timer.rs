//! Owned timers
//!
//! Timers are plain values held by the session or client that uses them.
//! Cancelling a timer drops its interval, so a timer can never fire for an
//! owner that no longer exists.

use std::time::Duration;

use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};

/// Default interval between keep-alive pings
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A periodic timer that can be cancelled explicitly
#[derive(Debug, Default)]
pub struct PeriodicTimer {
    interval: Option<Interval>,
}

impl PeriodicTimer {
    /// A timer whose first tick fires one period from now
    pub fn start(period: Duration) -> Self {
        Self::from_interval(interval_at(Instant::now() + period, period))
    }

    /// A timer whose first tick fires immediately
    pub fn start_immediate(period: Duration) -> Self {
        Self::from_interval(interval(period))
    }

    /// A timer that never fires
    pub fn stopped() -> Self {
        Self { interval: None }
    }

    fn from_interval(mut interval: Interval) -> Self {
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Some(interval),
        }
    }

    /// Stop the timer. Returns `false` if it was already stopped.
    pub fn cancel(&mut self) -> bool {
        self.interval.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next tick. Pends forever once cancelled.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Keep-alive timer owned by a server session.
///
/// Tracks how many probes were sent so the session can report liveness in its
/// close log.
#[derive(Debug)]
pub struct KeepAliveTimer {
    timer: PeriodicTimer,
    period: Duration,
    probes_sent: u64,
}

impl KeepAliveTimer {
    /// An unarmed timer that will tick every `period` once armed
    pub fn new(period: Duration) -> Self {
        Self {
            timer: PeriodicTimer::stopped(),
            period,
            probes_sent: 0,
        }
    }

    /// Arm the timer. Re-arming an active timer keeps the existing schedule.
    pub fn arm(&mut self) {
        if !self.timer.is_active() {
            self.timer = PeriodicTimer::start(self.period);
        }
    }

    /// Cancel the timer. Returns `false` if it was not armed.
    pub fn cancel(&mut self) -> bool {
        self.timer.cancel()
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_active()
    }

    pub fn probes_sent(&self) -> u64 {
        self.probes_sent
    }

    pub(crate) fn record_probe(&mut self) {
        self.probes_sent += 1;
    }

    /// Wait until the next probe is due
    pub async fn due(&mut self) {
        self.timer.tick().await;
    }
}
