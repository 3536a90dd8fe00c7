//! Client liveness monitor.
//!
//! The only signal that a client is alive is its job-list polling. When it
//! stops for too long, expensive compute should stop too: every pending or
//! processing job is cancelled and its worker killed. Jobs waiting for
//! user input consume no worker and are left alone.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::scheduler::Scheduler;

/// How often the monitor checks for a stale heartbeat.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default staleness threshold.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A monotonic "client was here" timestamp.
///
/// Every refresher goes through [`HeartbeatMonitor::touch`], so reads and
/// writes from different ingress points cannot interleave.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last: Mutex<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last: Mutex::new(Instant::now()),
        }
    }

    /// Record that a client just polled.
    pub fn touch(&self) {
        *self.last.lock().unwrap() = Instant::now();
    }

    /// Time since the last poll.
    pub fn elapsed(&self) -> Duration {
        self.last.lock().unwrap().elapsed()
    }

    /// True once the timeout has fully elapsed since the last poll.
    pub fn expired(&self) -> bool {
        self.last.lock().unwrap().elapsed() >= self.timeout
    }
}

/// Monitor loop. Runs until `cancel` fires.
pub async fn run(
    monitor: Arc<HeartbeatMonitor>,
    scheduler: Scheduler,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Heartbeat monitor stopping");
                break;
            }
            _ = interval.tick() => {
                if monitor.expired() {
                    let cancelled = scheduler.cancel_active();
                    if cancelled > 0 {
                        tracing::warn!(
                            cancelled,
                            "Client heartbeat lost, cancelled active jobs"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_monitor_is_not_expired() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(10));
        assert!(!monitor.expired());
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let monitor = HeartbeatMonitor::new(Duration::ZERO);
        assert!(monitor.expired());
    }

    #[test]
    fn touch_resets_the_clock() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(30));
        std::thread::sleep(Duration::from_millis(40));
        assert!(monitor.expired());
        monitor.touch();
        assert!(!monitor.expired());
    }
}
