//! Connection liveness probing and reconnect scheduling.
//!
//! All timer state lives in one spawned task that consumes a command
//! channel, so starts, acks, errors, and resets are applied strictly in
//! order and the two timer loops can never overlap.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

/// Cadence of outbound health-check probes while connected.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Cadence of the staleness check.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(1);
/// Extra allowance past the probe interval before the connection counts
/// as stale.
pub const NO_EVENT_GRACE: Duration = Duration::from_secs(10);
/// Hard cap on any retry delay.
pub const MAX_RETRY_DELAY_MS: u64 = 25_000;

/// Jittered backoff for the given consecutive failure count.
///
/// The delay is drawn uniformly from `[lower, upper]` where
/// `upper = min(500 + failures * 2000, 25_000)` and
/// `lower = min(max(250, (failures - 1) * 2000), 25_000)` milliseconds.
pub fn retry_delay(consecutive_failures: u32) -> Duration {
    let failures = u64::from(consecutive_failures);
    let upper = (500 + failures * 2000).min(MAX_RETRY_DELAY_MS);
    let lower = (failures.saturating_sub(1) * 2000)
        .max(250)
        .min(MAX_RETRY_DELAY_MS);
    Duration::from_millis(rand::thread_rng().gen_range(lower..=upper))
}

type Callback = Box<dyn Fn() + Send + Sync>;

enum Command {
    Start,
    Ack(Instant),
    OnError,
    Reset,
}

/// Handle to the monitor task.
///
/// `check` fires every [`HEALTH_CHECK_INTERVAL`] while started; `reconnect`
/// fires once per scheduled retry. Both run on the monitor task, so they
/// must only enqueue work.
#[derive(Clone)]
pub struct HealthMonitor {
    tx: mpsc::UnboundedSender<Command>,
}

impl HealthMonitor {
    /// Spawn the monitor task. Must be called within a tokio runtime.
    pub fn new(
        check: impl Fn() + Send + Sync + 'static,
        reconnect: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, Box::new(check), Box::new(reconnect)));
        Self { tx }
    }

    /// Begin probing. Called once the connection ack resolves.
    pub fn start(&self) {
        let _ = self.tx.send(Command::Start);
    }

    /// Record that an event arrived on the connection.
    pub fn ack(&self) {
        let _ = self.tx.send(Command::Ack(Instant::now()));
    }

    /// Record a connection failure and schedule a reconnect.
    pub fn on_error(&self) {
        let _ = self.tx.send(Command::OnError);
    }

    /// Stop probing, cancel any pending reconnect, and clear all counters.
    /// Called on every explicit connect and disconnect.
    pub fn reset(&self) {
        let _ = self.tx.send(Command::Reset);
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>, check: Callback, reconnect: Callback) {
    let mut ticking = false;
    let mut consecutive_failures: u32 = 0;
    let mut last_event: Option<Instant> = None;
    let mut reconnect_at: Option<Instant> = None;

    let mut health = interval(HEALTH_CHECK_INTERVAL);
    let mut monitor = interval(MONITOR_INTERVAL);
    health.set_missed_tick_behavior(MissedTickBehavior::Delay);
    monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let pending_reconnect = reconnect_at;
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Start => {
                        ticking = true;
                        consecutive_failures = 0;
                        last_event = Some(Instant::now());
                        reconnect_at = None;
                        health.reset();
                        monitor.reset();
                    }
                    Command::Ack(at) => {
                        last_event = Some(at);
                    }
                    Command::OnError => {
                        ticking = false;
                        consecutive_failures += 1;
                        let delay = retry_delay(consecutive_failures);
                        tracing::info!(
                            failures = consecutive_failures,
                            delay_ms = delay.as_millis() as u64,
                            "connection failed, scheduling reconnect"
                        );
                        reconnect_at = Some(Instant::now() + delay);
                    }
                    Command::Reset => {
                        ticking = false;
                        consecutive_failures = 0;
                        last_event = None;
                        reconnect_at = None;
                    }
                }
            }
            _ = health.tick(), if ticking => {
                consecutive_failures = 0;
                check();
            }
            _ = monitor.tick(), if ticking => {
                let threshold = HEALTH_CHECK_INTERVAL + NO_EVENT_GRACE;
                let stale = last_event.is_some_and(|at| at.elapsed() > threshold);
                if stale {
                    ticking = false;
                    consecutive_failures += 1;
                    let delay = retry_delay(consecutive_failures);
                    tracing::info!(
                        failures = consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        "no events within threshold, scheduling reconnect"
                    );
                    reconnect_at = Some(Instant::now() + delay);
                }
            }
            () = async {
                match pending_reconnect {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                reconnect_at = None;
                reconnect();
            }
        }
    }
}
