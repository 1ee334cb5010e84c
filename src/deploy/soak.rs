// ABOUTME: Background tasks for one soak window: a gate poller and a deadline watchdog.
// ABOUTME: Both report to the controller over a single-consumer channel and stop when dropped.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::deployment::Deployment;
use super::gate::{GateVerdict, HealthGate};

/// What the soak tasks report.
#[derive(Debug)]
pub(crate) enum StageSignal {
    Sample(Box<GateVerdict>),
    /// The stage as a whole ran past its timeout.
    StageTimeout,
    /// The soak window ended.
    SoakExpired,
}

/// Running poller and watchdog. Dropping this stops both.
pub(crate) struct SoakTasks {
    rx: mpsc::Receiver<StageSignal>,
    _stop: DropGuard,
}

impl SoakTasks {
    /// Start polling `gate` every `poll_interval` from now, and arm a watchdog
    /// for whichever of `soak_deadline` and `stage_deadline` comes first.
    pub(crate) fn spawn(
        gate: HealthGate,
        snapshot: Deployment,
        window: Duration,
        poll_interval: Duration,
        soak_deadline: Instant,
        stage_deadline: Instant,
    ) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let stop = CancellationToken::new();

        let poll_stop = stop.clone();
        let poll_tx = tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = poll_stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let verdict = gate.evaluate(&snapshot, window).await;
                        if poll_tx.send(StageSignal::Sample(Box::new(verdict))).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let watch_stop = stop.clone();
        tokio::spawn(async move {
            let (deadline, signal) = if stage_deadline <= soak_deadline {
                (stage_deadline, StageSignal::StageTimeout)
            } else {
                (soak_deadline, StageSignal::SoakExpired)
            };
            tokio::select! {
                _ = watch_stop.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = tx.send(signal).await;
                }
            }
        });

        Self {
            rx,
            _stop: stop.drop_guard(),
        }
    }

    /// Next report. `None` only if both tasks have stopped.
    pub(crate) async fn recv(&mut self) -> Option<StageSignal> {
        self.rx.recv().await
    }
}
