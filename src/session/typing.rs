//! Local typing debounce.
//!
//! Keystrokes poke the monitor; the watchdog task fires `on_stop` once the
//! pokes go quiet for the configured timeout. The controller turns the
//! first poke into a TYPING_START frame and the expiry into TYPING_STOP.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Active { until: Instant },
    Closed,
}

pub struct TypingMonitor {
    timeout: Duration,
    phase_tx: Arc<watch::Sender<Phase>>,
}

impl TypingMonitor {
    pub fn spawn(timeout: Duration, on_stop: impl Fn() + Send + Sync + 'static) -> Self {
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
        let phase_tx = Arc::new(phase_tx);
        tokio::spawn(watchdog(Arc::clone(&phase_tx), phase_rx, on_stop));
        Self { timeout, phase_tx }
    }

    /// Records activity and re-arms the timeout. Returns `true` when this
    /// poke started a typing run (the caller should announce TYPING_START).
    pub fn poke(&self) -> bool {
        let until = Instant::now() + self.timeout;
        let previous = self.phase_tx.send_replace(Phase::Active { until });
        previous == Phase::Idle
    }

    /// Ends the run without firing `on_stop`. Returns `true` when a run was
    /// active (the caller should announce TYPING_STOP itself).
    pub fn stop(&self) -> bool {
        let mut was_active = false;
        self.phase_tx.send_if_modified(|phase| {
            if matches!(phase, Phase::Active { .. }) {
                *phase = Phase::Idle;
                was_active = true;
                return true;
            }
            false
        });
        was_active
    }

    /// Stops the watchdog task. Pending expiry is discarded.
    pub fn shutdown(&self) {
        self.phase_tx.send_replace(Phase::Closed);
    }
}

async fn watchdog(
    phase_tx: Arc<watch::Sender<Phase>>,
    mut phase_rx: watch::Receiver<Phase>,
    on_stop: impl Fn(),
) {
    loop {
        let phase = *phase_rx.borrow_and_update();
        match phase {
            Phase::Closed => return,
            Phase::Idle => {
                if phase_rx.changed().await.is_err() {
                    return;
                }
            }
            Phase::Active { until } => {
                tokio::select! {
                    _ = time::sleep_until(until) => {
                        // Fire only if no poke re-armed the deadline while
                        // we slept.
                        let mut expired = false;
                        phase_tx.send_if_modified(|phase| {
                            if *phase == (Phase::Active { until }) {
                                *phase = Phase::Idle;
                                expired = true;
                                return true;
                            }
                            false
                        });
                        if expired {
                            on_stop();
                        }
                    }
                    changed = phase_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_monitor(timeout_ms: u64) -> (TypingMonitor, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let monitor = TypingMonitor::spawn(Duration::from_millis(timeout_ms), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (monitor, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_first_poke_starts_a_run() {
        let (monitor, _fired) = counting_monitor(3_000);

        assert!(monitor.poke());
        assert!(!monitor.poke());
        assert!(!monitor.poke());

        monitor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn silence_fires_on_stop_exactly_once() {
        let (monitor, fired) = counting_monitor(3_000);

        monitor.poke();
        time::sleep(Duration::from_millis(3_050)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // The run ended, so the next poke starts a fresh one.
        assert!(monitor.poke());
        monitor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_pokes_defer_the_expiry() {
        let (monitor, fired) = counting_monitor(3_000);

        monitor.poke();
        time::sleep(Duration::from_millis(2_000)).await;
        monitor.poke();
        time::sleep(Duration::from_millis(2_000)).await;
        // 4 s after the first poke, 2 s after the second: still active.
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        monitor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_the_watchdog() {
        let (monitor, fired) = counting_monitor(3_000);

        monitor.poke();
        assert!(monitor.stop());
        assert!(!monitor.stop());

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        monitor.shutdown();
    }
}
