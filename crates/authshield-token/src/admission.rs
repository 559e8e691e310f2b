//! Fixed-window admission control for issuance paths.

use crate::clock::Clock;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Window length and quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Window length.
    pub window: Duration,
    /// Requests allowed per client per window.
    pub max_requests: u32,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max_requests: 5,
        }
    }
}

/// Outcome of [`AdmissionController::try_admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request fits in the current window.
    Admitted,
    /// Quota is spent; the window resets after `retry_after`.
    Rejected {
        /// Time until the window resets.
        retry_after: Duration,
    },
}

impl Admission {
    /// True if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug, Clone, Copy)]
struct AdmissionWindow {
    start: Duration,
    count: u32,
}

impl AdmissionWindow {
    fn resets_at(&self, window: Duration) -> Duration {
        self.start.saturating_add(window)
    }
}

/// Per-client fixed-window limiter.
///
/// Counts reset all at once when a window elapses, so a client can get up to
/// `2 * max_requests` through in a short burst straddling a window boundary.
/// That trade is accepted for constant memory per client.
///
/// The client key is whatever the caller chooses (IP, account, API key).
/// Windows of clients that went quiet stay in memory until
/// [`AdmissionController::sweep_idle`] runs; [`spawn_admission_sweeper`]
/// runs it periodically.
#[derive(Debug)]
pub struct AdmissionController {
    policy: AdmissionPolicy,
    windows: DashMap<String, AdmissionWindow>,
    clock: Arc<dyn Clock>,
}

impl AdmissionController {
    /// A controller enforcing `policy`.
    pub fn new(policy: AdmissionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
            clock,
        }
    }

    /// The enforced policy.
    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Count one attempt from `client` and decide whether it may proceed.
    ///
    /// The check and the increment happen under the entry's shard lock, so
    /// two concurrent calls can never both take the last slot.
    pub fn try_admit(&self, client: &str) -> Admission {
        let now = self.clock.now();
        let mut window = self
            .windows
            .entry(client.to_string())
            .or_insert(AdmissionWindow {
                start: now,
                count: 0,
            });

        if now >= window.resets_at(self.policy.window) {
            window.start = now;
            window.count = 0;
        }

        if window.count < self.policy.max_requests {
            window.count += 1;
            return Admission::Admitted;
        }

        let retry_after = window.resets_at(self.policy.window).saturating_sub(now);
        drop(window);
        tracing::warn!(
            client,
            retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            "admission rejected"
        );
        Admission::Rejected { retry_after }
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.windows.retain(|_, window| {
            let live = now < window.resets_at(self.policy.window);
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Number of clients with a tracked window.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// True if no client is tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Spawn a task that calls [`AdmissionController::sweep_idle`] every `every`
/// until `shutdown` is cancelled.
pub fn spawn_admission_sweeper(
    admission: Arc<AdmissionController>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("admission sweeper stopped");
                    break;
                }
                _ = interval.tick() => {
                    let removed = admission.sweep_idle();
                    if removed > 0 {
                        tracing::debug!(removed, "swept idle admission windows");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn controller(window_secs: u64, max: u32) -> (Arc<AdmissionController>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1_000)));
        let policy = AdmissionPolicy {
            window: Duration::from_secs(window_secs),
            max_requests: max,
        };
        (Arc::new(AdmissionController::new(policy, clock.clone())), clock)
    }

    #[test]
    fn five_per_minute_then_rejected_then_reset() {
        let (admission, clock) = controller(60, 5);

        for _ in 0..5 {
            assert_eq!(admission.try_admit("a@example.com"), Admission::Admitted);
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(
            admission.try_admit("a@example.com"),
            Admission::Rejected {
                retry_after: Duration::from_secs(55)
            }
        );

        clock.advance(Duration::from_secs(55));
        assert_eq!(admission.try_admit("a@example.com"), Admission::Admitted);
    }

    #[test]
    fn clients_are_independent() {
        let (admission, _) = controller(60, 1);
        assert!(admission.try_admit("10.0.0.1").is_admitted());
        assert!(!admission.try_admit("10.0.0.1").is_admitted());
        assert!(admission.try_admit("10.0.0.2").is_admitted());
    }

    #[test]
    fn boundary_burst_is_bounded_by_twice_the_quota() {
        let (admission, clock) = controller(60, 3);
        assert!(admission.try_admit("c").is_admitted());

        clock.advance(Duration::from_millis(59_999));
        let before: usize = (0..10).filter(|_| admission.try_admit("c").is_admitted()).count();
        clock.advance(Duration::from_millis(1));
        let after: usize = (0..10).filter(|_| admission.try_admit("c").is_admitted()).count();

        assert_eq!(before, 2);
        assert_eq!(after, 3);
        let burst = before + after;
        assert!(burst > 3 && burst <= 6);
    }

    #[test]
    fn sweep_drops_elapsed_windows() {
        let (admission, clock) = controller(60, 5);
        admission.try_admit("old");
        clock.advance(Duration::from_secs(30));
        admission.try_admit("new");
        clock.advance(Duration::from_secs(30));

        assert_eq!(admission.sweep_idle(), 1);
        assert_eq!(admission.len(), 1);
    }

    #[test]
    fn concurrent_callers_never_exceed_quota() {
        let (admission, _) = controller(60, 25);
        let admitted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..20 {
                        if admission.try_admit("shared").is_admitted() {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.into_inner(), 25);
    }

    #[test]
    fn huge_window_does_not_overflow() {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1_000)));
        let policy = AdmissionPolicy {
            window: Duration::MAX,
            max_requests: 1,
        };
        let admission = AdmissionController::new(policy, clock.clone());

        assert!(admission.try_admit("k").is_admitted());
        let Admission::Rejected { retry_after } = admission.try_admit("k") else {
            panic!("second request must be rejected");
        };
        assert!(retry_after > Duration::from_secs(u64::MAX / 2));

        clock.advance(Duration::from_secs(1_000_000));
        assert_eq!(admission.sweep_idle(), 0);
        assert!(!admission.try_admit("k").is_admitted());
    }

    #[tokio::test]
    async fn sweeper_reclaims_idle_windows_and_stops() {
        let (admission, clock) = controller(60, 5);
        for n in 0..50 {
            admission.try_admit(&format!("10.0.0.{n}"));
        }
        assert_eq!(admission.len(), 50);
        clock.advance(Duration::from_secs(60));

        let shutdown = CancellationToken::new();
        let handle =
            spawn_admission_sweeper(admission.clone(), Duration::from_millis(10), shutdown.clone());

        for _ in 0..100 {
            if admission.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(admission.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
