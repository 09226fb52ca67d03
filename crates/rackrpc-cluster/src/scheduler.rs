//! Adaptive polling and pass coalescing.
//!
//! The poll interval tightens while the rack is converging and relaxes once
//! it holds a connection to every advertised event-loop. At most one
//! reconciliation pass runs at a time; triggers that arrive while one is in
//! flight share its outcome.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Interval while converging or disconnected.
pub const INTERVAL_LOW: Duration = Duration::from_secs(1);
/// Interval while connected to some, but not all, event-loops.
pub const INTERVAL_MID: Duration = Duration::from_secs(5);
/// Interval once fully connected.
pub const INTERVAL_HIGH: Duration = Duration::from_secs(30);

/// Picks the poll interval.
///
/// `time_running` is `None` before the service starts; `eventloops` is `None`
/// when discovery produced no usable data.
pub fn calculate_interval(
    time_running: Option<Duration>,
    eventloops: Option<usize>,
    connections: usize,
) -> Duration {
    if matches!(time_running, Some(running) if running < INTERVAL_HIGH) {
        return INTERVAL_LOW;
    }
    match eventloops {
        None | Some(0) => INTERVAL_LOW,
        Some(_) if connections == 0 => INTERVAL_LOW,
        Some(eventloops) if connections < eventloops => INTERVAL_MID,
        Some(_) => INTERVAL_HIGH,
    }
}

/// What a finished pass observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub eventloops: Option<usize>,
    pub connections: usize,
}

/// Completion of a reconciliation pass; clone it to wait on the same pass.
pub type PassFuture = Shared<BoxFuture<'static, PassSummary>>;

struct InFlight {
    pass: PassFuture,
    done: Arc<AtomicBool>,
}

/// Flags the pass finished when dropped, including by a panic.
struct MarkDone(Arc<AtomicBool>);

impl Drop for MarkDone {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Poll timing state for one service.
pub struct PollScheduler {
    started_at: Mutex<Option<Instant>>,
    interval: watch::Sender<Duration>,
    in_flight: Mutex<Option<InFlight>>,
    passes: AtomicU64,
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PollScheduler {
    pub fn new() -> Self {
        let (interval, _) = watch::channel(calculate_interval(None, None, 0));
        Self {
            started_at: Mutex::new(None),
            interval,
            in_flight: Mutex::new(None),
            passes: AtomicU64::new(0),
        }
    }

    /// Records the service start time.
    pub fn mark_started(&self) {
        *self.started_at.lock() = Some(Instant::now());
    }

    pub fn time_running(&self) -> Option<Duration> {
        self.started_at.lock().map(|started| started.elapsed())
    }

    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Duration> {
        self.interval.subscribe()
    }

    /// Number of passes started so far.
    pub fn passes_started(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Recomputes the interval. Returns the new value if it changed.
    pub fn update_interval(&self, eventloops: Option<usize>, connections: usize) -> Option<Duration> {
        let next = calculate_interval(self.time_running(), eventloops, connections);
        self.set_interval(next)
    }

    /// Drops to the shortest interval. Returns the new value if it changed.
    pub fn force_low(&self) -> Option<Duration> {
        self.set_interval(INTERVAL_LOW)
    }

    fn set_interval(&self, next: Duration) -> Option<Duration> {
        let changed = self.interval.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        changed.then_some(next)
    }

    /// Whether a pass is currently running.
    pub fn in_flight(&self) -> bool {
        self.in_flight
            .lock()
            .as_ref()
            .map_or(false, |in_flight| !in_flight.done.load(Ordering::SeqCst))
    }

    /// The pass in flight, if any.
    pub fn current(&self) -> Option<PassFuture> {
        self.in_flight
            .lock()
            .as_ref()
            .filter(|in_flight| !in_flight.done.load(Ordering::SeqCst))
            .map(|in_flight| in_flight.pass.clone())
    }

    /// Starts a pass, or joins the one already running.
    ///
    /// `start` is only called when no pass is in flight. The pass runs on
    /// its own task, so it completes even if every caller stops waiting.
    pub fn trigger<F, Fut>(&self, start: F) -> PassFuture
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PassSummary> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock();
        if let Some(current) = in_flight.as_ref() {
            if !current.done.load(Ordering::SeqCst) {
                return current.pass.clone();
            }
        }

        self.passes.fetch_add(1, Ordering::SeqCst);
        let done = Arc::new(AtomicBool::new(false));
        let pass = start();
        let task = {
            let done = done.clone();
            tokio::spawn(async move {
                let _done = MarkDone(done);
                pass.await
            })
        };
        let pass = task
            .map(|joined| match joined {
                Ok(summary) => summary,
                Err(e) => {
                    error!("Cluster client update failed: {}", e);
                    PassSummary::default()
                }
            })
            .boxed()
            .shared();

        *in_flight = Some(InFlight {
            pass: pass.clone(),
            done,
        });
        pass
    }

    /// Calls `tick` immediately, then again whenever the current interval has
    /// elapsed since the previous tick began, until `cancel` fires.
    ///
    /// A change of interval takes effect without waiting out the old one.
    pub async fn drive<F, Fut>(&self, cancel: CancellationToken, mut tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = self.watch();
        loop {
            let began = Instant::now();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick() => {}
            }

            loop {
                let deadline = began + *interval.borrow_and_update();
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline) => break,
                    changed = interval.changed() => {
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
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_low_during_startup_window() {
        assert_eq!(calculate_interval(Some(secs(0)), Some(1), 1), INTERVAL_LOW);
        assert_eq!(calculate_interval(Some(secs(29)), Some(3), 3), INTERVAL_LOW);
    }

    #[test]
    fn test_interval_rules_after_startup() {
        let running = Some(secs(30));
        assert_eq!(calculate_interval(running, None, 0), INTERVAL_LOW);
        assert_eq!(calculate_interval(running, None, 2), INTERVAL_LOW);
        assert_eq!(calculate_interval(running, Some(0), 0), INTERVAL_LOW);
        assert_eq!(calculate_interval(running, Some(3), 0), INTERVAL_LOW);
        assert_eq!(calculate_interval(running, Some(3), 2), INTERVAL_MID);
        assert_eq!(calculate_interval(running, Some(3), 3), INTERVAL_HIGH);
        assert_eq!(calculate_interval(running, Some(1), 1), INTERVAL_HIGH);
    }

    #[test]
    fn test_not_started_uses_data() {
        assert_eq!(calculate_interval(None, None, 0), INTERVAL_LOW);
        assert_eq!(calculate_interval(None, Some(2), 2), INTERVAL_HIGH);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_interval_reports_changes() {
        let scheduler = PollScheduler::new();
        scheduler.mark_started();
        let mut watch = scheduler.watch();

        assert_eq!(scheduler.update_interval(Some(1), 1), None);
        tokio::time::advance(secs(30)).await;
        assert_eq!(scheduler.update_interval(Some(1), 1), Some(INTERVAL_HIGH));
        assert!(watch.has_changed().unwrap());
        assert_eq!(*watch.borrow_and_update(), INTERVAL_HIGH);

        assert_eq!(scheduler.update_interval(Some(2), 1), Some(INTERVAL_MID));
        assert_eq!(scheduler.force_low(), Some(INTERVAL_LOW));
        assert_eq!(scheduler.force_low(), None);
    }

    #[tokio::test]
    async fn test_trigger_coalesces() {
        let scheduler = PollScheduler::new();
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let runs = Arc::new(AtomicUsize::new(0));

        let first = {
            let runs = runs.clone();
            scheduler.trigger(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                let _ = released.await;
                PassSummary {
                    eventloops: Some(2),
                    connections: 1,
                }
            })
        };
        assert!(scheduler.in_flight());

        let joined: Vec<_> = (0..5)
            .map(|_| {
                let runs = runs.clone();
                scheduler.trigger(move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    PassSummary::default()
                })
            })
            .collect();

        release.send(()).unwrap();
        let expected = PassSummary {
            eventloops: Some(2),
            connections: 1,
        };
        assert_eq!(first.await, expected);
        for pass in joined {
            assert_eq!(pass.await, expected);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.passes_started(), 1);
        assert!(!scheduler.in_flight());
    }

    #[tokio::test]
    async fn test_new_pass_after_completion() {
        let scheduler = PollScheduler::new();
        scheduler.trigger(|| async { PassSummary::default() }).await;
        let second = scheduler
            .trigger(|| async {
                PassSummary {
                    eventloops: None,
                    connections: 7,
                }
            })
            .await;
        assert_eq!(second.connections, 7);
        assert_eq!(scheduler.passes_started(), 2);
    }

    #[tokio::test]
    async fn test_unawaited_pass_still_completes() {
        let scheduler = PollScheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        drop(scheduler.trigger(move || async move {
            let _ = tx.send(());
            PassSummary::default()
        }));
        rx.await.unwrap();
        tokio::task::yield_now().await;
        assert!(!scheduler.in_flight());
    }

    #[tokio::test]
    async fn test_panicking_pass_is_contained() {
        let scheduler = PollScheduler::new();
        let summary = scheduler
            .trigger(|| async {
                if PassSummary::default().connections == 0 {
                    panic!("boom");
                }
                PassSummary::default()
            })
            .await;
        assert_eq!(summary, PassSummary::default());
        assert!(!scheduler.in_flight());

        let next = scheduler
            .trigger(|| async {
                PassSummary {
                    eventloops: Some(1),
                    connections: 1,
                }
            })
            .await;
        assert_eq!(next.connections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_follows_interval() {
        let scheduler = Arc::new(PollScheduler::new());
        let ticks = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let driver = {
            let scheduler = scheduler.clone();
            let ticks = ticks.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                scheduler
                    .drive(cancel, || {
                        ticks.fetch_add(1, Ordering::SeqCst);
                        async {}
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        scheduler.set_interval(INTERVAL_HIGH);
        tokio::time::sleep(secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        tokio::time::sleep(secs(25)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        // Dropping to LOW mid-wait fires as soon as LOW has elapsed.
        tokio::time::sleep(secs(10)).await;
        scheduler.force_low();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 4);

        cancel.cancel();
        driver.await.unwrap();
    }
}
