//! Poll scheduler - periodic sync cycles plus a once-per-second countdown
//!
//! Two tasks run per active schedule: the cycle loop fires every interval
//! (first fire one interval after start) and the countdown loop ticks the
//! seconds-until-next-sync display value. Both stop on a cancellation token.
//!
//! Cycles are spawned off the tick loop and hand their results back through
//! a `CycleTicket`. Every commit goes through one gate: a ticket from before
//! the last `stop()` (an older epoch) or one older than the last committed
//! cycle is discarded, so a fetch that lands after disconnect never mutates
//! state. A tick that arrives while the previous cycle is still running is
//! skipped rather than queued.

use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Work performed on each scheduled tick
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    async fn run_cycle(&self, ticket: CycleTicket);
}

struct Running {
    token: CancellationToken,
    runner: Arc<dyn CycleRunner>,
    in_flight: Arc<AtomicBool>,
}

struct Gate {
    epoch: u64,
    last_committed_seq: u64,
    period: Duration,
    running: Option<Running>,
}

struct Shared {
    gate: Mutex<Gate>,
    next_seq: AtomicU64,
    countdown: Arc<AtomicU64>,
    metrics: Arc<Metrics>,
}

impl Shared {
    /// Stop the tick loops and invalidate outstanding tickets
    fn halt_locked(&self, gate: &mut Gate) -> bool {
        gate.epoch += 1;
        match gate.running.take() {
            Some(running) => {
                running.token.cancel();
                self.countdown.store(0, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

/// Permission for one cycle to publish its result
pub struct CycleTicket {
    epoch: u64,
    seq: u64,
    shared: Arc<Shared>,
}

impl CycleTicket {
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Run `apply` under the commit gate if this cycle is still current.
    /// Returns None (and runs nothing) for a stale cycle.
    pub fn commit<R>(&self, apply: impl FnOnce() -> R) -> Option<R> {
        let mut gate = self.shared.gate.lock();
        if gate.epoch != self.epoch || self.seq < gate.last_committed_seq {
            debug!(seq = %self.seq, epoch = %self.epoch, "cycle_commit_discarded");
            return None;
        }
        gate.last_committed_seq = self.seq;
        Some(apply())
    }

    /// Stop scheduling after a failed cycle. No-op if already stale.
    pub fn halt(&self) {
        let mut gate = self.shared.gate.lock();
        if gate.epoch == self.epoch && self.shared.halt_locked(&mut gate) {
            info!(seq = %self.seq, "scheduler_halted_after_failure");
        }
    }
}

/// Clears the in-flight flag when a cycle finishes, even by panic
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PollScheduler {
    shared: Arc<Shared>,
}

impl PollScheduler {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            shared: Arc::new(Shared {
                gate: Mutex::new(Gate {
                    epoch: 0,
                    last_committed_seq: 0,
                    period: Duration::from_secs(30),
                    running: None,
                }),
                next_seq: AtomicU64::new(1),
                countdown: Arc::new(AtomicU64::new(0)),
                metrics,
            }),
        }
    }

    /// Start ticking every `period`. Replaces any schedule already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, runner: Arc<dyn CycleRunner>, period: Duration) {
        let mut gate = self.shared.gate.lock();
        self.start_locked(&mut gate, runner, period);
    }

    /// Start only if no stop happened since `ticket` was issued.
    /// Used after an unscheduled cycle (the initial fetch on connect).
    pub fn resume(
        &self,
        ticket: &CycleTicket,
        runner: Arc<dyn CycleRunner>,
        period: Duration,
    ) -> bool {
        let mut gate = self.shared.gate.lock();
        if gate.epoch != ticket.epoch {
            debug!(seq = %ticket.seq, "scheduler_resume_stale");
            return false;
        }
        self.start_locked(&mut gate, runner, period);
        true
    }

    /// Ticket for a cycle run outside the schedule
    pub fn ticket(&self) -> CycleTicket {
        let gate = self.shared.gate.lock();
        CycleTicket {
            epoch: gate.epoch,
            seq: self.shared.next_seq.fetch_add(1, Ordering::Relaxed),
            shared: Arc::clone(&self.shared),
        }
    }

    fn start_locked(&self, gate: &mut Gate, runner: Arc<dyn CycleRunner>, period: Duration) {
        self.shared.halt_locked(gate);
        gate.period = period;

        let running = Running {
            token: CancellationToken::new(),
            runner,
            in_flight: Arc::new(AtomicBool::new(false)),
        };
        self.spawn_loops(&running, gate.epoch, period);
        gate.running = Some(running);
        info!(interval_ms = %period.as_millis(), epoch = %gate.epoch, "scheduler_started");
    }

    /// Cancel both loops and invalidate in-flight cycles. Idempotent.
    pub fn stop(&self) -> bool {
        let mut gate = self.shared.gate.lock();
        let was_running = self.shared.halt_locked(&mut gate);
        if was_running {
            info!(epoch = %gate.epoch, "scheduler_stopped");
        }
        was_running
    }

    /// Restart both loops at a new period. In-flight cycles stay valid.
    /// Returns false when nothing is scheduled (the period is still stored).
    pub fn set_interval(&self, period: Duration) -> bool {
        let mut gate = self.shared.gate.lock();
        gate.period = period;
        let epoch = gate.epoch;

        let Some(running) = gate.running.as_mut() else {
            return false;
        };
        running.token.cancel();
        running.token = CancellationToken::new();
        self.spawn_loops(running, epoch, period);
        info!(interval_ms = %period.as_millis(), "scheduler_interval_changed");
        true
    }

    pub fn is_running(&self) -> bool {
        self.shared.gate.lock().running.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.shared.gate.lock().period
    }

    /// Seconds until the next scheduled cycle (0 when stopped)
    pub fn countdown_secs(&self) -> u64 {
        self.shared.countdown.load(Ordering::Relaxed)
    }

    fn spawn_loops(&self, running: &Running, epoch: u64, period: Duration) {
        let period_secs = period.as_secs();
        self.shared.countdown.store(period_secs, Ordering::Relaxed);

        tokio::spawn(cycle_loop(
            Arc::clone(&self.shared),
            Arc::clone(&running.runner),
            Arc::clone(&running.in_flight),
            running.token.clone(),
            epoch,
            period,
        ));
        tokio::spawn(countdown_loop(
            Arc::clone(&self.shared.countdown),
            running.token.clone(),
            period_secs,
        ));
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn cycle_loop(
    shared: Arc<Shared>,
    runner: Arc<dyn CycleRunner>,
    in_flight: Arc<AtomicBool>,
    token: CancellationToken,
    epoch: u64,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if in_flight.swap(true, Ordering::AcqRel) {
                    shared.metrics.record_cycle_skipped();
                    debug!("cycle_skipped_in_flight");
                    continue;
                }

                let guard = InFlightGuard(Arc::clone(&in_flight));
                let ticket = CycleTicket {
                    epoch,
                    seq: shared.next_seq.fetch_add(1, Ordering::Relaxed),
                    shared: Arc::clone(&shared),
                };
                shared.countdown.store(period.as_secs(), Ordering::Relaxed);

                let runner = Arc::clone(&runner);
                tokio::spawn(async move {
                    let _guard = guard;
                    runner.run_cycle(ticket).await;
                });
            }
        }
    }
}

async fn countdown_loop(countdown: Arc<AtomicU64>, token: CancellationToken, period_secs: u64) {
    let mut ticker = interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                // Wraps back to the full period rather than going negative
                let _ = countdown.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |secs| {
                    Some(if secs == 0 { period_secs } else { secs - 1 })
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;
    use tokio::time::sleep;

    /// Counts cycles and commits immediately
    #[derive(Default)]
    struct CountingRunner {
        runs: AtomicUsize,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl CycleRunner for CountingRunner {
        async fn run_cycle(&self, ticket: CycleTicket) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if ticket.commit(|| ()).is_some() {
                self.commits.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Waits for a release signal before committing
    #[derive(Default)]
    struct GatedRunner {
        release: Notify,
        started: AtomicUsize,
        committed: AtomicUsize,
        discarded: AtomicUsize,
    }

    #[async_trait]
    impl CycleRunner for GatedRunner {
        async fn run_cycle(&self, ticket: CycleTicket) {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            match ticket.commit(|| ()) {
                Some(()) => self.committed.fetch_add(1, Ordering::SeqCst),
                None => self.discarded.fetch_add(1, Ordering::SeqCst),
            };
        }
    }

    fn scheduler() -> (PollScheduler, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (PollScheduler::new(Arc::clone(&metrics)), metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_after_one_interval() {
        let (scheduler, _) = scheduler();
        let runner = Arc::new(CountingRunner::default());
        scheduler.start(runner.clone(), Duration::from_secs(10));
        assert_eq!(scheduler.countdown_secs(), 10);

        sleep(Duration::from_millis(9_900)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(runner.commits.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(20)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_and_wraps() {
        let (scheduler, _) = scheduler();
        scheduler.start(Arc::new(CountingRunner::default()), Duration::from_secs(5));

        sleep(Duration::from_millis(3_100)).await;
        assert_eq!(scheduler.countdown_secs(), 2);

        // Cycle at t=5 resets to 5, then ticks down again
        sleep(Duration::from_secs(3)).await;
        assert!(scheduler.countdown_secs() <= 5);
        assert!(scheduler.countdown_secs() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_resets_countdown_without_double_fire() {
        let (scheduler, _) = scheduler();
        let runner = Arc::new(CountingRunner::default());
        scheduler.start(runner.clone(), Duration::from_secs(10));

        sleep(Duration::from_millis(3_100)).await;
        assert!(scheduler.set_interval(Duration::from_secs(5)));
        assert_eq!(scheduler.countdown_secs(), 5);
        assert_eq!(scheduler.interval(), Duration::from_secs(5));

        // New schedule fires at ~8.1s; the old 10s tick must not fire
        sleep(Duration::from_millis(7_000)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_when_stopped_only_stores() {
        let (scheduler, _) = scheduler();
        assert!(!scheduler.set_interval(Duration::from_secs(60)));
        assert_eq!(scheduler.interval(), Duration::from_secs(60));
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.countdown_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_silences_ticks() {
        let (scheduler, _) = scheduler();
        let runner = Arc::new(CountingRunner::default());
        scheduler.start(runner.clone(), Duration::from_secs(5));

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.countdown_secs(), 0);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.countdown_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_after_stop_is_discarded() {
        let (scheduler, _) = scheduler();
        let runner = Arc::new(GatedRunner::default());
        scheduler.start(runner.clone(), Duration::from_secs(5));

        sleep(Duration::from_millis(5_100)).await;
        assert_eq!(runner.started.load(Ordering::SeqCst), 1);

        scheduler.stop();
        runner.release.notify_one();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(runner.committed.load(Ordering::SeqCst), 0);
        assert_eq!(runner.discarded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_cycle_survives_interval_change() {
        let (scheduler, _) = scheduler();
        let runner = Arc::new(GatedRunner::default());
        scheduler.start(runner.clone(), Duration::from_secs(5));

        sleep(Duration::from_millis(5_100)).await;
        scheduler.set_interval(Duration::from_secs(10));
        runner.release.notify_one();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(runner.committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_tick_is_skipped() {
        let (scheduler, metrics) = scheduler();
        let runner = Arc::new(GatedRunner::default());
        scheduler.start(runner.clone(), Duration::from_secs(5));

        // Cycle starts at 5s and is still blocked at 10s and 15s
        sleep(Duration::from_millis(15_100)).await;
        assert_eq!(runner.started.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.cycles_skipped(), 2);

        runner.release.notify_one();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(runner.started.load(Ordering::SeqCst), 2);
        assert_eq!(runner.committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_refused_after_stop() {
        let (scheduler, _) = scheduler();
        let runner = Arc::new(CountingRunner::default());

        let ticket = scheduler.ticket();
        scheduler.stop();
        assert!(ticket.commit(|| ()).is_none());
        assert!(!scheduler.resume(&ticket, runner.clone(), Duration::from_secs(5)));
        assert!(!scheduler.is_running());

        let ticket = scheduler.ticket();
        assert!(ticket.commit(|| ()).is_some());
        assert!(scheduler.resume(&ticket, runner.clone(), Duration::from_secs(5)));
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_stops_schedule() {
        struct FailingRunner(AtomicUsize);

        #[async_trait]
        impl CycleRunner for FailingRunner {
            async fn run_cycle(&self, ticket: CycleTicket) {
                self.0.fetch_add(1, Ordering::SeqCst);
                ticket.halt();
            }
        }

        let (scheduler, _) = scheduler();
        let runner = Arc::new(FailingRunner(AtomicUsize::new(0)));
        scheduler.start(runner.clone(), Duration::from_secs(5));

        sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.0.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
    }
}
