mod active_set;

use crate::error::SchedulerError;
use crate::state::TimerState;
use crate::timer::CountdownTimer;
use active_set::ActiveSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// The per-tick expiry driver. Owns the ordered set of running timers;
/// constructed once and passed explicitly to timer operations.
///
/// The scheduler performs no I/O and knows nothing about wall-clock versus
/// frame-based timing: [`Scheduler::tick`] is parametrized only by a
/// monotonically non-decreasing `now`. Hosts with their own tick source call
/// `tick` directly; others can spawn the built-in interval ticker.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use countdown_scheduler::Scheduler;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let scheduler = Arc::new(Scheduler::new());
///     scheduler.start_ticker(Duration::from_millis(50)).await?;
///     // ... create and start timers ...
///     scheduler.stop_ticker().await?;
///     Ok(())
/// }
/// ```
pub struct Scheduler {
    active: Mutex<ActiveSet>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            active: Mutex::new(ActiveSet::new()),
            ticker: Mutex::new(None),
        }
    }

    /// Number of timers currently running.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// One tick: expires every timer whose remaining time has reached zero as
    /// of `now`, least remaining first.
    ///
    /// The loop keeps popping the tail until it finds a timer with positive
    /// remaining time, so a slow or delayed tick that leaves several timers
    /// simultaneously overdue still expires all of them. A timer whose
    /// callbacks fail is logged and skipped, never halting the loop.
    pub async fn tick(&self, now: Instant) {
        loop {
            let victim = {
                let mut active = self.active.lock().await;
                let due = match active.peek_tail() {
                    Some(tail) => tail.remaining_at(now).await.is_zero(),
                    None => false,
                };
                if !due {
                    break;
                }
                active.pop_tail()
            };
            if let Some(victim) = victim {
                log::trace!("expiring timer '{}'", victim.label());
                victim.expire(now).await;
            }
        }
    }

    /// Spawns a task that calls [`Scheduler::tick`] with the current instant
    /// at a fixed interval. The task holds a reference to the scheduler, so
    /// the scheduler stays alive until [`Scheduler::stop_ticker`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TickerAlreadyRunning`] if a ticker task is
    /// already active.
    pub async fn start_ticker(self: &Arc<Self>, interval: Duration) -> Result<(), SchedulerError> {
        // Acquire lock first to make check-and-start atomic (prevents TOCTOU race condition)
        let mut handle_guard = self.ticker.lock().await;

        if handle_guard.is_some() {
            return Err(SchedulerError::TickerAlreadyRunning);
        }

        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                scheduler.tick(Instant::now()).await;
            }
        });

        *handle_guard = Some(task);
        Ok(())
    }

    /// Aborts the interval ticker task.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TickerNotRunning`] if no ticker is active.
    pub async fn stop_ticker(&self) -> Result<(), SchedulerError> {
        let mut handle_guard = self.ticker.lock().await;
        match handle_guard.take() {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => Err(SchedulerError::TickerNotRunning),
        }
    }

    /// Adds a timer to the active set. Other lifecycle calls can race the
    /// window between the timer's state change and this call: anything no
    /// longer running is silently dropped to keep the membership invariant,
    /// and an entry already present (a pause/resume pair completed in that
    /// window) is removed first so one timer never holds two slots.
    pub(crate) async fn register_active(&self, timer: Arc<CountdownTimer>, now: Instant) {
        let mut active = self.active.lock().await;
        if !timer.is_state(TimerState::Running).await {
            log::debug!("timer '{}' no longer running, not registering", timer.label());
            return;
        }
        active.remove(&timer);
        active.insert(timer, now).await;
    }

    pub(crate) async fn unregister_active(&self, timer: &Arc<CountdownTimer>) {
        self.active.lock().await.remove(timer);
    }

    /// Re-sorts one timer after its length changed, inside a single guard so
    /// the tail invariant never observes the stale order.
    pub(crate) async fn resort_active(&self, timer: &Arc<CountdownTimer>, now: Instant) {
        let mut active = self.active.lock().await;
        if active.remove(timer) {
            active.insert(Arc::clone(timer), now).await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A resume whose registration is delayed can land after a full
    // pause/resume pair has already re-registered the timer. The late call
    // must not leave a second entry behind.
    #[tokio::test]
    async fn a_late_duplicate_registration_holds_a_single_slot() {
        let scheduler = Scheduler::new();
        let t0 = Instant::now();
        let timer = Arc::new(CountdownTimer::new("raced", Duration::from_secs(10)));
        timer.start_at(&scheduler, t0).await.unwrap();
        assert_eq!(scheduler.active_count().await, 1);

        scheduler.register_active(Arc::clone(&timer), t0).await;
        assert_eq!(scheduler.active_count().await, 1);

        timer
            .pause_at(&scheduler, t0 + Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(scheduler.active_count().await, 0);
    }

    // A stale paused entry at the tail would break the expiry loop before it
    // reaches timers with less remaining time. After a duplicate-registration
    // attempt, other timers must still expire on schedule.
    #[tokio::test]
    async fn expiry_survives_a_duplicate_registration_attempt() {
        let scheduler = Scheduler::new();
        let t0 = Instant::now();
        let raced = Arc::new(CountdownTimer::new("raced", Duration::from_secs(30)));
        let due = Arc::new(CountdownTimer::new("due", Duration::from_secs(2)));
        raced.start_at(&scheduler, t0).await.unwrap();
        due.start_at(&scheduler, t0).await.unwrap();

        scheduler.register_active(Arc::clone(&raced), t0).await;
        raced
            .pause_at(&scheduler, t0 + Duration::from_secs(1))
            .await
            .unwrap();

        scheduler.tick(t0 + Duration::from_secs(3)).await;
        assert!(due.is_finished().await);
        assert!(raced.is_paused().await);
        assert_eq!(scheduler.active_count().await, 0);
    }
}
