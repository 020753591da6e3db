use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::state::TimerState;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};

/// Future returned by a subscriber callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A subscriber callback. Receives the state being entered and a duration whose
/// meaning depends on the state: remaining time for `Running`, elapsed running
/// time for everything else.
pub type StateCallback = Box<dyn FnMut(TimerState, Duration) -> CallbackFuture + Send>;

type SharedCallback = Arc<Mutex<StateCallback>>;

struct Inner {
    length: Duration,
    started_at: Option<Instant>,
    frozen_remaining: Option<Duration>,
    state: TimerState,
    completion: Option<SharedCallback>,
    state_callbacks: HashMap<TimerState, Vec<SharedCallback>>,
    waker: broadcast::Sender<(TimerState, Duration)>,
    terminal: Option<(TimerState, Duration)>,
}

impl Inner {
    fn callbacks_for(&self, state: TimerState) -> Vec<SharedCallback> {
        self.state_callbacks
            .get(&state)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remaining_at(&self, now: Instant) -> Duration {
        if self.state == TimerState::Dead {
            return Duration::ZERO;
        }
        if let Some(frozen) = self.frozen_remaining {
            return frozen;
        }
        match self.started_at {
            Some(started) => self
                .length
                .saturating_sub(now.saturating_duration_since(started)),
            None => self.length,
        }
    }
}

/// Work collected under the inner lock for a terminal transition, dispatched
/// after the lock is released.
struct TerminalDispatch {
    outcome: TimerState,
    elapsed: Duration,
    completion: Option<SharedCallback>,
    dead: Vec<SharedCallback>,
    died: Vec<SharedCallback>,
    outcome_callbacks: Vec<SharedCallback>,
}

/// One countdown instance.
///
/// A timer is constructed `Paused` with a fixed length, runs while `Running`,
/// and ends `Dead` exactly once, either because the [`Scheduler`] expired it
/// (`Finished`) or because a caller stopped it (`Stopped`). Operations that
/// change active-set membership (`start`, `pause`, `resume`, `stop`,
/// `increment_time`) take the scheduler explicitly.
///
/// Timers are shared as `Arc<CountdownTimer>`; the lifecycle methods take an
/// `Arc` receiver because the scheduler indexes entries by identity.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use countdown_scheduler::{CountdownTimer, Scheduler};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let scheduler = Arc::new(Scheduler::new());
///     scheduler.start_ticker(Duration::from_millis(100)).await?;
///
///     let timer = Arc::new(CountdownTimer::new("round", Duration::from_secs(30)));
///     timer.start(&scheduler).await?;
///     let (outcome, elapsed) = timer.wait().await?;
///     println!("{outcome} after {elapsed:?}");
///     Ok(())
/// }
/// ```
pub struct CountdownTimer {
    label: String,
    inner: Mutex<Inner>,
}

impl CountdownTimer {
    /// Creates a paused timer that will run for `length` once started.
    pub fn new(label: impl Into<String>, length: Duration) -> Self {
        Self::with_parts(label, length, None)
    }

    /// Creates a paused timer with a completion callback, fired exactly once
    /// when the timer reaches its terminal state, with the outcome
    /// (`Finished` or `Stopped`) and the elapsed running time. The callback
    /// matches the [`StateCallback`] signature.
    pub fn with_completion<F>(label: impl Into<String>, length: Duration, callback: F) -> Self
    where
        F: FnMut(TimerState, Duration) -> CallbackFuture + Send + 'static,
    {
        Self::with_parts(label, length, Some(Arc::new(Mutex::new(Box::new(callback)))))
    }

    fn with_parts(
        label: impl Into<String>,
        length: Duration,
        completion: Option<SharedCallback>,
    ) -> Self {
        let (waker, _) = broadcast::channel(8);
        CountdownTimer {
            label: label.into(),
            inner: Mutex::new(Inner {
                length,
                started_at: None,
                frozen_remaining: Some(length),
                state: TimerState::Paused,
                completion,
                state_callbacks: HashMap::new(),
                waker,
                terminal: None,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Total configured runtime, including any `increment_time` adjustments.
    pub async fn length(&self) -> Duration {
        self.inner.lock().await.length
    }

    /// Current lifecycle state. Note the stored state is never `Finished`,
    /// `Stopped` or `Died`; those are notification states delivered during the
    /// terminal transition. See [`CountdownTimer::outcome`].
    pub async fn state(&self) -> TimerState {
        self.inner.lock().await.state
    }

    /// How the timer ended, if it has: `(Finished | Stopped, elapsed)`.
    pub async fn outcome(&self) -> Option<(TimerState, Duration)> {
        self.inner.lock().await.terminal
    }

    /// Parametrized state predicate.
    ///
    /// `Running`, `Paused` and `Dead` test the current state. `Finished` and
    /// `Stopped` test how a dead timer ended. `Died` is a legacy alias for
    /// `Dead`.
    pub async fn is_state(&self, state: TimerState) -> bool {
        let inner = self.inner.lock().await;
        match state {
            TimerState::Finished | TimerState::Stopped => {
                matches!(inner.terminal, Some((outcome, _)) if outcome == state)
            }
            TimerState::Died => inner.state == TimerState::Dead,
            other => inner.state == other,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.is_state(TimerState::Running).await
    }

    pub async fn is_paused(&self) -> bool {
        self.is_state(TimerState::Paused).await
    }

    pub async fn is_finished(&self) -> bool {
        self.is_state(TimerState::Finished).await
    }

    pub async fn is_stopped(&self) -> bool {
        self.is_state(TimerState::Stopped).await
    }

    pub async fn is_dead(&self) -> bool {
        self.is_state(TimerState::Dead).await
    }

    pub async fn is_died(&self) -> bool {
        self.is_state(TimerState::Died).await
    }

    /// Remaining time as of the monotonic clock. Never negative.
    pub async fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now()).await
    }

    /// Remaining time as of an explicit `now`: the frozen snapshot while
    /// `Paused`, zero once `Dead`, otherwise `length − (now − started_at)`
    /// clamped at zero.
    pub async fn remaining_at(&self, now: Instant) -> Duration {
        self.inner.lock().await.remaining_at(now)
    }

    /// Starts the timer.
    ///
    /// Records the start instant, registers the timer with the scheduler's
    /// active set and fires `Running` subscribers with the remaining time.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidTransition`] unless the timer is `Paused`.
    pub async fn start(self: &Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        self.start_at(scheduler, Instant::now()).await
    }

    /// [`CountdownTimer::start`] with an explicit clock reading.
    pub async fn start_at(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        now: Instant,
    ) -> Result<(), SchedulerError> {
        self.run_from_paused(scheduler, now, "start").await
    }

    /// Resumes a paused timer with exactly the remaining time it was paused
    /// with; no time elapses while paused.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidTransition`] unless the timer is `Paused`.
    pub async fn resume(self: &Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        self.resume_at(scheduler, Instant::now()).await
    }

    /// [`CountdownTimer::resume`] with an explicit clock reading.
    pub async fn resume_at(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        now: Instant,
    ) -> Result<(), SchedulerError> {
        self.run_from_paused(scheduler, now, "resume").await
    }

    /// Pauses a running timer, freezing its remaining time, removing it from
    /// the active set and firing `Paused` subscribers with the elapsed running
    /// time.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidTransition`] unless the timer is `Running`.
    pub async fn pause(self: &Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        self.pause_at(scheduler, Instant::now()).await
    }

    /// [`CountdownTimer::pause`] with an explicit clock reading.
    pub async fn pause_at(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        now: Instant,
    ) -> Result<(), SchedulerError> {
        let (elapsed, callbacks) = {
            let mut inner = self.inner.lock().await;
            if inner.state != TimerState::Running {
                return Err(self.invalid_transition("pause", inner.state));
            }
            let remaining = inner.remaining_at(now);
            let elapsed = match inner.started_at {
                Some(started) => now.saturating_duration_since(started),
                None => Duration::ZERO,
            };
            inner.frozen_remaining = Some(remaining);
            inner.state = TimerState::Paused;
            (elapsed, inner.callbacks_for(TimerState::Paused))
        };
        scheduler.unregister_active(self).await;
        log::debug!("timer '{}' paused after {:?}", self.label, elapsed);
        self.dispatch(TimerState::Paused, elapsed, callbacks);
        Ok(())
    }

    /// Stops the timer early: `Stopped`, then `Dead`.
    ///
    /// Removes the timer from the active set if present, fires the completion
    /// callback with `Stopped`, fires `Dead`, `Died` (legacy alias) and
    /// `Stopped` subscribers in that order, and wakes every waiter with
    /// `(Stopped, elapsed)`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidTransition`] if the timer is already dead;
    /// stop is not safe to call twice.
    pub async fn stop(self: &Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        self.stop_at(scheduler, Instant::now()).await
    }

    /// [`CountdownTimer::stop`] with an explicit clock reading.
    pub async fn stop_at(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        now: Instant,
    ) -> Result<(), SchedulerError> {
        let work = {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.state, TimerState::Running | TimerState::Paused) {
                return Err(self.invalid_transition("stop", inner.state));
            }
            let elapsed = match (inner.frozen_remaining, inner.started_at) {
                (Some(frozen), _) => inner.length.saturating_sub(frozen),
                (None, Some(started)) => now.saturating_duration_since(started),
                (None, None) => Duration::ZERO,
            };
            self.terminate_locked(&mut inner, TimerState::Stopped, elapsed)
        };
        scheduler.unregister_active(self).await;
        log::debug!("timer '{}' stopped after {:?}", self.label, work.elapsed);
        self.run_terminal_dispatch(work);
        Ok(())
    }

    /// Adds `delta_ms` milliseconds to the configured length, taking effect
    /// immediately in the remaining-time computation. Negative values shorten
    /// the timer; length saturates at zero. On a running timer the active-set
    /// entry is re-sorted so the expiry order stays correct.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidTransition`] if the timer is already dead.
    pub async fn increment_time(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        delta_ms: i64,
    ) -> Result<(), SchedulerError> {
        self.increment_time_at(scheduler, delta_ms, Instant::now())
            .await
    }

    /// [`CountdownTimer::increment_time`] with an explicit clock reading.
    pub async fn increment_time_at(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        delta_ms: i64,
        now: Instant,
    ) -> Result<(), SchedulerError> {
        let running = {
            let mut inner = self.inner.lock().await;
            if inner.state.is_terminal() {
                return Err(self.invalid_transition("increment_time", inner.state));
            }
            let delta = Duration::from_millis(delta_ms.unsigned_abs());
            inner.length = if delta_ms >= 0 {
                inner.length.saturating_add(delta)
            } else {
                inner.length.saturating_sub(delta)
            };
            // While paused the frozen snapshot is the remaining time, so the
            // delta must land there too or it would be lost on resume.
            if let Some(frozen) = inner.frozen_remaining {
                inner.frozen_remaining = Some(if delta_ms >= 0 {
                    frozen.saturating_add(delta)
                } else {
                    frozen.saturating_sub(delta)
                });
            }
            inner.state == TimerState::Running
        };
        if running {
            scheduler.resort_active(self, now).await;
        }
        Ok(())
    }

    /// Suspends the calling task until the timer reaches its terminal state,
    /// returning the outcome and the elapsed running time. Every concurrent
    /// waiter receives the single terminal broadcast; waiting on an already
    /// dead timer returns its recorded outcome immediately.
    ///
    /// There is no timeout: waiting on a timer that stays paused forever
    /// blocks forever.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::WaitChannelClosed`] if the broadcast channel is torn
    /// down without a terminal message, which cannot happen while the timer
    /// itself is alive.
    pub async fn wait(&self) -> Result<(TimerState, Duration), SchedulerError> {
        let mut receiver = {
            let inner = self.inner.lock().await;
            if let Some(result) = inner.terminal {
                return Ok(result);
            }
            // Subscribe under the lock: the terminal broadcast is sent under
            // the same lock, so the message cannot slip past us here.
            inner.waker.subscribe()
        };
        Ok(receiver.recv().await?)
    }

    /// Registers a callback fired every time `state` is entered, after any
    /// previously registered callbacks for that state. The callback matches
    /// the [`StateCallback`] signature. Each invocation is spawned on its own
    /// task; a slow or failing subscriber never stalls the scheduler or other
    /// subscribers.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidArgument`] once the timer is dead; subscriber
    /// lists are frozen at death.
    pub async fn on_state<F>(&self, state: TimerState, callback: F) -> Result<(), SchedulerError>
    where
        F: FnMut(TimerState, Duration) -> CallbackFuture + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        if inner.state.is_terminal() {
            return Err(SchedulerError::InvalidArgument(format!(
                "timer '{}' is dead; its subscriber lists are frozen",
                self.label
            )));
        }
        inner
            .state_callbacks
            .entry(state)
            .or_default()
            .push(Arc::new(Mutex::new(Box::new(callback))));
        Ok(())
    }

    /// Drives the `Finished` terminal transition. Called by the scheduler for
    /// a timer it popped from the active set; a timer that was paused or
    /// stopped in the meantime is left alone.
    pub(crate) async fn expire(&self, now: Instant) {
        let work = {
            let mut inner = self.inner.lock().await;
            if inner.state != TimerState::Running {
                return;
            }
            let elapsed = match inner.started_at {
                Some(started) => now.saturating_duration_since(started),
                None => Duration::ZERO,
            };
            self.terminate_locked(&mut inner, TimerState::Finished, elapsed)
        };
        log::debug!("timer '{}' finished after {:?}", self.label, work.elapsed);
        self.run_terminal_dispatch(work);
    }

    async fn run_from_paused(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        now: Instant,
        operation: &'static str,
    ) -> Result<(), SchedulerError> {
        let (remaining, callbacks) = {
            let mut inner = self.inner.lock().await;
            if inner.state != TimerState::Paused {
                return Err(self.invalid_transition(operation, inner.state));
            }
            let remaining = inner.frozen_remaining.take().unwrap_or(inner.length);
            // Rebase started_at so length − (now − started_at) equals the
            // frozen remaining: the paused interval contributes nothing.
            let run_so_far = inner.length.saturating_sub(remaining);
            inner.started_at = Some(now.checked_sub(run_so_far).unwrap_or(now));
            inner.state = TimerState::Running;
            (remaining, inner.callbacks_for(TimerState::Running))
        };
        scheduler.register_active(Arc::clone(self), now).await;
        log::debug!(
            "timer '{}' {}: {:?} remaining",
            self.label,
            operation,
            remaining
        );
        self.dispatch(TimerState::Running, remaining, callbacks);
        Ok(())
    }

    /// Records the outcome, wakes every waiter and marks the timer dead, all
    /// under the caller's inner guard. The callback lists are returned for
    /// dispatch after the guard is dropped.
    fn terminate_locked(
        &self,
        inner: &mut Inner,
        outcome: TimerState,
        elapsed: Duration,
    ) -> TerminalDispatch {
        inner.terminal = Some((outcome, elapsed));
        inner.state = TimerState::Dead;
        inner.frozen_remaining = None;
        // Ignore send errors: no waiters is fine
        let _ = inner.waker.send((outcome, elapsed));
        TerminalDispatch {
            outcome,
            elapsed,
            completion: inner.completion.take(),
            dead: inner.callbacks_for(TimerState::Dead),
            died: inner.callbacks_for(TimerState::Died),
            outcome_callbacks: inner.callbacks_for(outcome),
        }
    }

    fn run_terminal_dispatch(&self, work: TerminalDispatch) {
        if let Some(completion) = work.completion {
            self.dispatch(work.outcome, work.elapsed, vec![completion]);
        }
        self.dispatch(TimerState::Dead, work.elapsed, work.dead);
        self.dispatch(TimerState::Died, work.elapsed, work.died);
        self.dispatch(work.outcome, work.elapsed, work.outcome_callbacks);
    }

    /// Fire-and-forget dispatch: one task per callback, registration order,
    /// failures logged and swallowed.
    fn dispatch(&self, state: TimerState, payload: Duration, callbacks: Vec<SharedCallback>) {
        for callback in callbacks {
            let label = self.label.clone();
            tokio::spawn(async move {
                let mut cb = callback.lock().await;
                let future = (*cb)(state, payload);
                drop(cb); // Release the lock before awaiting
                if let Err(e) = future.await {
                    log::error!("timer '{}': {} callback failed: {:?}", label, state, e);
                }
            });
        }
    }

    fn invalid_transition(&self, operation: &'static str, from: TimerState) -> SchedulerError {
        SchedulerError::InvalidTransition {
            label: self.label.clone(),
            operation,
            from,
        }
    }
}
