//! Cancellable one-second countdown.
//!
//! Every `start` opens a new run identified by a generation number. The tick
//! task of a run checks its generation under the state lock before it touches
//! anything, so once `cancel` or a newer `start` has returned, the superseded
//! run can no longer emit events. Events that were already queued still carry
//! their generation and consumers compare it against the run they armed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use shared::protocol::CountdownSnapshot;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Countdown used to keep a dispatch error on screen.
pub const ERROR_DISPLAY_SECONDS: u32 = 5;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEventKind {
    Tick { remaining_seconds: u32 },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub generation: u64,
    pub kind: TimerEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("countdown duration must not be negative, got {0}")]
    InvalidArgument(i64),
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    total_seconds: u32,
    remaining_seconds: u32,
    running: bool,
    task: Option<JoinHandle<()>>,
}

impl TimerState {
    fn supersede(&mut self) -> u64 {
        self.generation += 1;
        self.running = false;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation
    }
}

pub struct DwellTimer {
    state: Arc<Mutex<TimerState>>,
    events: mpsc::UnboundedSender<TimerEvent>,
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DwellTimer {
    /// Creates an idle timer and the receiver its events are delivered to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let timer = Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            events,
        };
        (timer, rx)
    }

    /// Starts a new run and returns its generation. Any previous run is
    /// superseded. Must be called inside a tokio runtime.
    pub fn start(&self, total_seconds: u32) -> u64 {
        let mut state = lock(&self.state);
        let generation = state.supersede();
        state.total_seconds = total_seconds;
        state.remaining_seconds = total_seconds;

        if total_seconds == 0 {
            let _ = self.events.send(TimerEvent {
                generation,
                kind: TimerEventKind::Completed,
            });
            return generation;
        }

        state.running = true;
        state.task = Some(tokio::spawn(run_countdown(
            Arc::clone(&self.state),
            self.events.clone(),
            generation,
            Instant::now() + TICK,
        )));
        generation
    }

    pub fn start_checked(&self, total_seconds: i64) -> Result<u64, TimerError> {
        if total_seconds < 0 {
            return Err(TimerError::InvalidArgument(total_seconds));
        }
        let total = u32::try_from(total_seconds).unwrap_or(u32::MAX);
        Ok(self.start(total))
    }

    /// Stops the current run and invalidates anything it already queued.
    /// Cancelling an idle timer changes nothing observable.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.supersede();
        state.total_seconds = 0;
        state.remaining_seconds = 0;
    }

    pub fn restart(&self, total_seconds: u32) -> u64 {
        self.cancel();
        self.start(total_seconds)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    pub fn progress(&self) -> f64 {
        let state = lock(&self.state);
        progress(state.total_seconds, state.remaining_seconds)
    }

    pub fn snapshot(&self) -> CountdownSnapshot {
        let state = lock(&self.state);
        CountdownSnapshot {
            total_seconds: state.total_seconds,
            remaining_seconds: state.remaining_seconds,
            running: state.running,
            progress: progress(state.total_seconds, state.remaining_seconds),
        }
    }
}

impl Drop for DwellTimer {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.supersede();
    }
}

pub fn progress(total_seconds: u32, remaining_seconds: u32) -> f64 {
    if total_seconds == 0 {
        return 0.0;
    }
    let elapsed = total_seconds.saturating_sub(remaining_seconds);
    f64::from(elapsed) / f64::from(total_seconds)
}

async fn run_countdown(
    state: Arc<Mutex<TimerState>>,
    events: mpsc::UnboundedSender<TimerEvent>,
    generation: u64,
    first_tick: Instant,
) {
    let mut ticks = interval_at(first_tick, TICK);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        let mut guard = lock(&state);
        if guard.generation != generation || !guard.running {
            return;
        }
        guard.remaining_seconds = guard.remaining_seconds.saturating_sub(1);
        let remaining_seconds = guard.remaining_seconds;
        let _ = events.send(TimerEvent {
            generation,
            kind: TimerEventKind::Tick { remaining_seconds },
        });
        if remaining_seconds == 0 {
            guard.running = false;
            guard.task = None;
            let _ = events.send(TimerEvent {
                generation,
                kind: TimerEventKind::Completed,
            });
            return;
        }
    }
}

#[cfg(test)]
#[path = "tests/timer_tests.rs"]
mod tests;
