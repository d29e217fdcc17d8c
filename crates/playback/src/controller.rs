//! Playback state machine for one display target.
//!
//! A session is either a script or a single table action. Each transition
//! follows the same shape: decide under the state lock, release it, await the
//! dispatch, then reacquire the lock and apply the result only if the session
//! that started the dispatch is still the current one. The dwell timer drives
//! the rest through a background task that receives its events.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use display_rig::DispatchError;
use shared::domain::{PropertyStep, Script, Step, WebContentStep};
use shared::protocol::{
    PlaybackEvent, PlaybackSnapshot, SessionProgram, SessionStatus, TableActionOutcome,
    TableActionResponse,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigSource, PlaybackConfig};
use crate::dispatcher::CommandDispatcher;
use crate::reporter::{ActivationMetadata, UsageReporter};
use crate::timer::{DwellTimer, TimerEvent, TimerEventKind, ERROR_DISPLAY_SECONDS};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("a display command is already in flight")]
    Busy,
}

#[derive(Debug, Clone)]
enum Program {
    Script(Arc<Script>),
    Activate(PropertyStep),
    Flatten,
    WebContent(WebContentStep),
}

impl Program {
    fn describe(&self) -> SessionProgram {
        match self {
            Program::Script(script) => SessionProgram::Script {
                script_id: script.id,
                name: script.name.clone(),
                step_count: script.steps.len(),
            },
            Program::Activate(step) => SessionProgram::Activate {
                canvas_pid: step.canvas_pid.clone(),
            },
            Program::Flatten => SessionProgram::Flatten,
            Program::WebContent(step) => SessionProgram::WebContent {
                web_url: step.web_url.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Dwell,
    ErrorDisplay,
}

#[derive(Debug)]
struct Session {
    id: Uuid,
    program: Program,
    config: PlaybackConfig,
    current_index: usize,
    status: SessionStatus,
    last_error: Option<String>,
    window: Window,
    armed_generation: Option<u64>,
}

impl Session {
    fn new(program: Program, config: PlaybackConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            program,
            config,
            current_index: 0,
            status: SessionStatus::Dispatching,
            last_error: None,
            window: Window::Dwell,
            armed_generation: None,
        }
    }

    fn current_step(&self) -> Option<Step> {
        match &self.program {
            Program::Script(script) => script.steps.get(self.current_index).cloned(),
            Program::Activate(step) => Some(Step::Property(step.clone())),
            Program::WebContent(step) => Some(Step::WebContent(step.clone())),
            Program::Flatten => None,
        }
    }

    fn job(&self) -> Option<DispatchJob> {
        match &self.program {
            Program::Flatten => Some(DispatchJob::Flatten),
            _ => self.current_step().map(DispatchJob::Step),
        }
    }

    fn error_window_open(&self) -> bool {
        self.window == Window::ErrorDisplay && self.armed_generation.is_some()
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    session: Option<Session>,
    last_activated: Option<String>,
}

enum DispatchJob {
    Step(Step),
    Flatten,
}

struct PendingDispatch {
    session_id: Uuid,
    config: PlaybackConfig,
    job: DispatchJob,
}

enum Completion {
    AwaitOperator,
    Advance(Step),
    End,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

struct Inner {
    dispatcher: CommandDispatcher,
    config: Arc<dyn ConfigSource>,
    reporter: Arc<dyn UsageReporter>,
    timer: DwellTimer,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<PlaybackEvent>,
}

/// Owns the single playback session of a display target.
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Inner>,
}

impl PlaybackController {
    /// Must be called inside a tokio runtime; spawns the task that reacts to
    /// countdown events.
    pub fn new(
        dispatcher: CommandDispatcher,
        config: Arc<dyn ConfigSource>,
        reporter: Arc<dyn UsageReporter>,
    ) -> Self {
        let (timer, timer_events) = DwellTimer::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            dispatcher,
            config,
            reporter,
            timer,
            state: Mutex::new(ControllerState::default()),
            events,
        });
        spawn_timer_driver(Arc::downgrade(&inner), timer_events);
        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.inner.lock();
        self.inner.snapshot_locked(&state)
    }

    /// Starts playing `script` from its first step, replacing any session
    /// that is not currently dispatching.
    pub async fn play(&self, script: Script) -> Result<PlaybackSnapshot, PlaybackError> {
        if script.steps.is_empty() {
            return Err(PlaybackError::InvalidArgument(format!(
                "script '{}' has no steps",
                script.name
            )));
        }
        for (index, step) in script.steps.iter().enumerate() {
            step.validate().map_err(|err| {
                PlaybackError::InvalidArgument(format!("step {}: {err}", index + 1))
            })?;
        }

        let pending = {
            let mut state = self.inner.lock();
            if state.is_dispatching() {
                return Err(PlaybackError::Busy);
            }
            info!(
                script_id = script.id.0,
                name = %script.name,
                steps = script.steps.len(),
                "starting script playback"
            );
            state.last_activated = None;
            self.inner
                .begin_session(&mut state, Program::Script(Arc::new(script)))
        };
        Ok(self.inner.run_dispatch(pending).await)
    }

    pub async fn next(&self) -> PlaybackSnapshot {
        self.navigate(Direction::Forward).await
    }

    pub async fn previous(&self) -> PlaybackSnapshot {
        self.navigate(Direction::Backward).await
    }

    /// Ends the session. Never sends a command to the table.
    pub fn stop(&self) -> PlaybackSnapshot {
        let mut state = self.inner.lock();
        self.inner.timer.cancel();
        if let Some(session) = state.session.as_ref() {
            info!(session_id = %session.id, "playback stopped");
        }
        self.inner.end_session(&mut state);
        self.inner.snapshot_locked(&state)
    }

    pub async fn activate_table(
        &self,
        step: PropertyStep,
    ) -> Result<TableActionResponse, PlaybackError> {
        Step::Property(step.clone())
            .validate()
            .map_err(|err| PlaybackError::InvalidArgument(err.to_string()))?;

        let begun = {
            let mut state = self.inner.lock();
            if state.last_activated.as_deref() == Some(step.canvas_pid.as_str()) {
                debug!(canvas_pid = %step.canvas_pid, "property already on the table");
                Err(TableActionOutcome::AlreadyActive)
            } else {
                self.inner
                    .begin_single_shot(&mut state, Program::Activate(step))
            }
        };
        Ok(self.inner.finish_table_action(begun).await)
    }

    pub async fn flatten_table(&self) -> TableActionResponse {
        let begun = {
            let mut state = self.inner.lock();
            self.inner.begin_single_shot(&mut state, Program::Flatten)
        };
        self.inner.finish_table_action(begun).await
    }

    pub async fn display_web_content(
        &self,
        web_url: &str,
    ) -> Result<TableActionResponse, PlaybackError> {
        let step = WebContentStep {
            web_url: web_url.trim().to_string(),
        };
        Step::WebContent(step.clone())
            .validate()
            .map_err(|err| PlaybackError::InvalidArgument(err.to_string()))?;

        let begun = {
            let mut state = self.inner.lock();
            self.inner
                .begin_single_shot(&mut state, Program::WebContent(step))
        };
        Ok(self.inner.finish_table_action(begun).await)
    }

    async fn navigate(&self, direction: Direction) -> PlaybackSnapshot {
        let pending = {
            let mut state = self.inner.lock();
            self.inner.begin_navigation(&mut state, direction)
        };
        match pending {
            Some(pending) => self.inner.run_dispatch(pending).await,
            None => self.snapshot(),
        }
    }
}

impl ControllerState {
    fn is_dispatching(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.status == SessionStatus::Dispatching)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.send(event);
    }

    fn snapshot_locked(&self, state: &ControllerState) -> PlaybackSnapshot {
        let countdown = self.timer.snapshot();
        match &state.session {
            Some(session) => PlaybackSnapshot {
                session_id: Some(session.id),
                status: session.status,
                program: Some(session.program.describe()),
                current_index: matches!(session.program, Program::Script(_))
                    .then_some(session.current_index),
                current_step: session.current_step(),
                last_error: session.last_error.clone(),
                countdown,
            },
            None => PlaybackSnapshot {
                session_id: None,
                status: SessionStatus::Idle,
                program: None,
                current_index: None,
                current_step: None,
                last_error: None,
                countdown,
            },
        }
    }

    fn publish(&self, state: &ControllerState) -> PlaybackSnapshot {
        let snapshot = self.snapshot_locked(state);
        self.emit(PlaybackEvent::SessionUpdated(snapshot.clone()));
        snapshot
    }

    fn begin_session(&self, state: &mut ControllerState, program: Program) -> PendingDispatch {
        self.timer.cancel();
        let config = self.config.playback_config();
        let session = Session::new(program, config);
        let pending = PendingDispatch {
            session_id: session.id,
            config,
            job: session.job().unwrap_or(DispatchJob::Flatten),
        };
        state.session = Some(session);
        self.publish(state);
        pending
    }

    fn begin_single_shot(
        &self,
        state: &mut ControllerState,
        program: Program,
    ) -> Result<PendingDispatch, TableActionOutcome> {
        if let Some(session) = &state.session {
            debug!(session_id = %session.id, status = ?session.status, "table action rejected, session active");
            return Err(TableActionOutcome::Busy);
        }
        Ok(self.begin_session(state, program))
    }

    fn begin_navigation(
        &self,
        state: &mut ControllerState,
        direction: Direction,
    ) -> Option<PendingDispatch> {
        let session = state.session.as_mut()?;
        let Program::Script(script) = &session.program else {
            return None;
        };
        if session.status == SessionStatus::Dispatching || session.error_window_open() {
            debug!(session_id = %session.id, status = ?session.status, "navigation ignored");
            return None;
        }
        let target = match direction {
            Direction::Forward => {
                Some(session.current_index + 1).filter(|next| *next < script.steps.len())
            }
            Direction::Backward => session.current_index.checked_sub(1),
        }?;

        self.timer.cancel();
        session.armed_generation = None;
        session.current_index = target;
        session.status = SessionStatus::Dispatching;
        let pending = PendingDispatch {
            session_id: session.id,
            config: session.config,
            job: DispatchJob::Step(script.steps[target].clone()),
        };
        debug!(session_id = %session.id, index = target, "navigating");
        self.publish(state);
        Some(pending)
    }

    async fn finish_table_action(
        &self,
        begun: Result<PendingDispatch, TableActionOutcome>,
    ) -> TableActionResponse {
        match begun {
            Ok(pending) => TableActionResponse {
                outcome: TableActionOutcome::Dispatched,
                playback: self.run_dispatch(pending).await,
            },
            Err(outcome) => {
                let state = self.lock();
                TableActionResponse {
                    outcome,
                    playback: self.snapshot_locked(&state),
                }
            }
        }
    }

    async fn run_dispatch(&self, pending: PendingDispatch) -> PlaybackSnapshot {
        let result = match &pending.job {
            DispatchJob::Step(step) => self.dispatcher.dispatch_step(step, &pending.config).await,
            DispatchJob::Flatten => self.dispatcher.dispatch_flatten().await,
        };

        let mut state = self.lock();
        let applied = {
            let ControllerState {
                session,
                last_activated,
            } = &mut *state;
            match session
                .as_mut()
                .filter(|session| session.id == pending.session_id)
            {
                Some(session) => {
                    self.apply_result(session, last_activated, result);
                    true
                }
                None => false,
            }
        };
        if !applied {
            debug!(session_id = %pending.session_id, "dropping result of superseded dispatch");
            return self.snapshot_locked(&state);
        }
        self.publish(&state)
    }

    fn apply_result(
        &self,
        session: &mut Session,
        last_activated: &mut Option<String>,
        result: Result<(), DispatchError>,
    ) {
        match result {
            Ok(()) => {
                session.status = SessionStatus::Dwelling;
                session.last_error = None;
                session.window = Window::Dwell;
                session.armed_generation = Some(self.timer.restart(session.config.dwell_seconds));
                match &session.program {
                    Program::Activate(step) => {
                        *last_activated = Some(step.canvas_pid.clone());
                        self.report_activation(step.clone(), session.config);
                    }
                    Program::Script(_) | Program::WebContent(_) | Program::Flatten => {
                        *last_activated = None
                    }
                }
            }
            Err(err) => {
                error!(session_id = %session.id, error = %err, kind = ?err.kind, "display dispatch failed");
                session.status = SessionStatus::Error;
                session.last_error = Some(err.message.clone());
                session.window = Window::ErrorDisplay;
                session.armed_generation = Some(self.timer.restart(ERROR_DISPLAY_SECONDS));
                self.emit(PlaybackEvent::DispatchFailed {
                    session_id: session.id,
                    message: err.message,
                });
            }
        }
    }

    fn report_activation(&self, step: PropertyStep, config: PlaybackConfig) {
        let reporter = Arc::clone(&self.reporter);
        let metadata = ActivationMetadata::property_overview(config.secondary_presentation_enabled);
        tokio::spawn(async move {
            if let Err(err) = reporter.report_activation(&step, metadata).await {
                warn!(canvas_pid = %step.canvas_pid, error = %err, "failed to record table activation");
            }
        });
    }

    /// Advances run on their own task so the driver keeps handling events
    /// for whichever session is current.
    fn on_timer_event(self: &Arc<Self>, event: TimerEvent) {
        let pending = {
            let mut state = self.lock();
            let Some(session) = state.session.as_ref() else {
                return;
            };
            if session.armed_generation != Some(event.generation) {
                return;
            }
            match event.kind {
                TimerEventKind::Tick { .. } => {
                    self.emit(PlaybackEvent::Countdown(self.timer.snapshot()));
                    return;
                }
                TimerEventKind::Completed => self.complete_window(&mut state),
            }
        };
        if let Some(pending) = pending {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.run_dispatch(pending).await;
            });
        }
    }

    /// The armed countdown ran out. Scripts advance after a dwell and wait
    /// for the operator after an error; single actions simply end.
    fn complete_window(&self, state: &mut ControllerState) -> Option<PendingDispatch> {
        let session = state.session.as_mut()?;
        session.armed_generation = None;

        let completion = match &session.program {
            Program::Script(_) if session.window == Window::ErrorDisplay => {
                Completion::AwaitOperator
            }
            Program::Script(script) => match script.steps.get(session.current_index + 1) {
                Some(step) => Completion::Advance(step.clone()),
                None => Completion::End,
            },
            Program::Activate(_) | Program::WebContent(_) | Program::Flatten => Completion::End,
        };

        match completion {
            Completion::AwaitOperator => {
                debug!(session_id = %session.id, "error window elapsed, awaiting operator");
                self.publish(state);
                None
            }
            Completion::Advance(step) => {
                session.current_index += 1;
                session.status = SessionStatus::Dispatching;
                let pending = PendingDispatch {
                    session_id: session.id,
                    config: session.config,
                    job: DispatchJob::Step(step),
                };
                debug!(session_id = %session.id, index = session.current_index, "dwell elapsed, advancing");
                self.publish(state);
                Some(pending)
            }
            Completion::End => {
                self.end_session(state);
                None
            }
        }
    }

    fn end_session(&self, state: &mut ControllerState) {
        if let Some(session) = state.session.take() {
            debug!(session_id = %session.id, "session finished");
            self.publish(state);
            self.emit(PlaybackEvent::Finished {
                session_id: session.id,
            });
        }
    }
}

fn spawn_timer_driver(inner: Weak<Inner>, mut timer_events: mpsc::UnboundedReceiver<TimerEvent>) {
    tokio::spawn(async move {
        while let Some(event) = timer_events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.on_timer_event(event);
        }
    });
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
