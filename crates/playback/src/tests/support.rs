use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use display_rig::command::{PRESET_MEDIA, PRESET_PROPERTY_OVERVIEW};
use display_rig::{
    CommandProfile, DispatchError, DisplayTransport, PresentationError, PresentationTransport,
    RemoteObjectCall,
};
use shared::domain::{PropertyStep, Script, ScriptId, Step, WebContentStep};

use crate::{
    ActivationMetadata, CommandDispatcher, PlaybackConfig, PlaybackController, StaticConfig,
    UsageReporter,
};

#[derive(Default)]
pub struct RecordingRig {
    calls: Mutex<Vec<RemoteObjectCall>>,
    failures: Mutex<VecDeque<Option<DispatchError>>>,
    failing_preset: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingRig {
    /// Queues outcomes for the next calls; `None` means success.
    pub fn script_outcomes(&self, outcomes: Vec<Option<DispatchError>>) {
        self.failures.lock().expect("lock").extend(outcomes);
    }

    pub fn fail_preset(&self, preset: &str) {
        *self.failing_preset.lock().expect("lock") = Some(preset.to_string());
    }

    pub fn delay_responses(&self, delay: Duration) {
        *self.delay.lock().expect("lock") = Some(delay);
    }

    pub fn respond_immediately(&self) {
        *self.delay.lock().expect("lock") = None;
    }

    pub fn calls(&self) -> Vec<RemoteObjectCall> {
        self.calls.lock().expect("lock").clone()
    }

    /// One label per call: `property:<pid>`, `media:<url>` or the preset name.
    pub fn labels(&self) -> Vec<String> {
        self.calls().iter().map(label).collect()
    }
}

pub fn label(call: &RemoteObjectCall) -> String {
    let params = &call.parameters.command.parameters;
    match params.preset_name.as_str() {
        PRESET_PROPERTY_OVERVIEW => {
            let route = params.route_url.clone().unwrap_or_default();
            let pid = route.rsplit('/').nth(2).unwrap_or_default().to_string();
            format!("property:{pid}")
        }
        PRESET_MEDIA => {
            let url = params
                .page_content
                .as_ref()
                .and_then(|content| content.middle.clone())
                .unwrap_or_default();
            format!("media:{url}")
        }
        other => other.to_string(),
    }
}

#[async_trait]
impl DisplayTransport for RecordingRig {
    async fn send_display_command(&self, call: &RemoteObjectCall) -> Result<(), DispatchError> {
        self.calls.lock().expect("lock").push(call.clone());
        let delay = *self.delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self.failing_preset.lock().expect("lock").clone();
        if failing.as_deref() == Some(call.preset_name()) {
            return Err(DispatchError::network("display rig unreachable"));
        }
        let scripted = self.failures.lock().expect("lock").pop_front();
        match scripted.flatten() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct RecordingPresenter {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingPresenter {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PresentationTransport for RecordingPresenter {
    async fn present_property(
        &self,
        canvas_pid: &str,
    ) -> Result<serde_json::Value, PresentationError> {
        self.calls.lock().expect("lock").push(canvas_pid.to_string());
        if self.fail {
            return Err(PresentationError::Status {
                status: 500,
                body: "presentation down".to_string(),
            });
        }
        Ok(serde_json::json!({ "ok": true }))
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    calls: Mutex<Vec<(String, ActivationMetadata)>>,
}

impl RecordingReporter {
    pub fn calls(&self) -> Vec<(String, ActivationMetadata)> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl UsageReporter for RecordingReporter {
    async fn report_activation(
        &self,
        property: &PropertyStep,
        metadata: ActivationMetadata,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("lock")
            .push((property.canvas_pid.clone(), metadata));
        Ok(())
    }
}

pub struct Harness {
    pub controller: PlaybackController,
    pub rig: Arc<RecordingRig>,
    pub presenter: Arc<RecordingPresenter>,
    pub reporter: Arc<RecordingReporter>,
}

pub fn harness(config: PlaybackConfig) -> Harness {
    harness_with(config, RecordingRig::default(), RecordingPresenter::default())
}

pub fn harness_with(
    config: PlaybackConfig,
    rig: RecordingRig,
    presenter: RecordingPresenter,
) -> Harness {
    let rig = Arc::new(rig);
    let presenter = Arc::new(presenter);
    let reporter = Arc::new(RecordingReporter::default());
    let dispatcher = CommandDispatcher::new(
        rig.clone(),
        presenter.clone(),
        CommandProfile::default(),
    );
    let controller = PlaybackController::new(
        dispatcher,
        Arc::new(StaticConfig(config)),
        reporter.clone(),
    );
    Harness {
        controller,
        rig,
        presenter,
        reporter,
    }
}

pub fn dwell(dwell_seconds: u32) -> PlaybackConfig {
    PlaybackConfig {
        dwell_seconds,
        secondary_presentation_enabled: false,
    }
}

pub fn property(pid: &str) -> PropertyStep {
    PropertyStep {
        canvas_pid: pid.to_string(),
        primary_address: Some(format!("{pid} Main St")),
        canvas_submarket: None,
        property_class: None,
        latitude: Some(40.0),
        longitude: Some(-75.0),
    }
}

pub fn property_step(pid: &str) -> Step {
    Step::Property(property(pid))
}

pub fn web_step(url: &str) -> Step {
    Step::WebContent(WebContentStep {
        web_url: url.to_string(),
    })
}

pub fn script(steps: Vec<Step>) -> Script {
    Script {
        id: ScriptId(1),
        name: "Tour".to_string(),
        description: None,
        steps,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Lets detached tasks run without moving the clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
