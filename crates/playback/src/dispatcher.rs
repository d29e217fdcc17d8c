use std::sync::Arc;
use std::time::Duration;

use display_rig::{
    CommandProfile, DispatchError, DisplayTransport, PresentationTransport, RemoteObjectCall,
};
use shared::domain::{PropertyStep, Step, WebContentStep};
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;

pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Turns steps into rig commands and sends them, one awaited call each.
#[derive(Clone)]
pub struct CommandDispatcher {
    rig: Arc<dyn DisplayTransport>,
    presenter: Arc<dyn PresentationTransport>,
    profile: CommandProfile,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        rig: Arc<dyn DisplayTransport>,
        presenter: Arc<dyn PresentationTransport>,
        profile: CommandProfile,
    ) -> Self {
        Self {
            rig,
            presenter,
            profile,
            timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn dispatch_step(
        &self,
        step: &Step,
        config: &PlaybackConfig,
    ) -> Result<(), DispatchError> {
        match step {
            Step::Property(step) => self.dispatch_property(step, config).await,
            Step::WebContent(step) => self.dispatch_web_content(step).await,
        }
    }

    /// Shows the property's map overview. When the secondary presentation is
    /// enabled, a successful dispatch also mirrors the property there; that
    /// call runs detached and its outcome is only logged.
    pub async fn dispatch_property(
        &self,
        step: &PropertyStep,
        config: &PlaybackConfig,
    ) -> Result<(), DispatchError> {
        let (latitude, longitude) = step.coordinates();
        let call =
            RemoteObjectCall::property_overview(&self.profile, &step.canvas_pid, latitude, longitude);
        self.send(&call).await?;
        info!(canvas_pid = %step.canvas_pid, "property shown on table");

        if config.secondary_presentation_enabled {
            self.mirror_to_presentation(step.canvas_pid.clone());
        }
        Ok(())
    }

    pub async fn dispatch_web_content(&self, step: &WebContentStep) -> Result<(), DispatchError> {
        let call = RemoteObjectCall::media(&self.profile, &step.web_url);
        self.send(&call).await?;
        info!(web_url = %step.web_url, "web content shown on table");
        Ok(())
    }

    pub async fn dispatch_flatten(&self) -> Result<(), DispatchError> {
        let call = RemoteObjectCall::intro(&self.profile);
        self.send(&call).await?;
        info!("table flattened");
        Ok(())
    }

    async fn send(&self, call: &RemoteObjectCall) -> Result<(), DispatchError> {
        debug!(preset = call.preset_name(), "dispatching display command");
        match tokio::time::timeout(self.timeout, self.rig.send_display_command(call)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::timeout(self.timeout.as_secs())),
        }
    }

    fn mirror_to_presentation(&self, canvas_pid: String) {
        let presenter = Arc::clone(&self.presenter);
        tokio::spawn(async move {
            match presenter.present_property(&canvas_pid).await {
                Ok(_) => debug!(canvas_pid = %canvas_pid, "secondary presentation updated"),
                Err(err) => {
                    warn!(canvas_pid = %canvas_pid, error = %err, "secondary presentation failed")
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
