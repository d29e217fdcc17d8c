use async_trait::async_trait;
use display_rig::command::PRESET_PROPERTY_OVERVIEW;
use shared::domain::PropertyStep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationMetadata {
    pub preset: String,
    pub market_canvas_2_enabled: bool,
}

impl ActivationMetadata {
    pub fn property_overview(market_canvas_2_enabled: bool) -> Self {
        Self {
            preset: PRESET_PROPERTY_OVERVIEW.to_string(),
            market_canvas_2_enabled,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "preset": self.preset,
            "marketCanvas2Enabled": self.market_canvas_2_enabled,
        })
    }
}

/// Records successful table activations. Called from a detached task, so
/// errors only end up in the log.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn report_activation(
        &self,
        property: &PropertyStep,
        metadata: ActivationMetadata,
    ) -> anyhow::Result<()>;
}
