use async_trait::async_trait;
use playback::{ActivationMetadata, UsageReporter};
use shared::domain::{PropertyStep, UsageEventType};
use storage::{NewUsageLog, Storage};

/// Writes successful table activations to the usage log.
pub struct StorageUsageReporter {
    storage: Storage,
}

impl StorageUsageReporter {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl UsageReporter for StorageUsageReporter {
    async fn report_activation(
        &self,
        property: &PropertyStep,
        metadata: ActivationMetadata,
    ) -> anyhow::Result<()> {
        self.storage
            .record_usage(&NewUsageLog {
                event_type: UsageEventType::TableActivate,
                canvas_pid: Some(property.canvas_pid.clone()),
                primary_address: property.primary_address.clone(),
                canvas_submarket: property.canvas_submarket.clone(),
                property_class: property.property_class.clone(),
                metadata: Some(metadata.to_value()),
            })
            .await?;
        Ok(())
    }
}
