use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use display_rig::{
    CommandProfile, DispatchError, DisplayTransport, PresentationError, PresentationTransport,
    RemoteObjectCall,
};
use playback::{CommandDispatcher, PlaybackController};
use shared::domain::FeatureFlags;
use storage::{NewProperty, Storage};

use crate::{
    ApiContext, FlagStore, PropertyWarehouse, StorageUsageReporter, WarehouseBatch,
    WarehouseError,
};

#[derive(Default)]
pub struct FakeRig {
    presets: Mutex<Vec<String>>,
}

impl FakeRig {
    pub fn presets(&self) -> Vec<String> {
        self.presets.lock().expect("presets").clone()
    }
}

#[async_trait]
impl DisplayTransport for FakeRig {
    async fn send_display_command(&self, call: &RemoteObjectCall) -> Result<(), DispatchError> {
        self.presets
            .lock()
            .expect("presets")
            .push(call.preset_name().to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePresenter {
    pids: Mutex<Vec<String>>,
}

impl FakePresenter {
    pub fn pids(&self) -> Vec<String> {
        self.pids.lock().expect("pids").clone()
    }
}

#[async_trait]
impl PresentationTransport for FakePresenter {
    async fn present_property(
        &self,
        canvas_pid: &str,
    ) -> Result<serde_json::Value, PresentationError> {
        self.pids.lock().expect("pids").push(canvas_pid.to_string());
        Ok(serde_json::json!({ "status": "started", "pid": canvas_pid }))
    }
}

pub enum FakeWarehouse {
    Rows(WarehouseBatch),
    Unavailable,
}

#[async_trait]
impl PropertyWarehouse for FakeWarehouse {
    async fn fetch_properties(&self) -> Result<WarehouseBatch, WarehouseError> {
        match self {
            FakeWarehouse::Rows(batch) => Ok(batch.clone()),
            FakeWarehouse::Unavailable => Err(WarehouseError::Status(503)),
        }
    }
}

pub struct Fixture {
    pub ctx: ApiContext,
    pub rig: Arc<FakeRig>,
    pub presenter: Arc<FakePresenter>,
}

pub fn catalog_row(pid: &str, address: &str) -> NewProperty {
    NewProperty {
        canvas_pid: pid.to_string(),
        primary_address: Some(address.to_string()),
        canvas_submarket: Some("CBD".to_string()),
        property_class: Some("A".to_string()),
        latitude: Some(38.9),
        longitude: Some(-77.0),
    }
}

pub async fn fixture(warehouse: FakeWarehouse) -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let flags = Arc::new(FlagStore::in_memory(FeatureFlags::default()));
    let rig = Arc::new(FakeRig::default());
    let presenter = Arc::new(FakePresenter::default());
    let dispatcher = CommandDispatcher::new(rig.clone(), presenter.clone(), CommandProfile::default());
    let playback = PlaybackController::new(
        dispatcher,
        flags.clone(),
        Arc::new(StorageUsageReporter::new(storage.clone())),
    );
    Fixture {
        ctx: ApiContext {
            storage,
            admin_code: "0710".to_string(),
            flags,
            warehouse: Arc::new(warehouse),
            presenter: presenter.clone(),
            playback,
        },
        rig,
        presenter,
    }
}
