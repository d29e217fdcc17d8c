use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{FeatureFlags, PropertyId, ScriptId, Step, Theme, UsageLogId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub countdown_seconds: u32,
    pub show_html_panel: bool,
    #[serde(rename = "showMarketCanvas2")]
    pub show_market_canvas_2: bool,
    pub scripts_enabled: bool,
    pub theme: Theme,
}

impl From<&FeatureFlags> for ConfigResponse {
    fn from(flags: &FeatureFlags) -> Self {
        Self {
            countdown_seconds: flags.countdown_seconds,
            show_html_panel: flags.show_html_panel,
            show_market_canvas_2: flags.show_market_canvas_2,
            scripts_enabled: flags.scripts_enabled,
            theme: flags.theme,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdateRequest {
    #[serde(default)]
    pub show_html_panel: Option<bool>,
    #[serde(default, rename = "showMarketCanvas2")]
    pub show_market_canvas_2: Option<bool>,
    #[serde(default)]
    pub scripts_enabled: Option<bool>,
    #[serde(default)]
    pub theme: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdateResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub config: ConfigResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeLengthResponse {
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub message: String,
    pub records_processed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub submarket: Option<String>,
    #[serde(default)]
    pub property_class: Option<String>,
}

/// Body of script create/update requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogRequest {
    pub event_type: String,
    #[serde(default)]
    pub canvas_pid: Option<String>,
    #[serde(default)]
    pub primary_address: Option<String>,
    #[serde(default)]
    pub canvas_submarket: Option<String>,
    #[serde(default)]
    pub property_class: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogRecord {
    pub id: UsageLogId,
    pub event_type: String,
    pub property_id: Option<PropertyId>,
    pub canvas_pid: Option<String>,
    pub primary_address: Option<String>,
    pub canvas_submarket: Option<String>,
    pub property_class: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogResponse {
    pub success: bool,
    pub log: UsageLogRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentUsageQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_events: i64,
    pub unique_properties_activated: i64,
    pub total_activations: i64,
    pub total_refreshes: i64,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopProperty {
    pub canvas_pid: String,
    pub primary_address: Option<String>,
    pub canvas_submarket: Option<String>,
    pub property_class: Option<String>,
    pub activation_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: String,
    pub total_events: i64,
    pub activations: i64,
    pub refreshes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyActivity {
    pub hour: u32,
    pub event_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub summary: AnalyticsSummary,
    pub events_by_type: Vec<EventTypeCount>,
    pub top_properties: Vec<TopProperty>,
    pub activity_by_day: Vec<DailyActivity>,
    pub activity_by_hour: Vec<HourlyActivity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentRequest {
    #[serde(default)]
    pub property_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentResponse {
    pub success: bool,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebContentRequest {
    pub web_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Dispatching,
    Dwelling,
    Error,
}

/// What the active session is playing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionProgram {
    Script {
        script_id: ScriptId,
        name: String,
        step_count: usize,
    },
    Activate {
        canvas_pid: String,
    },
    Flatten,
    WebContent {
        web_url: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountdownSnapshot {
    pub total_seconds: u32,
    pub remaining_seconds: u32,
    pub running: bool,
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub session_id: Option<Uuid>,
    pub status: SessionStatus,
    pub program: Option<SessionProgram>,
    pub current_index: Option<usize>,
    pub current_step: Option<Step>,
    pub last_error: Option<String>,
    pub countdown: CountdownSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableActionOutcome {
    Dispatched,
    AlreadyActive,
    Busy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableActionResponse {
    pub outcome: TableActionOutcome,
    pub playback: PlaybackSnapshot,
}

/// Pushed to operator screens over the websocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PlaybackEvent {
    SessionUpdated(PlaybackSnapshot),
    Countdown(CountdownSnapshot),
    DispatchFailed {
        session_id: Uuid,
        message: String,
    },
    Finished {
        session_id: Uuid,
    },
}
