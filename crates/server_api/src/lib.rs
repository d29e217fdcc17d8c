use std::sync::Arc;

use chrono::NaiveDate;
use display_rig::{PresentationError, PresentationTransport};
use playback::{PlaybackController, PlaybackError};
use shared::{
    domain::{Property, PropertyStep, Script, ScriptId, ScriptSummary, UsageEventType},
    error::{ApiError, ErrorCode},
    protocol::{
        AnalyticsQuery, AnalyticsReport, AuthenticateRequest, AuthenticateResponse,
        CodeLengthResponse, ConfigResponse, ConfigUpdateRequest, ConfigUpdateResponse,
        DeleteResponse, HealthResponse, PlaybackSnapshot, PresentRequest, PresentResponse,
        PropertyFilter, RecentUsageQuery, RefreshResponse, ScriptDraft, TableActionResponse,
        UsageLogRecord, UsageLogRequest, UsageLogResponse, WebContentRequest,
    },
};
use storage::{DateRange, NewUsageLog, Storage, DEFAULT_RECENT_USAGE};
use tracing::{error, info, warn};

pub mod flags;
pub mod reporter;
pub mod warehouse;

pub use flags::{FlagStore, FlagStoreError};
pub use reporter::StorageUsageReporter;
pub use warehouse::{CartoWarehouse, PropertyWarehouse, WarehouseBatch, WarehouseError};

pub const DEFAULT_ADMIN_CODE: &str = "0710";

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub admin_code: String,
    pub flags: Arc<FlagStore>,
    pub warehouse: Arc<dyn PropertyWarehouse>,
    pub presenter: Arc<dyn PresentationTransport>,
    pub playback: PlaybackController,
}

pub fn health() -> HealthResponse {
    HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    }
}

pub fn current_config(ctx: &ApiContext) -> ConfigResponse {
    ConfigResponse::from(&ctx.flags.flags())
}

pub fn authenticate(
    ctx: &ApiContext,
    request: &AuthenticateRequest,
) -> Result<AuthenticateResponse, ApiError> {
    if request.code != ctx.admin_code {
        warn!("admin authentication rejected");
        return Err(ApiError::new(ErrorCode::Unauthorized, "Invalid code"));
    }
    Ok(AuthenticateResponse {
        success: true,
        message: "Authentication successful".to_string(),
    })
}

pub fn admin_code_length(ctx: &ApiContext) -> CodeLengthResponse {
    CodeLengthResponse {
        length: ctx.admin_code.chars().count(),
    }
}

pub async fn update_config(
    ctx: &ApiContext,
    request: &ConfigUpdateRequest,
) -> Result<ConfigUpdateResponse, ApiError> {
    let flags = ctx.flags.update(request).await.map_err(|err| match err {
        FlagStoreError::NoValidUpdates | FlagStoreError::InvalidTheme(_) => {
            ApiError::validation(err.to_string())
        }
        FlagStoreError::Persist { .. } => {
            error!(error = %err, "failed to save configuration");
            ApiError::new(ErrorCode::Internal, err.to_string())
        }
    })?;
    let message = match ctx.flags.env_file() {
        Some(path) => format!("Configuration updated and saved to {}", path.display()),
        None => "Configuration updated".to_string(),
    };
    Ok(ConfigUpdateResponse {
        success: true,
        message,
        config: ConfigResponse::from(&flags),
    })
}

/// Pulls the catalog from the warehouse and replaces every stored property.
pub async fn refresh_properties(ctx: &ApiContext) -> Result<RefreshResponse, ApiError> {
    info!("starting property refresh");
    let batch = ctx.warehouse.fetch_properties().await.map_err(|err| {
        error!(error = %err, "property refresh failed");
        ApiError::new(ErrorCode::Upstream, format!("Failed to refresh data: {err}"))
    })?;
    let inserted = ctx
        .storage
        .replace_properties(&batch.properties)
        .await
        .map_err(internal)?;
    info!(
        received = batch.rows_received,
        inserted, "property catalog replaced"
    );

    ctx.storage
        .record_usage(&NewUsageLog::event(
            UsageEventType::AdminRefresh,
            serde_json::json!({ "recordsProcessed": batch.rows_received }),
        ))
        .await
        .map_err(internal)?;

    Ok(RefreshResponse {
        success: true,
        message: "Data refreshed successfully".to_string(),
        records_processed: batch.rows_received,
    })
}

pub async fn list_properties(
    ctx: &ApiContext,
    filter: &PropertyFilter,
) -> Result<Vec<Property>, ApiError> {
    ctx.storage.list_properties(filter).await.map_err(internal)
}

pub async fn list_submarkets(ctx: &ApiContext) -> Result<Vec<String>, ApiError> {
    ctx.storage.list_submarkets().await.map_err(internal)
}

pub async fn list_property_classes(ctx: &ApiContext) -> Result<Vec<String>, ApiError> {
    ctx.storage.list_property_classes().await.map_err(internal)
}

pub async fn list_scripts(ctx: &ApiContext) -> Result<Vec<ScriptSummary>, ApiError> {
    ctx.storage.list_scripts().await.map_err(internal)
}

pub async fn get_script(ctx: &ApiContext, script_id: ScriptId) -> Result<Script, ApiError> {
    ctx.storage
        .get_script(script_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| script_not_found(script_id))
}

pub async fn create_script(ctx: &ApiContext, draft: &ScriptDraft) -> Result<Script, ApiError> {
    let (name, description) = validate_draft(draft)?;
    let script = ctx
        .storage
        .create_script(name, description, &draft.steps)
        .await
        .map_err(internal)?;
    info!(script_id = script.id.0, steps = script.steps.len(), "script created");
    Ok(script)
}

pub async fn update_script(
    ctx: &ApiContext,
    script_id: ScriptId,
    draft: &ScriptDraft,
) -> Result<Script, ApiError> {
    let (name, description) = validate_draft(draft)?;
    let script = ctx
        .storage
        .update_script(script_id, name, description, &draft.steps)
        .await
        .map_err(internal)?
        .ok_or_else(|| script_not_found(script_id))?;
    info!(script_id = script.id.0, steps = script.steps.len(), "script updated");
    Ok(script)
}

pub async fn delete_script(
    ctx: &ApiContext,
    script_id: ScriptId,
) -> Result<DeleteResponse, ApiError> {
    if !ctx
        .storage
        .delete_script(script_id)
        .await
        .map_err(internal)?
    {
        return Err(script_not_found(script_id));
    }
    info!(script_id = script_id.0, "script deleted");
    Ok(DeleteResponse {
        success: true,
        message: "Script deleted successfully".to_string(),
    })
}

pub async fn log_usage(
    ctx: &ApiContext,
    request: &UsageLogRequest,
) -> Result<UsageLogResponse, ApiError> {
    let event_type = UsageEventType::parse(&request.event_type).ok_or_else(|| {
        ApiError::validation("Invalid event_type. Must be table_activate or admin_refresh")
    })?;
    let log = ctx
        .storage
        .record_usage(&NewUsageLog {
            event_type,
            canvas_pid: request.canvas_pid.clone(),
            primary_address: request.primary_address.clone(),
            canvas_submarket: request.canvas_submarket.clone(),
            property_class: request.property_class.clone(),
            metadata: request.metadata.clone(),
        })
        .await
        .map_err(internal)?;
    Ok(UsageLogResponse { success: true, log })
}

pub async fn usage_analytics(
    ctx: &ApiContext,
    query: &AnalyticsQuery,
) -> Result<AnalyticsReport, ApiError> {
    let range = DateRange {
        start: parse_date("start_date", query.start_date.as_deref())?,
        end: parse_date("end_date", query.end_date.as_deref())?,
    };
    ctx.storage
        .usage_analytics(range, query.limit)
        .await
        .map_err(internal)
}

pub async fn recent_usage(
    ctx: &ApiContext,
    query: &RecentUsageQuery,
) -> Result<Vec<UsageLogRecord>, ApiError> {
    ctx.storage
        .recent_usage(query.limit.unwrap_or(DEFAULT_RECENT_USAGE))
        .await
        .map_err(internal)
}

/// Direct trigger of the secondary presentation, independent of playback.
pub async fn present_property(
    ctx: &ApiContext,
    request: &PresentRequest,
) -> Result<PresentResponse, ApiError> {
    let property_id = request
        .property_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::validation("propertyId is required"))?;

    info!(property_id, "triggering secondary presentation");
    let data = ctx
        .presenter
        .present_property(property_id)
        .await
        .map_err(|err| {
            error!(property_id, error = %err, "secondary presentation failed");
            match err {
                PresentationError::NotConfigured => {
                    ApiError::new(ErrorCode::Internal, err.to_string())
                }
                _ => ApiError::new(
                    ErrorCode::Upstream,
                    format!("Failed to trigger Market Canvas 2.0 presentation: {err}"),
                ),
            }
        })?;
    Ok(PresentResponse {
        success: true,
        message: "Market Canvas 2.0 presentation started".to_string(),
        data,
    })
}

pub fn playback_snapshot(ctx: &ApiContext) -> PlaybackSnapshot {
    ctx.playback.snapshot()
}

pub async fn play_script(
    ctx: &ApiContext,
    script_id: ScriptId,
) -> Result<PlaybackSnapshot, ApiError> {
    let script = get_script(ctx, script_id).await?;
    ctx.playback.play(script).await.map_err(playback_error)
}

pub async fn next_step(ctx: &ApiContext) -> PlaybackSnapshot {
    ctx.playback.next().await
}

pub async fn previous_step(ctx: &ApiContext) -> PlaybackSnapshot {
    ctx.playback.previous().await
}

pub fn stop_playback(ctx: &ApiContext) -> PlaybackSnapshot {
    ctx.playback.stop()
}

pub async fn activate_table(
    ctx: &ApiContext,
    step: PropertyStep,
) -> Result<TableActionResponse, ApiError> {
    ctx.playback
        .activate_table(step)
        .await
        .map_err(playback_error)
}

pub async fn flatten_table(ctx: &ApiContext) -> TableActionResponse {
    ctx.playback.flatten_table().await
}

pub async fn display_web_content(
    ctx: &ApiContext,
    request: &WebContentRequest,
) -> Result<TableActionResponse, ApiError> {
    ctx.playback
        .display_web_content(&request.web_url)
        .await
        .map_err(playback_error)
}

fn validate_draft(draft: &ScriptDraft) -> Result<(&str, Option<&str>), ApiError> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Script name is required"));
    }
    if draft.steps.is_empty() {
        return Err(ApiError::validation("At least one step is required"));
    }
    for (index, step) in draft.steps.iter().enumerate() {
        step.validate()
            .map_err(|err| ApiError::validation(format!("step {}: {err}", index + 1)))?;
    }
    let description = draft
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    Ok((name, description))
}

fn parse_date(field: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::validation(format!("{field} must be YYYY-MM-DD, got '{raw}'"))),
        None => Ok(None),
    }
}

fn script_not_found(script_id: ScriptId) -> ApiError {
    ApiError::not_found(format!("Script {} not found", script_id.0))
}

fn playback_error(err: PlaybackError) -> ApiError {
    match err {
        PlaybackError::InvalidArgument(message) => ApiError::validation(message),
        PlaybackError::Busy => ApiError::new(ErrorCode::Conflict, err.to_string()),
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "request failed");
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
