//! Property catalog source backed by the CARTO SQL API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use storage::NewProperty;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_CARTO_QUERY_URL: &str =
    "https://gcp-us-east1.api.carto.com/v3/sql/us_svc_canvas_carto/query";

/// Office properties of the served region, one pid per address.
pub const PROPERTY_QUERY: &str = "select
    distinct
        canvas_pid,
        primary_address,
        canvas_submarket,
        property_class,
        latitude,
        longitude
from
    PROD_CANVAS_DB.DATA.CANVAS_PROPERTIES
where
    canvas_pid in (
        select
            min(canvas_pid)
        from
            PROD_CANVAS_DB.DATA.CANVAS_PROPERTIES
        where
            canvas_region_id = 8491580179800618632
            and property_type = 'Office'
        group by primary_address
    )
    and property_class is not null
order by primary_address asc";

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("CARTO_API_TOKEN is not configured")]
    NotConfigured,
    #[error("warehouse request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("warehouse returned status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarehouseBatch {
    /// Rows in the upstream reply, including skipped ones.
    pub rows_received: usize,
    pub properties: Vec<NewProperty>,
}

#[async_trait]
pub trait PropertyWarehouse: Send + Sync {
    async fn fetch_properties(&self) -> Result<WarehouseBatch, WarehouseError>;
}

pub struct CartoWarehouse {
    client: reqwest::Client,
    query_url: Url,
    token: Option<String>,
}

impl CartoWarehouse {
    pub fn new(
        query_url: Url,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, WarehouseError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            query_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }
}

#[derive(Deserialize)]
struct QueryReply {
    #[serde(default)]
    rows: Vec<Map<String, Value>>,
}

#[async_trait]
impl PropertyWarehouse for CartoWarehouse {
    async fn fetch_properties(&self) -> Result<WarehouseBatch, WarehouseError> {
        let token = self.token.as_deref().ok_or(WarehouseError::NotConfigured)?;
        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("q", PROPERTY_QUERY)])
            .bearer_auth(token)
            .header(reqwest::header::CACHE_CONTROL, "max-age=300")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WarehouseError::Status(status.as_u16()));
        }
        let reply: QueryReply = response.json().await?;
        debug!(rows = reply.rows.len(), "warehouse rows received");
        Ok(parse_rows(reply.rows))
    }
}

/// Column names arrive upper-cased. Rows without a pid are dropped.
pub fn parse_rows(rows: Vec<Map<String, Value>>) -> WarehouseBatch {
    let rows_received = rows.len();
    let properties = rows
        .iter()
        .filter_map(|row| {
            let Some(canvas_pid) = column(row, "CANVAS_PID").and_then(pid_text) else {
                warn!(row = %serde_json::Value::Object(row.clone()), "skipping warehouse row without CANVAS_PID");
                return None;
            };
            Some(NewProperty {
                canvas_pid,
                primary_address: column(row, "PRIMARY_ADDRESS").and_then(text),
                canvas_submarket: column(row, "CANVAS_SUBMARKET").and_then(text),
                property_class: column(row, "PROPERTY_CLASS").and_then(text),
                latitude: column(row, "LATITUDE").and_then(number),
                longitude: column(row, "LONGITUDE").and_then(number),
            })
        })
        .collect();
    WarehouseBatch {
        rows_received,
        properties,
    }
}

fn column<'a>(row: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    row.get(name).or_else(|| row.get(&name.to_ascii_lowercase()))
}

/// Pids are large integers; keep their exact digits.
fn pid_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/warehouse_tests.rs"]
mod tests;
