use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, Transaction,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    Property, PropertyId, PropertyStep, Script, ScriptId, ScriptSummary, Step, UsageEventType,
    UsageLogId, WebContentStep,
};
use shared::protocol::{
    AnalyticsReport, AnalyticsSummary, DailyActivity, EventTypeCount, HourlyActivity,
    PropertyFilter, TopProperty, UsageLogRecord,
};

pub const DEFAULT_TOP_PROPERTIES: u32 = 10;
pub const DEFAULT_ACTIVITY_DAYS: u32 = 30;
pub const DEFAULT_RECENT_USAGE: u32 = 50;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Catalog row as delivered by the warehouse refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProperty {
    pub canvas_pid: String,
    pub primary_address: Option<String>,
    pub canvas_submarket: Option<String>,
    pub property_class: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUsageLog {
    pub event_type: UsageEventType,
    pub canvas_pid: Option<String>,
    pub primary_address: Option<String>,
    pub canvas_submarket: Option<String>,
    pub property_class: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewUsageLog {
    pub fn event(event_type: UsageEventType, metadata: serde_json::Value) -> Self {
        Self {
            event_type,
            canvas_pid: None,
            primary_address: None,
            canvas_submarket: None,
            property_class: None,
            metadata: Some(metadata),
        }
    }
}

/// Inclusive calendar-day bounds for analytics queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    fn bounds(&self) -> (Option<String>, Option<String>) {
        let format = |date: NaiveDate| date.format("%Y-%m-%d").to_string();
        (self.start.map(format), self.end.map(format))
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = if database_url == "sqlite::memory:" {
            // Every connection to `sqlite::memory:` opens its own database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect_with(connect_options)
        .await
        .with_context(|| format!("failed to open database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Replaces the whole catalog in one transaction. Duplicate pids keep the
    /// last row seen.
    pub async fn replace_properties(&self, rows: &[NewProperty]) -> Result<usize> {
        let refreshed_at = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM properties")
            .execute(&mut *tx)
            .await
            .context("failed to clear properties")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO properties (canvas_pid, primary_address, canvas_submarket, property_class, latitude, longitude, refreshed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(canvas_pid) DO UPDATE SET
                    primary_address=excluded.primary_address,
                    canvas_submarket=excluded.canvas_submarket,
                    property_class=excluded.property_class,
                    latitude=excluded.latitude,
                    longitude=excluded.longitude,
                    refreshed_at=excluded.refreshed_at",
            )
            .bind(&row.canvas_pid)
            .bind(&row.primary_address)
            .bind(&row.canvas_submarket)
            .bind(&row.property_class)
            .bind(row.latitude)
            .bind(row.longitude)
            .bind(&refreshed_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert property '{}'", row.canvas_pid))?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    pub async fn list_properties(&self, filter: &PropertyFilter) -> Result<Vec<Property>> {
        let search = non_blank(filter.search.as_deref()).map(|s| s.to_lowercase());
        let submarket = non_blank(filter.submarket.as_deref());
        let class = non_blank(filter.property_class.as_deref());
        let rows = sqlx::query(
            "SELECT id, canvas_pid, primary_address, canvas_submarket, property_class, latitude, longitude
             FROM properties
             WHERE (?1 IS NULL OR instr(lower(primary_address), ?1) > 0)
               AND (?2 IS NULL OR canvas_submarket = ?2)
               AND (?3 IS NULL OR property_class = ?3)
             ORDER BY primary_address",
        )
        .bind(search)
        .bind(submarket)
        .bind(class)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(property_from_row).collect())
    }

    pub async fn find_property_by_pid(&self, canvas_pid: &str) -> Result<Option<Property>> {
        let row = sqlx::query(
            "SELECT id, canvas_pid, primary_address, canvas_submarket, property_class, latitude, longitude
             FROM properties WHERE canvas_pid = ?",
        )
        .bind(canvas_pid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(property_from_row))
    }

    pub async fn list_submarkets(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT canvas_submarket FROM properties
             WHERE canvas_submarket IS NOT NULL ORDER BY canvas_submarket",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    pub async fn list_property_classes(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT property_class FROM properties
             WHERE property_class IS NOT NULL ORDER BY property_class",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    pub async fn list_scripts(&self) -> Result<Vec<ScriptSummary>> {
        let rows = sqlx::query(
            "SELECT s.id, s.name, s.description, s.created_at, s.updated_at, COUNT(ss.id)
             FROM scripts s
             LEFT JOIN script_steps ss ON ss.script_id = s.id
             GROUP BY s.id
             ORDER BY s.updated_at DESC, s.id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(ScriptSummary {
                    id: ScriptId(r.get::<i64, _>(0)),
                    name: r.get::<String, _>(1),
                    description: r.get::<Option<String>, _>(2),
                    created_at: parse_timestamp(&r.get::<String, _>(3))?,
                    updated_at: parse_timestamp(&r.get::<String, _>(4))?,
                    step_count: r.get::<i64, _>(5),
                })
            })
            .collect()
    }

    pub async fn get_script(&self, script_id: ScriptId) -> Result<Option<Script>> {
        let Some(row) =
            sqlx::query("SELECT id, name, description, created_at, updated_at FROM scripts WHERE id = ?")
                .bind(script_id.0)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let steps = sqlx::query(
            "SELECT step_type, canvas_pid, primary_address, canvas_submarket, property_class, latitude, longitude, web_url
             FROM script_steps
             WHERE script_id = ?
             ORDER BY step_order ASC",
        )
        .bind(script_id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(step_from_row)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("script {} has an unreadable step", script_id.0))?;

        Ok(Some(Script {
            id: ScriptId(row.get::<i64, _>(0)),
            name: row.get::<String, _>(1),
            description: row.get::<Option<String>, _>(2),
            steps,
            created_at: parse_timestamp(&row.get::<String, _>(3))?,
            updated_at: parse_timestamp(&row.get::<String, _>(4))?,
        }))
    }

    pub async fn create_script(
        &self,
        name: &str,
        description: Option<&str>,
        steps: &[Step],
    ) -> Result<Script> {
        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        let rec = sqlx::query(
            "INSERT INTO scripts (name, description, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(description)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;
        let script_id = ScriptId(rec.get::<i64, _>(0));
        insert_steps(&mut tx, script_id, steps).await?;
        tx.commit().await?;

        self.get_script(script_id)
            .await?
            .with_context(|| format!("script {} vanished after insert", script_id.0))
    }

    /// Replaces name, description and every step. Returns `None` when the
    /// script does not exist.
    pub async fn update_script(
        &self,
        script_id: ScriptId,
        name: &str,
        description: Option<&str>,
        steps: &[Step],
    ) -> Result<Option<Script>> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE scripts SET name = ?, description = ?, updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(timestamp(Utc::now()))
        .bind(script_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(None);
        }

        sqlx::query("DELETE FROM script_steps WHERE script_id = ?")
            .bind(script_id.0)
            .execute(&mut *tx)
            .await?;
        insert_steps(&mut tx, script_id, steps).await?;
        tx.commit().await?;

        self.get_script(script_id).await
    }

    pub async fn delete_script(&self, script_id: ScriptId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM script_steps WHERE script_id = ?")
            .bind(script_id.0)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM scripts WHERE id = ?")
            .bind(script_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    pub async fn record_usage(&self, entry: &NewUsageLog) -> Result<UsageLogRecord> {
        self.record_usage_at(entry, Utc::now()).await
    }

    pub async fn record_usage_at(
        &self,
        entry: &NewUsageLog,
        at: DateTime<Utc>,
    ) -> Result<UsageLogRecord> {
        let property_id = match entry.canvas_pid.as_deref() {
            Some(pid) => sqlx::query("SELECT id FROM properties WHERE canvas_pid = ?")
                .bind(pid)
                .fetch_optional(&self.pool)
                .await?
                .map(|r| r.get::<i64, _>(0)),
            None => None,
        };
        let metadata = entry
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to encode usage metadata")?;

        let row = sqlx::query(
            "INSERT INTO usage_logs (event_type, property_id, canvas_pid, primary_address, canvas_submarket, property_class, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, event_type, property_id, canvas_pid, primary_address, canvas_submarket, property_class, metadata, created_at",
        )
        .bind(entry.event_type.as_str())
        .bind(property_id)
        .bind(&entry.canvas_pid)
        .bind(&entry.primary_address)
        .bind(&entry.canvas_submarket)
        .bind(&entry.property_class)
        .bind(metadata)
        .bind(timestamp(at))
        .fetch_one(&self.pool)
        .await
        .context("failed to insert usage log")?;
        usage_from_row(&row)
    }

    pub async fn recent_usage(&self, limit: u32) -> Result<Vec<UsageLogRecord>> {
        let rows = sqlx::query(
            "SELECT id, event_type, property_id, canvas_pid, primary_address, canvas_submarket, property_class, metadata, created_at
             FROM usage_logs
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(usage_from_row).collect()
    }

    /// `limit` caps both the top-property and the per-day lists; each falls
    /// back to its own default when absent.
    pub async fn usage_analytics(
        &self,
        range: DateRange,
        limit: Option<u32>,
    ) -> Result<AnalyticsReport> {
        let (start, end) = range.bounds();
        const RANGE: &str = "(?1 IS NULL OR date(created_at) >= ?1) AND (?2 IS NULL OR date(created_at) <= ?2)";

        let summary_row = sqlx::query(&format!(
            "SELECT COUNT(*),
                    COUNT(DISTINCT canvas_pid),
                    COALESCE(SUM(CASE WHEN event_type = 'table_activate' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN event_type = 'admin_refresh' THEN 1 ELSE 0 END), 0),
                    MIN(created_at),
                    MAX(created_at)
             FROM usage_logs WHERE {RANGE}"
        ))
        .bind(&start)
        .bind(&end)
        .fetch_one(&self.pool)
        .await
        .context("failed to load usage summary")?;
        let summary = AnalyticsSummary {
            total_events: summary_row.get::<i64, _>(0),
            unique_properties_activated: summary_row.get::<i64, _>(1),
            total_activations: summary_row.get::<i64, _>(2),
            total_refreshes: summary_row.get::<i64, _>(3),
            first_event: summary_row
                .get::<Option<String>, _>(4)
                .map(|raw| parse_timestamp(&raw))
                .transpose()?,
            last_event: summary_row
                .get::<Option<String>, _>(5)
                .map(|raw| parse_timestamp(&raw))
                .transpose()?,
        };

        let events_by_type = sqlx::query(&format!(
            "SELECT event_type, COUNT(*) AS count FROM usage_logs WHERE {RANGE}
             GROUP BY event_type ORDER BY count DESC, event_type"
        ))
        .bind(&start)
        .bind(&end)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| EventTypeCount {
            event_type: r.get::<String, _>(0),
            count: r.get::<i64, _>(1),
        })
        .collect();

        let top_properties = sqlx::query(&format!(
            "SELECT canvas_pid, primary_address, canvas_submarket, property_class, COUNT(*) AS activation_count
             FROM usage_logs
             WHERE event_type = 'table_activate' AND canvas_pid IS NOT NULL AND {RANGE}
             GROUP BY canvas_pid, primary_address, canvas_submarket, property_class
             ORDER BY activation_count DESC, canvas_pid
             LIMIT ?3"
        ))
        .bind(&start)
        .bind(&end)
        .bind(limit.unwrap_or(DEFAULT_TOP_PROPERTIES))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| TopProperty {
            canvas_pid: r.get::<String, _>(0),
            primary_address: r.get::<Option<String>, _>(1),
            canvas_submarket: r.get::<Option<String>, _>(2),
            property_class: r.get::<Option<String>, _>(3),
            activation_count: r.get::<i64, _>(4),
        })
        .collect();

        let activity_by_day = sqlx::query(&format!(
            "SELECT date(created_at) AS day,
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN event_type = 'table_activate' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN event_type = 'admin_refresh' THEN 1 ELSE 0 END), 0)
             FROM usage_logs WHERE {RANGE}
             GROUP BY day ORDER BY day DESC
             LIMIT ?3"
        ))
        .bind(&start)
        .bind(&end)
        .bind(limit.unwrap_or(DEFAULT_ACTIVITY_DAYS))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| DailyActivity {
            date: r.get::<String, _>(0),
            total_events: r.get::<i64, _>(1),
            activations: r.get::<i64, _>(2),
            refreshes: r.get::<i64, _>(3),
        })
        .collect();

        let activity_by_hour = sqlx::query(&format!(
            "SELECT CAST(strftime('%H', created_at) AS INTEGER) AS hour, COUNT(*)
             FROM usage_logs WHERE {RANGE}
             GROUP BY hour ORDER BY hour"
        ))
        .bind(&start)
        .bind(&end)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| HourlyActivity {
            hour: r.get::<i64, _>(0).clamp(0, 23) as u32,
            event_count: r.get::<i64, _>(1),
        })
        .collect();

        Ok(AnalyticsReport {
            summary,
            events_by_type,
            top_properties,
            activity_by_day,
            activity_by_hour,
        })
    }
}

async fn insert_steps(
    tx: &mut Transaction<'_, Sqlite>,
    script_id: ScriptId,
    steps: &[Step],
) -> Result<()> {
    for (order, step) in steps.iter().enumerate() {
        let query = sqlx::query(
            "INSERT INTO script_steps
                (script_id, step_order, step_type, property_id, canvas_pid, primary_address, canvas_submarket, property_class, latitude, longitude, web_url)
             VALUES (?, ?, ?, (SELECT id FROM properties WHERE canvas_pid = ?), ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(script_id.0)
        .bind(order as i64)
        .bind(step.kind().as_str());
        let query = match step {
            Step::Property(p) => query
                .bind(&p.canvas_pid)
                .bind(&p.canvas_pid)
                .bind(&p.primary_address)
                .bind(&p.canvas_submarket)
                .bind(&p.property_class)
                .bind(p.latitude)
                .bind(p.longitude)
                .bind(None::<String>),
            Step::WebContent(w) => query
                .bind(None::<String>)
                .bind(None::<String>)
                .bind(None::<String>)
                .bind(None::<String>)
                .bind(None::<String>)
                .bind(None::<f64>)
                .bind(None::<f64>)
                .bind(&w.web_url),
        };
        query
            .execute(&mut **tx)
            .await
            .with_context(|| format!("failed to insert step {order} of script {}", script_id.0))?;
    }
    Ok(())
}

fn property_from_row(r: &SqliteRow) -> Property {
    Property {
        id: PropertyId(r.get::<i64, _>(0)),
        canvas_pid: r.get::<String, _>(1),
        primary_address: r.get::<Option<String>, _>(2),
        canvas_submarket: r.get::<Option<String>, _>(3),
        property_class: r.get::<Option<String>, _>(4),
        latitude: r.get::<Option<f64>, _>(5),
        longitude: r.get::<Option<f64>, _>(6),
    }
}

fn step_from_row(r: &SqliteRow) -> Result<Step> {
    let step_type = r.get::<String, _>(0);
    match step_type.as_str() {
        "property" => Ok(Step::Property(PropertyStep {
            canvas_pid: r.get::<Option<String>, _>(1).unwrap_or_default(),
            primary_address: r.get::<Option<String>, _>(2),
            canvas_submarket: r.get::<Option<String>, _>(3),
            property_class: r.get::<Option<String>, _>(4),
            latitude: r.get::<Option<f64>, _>(5),
            longitude: r.get::<Option<f64>, _>(6),
        })),
        "web_content" => Ok(Step::WebContent(WebContentStep {
            web_url: r.get::<Option<String>, _>(7).unwrap_or_default(),
        })),
        other => anyhow::bail!("unknown step type '{other}'"),
    }
}

fn usage_from_row(r: &SqliteRow) -> Result<UsageLogRecord> {
    Ok(UsageLogRecord {
        id: UsageLogId(r.get::<i64, _>(0)),
        event_type: r.get::<String, _>(1),
        property_id: r.get::<Option<i64>, _>(2).map(PropertyId),
        canvas_pid: r.get::<Option<String>, _>(3),
        primary_address: r.get::<Option<String>, _>(4),
        canvas_submarket: r.get::<Option<String>, _>(5),
        property_class: r.get::<Option<String>, _>(6),
        metadata: r
            .get::<Option<String>, _>(7)
            .and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: parse_timestamp(&r.get::<String, _>(8))?,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Fixed-width UTC text so that string order matches time order and SQLite
/// date functions can read it.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid stored timestamp '{raw}'"))?
        .with_timezone(&Utc))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
