use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);
    };
}

id_newtype!(PropertyId);
id_newtype!(ScriptId);
id_newtype!(UsageLogId);

/// Latitude used for the map camera when a property has no coordinates.
pub const DEFAULT_LATITUDE: f64 = 38.905172;
/// Longitude used for the map camera when a property has no coordinates.
pub const DEFAULT_LONGITUDE: f64 = -77.0046697;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub canvas_pid: String,
    pub primary_address: Option<String>,
    pub canvas_submarket: Option<String>,
    pub property_class: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Property {
    /// Copies the catalog fields into a step. The step keeps its own copy, so
    /// later catalog refreshes do not change already authored scripts.
    pub fn to_step(&self) -> PropertyStep {
        PropertyStep {
            canvas_pid: self.canvas_pid.clone(),
            primary_address: self.primary_address.clone(),
            canvas_submarket: self.canvas_submarket.clone(),
            property_class: self.property_class.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyStep {
    pub canvas_pid: String,
    #[serde(default)]
    pub primary_address: Option<String>,
    #[serde(default)]
    pub canvas_submarket: Option<String>,
    #[serde(default)]
    pub property_class: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl PropertyStep {
    pub fn coordinates(&self) -> (f64, f64) {
        (
            self.latitude.unwrap_or(DEFAULT_LATITUDE),
            self.longitude.unwrap_or(DEFAULT_LONGITUDE),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebContentStep {
    pub web_url: String,
}

/// One entry of a script. Order inside a script is the playback order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum Step {
    Property(PropertyStep),
    WebContent(WebContentStep),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepValidationError {
    #[error("property step requires a non-empty canvas_pid")]
    MissingCanvasPid,
    #[error("invalid web content url '{0}', expected e.g. https://example.com")]
    InvalidWebUrl(String),
}

impl Step {
    pub fn validate(&self) -> Result<(), StepValidationError> {
        match self {
            Step::Property(step) => {
                if step.canvas_pid.trim().is_empty() {
                    return Err(StepValidationError::MissingCanvasPid);
                }
                Ok(())
            }
            Step::WebContent(step) => {
                if !is_valid_web_url(&step.web_url) {
                    return Err(StepValidationError::InvalidWebUrl(step.web_url.clone()));
                }
                Ok(())
            }
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Step::Property(step) => {
                let address = step
                    .primary_address
                    .as_deref()
                    .unwrap_or(step.canvas_pid.as_str());
                match (&step.canvas_submarket, &step.property_class) {
                    (Some(submarket), Some(class)) => {
                        format!("{address} ({submarket} - Class {class})")
                    }
                    (Some(submarket), None) => format!("{address} ({submarket})"),
                    (None, Some(class)) => format!("{address} (Class {class})"),
                    (None, None) => address.to_string(),
                }
            }
            Step::WebContent(step) => format!("Web Content: {}", step.web_url),
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Property(_) => StepKind::Property,
            Step::WebContent(_) => StepKind::WebContent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Property,
    WebContent,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Property => "property",
            StepKind::WebContent => "web_content",
        }
    }
}

/// Matches `^https?://.+\..+`: a http(s) scheme followed by something
/// containing a dot with at least one character on each side.
pub fn is_valid_web_url(raw: &str) -> bool {
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"));
    let Some(rest) = rest else {
        return false;
    };
    let rest = rest
        .split(['\n', '\r', '\u{2028}', '\u{2029}'])
        .next()
        .unwrap_or_default();
    rest.char_indices()
        .any(|(idx, c)| c == '.' && idx > 0 && idx + 1 < rest.len())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: ScriptId,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSummary {
    pub id: ScriptId,
    pub name: String,
    pub description: Option<String>,
    pub step_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventType {
    TableActivate,
    AdminRefresh,
}

impl UsageEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            UsageEventType::TableActivate => "table_activate",
            UsageEventType::AdminRefresh => "admin_refresh",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "table_activate" => Some(UsageEventType::TableActivate),
            "admin_refresh" => Some(UsageEventType::AdminRefresh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }
}

/// Runtime toggles shown on the admin page and read by the operator UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub countdown_seconds: u32,
    pub show_html_panel: bool,
    pub show_market_canvas_2: bool,
    pub scripts_enabled: bool,
    pub theme: Theme,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            countdown_seconds: 120,
            show_html_panel: false,
            show_market_canvas_2: false,
            scripts_enabled: false,
            theme: Theme::Light,
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
