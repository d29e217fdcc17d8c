use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use display_rig::{
    command::{DEFAULT_CANVAS_SITE, DEFAULT_OBJECT_PATH},
    http::{DEFAULT_PRESENTATION_URL, DEFAULT_RIG_URL},
};
use server_api::{flags, warehouse::DEFAULT_CARTO_QUERY_URL, DEFAULT_ADMIN_CODE};
use shared::domain::{FeatureFlags, Theme};
use tracing::warn;

const SETTINGS_FILE: &str = "server.toml";

/// Keys accepted from `server.toml` (lower case) and the environment (upper
/// case, optionally prefixed with `APP__`).
const KEYS: &[&str] = &[
    "BIND_ADDR",
    "DATABASE_URL",
    "ADMIN_CODE",
    flags::COUNTDOWN_SECONDS,
    flags::SHOW_HTML_PANEL,
    flags::SHOW_MARKET_CANVAS_2,
    flags::SCRIPTS_ENABLED,
    flags::DEFAULT_THEME,
    "FLAGS_FILE",
    "DISPLAY_RIG_URL",
    "DISPLAY_RIG_OBJECT_PATH",
    "MARKET_CANVAS_URL",
    "MARKET_CANVAS_SITE",
    "MARKET_CANVAS_COOKIE",
    "CARTO_API_TOKEN",
    "CARTO_QUERY_URL",
    "DISPATCH_TIMEOUT_SECONDS",
];

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub admin_code: String,
    pub flags: FeatureFlags,
    pub flags_file: PathBuf,
    pub display_rig_url: String,
    pub display_object_path: String,
    pub market_canvas_url: String,
    pub market_canvas_site: String,
    pub market_canvas_cookie: Option<String>,
    pub carto_api_token: Option<String>,
    pub carto_query_url: String,
    pub dispatch_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            database_url: "sqlite://./data/kiosk.db".into(),
            admin_code: DEFAULT_ADMIN_CODE.into(),
            flags: FeatureFlags::default(),
            flags_file: PathBuf::from(".env"),
            display_rig_url: DEFAULT_RIG_URL.into(),
            display_object_path: DEFAULT_OBJECT_PATH.into(),
            market_canvas_url: DEFAULT_PRESENTATION_URL.into(),
            market_canvas_site: DEFAULT_CANVAS_SITE.into(),
            market_canvas_cookie: None,
            carto_api_token: None,
            carto_query_url: DEFAULT_CARTO_QUERY_URL.into(),
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the flat `server.toml` table, then the environment.
pub fn settings_from(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<HashMap<String, String>>(raw) {
            Ok(file_cfg) => {
                for (key, value) in file_cfg {
                    settings.apply(&key.to_ascii_uppercase(), value);
                }
            }
            Err(error) => warn!(%error, "ignoring unreadable {SETTINGS_FILE}"),
        }
    }

    if let Some(port) = env("PORT") {
        settings.bind_addr = format!("0.0.0.0:{}", port.trim());
    }
    for key in KEYS {
        if let Some(value) = env(key) {
            settings.apply(key, value);
        }
        if let Some(value) = env(&format!("APP__{key}")) {
            settings.apply(key, value);
        }
    }

    settings
}

impl Settings {
    fn apply(&mut self, key: &str, value: String) {
        match key {
            "BIND_ADDR" => self.bind_addr = value,
            "DATABASE_URL" => self.database_url = value,
            "ADMIN_CODE" => self.admin_code = value,
            flags::COUNTDOWN_SECONDS => match value.trim().parse() {
                Ok(seconds) => self.flags.countdown_seconds = seconds,
                Err(_) => warn!(%value, "ignoring invalid {key}"),
            },
            flags::SHOW_HTML_PANEL => self.flags.show_html_panel = flags::parse_env_bool(&value),
            flags::SHOW_MARKET_CANVAS_2 => {
                self.flags.show_market_canvas_2 = flags::parse_env_bool(&value)
            }
            flags::SCRIPTS_ENABLED => self.flags.scripts_enabled = flags::parse_env_bool(&value),
            flags::DEFAULT_THEME => match Theme::parse(value.trim()) {
                Some(theme) => self.flags.theme = theme,
                None => warn!(%value, "ignoring invalid {key}"),
            },
            "FLAGS_FILE" => self.flags_file = PathBuf::from(value),
            "DISPLAY_RIG_URL" => self.display_rig_url = value,
            "DISPLAY_RIG_OBJECT_PATH" => self.display_object_path = value,
            "MARKET_CANVAS_URL" => self.market_canvas_url = value,
            "MARKET_CANVAS_SITE" => self.market_canvas_site = value,
            "MARKET_CANVAS_COOKIE" => self.market_canvas_cookie = non_empty(value),
            "CARTO_API_TOKEN" => self.carto_api_token = non_empty(value),
            "CARTO_QUERY_URL" => self.carto_query_url = value,
            "DISPATCH_TIMEOUT_SECONDS" => match value.trim().parse::<u64>() {
                Ok(seconds) if seconds > 0 => self.dispatch_timeout = Duration::from_secs(seconds),
                _ => warn!(%value, "ignoring invalid {key}"),
            },
            _ => warn!(key, "ignoring unknown setting"),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.trim().is_empty())
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
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
#[path = "tests/config_tests.rs"]
mod tests;
