//! Runtime feature flags with write-through to a flat `KEY=value` file.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use playback::{ConfigSource, PlaybackConfig};
use shared::domain::{FeatureFlags, Theme};
use shared::protocol::ConfigUpdateRequest;
use thiserror::Error;
use tracing::{info, warn};

pub const COUNTDOWN_SECONDS: &str = "COUNTDOWN_SECONDS";
pub const SHOW_HTML_PANEL: &str = "SHOW_HTML_PANEL";
pub const SHOW_MARKET_CANVAS_2: &str = "SHOW_MARKET_CANVAS_2";
pub const SCRIPTS_ENABLED: &str = "SCRIPTS_ENABLED";
pub const DEFAULT_THEME: &str = "DEFAULT_THEME";

#[derive(Debug, Error)]
pub enum FlagStoreError {
    #[error("No valid configuration updates provided")]
    NoValidUpdates,
    #[error("invalid theme '{0}', expected light or dark")]
    InvalidTheme(String),
    #[error("failed to persist flags to '{}': {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct FlagStore {
    flags: RwLock<FeatureFlags>,
    env_file: Option<PathBuf>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FlagStore {
    /// In-memory only; updates are never written anywhere.
    pub fn in_memory(flags: FeatureFlags) -> Self {
        Self {
            flags: RwLock::new(flags),
            env_file: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Starts from `defaults` and overlays whatever the flags file already
    /// holds. A missing file is not an error.
    pub async fn open(mut defaults: FeatureFlags, env_file: PathBuf) -> Result<Self, FlagStoreError> {
        match tokio::fs::read_to_string(&env_file).await {
            Ok(content) => apply_env_entries(&mut defaults, &content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(FlagStoreError::Persist {
                    path: env_file,
                    source,
                })
            }
        }
        Ok(Self {
            flags: RwLock::new(defaults),
            env_file: Some(env_file),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn flags(&self) -> FeatureFlags {
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn env_file(&self) -> Option<&Path> {
        self.env_file.as_deref()
    }

    /// Applies every field present in `request`. Nothing changes unless at
    /// least one field is present and all present fields are valid.
    pub async fn update(&self, request: &ConfigUpdateRequest) -> Result<FeatureFlags, FlagStoreError> {
        let theme = match request.theme.as_deref() {
            Some(raw) => {
                Some(Theme::parse(raw).ok_or_else(|| FlagStoreError::InvalidTheme(raw.to_string()))?)
            }
            None => None,
        };

        let mut entries = Vec::new();
        if let Some(value) = request.show_html_panel {
            entries.push((SHOW_HTML_PANEL, env_bool(value).to_string()));
        }
        if let Some(value) = request.show_market_canvas_2 {
            entries.push((SHOW_MARKET_CANVAS_2, env_bool(value).to_string()));
        }
        if let Some(value) = request.scripts_enabled {
            entries.push((SCRIPTS_ENABLED, env_bool(value).to_string()));
        }
        if let Some(theme) = theme {
            entries.push((DEFAULT_THEME, theme.as_str().to_string()));
        }
        if entries.is_empty() {
            return Err(FlagStoreError::NoValidUpdates);
        }

        let _write = self.write_lock.lock().await;
        let updated = {
            let mut flags = self.flags.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(value) = request.show_html_panel {
                flags.show_html_panel = value;
            }
            if let Some(value) = request.show_market_canvas_2 {
                flags.show_market_canvas_2 = value;
            }
            if let Some(value) = request.scripts_enabled {
                flags.scripts_enabled = value;
            }
            if let Some(theme) = theme {
                flags.theme = theme;
            }
            flags.clone()
        };

        if let Some(path) = &self.env_file {
            persist(path, &entries).await?;
        }
        let keys: Vec<_> = entries.iter().map(|(key, _)| *key).collect();
        info!(?keys, "feature flags updated");
        Ok(updated)
    }
}

impl ConfigSource for FlagStore {
    fn playback_config(&self) -> PlaybackConfig {
        let flags = self.flags.read().unwrap_or_else(PoisonError::into_inner);
        PlaybackConfig {
            dwell_seconds: flags.countdown_seconds,
            secondary_presentation_enabled: flags.show_market_canvas_2,
        }
    }
}

async fn persist(path: &Path, entries: &[(&str, String)]) -> Result<(), FlagStoreError> {
    let to_error = |source| FlagStoreError::Persist {
        path: path.to_path_buf(),
        source,
    };
    let current = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(to_error(err)),
    };
    tokio::fs::write(path, rewrite_env(&current, entries))
        .await
        .map_err(to_error)
}

/// Replaces every `KEY=` line for the given keys and appends keys that were
/// not present. Other lines are kept as they are.
pub fn rewrite_env(content: &str, entries: &[(&str, String)]) -> String {
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            entries
                .iter()
                .find(|(key, _)| line.starts_with(&format!("{key}=")))
                .map(|(key, value)| format!("{key}={value}"))
                .unwrap_or_else(|| line.to_string())
        })
        .collect();
    for (key, value) in entries {
        let prefix = format!("{key}=");
        if !lines.iter().any(|line| line.starts_with(&prefix)) {
            lines.push(format!("{key}={value}"));
        }
    }
    let mut rewritten = lines.join("\n");
    rewritten.push('\n');
    rewritten
}

/// Reads the flag keys out of a flags file. Unknown keys, comments and
/// unparsable values are ignored.
pub fn apply_env_entries(flags: &mut FeatureFlags, content: &str) {
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            COUNTDOWN_SECONDS => match value.parse() {
                Ok(seconds) => flags.countdown_seconds = seconds,
                Err(_) => warn!(value, "ignoring invalid {COUNTDOWN_SECONDS}"),
            },
            SHOW_HTML_PANEL => flags.show_html_panel = parse_env_bool(value),
            SHOW_MARKET_CANVAS_2 => flags.show_market_canvas_2 = parse_env_bool(value),
            SCRIPTS_ENABLED => flags.scripts_enabled = parse_env_bool(value),
            DEFAULT_THEME => {
                if let Some(theme) = Theme::parse(value) {
                    flags.theme = theme;
                }
            }
            _ => {}
        }
    }
}

pub fn env_bool(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Only the exact text `TRUE` enables a flag.
pub fn parse_env_bool(value: &str) -> bool {
    value == "TRUE"
}

#[cfg(test)]
#[path = "tests/flags_tests.rs"]
mod tests;
