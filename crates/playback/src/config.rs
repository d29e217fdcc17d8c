/// Values a session reads once when it starts. Later flag changes only
/// affect sessions started afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    pub dwell_seconds: u32,
    pub secondary_presentation_enabled: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            dwell_seconds: 120,
            secondary_presentation_enabled: false,
        }
    }
}

pub trait ConfigSource: Send + Sync {
    fn playback_config(&self) -> PlaybackConfig;
}

/// Fixed configuration, used by tools and tests.
pub struct StaticConfig(pub PlaybackConfig);

impl ConfigSource for StaticConfig {
    fn playback_config(&self) -> PlaybackConfig {
        self.0
    }
}
