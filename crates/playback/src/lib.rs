//! Timed playback of scripts and single table actions against one display
//! target.

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod reporter;
pub mod timer;

pub use config::{ConfigSource, PlaybackConfig, StaticConfig};
pub use controller::{PlaybackController, PlaybackError};
pub use dispatcher::{CommandDispatcher, DEFAULT_DISPATCH_TIMEOUT};
pub use reporter::{ActivationMetadata, UsageReporter};
pub use timer::{DwellTimer, TimerEvent, TimerEventKind, ERROR_DISPLAY_SECONDS};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
