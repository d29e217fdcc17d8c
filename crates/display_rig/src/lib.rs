//! Outbound calls to the presentation hardware: the Unreal-driven display
//! rig behind the pin table, and the Market Canvas 2 presentation screen.

use async_trait::async_trait;
use thiserror::Error;

pub mod command;
pub mod http;

pub use command::{CommandProfile, RemoteObjectCall};
pub use http::{HttpDisplayRig, HttpPresentationClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    NetworkFailure,
    NonSuccessStatus(u16),
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: DispatchErrorKind::NetworkFailure,
            message: message.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            kind: DispatchErrorKind::NonSuccessStatus(status),
            message: format!("display rig responded with HTTP {status}"),
        }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self {
            kind: DispatchErrorKind::Timeout,
            message: format!("display rig did not answer within {seconds}s"),
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self {
                kind: DispatchErrorKind::Timeout,
                message: format!("display rig request timed out: {err}"),
            };
        }
        if let Some(status) = err.status() {
            return Self::status(status.as_u16());
        }
        Self::network(format!("display rig unreachable: {err}"))
    }
}

#[derive(Debug, Error)]
pub enum PresentationError {
    #[error("presentation service is not configured")]
    NotConfigured,
    #[error("presentation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("presentation service responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Sends one remote-object call to the display rig.
#[async_trait]
pub trait DisplayTransport: Send + Sync {
    async fn send_display_command(&self, call: &RemoteObjectCall) -> Result<(), DispatchError>;
}

/// Asks the Market Canvas 2 screen to open a property's public overview.
#[async_trait]
pub trait PresentationTransport: Send + Sync {
    async fn present_property(
        &self,
        canvas_pid: &str,
    ) -> Result<serde_json::Value, PresentationError>;
}

pub struct MissingPresentationTransport;

#[async_trait]
impl PresentationTransport for MissingPresentationTransport {
    async fn present_property(
        &self,
        _canvas_pid: &str,
    ) -> Result<serde_json::Value, PresentationError> {
        Err(PresentationError::NotConfigured)
    }
}
