use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::{
    DispatchError, DisplayTransport, PresentationError, PresentationTransport, RemoteObjectCall,
};

pub const DEFAULT_RIG_URL: &str =
    "https://experience-center-room-dc-srv1.cbre.com/remote/object/call";
pub const DEFAULT_PRESENTATION_URL: &str =
    "https://marketcanvas.cbre.com/api/presentation-control";

/// PUTs remote-object calls to the rig's web remote endpoint.
#[derive(Clone)]
pub struct HttpDisplayRig {
    http: Client,
    endpoint: Url,
}

impl HttpDisplayRig {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DispatchError::network(format!("failed to build http client: {err}")))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl DisplayTransport for HttpDisplayRig {
    async fn send_display_command(&self, call: &RemoteObjectCall) -> Result<(), DispatchError> {
        debug!(preset = call.preset_name(), endpoint = %self.endpoint, "sending display command");
        let response = self
            .http
            .put(self.endpoint.clone())
            .json(call)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::status(status.as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StartBrowserRequest<'a> {
    action: &'static str,
    url: &'a str,
}

/// POSTs `start_browser` requests to the Market Canvas presentation API.
#[derive(Clone)]
pub struct HttpPresentationClient {
    http: Client,
    endpoint: Url,
    public_site: String,
    cookie: Option<String>,
}

impl HttpPresentationClient {
    pub fn new(
        endpoint: Url,
        public_site: impl Into<String>,
        cookie: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PresentationError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            public_site: public_site.into(),
            cookie: cookie.filter(|value| !value.trim().is_empty()),
        })
    }

    pub fn property_page(&self, canvas_pid: &str) -> String {
        format!(
            "{}/public/properties/{canvas_pid}/overview",
            self.public_site.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl PresentationTransport for HttpPresentationClient {
    async fn present_property(
        &self,
        canvas_pid: &str,
    ) -> Result<serde_json::Value, PresentationError> {
        let page = self.property_page(canvas_pid);
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(header::ACCEPT, "application/json")
            .json(&StartBrowserRequest {
                action: "start_browser",
                url: &page,
            });
        if let Some(cookie) = &self.cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PresentationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body)))
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
