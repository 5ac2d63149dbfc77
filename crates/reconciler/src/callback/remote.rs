//! HTTP callback handler.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::{debug, info, warn};

use super::CallbackHandler;
use crate::error::{Error, Result};
use crate::model::{CallbackMessage, ProcessingDuration};

/// Path appended to the callback URL for processing duration reports.
const PROCESSING_DURATION_PATH: &str = "processingDuration";

/// Posts status reports as JSON to the task's callback URL.
pub struct RemoteCallbackHandler {
    callback_url: String,
    client: reqwest::Client,
}

impl RemoteCallbackHandler {
    /// Create a handler for `callback_url`.
    ///
    /// An empty URL is accepted and turns every callback into a no-op.
    pub fn new(callback_url: &str) -> Result<Self> {
        if !callback_url.is_empty() {
            Url::parse(callback_url).map_err(|e| {
                Error::InvalidTask(format!("invalid callback URL '{callback_url}': {e}"))
            })?;
        }

        Ok(Self {
            callback_url: callback_url.to_string(),
            client: reqwest::Client::new(),
        })
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }
}

#[async_trait]
impl CallbackHandler for RemoteCallbackHandler {
    async fn callback(&self, msg: &CallbackMessage) -> Result<()> {
        if self.callback_url.is_empty() {
            warn!("Remote callback handler has no callback URL: callback not executed");
            return Ok(());
        }

        debug!(status = %msg.status, url = %self.callback_url, "Sending callback");

        let response = self.client.post(&self.callback_url).json(msg).send().await?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            info!(
                status = %status,
                body = %body,
                callback_status = %msg.status,
                "Callback request was rejected"
            );

            Err(Error::Callback(format!(
                "callback to '{}' returned {status}: {body}",
                self.callback_url
            )))
        }
    }

    async fn processing_duration(&self, duration: Duration) -> Result<()> {
        if self.callback_url.is_empty() {
            return Ok(());
        }

        let url = format!(
            "{}/{PROCESSING_DURATION_PATH}",
            self.callback_url.trim_end_matches('/')
        );
        let payload = ProcessingDuration {
            duration: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        };

        let response = self.client.post(&url).json(&payload).send().await?;
        if response.status().is_success() {
            debug!(url = %url, duration_ms = payload.duration, "Processing duration reported");
            Ok(())
        } else {
            Err(Error::Callback(format!(
                "processing duration report to '{url}' returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_urls() {
        assert!(RemoteCallbackHandler::new("not a url").is_err());
        assert!(RemoteCallbackHandler::new("http://localhost:8080/v1/callback/1").is_ok());
    }

    #[tokio::test]
    async fn empty_url_is_a_noop() {
        let handler = RemoteCallbackHandler::new("").unwrap();
        let msg = CallbackMessage {
            status: crate::model::Status::Running,
            error: String::new(),
            retry_id: String::new(),
        };
        assert!(handler.callback(&msg).await.is_ok());
        assert!(handler
            .processing_duration(Duration::from_secs(1))
            .await
            .is_ok());
    }
}
