//! HttpSink - consume したメッセージを HTTP POST で転送する DeliverySink
//!
//! body は `{"message": "<payload as text>"}`。201 Created のみ成功とみなす。

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{DeliveryError, InboundMessage};
use crate::ports::DeliverySink;

pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ForwardBody<'a> {
    message: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Client with the default per-request timeout.
    pub fn with_default_client(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_SINK_TIMEOUT)
            .build()?;
        Ok(Self::new(client, url))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeliverySink for HttpSink {
    async fn forward(&self, message: &InboundMessage) -> Result<(), DeliveryError> {
        let text = String::from_utf8_lossy(message.data());
        let response = self
            .client
            .post(&self.url)
            .json(&ForwardBody { message: &text })
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::CREATED {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(url = %self.url, status = status.as_u16(), %body, "sink rejected message");
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
