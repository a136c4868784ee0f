//! HttpSource - HTTP GET で JSON 配列の record を取得する MessageSource

use async_trait::async_trait;

use crate::domain::{FetchError, Record};
use crate::ports::MessageSource;

/// Fetches `[Record]` from a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MessageSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(FetchError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await.map_err(FetchError::Body)?;
        let records: Vec<Record> = serde_json::from_slice(&body)?;
        tracing::debug!(url = %self.url, count = records.len(), "fetched records");
        Ok(records)
    }
}
