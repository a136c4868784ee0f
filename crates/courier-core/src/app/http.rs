//! Publish HTTP endpoint.
//!
//! One request = fetch one batch from the source, dispatch it, answer with the
//! summary text. Configuration problems are reported per request as 500s so
//! the process keeps serving.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use thiserror::Error;
use tokio::time::Instant;

use crate::app::config::Config;
use crate::app::dispatcher::PublishDispatcher;
use crate::domain::{ConfigError, FetchError, TopicId};
use crate::impls::HttpSource;
use crate::ports::{BrokerClient, MessageSource};

/// Errors surfaced by the publish endpoint. All map to 500 with a text body.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    PartialFailure(String),
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        match &self {
            ServeError::PartialFailure(_) => {}
            ServeError::Config(err) => tracing::error!(error = %err, "publish endpoint misconfigured"),
            ServeError::Fetch(err) => tracing::error!(error = %err, "failed to fetch messages"),
        }
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Everything one publish request needs. Missing pieces are kept as the
/// `ConfigError` to report.
pub struct PublishService {
    topic: Result<TopicId, ConfigError>,
    source: Result<Arc<dyn MessageSource>, ConfigError>,
    dispatcher: Result<PublishDispatcher, ConfigError>,
    timeout: Duration,
}

impl PublishService {
    pub fn new(
        topic: TopicId,
        source: Arc<dyn MessageSource>,
        dispatcher: PublishDispatcher,
        timeout: Duration,
    ) -> Self {
        Self {
            topic: Ok(topic),
            source: Ok(source),
            dispatcher: Ok(dispatcher),
            timeout,
        }
    }

    /// Wire the service from config, using `client` for both the source and
    /// the Pub/Sub REST broker.
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        let source = config.require_endpoint_server().map(|url| {
            Arc::new(HttpSource::new(client.clone(), url)) as Arc<dyn MessageSource>
        });
        let dispatcher = config.pubsub_broker(client).map(|broker| {
            PublishDispatcher::new(Arc::new(broker) as Arc<dyn BrokerClient>, config.flow_control)
        });
        Self {
            topic: config.require_topic().cloned(),
            source,
            dispatcher,
            timeout: config.publish_timeout,
        }
    }

    /// Fetch and publish one batch; returns the success summary.
    pub async fn publish_batch(&self) -> Result<String, ServeError> {
        let topic = self.topic.as_ref().map_err(Clone::clone)?;
        let source = self.source.as_ref().map_err(Clone::clone)?;
        let dispatcher = self.dispatcher.as_ref().map_err(Clone::clone)?;

        let deadline = Instant::now() + self.timeout;
        let records = source.fetch().await?;
        tracing::info!(count = records.len(), %topic, "publishing batch");

        let result = dispatcher.dispatch(&records, topic, deadline).await;
        if result.is_success() {
            Ok(result.summary())
        } else {
            Err(ServeError::PartialFailure(result.summary()))
        }
    }
}

pub fn router(service: Arc<PublishService>) -> Router {
    Router::new()
        .route("/", get(publish).post(publish))
        .with_state(service)
}

async fn publish(State(service): State<Arc<PublishService>>) -> Result<String, ServeError> {
    service.publish_batch().await
}
