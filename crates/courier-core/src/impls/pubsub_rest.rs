//! PubSubRestBroker - Pub/Sub REST v1 API（本番 endpoint / emulator）
//!
//! - publish: `POST /v1/{topic}:publish`
//! - pull: `POST /v1/{subscription}:pull`（maxMessages = 1）
//! - ack: `POST /v1/{subscription}:acknowledge`
//! - nack: `POST /v1/{subscription}:modifyAckDeadline`（ackDeadlineSeconds = 0）
//!
//! Credentials are not handled here; point `base_url` at an emulator or at an
//! endpoint that authenticates on our behalf.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AckHandle, BrokerError, InboundMessage, MessageId, ProjectId, SubscriptionId, TopicId,
};
use crate::ports::BrokerClient;

pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<OutgoingMessage>,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
    return_immediately: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: IncomingMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingMessage {
    #[serde(default)]
    data: String,
    message_id: String,
    #[serde(default)]
    publish_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: [&'a str; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: [&'a str; 1],
    ack_deadline_seconds: u32,
}

/// Broker client for the Pub/Sub REST API.
#[derive(Debug, Clone)]
pub struct PubSubRestBroker {
    client: reqwest::Client,
    base_url: String,
    project: ProjectId,
}

impl PubSubRestBroker {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, project: ProjectId) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            project,
        }
    }

    /// Emulator hosts are given as `host:port` without a scheme.
    pub fn for_emulator(client: reqwest::Client, host: &str, project: ProjectId) -> Self {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        Self::new(client, base_url, project)
    }

    fn url(&self, resource: &str, verb: &str) -> String {
        format!("{}/v1/{}:{}", self.base_url, resource, verb)
    }
}

async fn post_json<T: Serialize + ?Sized>(
    request: reqwest::RequestBuilder,
    body: &T,
) -> Result<reqwest::Response, reqwest::Error> {
    request.json(body).send().await
}

async fn check_status(
    response: reqwest::Response,
    not_found: impl FnOnce() -> BrokerError,
) -> Result<reqwest::Response, BrokerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(not_found());
    }
    let body = response.text().await.unwrap_or_default();
    Err(BrokerError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BrokerClient for PubSubRestBroker {
    async fn publish(&self, topic: &TopicId, payload: Bytes) -> Result<MessageId, BrokerError> {
        let url = self.url(&topic.resource_path(&self.project), "publish");
        let body = PublishRequest {
            messages: vec![OutgoingMessage {
                data: BASE64.encode(&payload),
            }],
        };

        let response = post_json(self.client.post(&url), &body)
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))?;
        let response = check_status(response, || BrokerError::TopicNotFound(topic.to_string()))
            .await?;
        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;

        parsed
            .message_ids
            .into_iter()
            .next()
            .map(MessageId::new)
            .ok_or_else(|| BrokerError::Decode("publish response without message id".into()))
    }

    async fn pull(
        &self,
        subscription: &SubscriptionId,
        wait: Duration,
    ) -> Result<Option<InboundMessage>, BrokerError> {
        let resource = subscription.resource_path(&self.project);
        let url = self.url(&resource, "pull");
        let body = PullRequest {
            max_messages: 1,
            return_immediately: wait.is_zero(),
        };

        let mut request = self.client.post(&url);
        if !wait.is_zero() {
            request = request.timeout(wait);
        }
        let response = match post_json(request, &body).await {
            Ok(response) => response,
            // Long poll ran out without a message.
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(BrokerError::Request(e.to_string())),
        };
        let response = check_status(response, || {
            BrokerError::SubscriptionNotFound(subscription.to_string())
        })
        .await?;
        let parsed: PullResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;

        let Some(received) = parsed.received_messages.into_iter().next() else {
            return Ok(None);
        };
        let data = BASE64
            .decode(received.message.data.as_bytes())
            .map_err(|e| BrokerError::Decode(format!("message data: {e}")))?;

        let handle = RestAck {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            subscription_path: resource,
            ack_id: received.ack_id,
        };
        Ok(Some(InboundMessage::new(
            MessageId::new(received.message.message_id),
            Bytes::from(data),
            received.message.publish_time.unwrap_or_else(Utc::now),
            received.delivery_attempt.unwrap_or(1),
            Box::new(handle),
        )))
    }
}

/// Ack handle bound to one `ackId`.
struct RestAck {
    client: reqwest::Client,
    base_url: String,
    subscription_path: String,
    ack_id: String,
}

impl RestAck {
    fn url(&self, verb: &str) -> String {
        format!("{}/v1/{}:{}", self.base_url, self.subscription_path, verb)
    }

    async fn send<T: Serialize>(&self, verb: &str, body: &T) -> Result<(), BrokerError> {
        let response = post_json(self.client.post(self.url(verb)), body)
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))?;
        let subscription = self.subscription_path.clone();
        check_status(response, || BrokerError::SubscriptionNotFound(subscription)).await?;
        Ok(())
    }
}

#[async_trait]
impl AckHandle for RestAck {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let body = AcknowledgeRequest {
            ack_ids: [self.ack_id.as_str()],
        };
        self.send("acknowledge", &body).await
    }

    async fn nack(self: Box<Self>) -> Result<(), BrokerError> {
        let body = ModifyAckDeadlineRequest {
            ack_ids: [self.ack_id.as_str()],
            ack_deadline_seconds: 0,
        };
        self.send("modifyAckDeadline", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulator_host_gets_http_scheme() {
        let broker =
            PubSubRestBroker::for_emulator(reqwest::Client::new(), "localhost:8085", ProjectId::new("p"));
        assert_eq!(
            broker.url("projects/p/topics/t", "publish"),
            "http://localhost:8085/v1/projects/p/topics/t:publish"
        );
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let broker = PubSubRestBroker::new(
            reqwest::Client::new(),
            "https://pubsub.googleapis.com/",
            ProjectId::new("p"),
        );
        assert_eq!(
            broker.url("projects/p/subscriptions/s", "pull"),
            "https://pubsub.googleapis.com/v1/projects/p/subscriptions/s:pull"
        );
    }

    #[test]
    fn pull_response_without_messages_decodes() {
        let parsed: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.received_messages.is_empty());
    }

    #[test]
    fn pull_response_decodes_received_message() {
        let json = r#"{
            "receivedMessages": [{
                "ackId": "ack-1",
                "message": {
                    "data": "aGVsbG8=",
                    "messageId": "42",
                    "publishTime": "2024-01-01T00:00:00.123456789Z"
                },
                "deliveryAttempt": 2
            }]
        }"#;
        let parsed: PullResponse = serde_json::from_str(json).unwrap();
        let received = &parsed.received_messages[0];
        assert_eq!(received.ack_id, "ack-1");
        assert_eq!(received.message.message_id, "42");
        assert_eq!(received.delivery_attempt, Some(2));
        assert_eq!(BASE64.decode(&received.message.data).unwrap(), b"hello");
    }

    #[test]
    fn nack_request_uses_zero_deadline() {
        let body = ModifyAckDeadlineRequest {
            ack_ids: ["a"],
            ack_deadline_seconds: 0,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v, serde_json::json!({"ackIds": ["a"], "ackDeadlineSeconds": 0}));
    }

    mod against_fake_server {
        use std::sync::{Arc, Mutex};

        use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
        use serde_json::{Value, json};

        use super::*;
        use crate::test_support::{build_test_client, spawn_axum};

        type Seen = Arc<Mutex<Vec<(String, Value)>>>;

        fn record(seen: &Seen, verb: &str, body: Value) {
            seen.lock().unwrap().push((verb.to_string(), body));
        }

        fn fake_pubsub(seen: Seen) -> Router {
            Router::new()
                .route(
                    "/v1/projects/p/topics/t:publish",
                    post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                        record(&seen, "publish", body);
                        Json(json!({"messageIds": ["m-1"]}))
                    }),
                )
                .route(
                    "/v1/projects/p/subscriptions/s:pull",
                    post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                        record(&seen, "pull", body);
                        Json(json!({
                            "receivedMessages": [{
                                "ackId": "ack-7",
                                "message": {
                                    "data": "cGF5bG9hZA==",
                                    "messageId": "m-1",
                                    "publishTime": "2024-01-01T00:00:00Z"
                                }
                            }]
                        }))
                    }),
                )
                .route(
                    "/v1/projects/p/subscriptions/s:acknowledge",
                    post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                        record(&seen, "acknowledge", body);
                        Json(json!({}))
                    }),
                )
                .route(
                    "/v1/projects/p/subscriptions/s:modifyAckDeadline",
                    post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                        record(&seen, "modifyAckDeadline", body);
                        Json(json!({}))
                    }),
                )
                .route(
                    "/v1/projects/p/subscriptions/empty:pull",
                    post(|| async { Json(json!({})) }),
                )
                .route(
                    "/v1/projects/p/topics/broken:publish",
                    post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "try later") }),
                )
                .with_state(seen)
        }

        async fn setup() -> (crate::test_support::TestServer, PubSubRestBroker, Seen) {
            let seen: Seen = Arc::default();
            let server = spawn_axum(fake_pubsub(Arc::clone(&seen))).await;
            let broker = PubSubRestBroker::for_emulator(
                build_test_client(),
                &server.addr.to_string(),
                ProjectId::new("p"),
            );
            (server, broker, seen)
        }

        #[tokio::test]
        async fn publish_sends_base64_data_and_returns_id() {
            let (server, broker, seen) = setup().await;

            let id = broker
                .publish(&TopicId::new("t"), Bytes::from_static(b"payload"))
                .await
                .unwrap();

            assert_eq!(id, MessageId::new("m-1"));
            let seen = seen.lock().unwrap().clone();
            assert_eq!(
                seen,
                vec![(
                    "publish".to_string(),
                    json!({"messages": [{"data": "cGF5bG9hZA=="}]})
                )]
            );
            server.stop().await;
        }

        #[tokio::test]
        async fn unknown_topic_maps_to_topic_not_found() {
            let (server, broker, _seen) = setup().await;

            let err = broker
                .publish(&TopicId::new("missing"), Bytes::new())
                .await
                .unwrap_err();

            assert_eq!(err, BrokerError::TopicNotFound("missing".into()));
            server.stop().await;
        }

        #[tokio::test]
        async fn server_error_keeps_status_and_body() {
            let (server, broker, _seen) = setup().await;

            let err = broker
                .publish(&TopicId::new("broken"), Bytes::new())
                .await
                .unwrap_err();

            assert_eq!(
                err,
                BrokerError::Status {
                    status: 503,
                    body: "try later".into()
                }
            );
            server.stop().await;
        }

        #[tokio::test]
        async fn pulled_message_acks_with_its_ack_id() {
            let (server, broker, seen) = setup().await;

            let msg = broker
                .pull(&SubscriptionId::new("s"), Duration::from_secs(1))
                .await
                .unwrap()
                .expect("one message");
            assert_eq!(msg.data().as_ref(), b"payload");
            assert_eq!(msg.delivery_attempt(), 1);
            msg.ack().await.unwrap();

            let seen = seen.lock().unwrap().clone();
            assert_eq!(seen[0].1, json!({"maxMessages": 1, "returnImmediately": false}));
            assert_eq!(
                seen[1],
                ("acknowledge".to_string(), json!({"ackIds": ["ack-7"]}))
            );
            server.stop().await;
        }

        #[tokio::test]
        async fn nack_resets_ack_deadline() {
            let (server, broker, seen) = setup().await;

            let msg = broker
                .pull(&SubscriptionId::new("s"), Duration::from_secs(1))
                .await
                .unwrap()
                .unwrap();
            msg.nack().await.unwrap();

            let seen = seen.lock().unwrap().clone();
            assert_eq!(
                seen[1],
                (
                    "modifyAckDeadline".to_string(),
                    json!({"ackIds": ["ack-7"], "ackDeadlineSeconds": 0})
                )
            );
            server.stop().await;
        }

        #[tokio::test]
        async fn empty_pull_returns_none() {
            let (server, broker, _seen) = setup().await;

            let msg = broker
                .pull(&SubscriptionId::new("empty"), Duration::from_secs(1))
                .await
                .unwrap();

            assert!(msg.is_none());
            server.stop().await;
        }
    }
}
