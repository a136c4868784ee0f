//! Errors - エラー型と分類
//!
//! - record / message 単位のエラー（Serialize, Publish, Delivery）はその場で集計
//! - batch 単位のエラー（Config, Fetch, Deadline）は呼び出し元へ伝播

use thiserror::Error;

/// Missing or malformed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// The message source could not produce a batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to message source failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("message source returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to read message source body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("failed to decode message source body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures reported by a `BrokerClient`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("unknown ack id: {0}")]
    UnknownAckId(String),

    #[error("broker request failed: {0}")]
    Request(String),

    #[error("broker returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode broker response: {0}")]
    Decode(String),
}

/// Why a single record was not published.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("serialize record: {0}")]
    Serialize(String),

    #[error("flow control: {0}")]
    FlowControl(#[from] FlowControlError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("publish deadline exceeded")]
    DeadlineExceeded,

    #[error("publish task failed: {0}")]
    Join(String),
}

/// Flow-control admission failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowControlError {
    #[error("message of {size} bytes exceeds max outstanding bytes {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("flow controller closed")]
    Closed,
}

/// One failed forward attempt to the delivery sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("request to sink failed: {0}")]
    Request(String),

    /// `body` is kept for debugging and left out of the message.
    #[error("sink returned status {status}")]
    Status { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_key() {
        let err = ConfigError::Missing("TOPIC_ID");
        assert_eq!(err.to_string(), "TOPIC_ID is not set");
    }

    #[test]
    fn publish_error_wraps_broker_error() {
        let err: PublishError = BrokerError::TopicNotFound("t".into()).into();
        assert_eq!(err.to_string(), "broker: topic not found: t");
    }
}
