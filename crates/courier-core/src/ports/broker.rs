//! BrokerClient port - publish/subscribe broker の抽象化
//!
//! 実装:
//! - `impls::InMemoryBroker`（開発用・テスト用）
//! - `impls::PubSubRestBroker`（Pub/Sub REST API / emulator）

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{BrokerError, InboundMessage, MessageId, SubscriptionId, TopicId};

/// Publish and pull capability against one broker.
///
/// Shared read-only across publish and handler tasks (`Arc<dyn BrokerClient>`).
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Publish one payload; resolves once the broker has assigned an id.
    async fn publish(&self, topic: &TopicId, payload: Bytes) -> Result<MessageId, BrokerError>;

    /// Pull at most one message, waiting up to `wait` for one to arrive.
    ///
    /// `Ok(None)` means nothing was available in time.
    async fn pull(
        &self,
        subscription: &SubscriptionId,
        wait: Duration,
    ) -> Result<Option<InboundMessage>, BrokerError>;
}
