//! InboundMessage - broker から配送されたメッセージ
//!
//! ack/nack は `self` を消費するので、1 メッセージにつき高々 1 回しか呼べない。

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::errors::BrokerError;
use super::ids::MessageId;

/// Acknowledgment capability for one delivered message.
///
/// Mirrors a lease: the consumer owns it and must either `ack` or `nack`.
/// Dropping it without either leaves the message to the broker's ack deadline.
#[async_trait]
pub trait AckHandle: Send + Sync {
    /// The message is permanently consumed.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Make the message eligible for redelivery now.
    async fn nack(self: Box<Self>) -> Result<(), BrokerError>;
}

/// A broker-delivered message plus its acknowledgment handle.
pub struct InboundMessage {
    id: MessageId,
    data: Bytes,
    publish_time: DateTime<Utc>,
    delivery_attempt: u32,
    handle: Box<dyn AckHandle>,
}

impl InboundMessage {
    pub fn new(
        id: MessageId,
        data: Bytes,
        publish_time: DateTime<Utc>,
        delivery_attempt: u32,
        handle: Box<dyn AckHandle>,
    ) -> Self {
        Self {
            id,
            data,
            publish_time,
            delivery_attempt,
            handle,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn publish_time(&self) -> DateTime<Utc> {
        self.publish_time
    }

    /// How many times the broker has delivered this message (1 on first delivery).
    pub fn delivery_attempt(&self) -> u32 {
        self.delivery_attempt
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.handle.ack().await
    }

    pub async fn nack(self) -> Result<(), BrokerError> {
        self.handle.nack().await
    }
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("publish_time", &self.publish_time)
            .field("delivery_attempt", &self.delivery_attempt)
            .finish()
    }
}
