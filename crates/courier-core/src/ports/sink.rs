//! DeliverySink port - consume したメッセージの転送先

use async_trait::async_trait;

use crate::domain::{DeliveryError, InboundMessage};

/// Downstream endpoint for consumed messages.
///
/// `Ok(())` means the sink confirmed the message; anything else is one failed attempt.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn forward(&self, message: &InboundMessage) -> Result<(), DeliveryError>;
}
