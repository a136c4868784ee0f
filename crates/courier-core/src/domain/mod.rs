//! Domain model (names, records, publish outcomes, delivery state, errors).

pub mod delivery;
pub mod errors;
pub mod ids;
pub mod message;
pub mod publish;
pub mod record;

pub use delivery::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, Decision, DeliveryAttempt, DeliveryState,
    RetryPolicy,
};
pub use errors::{
    BrokerError, ConfigError, DeliveryError, FetchError, FlowControlError, PublishError,
};
pub use ids::{MessageId, ProjectId, SubscriptionId, TopicId};
pub use message::{AckHandle, InboundMessage};
pub use publish::{AggregateResult, PublishOutcome, PublishTask};
pub use record::Record;
