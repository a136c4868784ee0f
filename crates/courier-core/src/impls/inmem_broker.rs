//! InMemoryBroker - 開発用・テスト用の broker
//!
//! # 実装詳細
//! - topic → subscription の fan-out（subscription ごとに独立したキュー）
//! - pull で ready から outstanding へ移動し、ack で削除、nack で ready に戻す
//! - ack/nack されずに drop された handle も ready に戻す（ack deadline の代わり）
//! - Notify による pull の待機（lock を跨いで await しない）

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::domain::{
    AckHandle, BrokerError, InboundMessage, MessageId, SubscriptionId, TopicId,
};
use crate::ports::{BrokerClient, Clock, IdGenerator, SystemClock, UlidGenerator};

/// Per-subscription counts for observability and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionCounts {
    pub ready: usize,
    pub outstanding: usize,
    pub acked: usize,
    pub nacked: usize,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    data: Bytes,
    publish_time: DateTime<Utc>,
    delivery_attempt: u32,
}

#[derive(Debug, Default)]
struct SubscriptionState {
    ready: VecDeque<StoredMessage>,
    outstanding: HashMap<u64, StoredMessage>,
    acked: usize,
    nacked: usize,
}

impl SubscriptionState {
    /// Move a leased message back to `ready`. `None` if the lease is gone.
    fn release(&mut self, ack_id: u64) -> Option<()> {
        let stored = self.outstanding.remove(&ack_id)?;
        self.nacked += 1;
        self.ready.push_back(stored);
        Some(())
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<TopicId, Vec<SubscriptionId>>,
    subscriptions: HashMap<SubscriptionId, SubscriptionState>,
    next_ack_id: u64,
}

/// In-process broker with topic fan-out and nack redelivery.
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_ports(
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }

    pub fn with_ports(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
            ids,
            clock,
        }
    }

    /// Register a topic. Re-creating an existing topic is a no-op.
    pub async fn create_topic(&self, topic: &TopicId) {
        let mut state = self.state.lock().await;
        state.topics.entry(topic.clone()).or_default();
    }

    /// Attach a subscription to an existing topic.
    pub async fn create_subscription(
        &self,
        subscription: &SubscriptionId,
        topic: &TopicId,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let subs = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;
        if !subs.contains(subscription) {
            subs.push(subscription.clone());
        }
        state
            .subscriptions
            .entry(subscription.clone())
            .or_default();
        Ok(())
    }

    pub async fn counts(&self, subscription: &SubscriptionId) -> Option<SubscriptionCounts> {
        let state = self.state.lock().await;
        state.subscriptions.get(subscription).map(|sub| SubscriptionCounts {
            ready: sub.ready.len(),
            outstanding: sub.outstanding.len(),
            acked: sub.acked,
            nacked: sub.nacked,
        })
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn publish(&self, topic: &TopicId, payload: Bytes) -> Result<MessageId, BrokerError> {
        let id = self.ids.generate_message_id();
        let publish_time = self.clock.now();
        {
            let mut state = self.state.lock().await;
            let subs = state
                .topics
                .get(topic)
                .cloned()
                .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;
            for sub in subs {
                if let Some(sub_state) = state.subscriptions.get_mut(&sub) {
                    sub_state.ready.push_back(StoredMessage {
                        id: id.clone(),
                        data: payload.clone(),
                        publish_time,
                        delivery_attempt: 0,
                    });
                }
            }
        }
        self.notify.notify_waiters();
        tracing::trace!(%topic, %id, "in-memory publish");
        Ok(id)
    }

    async fn pull(
        &self,
        subscription: &SubscriptionId,
        wait: Duration,
    ) -> Result<Option<InboundMessage>, BrokerError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // enable() before checking state so a publish between the check
            // and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                let ack_id = state.next_ack_id;
                let sub_state = state
                    .subscriptions
                    .get_mut(subscription)
                    .ok_or_else(|| BrokerError::SubscriptionNotFound(subscription.to_string()))?;

                if let Some(mut stored) = sub_state.ready.pop_front() {
                    stored.delivery_attempt += 1;
                    sub_state.outstanding.insert(ack_id, stored.clone());
                    state.next_ack_id += 1;

                    let handle = InMemoryAck {
                        ack_id,
                        subscription: subscription.clone(),
                        state: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                        settled: false,
                    };
                    return Ok(Some(InboundMessage::new(
                        stored.id,
                        stored.data,
                        stored.publish_time,
                        stored.delivery_attempt,
                        Box::new(handle),
                    )));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

/// Ack handle for a message leased from `InMemoryBroker`.
///
/// Dropped without `ack`/`nack` (handler panic, cancelled future) it returns
/// the message to `ready`.
struct InMemoryAck {
    ack_id: u64,
    subscription: SubscriptionId,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    settled: bool,
}

fn release_lease(state: &mut BrokerState, subscription: &SubscriptionId, ack_id: u64) -> bool {
    state
        .subscriptions
        .get_mut(subscription)
        .and_then(|sub_state| sub_state.release(ack_id))
        .is_some()
}

#[async_trait]
impl AckHandle for InMemoryAck {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut this = self;
        this.settled = true;
        let mut state = this.state.lock().await;
        let sub_state = state
            .subscriptions
            .get_mut(&this.subscription)
            .ok_or_else(|| BrokerError::SubscriptionNotFound(this.subscription.to_string()))?;
        sub_state
            .outstanding
            .remove(&this.ack_id)
            .ok_or_else(|| BrokerError::UnknownAckId(this.ack_id.to_string()))?;
        sub_state.acked += 1;
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut this = self;
        this.settled = true;
        {
            let mut state = this.state.lock().await;
            let sub_state = state
                .subscriptions
                .get_mut(&this.subscription)
                .ok_or_else(|| BrokerError::SubscriptionNotFound(this.subscription.to_string()))?;
            sub_state
                .release(this.ack_id)
                .ok_or_else(|| BrokerError::UnknownAckId(this.ack_id.to_string()))?;
        } // Lock released here

        this.notify.notify_waiters();
        Ok(())
    }
}

impl Drop for InMemoryAck {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::debug!(
            ack_id = self.ack_id,
            subscription = %self.subscription,
            "ack handle dropped unsettled; requeueing"
        );

        if let Ok(mut state) = self.state.try_lock() {
            let released = release_lease(&mut state, &self.subscription, self.ack_id);
            drop(state);
            if released {
                self.notify.notify_waiters();
            }
            return;
        }

        // Lock is busy; finish on the runtime.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(ack_id = self.ack_id, "no runtime to requeue dropped lease");
            return;
        };
        let state = Arc::clone(&self.state);
        let notify = Arc::clone(&self.notify);
        let subscription = self.subscription.clone();
        let ack_id = self.ack_id;
        runtime.spawn(async move {
            let released = release_lease(&mut *state.lock().await, &subscription, ack_id);
            if released {
                notify.notify_waiters();
            }
        });
    }
}
