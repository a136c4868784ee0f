//! ConsumeLoop - pull → forward（retry 付き）→ ack/nack
//!
//! # フロー
//! 1. handler の空き（semaphore）を待つ
//! 2. BrokerClient::pull() で 1 件取得（cancel と select）
//! 3. handler task を spawn: sink へ転送、失敗なら固定 delay 後に再試行
//! 4. 成功なら ack、上限到達または cancel なら nack（再配送に任せる）
//!
//! cancel 後は新しい pull をせず、実行中の handler の終了を待ってから戻る。
//! 転送中の attempt は中断しない。cancel を見るのは attempt 間の delay だけ。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    DeliveryAttempt, DeliveryState, InboundMessage, RetryPolicy, SubscriptionId,
};
use crate::ports::{BrokerClient, DeliverySink};

pub const DEFAULT_MAX_INFLIGHT_DELIVERIES: usize = 10;
pub const DEFAULT_PULL_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeSettings {
    pub retry: RetryPolicy,

    /// Handlers allowed to run at once.
    pub max_outstanding_messages: usize,

    /// How long one pull may wait for a message.
    pub pull_wait: Duration,
}

impl Default for ConsumeSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_outstanding_messages: DEFAULT_MAX_INFLIGHT_DELIVERIES,
            pull_wait: DEFAULT_PULL_WAIT,
        }
    }
}

/// Live counters, shared by the pull loop and every handler.
#[derive(Debug, Default)]
pub struct ConsumeStats {
    received: AtomicU64,
    acked: AtomicU64,
    unacked: AtomicU64,
    errors: AtomicU64,
}

impl ConsumeStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn unacked(&self) -> u64 {
        self.unacked.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ConsumeReport {
        ConsumeReport {
            received: self.received(),
            acked: self.acked(),
            unacked: self.unacked(),
            errors: self.errors(),
        }
    }
}

/// Counters at the time `run` returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    pub received: u64,
    pub acked: u64,
    /// Nacked after exhaustion or interruption, or lost to a failed handler.
    pub unacked: u64,
    /// Pull failures, ack/nack failures and failed handlers.
    pub errors: u64,
}

pub struct ConsumeLoop {
    broker: Arc<dyn BrokerClient>,
    sink: Arc<dyn DeliverySink>,
    settings: ConsumeSettings,
    stats: Arc<ConsumeStats>,
}

impl ConsumeLoop {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        sink: Arc<dyn DeliverySink>,
        settings: ConsumeSettings,
    ) -> Self {
        Self {
            broker,
            sink,
            settings,
            stats: Arc::new(ConsumeStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ConsumeStats> {
        Arc::clone(&self.stats)
    }

    /// Consume `subscription` until `cancel` fires and every handler is done.
    pub async fn run(&self, subscription: &SubscriptionId, cancel: CancellationToken) -> ConsumeReport {
        let slots = Arc::new(Semaphore::new(self.settings.max_outstanding_messages.max(1)));
        let mut handlers = JoinSet::new();
        tracing::info!(%subscription, "listening for messages");

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                pulled = self.broker.pull(subscription, self.settings.pull_wait) => pulled,
            };

            match pulled {
                Ok(Some(message)) => {
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(message_id = %message.id(), "received message");

                    let sink = Arc::clone(&self.sink);
                    let stats = Arc::clone(&self.stats);
                    let policy = self.settings.retry.clone();
                    let cancel = cancel.clone();
                    handlers.spawn(async move {
                        let _permit = permit;
                        handle_message(message, sink.as_ref(), &policy, &cancel, &stats).await;
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %err, %subscription, "pull failed; retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry.delay) => {}
                    }
                }
            }

            while let Some(joined) = handlers.try_join_next() {
                self.log_join(joined);
            }
        }

        tracing::info!(in_flight = handlers.len(), "stopping; waiting for handlers");
        while let Some(joined) = handlers.join_next().await {
            self.log_join(joined);
        }

        let report = self.stats.snapshot();
        tracing::info!(
            received = report.received,
            acked = report.acked,
            unacked = report.unacked,
            errors = report.errors,
            "consumer stopped"
        );
        report
    }
}

impl ConsumeLoop {
    /// A handler that panicked never settled its message; the dropped ack
    /// handle leaves it to the broker for redelivery.
    fn log_join(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(err) = joined {
            self.stats.unacked.fetch_add(1, Ordering::Relaxed);
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %err, "message handler failed");
        }
    }
}

async fn handle_message(
    message: InboundMessage,
    sink: &dyn DeliverySink,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    stats: &ConsumeStats,
) {
    let message_id = message.id().clone();
    let state = forward_with_retry(sink, &message, policy, cancel).await;

    if state.should_ack() {
        match message.ack().await {
            Ok(()) => {
                stats.acked.fetch_add(1, Ordering::Relaxed);
                tracing::info!(%message_id, attempts = state.attempts(), "message delivered and acknowledged");
            }
            Err(err) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%message_id, error = %err, "ack failed");
            }
        }
        return;
    }

    stats.unacked.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(%message_id, ?state, "message left for redelivery");
    if let Err(err) = message.nack().await {
        stats.errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(%message_id, error = %err, "nack failed");
    }
}

/// Forward `message` until the sink confirms, the budget runs out, or `cancel`
/// fires between attempts.
pub async fn forward_with_retry(
    sink: &dyn DeliverySink,
    message: &InboundMessage,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> DeliveryState {
    let mut state = DeliveryState::start();

    while let DeliveryState::Attempting(attempt) = state {
        let outcome = DeliveryAttempt {
            message_id: message.id().clone(),
            attempt,
            result: sink.forward(message).await,
        };
        match &outcome.result {
            Ok(()) => {
                tracing::debug!(message_id = %outcome.message_id, attempt, "sink accepted message");
            }
            Err(err) => {
                tracing::warn!(
                    message_id = %outcome.message_id,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "delivery attempt failed"
                );
            }
        }

        state = state.on_result(outcome.result.is_ok(), policy);
        if state.is_terminal() {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                state = state.interrupt();
            }
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }

    state
}
