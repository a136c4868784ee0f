//! PublishDispatcher - batch を broker へ fan-out し、結果を集計する
//!
//! # フロー
//! 1. record を順に serialize（失敗はその record だけ Failed）
//! 2. FlowController で admission を待つ
//! 3. JoinSet に publish task を spawn（permit は broker の応答まで保持）
//! 4. 全 task を join し、index ごとの slot に結果を置く
//!
//! 2〜4 は全体で `deadline` までに終わらなければ打ち切り、結果の無い slot は
//! すべて `DeadlineExceeded` になる。

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;

use crate::app::flow_control::{FlowControlSettings, FlowController};
use crate::domain::{AggregateResult, PublishError, PublishOutcome, PublishTask, TopicId};
use crate::ports::BrokerClient;

pub struct PublishDispatcher {
    broker: Arc<dyn BrokerClient>,
    settings: FlowControlSettings,
}

impl PublishDispatcher {
    pub fn new(broker: Arc<dyn BrokerClient>, settings: FlowControlSettings) -> Self {
        Self { broker, settings }
    }

    pub fn settings(&self) -> FlowControlSettings {
        self.settings
    }

    /// Publish every record to `topic` and report one outcome per record.
    ///
    /// Never fails as a whole; per-record problems are counted in the result.
    pub async fn dispatch<R>(&self, records: &[R], topic: &TopicId, deadline: Instant) -> AggregateResult
    where
        R: Serialize + Sync,
    {
        if records.is_empty() {
            return AggregateResult::empty();
        }

        let flow = FlowController::new(self.settings);
        let mut batch = Batch::new(records.len());

        let deadline_exceeded = tokio::time::timeout_at(
            deadline,
            self.submit_and_drain(records, topic, &flow, &mut batch),
        )
        .await
        .is_err();

        if deadline_exceeded {
            batch.inflight.abort_all();
            // Tasks that finished before the abort still count.
            while let Some(joined) = batch.inflight.join_next_with_id().await {
                batch.on_joined(joined);
            }
        }

        let result = batch.finish(deadline_exceeded);
        tracing::info!(
            %topic,
            total = result.total,
            failures = result.failures,
            deadline_exceeded = result.deadline_exceeded,
            "publish batch finished"
        );
        result
    }

    async fn submit_and_drain<R>(
        &self,
        records: &[R],
        topic: &TopicId,
        flow: &FlowController,
        batch: &mut Batch,
    ) where
        R: Serialize + Sync,
    {
        for (index, record) in records.iter().enumerate() {
            let task = match serde_json::to_vec(record) {
                Ok(payload) => PublishTask::new(index, Bytes::from(payload)),
                Err(e) => {
                    batch.record(PublishOutcome::Failed {
                        index,
                        error: PublishError::Serialize(e.to_string()),
                    });
                    continue;
                }
            };

            let permit = match flow.acquire(task.size()).await {
                Ok(permit) => permit,
                Err(e) => {
                    batch.record(PublishOutcome::Failed {
                        index,
                        error: e.into(),
                    });
                    continue;
                }
            };

            let broker = Arc::clone(&self.broker);
            let topic = topic.clone();
            let PublishTask { index, payload } = task;
            let handle = batch.inflight.spawn(async move {
                let result = broker.publish(&topic, payload).await;
                drop(permit);
                match result {
                    Ok(id) => PublishOutcome::Published { index, id },
                    Err(e) => PublishOutcome::Failed {
                        index,
                        error: e.into(),
                    },
                }
            });
            batch.task_index.insert(handle.id(), index);

            while let Some(joined) = batch.inflight.try_join_next_with_id() {
                batch.on_joined(joined);
            }
        }

        while let Some(joined) = batch.inflight.join_next_with_id().await {
            batch.on_joined(joined);
        }
    }
}

/// Per-call bookkeeping: one slot per record index.
struct Batch {
    slots: Vec<Option<PublishOutcome>>,
    inflight: JoinSet<PublishOutcome>,
    task_index: HashMap<Id, usize>,
}

impl Batch {
    fn new(total: usize) -> Self {
        Self {
            slots: (0..total).map(|_| None).collect(),
            inflight: JoinSet::new(),
            task_index: HashMap::new(),
        }
    }

    fn record(&mut self, outcome: PublishOutcome) {
        match &outcome {
            PublishOutcome::Published { index, id } => {
                tracing::info!(index = *index, %id, "published message");
            }
            PublishOutcome::Failed { index, error } => {
                tracing::error!(index = *index, %error, "failed to publish message");
            }
        }
        let index = outcome.index();
        self.slots[index] = Some(outcome);
    }

    fn on_joined(&mut self, joined: Result<(Id, PublishOutcome), JoinError>) {
        match joined {
            Ok((id, outcome)) => {
                self.task_index.remove(&id);
                self.record(outcome);
            }
            Err(err) => {
                let Some(index) = self.task_index.remove(&err.id()) else {
                    return;
                };
                // Cancelled tasks are filled in by `finish`.
                if err.is_panic() {
                    self.record(PublishOutcome::Failed {
                        index,
                        error: PublishError::Join(err.to_string()),
                    });
                }
            }
        }
    }

    fn finish(self, deadline_exceeded: bool) -> AggregateResult {
        let outcomes = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    tracing::error!(index, "publish deadline exceeded");
                    PublishOutcome::Failed {
                        index,
                        error: PublishError::DeadlineExceeded,
                    }
                })
            })
            .collect();
        AggregateResult::from_outcomes(outcomes, deadline_exceeded)
    }
}
