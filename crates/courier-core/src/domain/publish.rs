//! Publish-side model: tasks, per-record outcomes, and the batch aggregate.
//!
//! Outcomes are matched to their record by `index`, never by completion order.

use bytes::Bytes;

use super::errors::PublishError;
use super::ids::MessageId;

/// A serialized record paired with its position in the batch.
#[derive(Debug, Clone)]
pub struct PublishTask {
    pub index: usize,
    pub payload: Bytes,
}

impl PublishTask {
    pub fn new(index: usize, payload: impl Into<Bytes>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Result of one record's publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { index: usize, id: MessageId },
    Failed { index: usize, error: PublishError },
}

impl PublishOutcome {
    pub fn index(&self) -> usize {
        match self {
            PublishOutcome::Published { index, .. } | PublishOutcome::Failed { index, .. } => {
                *index
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PublishOutcome::Failed { .. })
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            PublishOutcome::Published { id, .. } => Some(id),
            PublishOutcome::Failed { .. } => None,
        }
    }
}

/// Final tally for one `dispatch` call.
///
/// Invariants:
/// - `outcomes.len() == total`, `outcomes[i].index() == i`
/// - `failures == outcomes.iter().filter(is_failure).count() <= total`
#[derive(Debug, Clone, Default)]
pub struct AggregateResult {
    pub total: usize,
    pub failures: usize,
    pub deadline_exceeded: bool,
    pub outcomes: Vec<PublishOutcome>,
}

impl AggregateResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from per-index slots. Every slot must be filled.
    pub(crate) fn from_outcomes(outcomes: Vec<PublishOutcome>, deadline_exceeded: bool) -> Self {
        let failures = outcomes.iter().filter(|o| o.is_failure()).count();
        Self {
            total: outcomes.len(),
            failures,
            deadline_exceeded,
            outcomes,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures == 0
    }

    pub fn succeeded(&self) -> usize {
        self.total - self.failures
    }

    pub fn published_ids(&self) -> impl Iterator<Item = &MessageId> {
        self.outcomes.iter().filter_map(PublishOutcome::message_id)
    }

    /// User-visible summary line.
    pub fn summary(&self) -> String {
        if self.is_success() {
            "All messages published successfully".to_string()
        } else {
            format!(
                "{} of {} messages did not publish successfully",
                self.failures, self.total
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_distinguishes_partial_failure() {
        let result = AggregateResult::from_outcomes(
            vec![
                PublishOutcome::Published {
                    index: 0,
                    id: MessageId::new("a"),
                },
                PublishOutcome::Failed {
                    index: 1,
                    error: PublishError::DeadlineExceeded,
                },
            ],
            true,
        );

        assert_eq!(result.total, 2);
        assert_eq!(result.failures, 1);
        assert_eq!(result.succeeded(), 1);
        assert!(!result.is_success());
        assert_eq!(
            result.summary(),
            "1 of 2 messages did not publish successfully"
        );
        assert_eq!(result.published_ids().count(), 1);
    }

    #[test]
    fn empty_result_is_success() {
        let result = AggregateResult::empty();
        assert!(result.is_success());
        assert_eq!(result.summary(), "All messages published successfully");
    }
}
