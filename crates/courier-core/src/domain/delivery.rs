//! Delivery model: retry policy, per-message state machine, attempt records.
//!
//! State transitions:
//! - Attempting(n) -> Succeeded            (sink confirmed)
//! - Attempting(n) -> Attempting(n + 1)    (failed, budget left, not cancelled)
//! - Attempting(n) -> Exhausted            (failed, n == max_attempts)
//! - Attempting(n) -> Interrupted          (failed, cancelled during the delay)
//!
//! Only `Succeeded` leads to an ack. The other terminal states leave the message
//! for broker redelivery.

use std::time::Duration;

use super::errors::DeliveryError;
use super::ids::MessageId;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Fixed-delay retry policy for forwarding to the sink.
///
/// Not exponential: every gap between attempts is `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum forward attempts per delivery (including the first).
    pub max_attempts: u32,

    /// Pause between two attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Decide what follows a failed attempt number `attempt` (1-indexed).
    pub fn after_failure(&self, attempt: u32) -> Decision {
        if attempt >= self.max_attempts {
            Decision::GiveUp {
                reason: format!("max attempts reached: {}/{}", attempt, self.max_attempts),
            }
        } else {
            Decision::Retry { delay: self.delay }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// Next action after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    GiveUp { reason: String },
}

/// Per-message delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// About to make attempt `n` (1-indexed).
    Attempting(u32),

    /// Sink confirmed on attempt `attempts`.
    Succeeded { attempts: u32 },

    /// All attempts failed.
    Exhausted { attempts: u32 },

    /// Cancelled between attempts.
    Interrupted { attempts: u32 },
}

impl DeliveryState {
    pub fn start() -> Self {
        DeliveryState::Attempting(1)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, DeliveryState::Attempting(_))
    }

    /// Should the message be acknowledged?
    pub fn should_ack(self) -> bool {
        matches!(self, DeliveryState::Succeeded { .. })
    }

    pub fn attempts(self) -> u32 {
        match self {
            DeliveryState::Attempting(n) => n.saturating_sub(1),
            DeliveryState::Succeeded { attempts }
            | DeliveryState::Exhausted { attempts }
            | DeliveryState::Interrupted { attempts } => attempts,
        }
    }

    /// Transition on the result of the current attempt.
    ///
    /// A failure that still has budget stays `Attempting(n + 1)`; the caller is
    /// responsible for waiting `policy.delay` and may interrupt instead.
    pub fn on_result(self, succeeded: bool, policy: &RetryPolicy) -> Self {
        let DeliveryState::Attempting(n) = self else {
            return self;
        };
        if succeeded {
            return DeliveryState::Succeeded { attempts: n };
        }
        match policy.after_failure(n) {
            Decision::Retry { .. } => DeliveryState::Attempting(n + 1),
            Decision::GiveUp { .. } => DeliveryState::Exhausted { attempts: n },
        }
    }

    /// Cancellation observed while waiting for the next attempt.
    pub fn interrupt(self) -> Self {
        match self {
            DeliveryState::Attempting(n) => DeliveryState::Interrupted {
                attempts: n.saturating_sub(1),
            },
            terminal => terminal,
        }
    }
}

/// One forward attempt. Exists only while a message is being handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub message_id: MessageId,
    pub attempt: u32,
    pub result: Result<(), DeliveryError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_is_three_attempts_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }

    #[rstest]
    #[case::first(1)]
    #[case::second(2)]
    fn delay_is_fixed(#[case] attempt: u32) {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.after_failure(attempt),
            Decision::Retry {
                delay: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn third_failure_gives_up() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.after_failure(3), Decision::GiveUp { .. }));
    }

    #[test]
    fn succeeds_on_third_attempt() {
        let policy = RetryPolicy::default();
        let state = DeliveryState::start()
            .on_result(false, &policy)
            .on_result(false, &policy)
            .on_result(true, &policy);
        assert_eq!(state, DeliveryState::Succeeded { attempts: 3 });
        assert!(state.should_ack());
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let policy = RetryPolicy::default();
        let mut state = DeliveryState::start();
        while !state.is_terminal() {
            state = state.on_result(false, &policy);
        }
        assert_eq!(state, DeliveryState::Exhausted { attempts: 3 });
        assert!(!state.should_ack());
    }

    #[test]
    fn interrupt_keeps_completed_attempt_count() {
        let policy = RetryPolicy::default();
        let state = DeliveryState::start().on_result(false, &policy).interrupt();
        assert_eq!(state, DeliveryState::Interrupted { attempts: 1 });
        assert!(!state.should_ack());
    }

    #[test]
    fn terminal_states_ignore_further_results() {
        let policy = RetryPolicy::default();
        let done = DeliveryState::Succeeded { attempts: 1 };
        assert_eq!(done.on_result(false, &policy), done);
        assert_eq!(done.interrupt(), done);
    }

    #[test]
    fn zero_max_attempts_is_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        let state = DeliveryState::start().on_result(false, &policy);
        assert_eq!(state, DeliveryState::Exhausted { attempts: 1 });
    }
}
