//! FlowController - publish の同時実行数とバイト数の上限
//!
//! 上限に達したら submit 側が待つ（block）。permit は broker の応答まで保持する。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::domain::FlowControlError;

pub const DEFAULT_MAX_OUTSTANDING_MESSAGES: usize = 100;
pub const DEFAULT_MAX_OUTSTANDING_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlSettings {
    pub max_outstanding_messages: usize,
    pub max_outstanding_bytes: usize,
}

impl Default for FlowControlSettings {
    fn default() -> Self {
        Self {
            max_outstanding_messages: DEFAULT_MAX_OUTSTANDING_MESSAGES,
            max_outstanding_bytes: DEFAULT_MAX_OUTSTANDING_BYTES,
        }
    }
}

/// Admission control over in-flight publishes.
///
/// Both limits are semaphores; a publish holds one message permit and
/// `size` byte permits until its `FlowPermit` is dropped.
#[derive(Debug, Clone)]
pub struct FlowController {
    messages: Arc<Semaphore>,
    bytes: Arc<Semaphore>,
    max_messages: usize,
    max_bytes: usize,
}

impl FlowController {
    pub fn new(settings: FlowControlSettings) -> Self {
        // acquire_many takes u32
        let max_bytes = settings.max_outstanding_bytes.clamp(1, u32::MAX as usize);
        let max_messages = settings
            .max_outstanding_messages
            .clamp(1, Semaphore::MAX_PERMITS);
        Self {
            messages: Arc::new(Semaphore::new(max_messages)),
            bytes: Arc::new(Semaphore::new(max_bytes)),
            max_messages,
            max_bytes,
        }
    }

    /// Wait until a message of `size` bytes fits under both limits.
    pub async fn acquire(&self, size: usize) -> Result<FlowPermit, FlowControlError> {
        if size > self.max_bytes {
            return Err(FlowControlError::MessageTooLarge {
                size,
                max: self.max_bytes,
            });
        }

        let message = Arc::clone(&self.messages)
            .acquire_owned()
            .await
            .map_err(|_| FlowControlError::Closed)?;
        let bytes = Arc::clone(&self.bytes)
            .acquire_many_owned(size as u32)
            .await
            .map_err(|_| FlowControlError::Closed)?;

        Ok(FlowPermit {
            _message: message,
            _bytes: bytes,
        })
    }

    pub fn outstanding_messages(&self) -> usize {
        self.max_messages - self.messages.available_permits()
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.max_bytes - self.bytes.available_permits()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

/// Releases its share of both limits on drop.
#[derive(Debug)]
pub struct FlowPermit {
    _message: OwnedSemaphorePermit,
    _bytes: OwnedSemaphorePermit,
}
