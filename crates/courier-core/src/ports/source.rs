//! MessageSource port - publish する record の取得元

use async_trait::async_trait;

use crate::domain::{FetchError, Record};

/// Supplies one ordered batch of records.
///
/// A failure is fatal to the batch: implementations must not return a partial list.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Record>, FetchError>;
}
