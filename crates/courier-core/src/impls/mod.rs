//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBroker**: 開発用・テスト用の broker
//! - **PubSubRestBroker**: Pub/Sub REST API（emulator 含む）
//! - **HttpSource**: HTTP GET で record を取得
//! - **HttpSink**: HTTP POST で転送（201 のみ成功）

pub mod http_sink;
pub mod http_source;
pub mod inmem_broker;
pub mod pubsub_rest;

// 主要な型を再エクスポート
pub use self::http_sink::{DEFAULT_SINK_TIMEOUT, HttpSink};
pub use self::http_source::HttpSource;
pub use self::inmem_broker::{InMemoryBroker, SubscriptionCounts};
pub use self::pubsub_rest::{DEFAULT_PUBSUB_ENDPOINT, PubSubRestBroker};
