//! courier-core
//!
//! Core building blocks for moving records from an HTTP source into a
//! publish/subscribe broker and from the broker on to an HTTP sink.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, record, publish outcome, delivery state, errors）
//! - **ports**: 抽象化レイヤー（BrokerClient, MessageSource, DeliverySink, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryBroker, PubSubRestBroker, HttpSource, HttpSink）
//! - **app**: アプリケーションロジック（dispatcher, consume loop, http endpoint, config）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
mod test_support;
