//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（broker, HTTP source, HTTP sink）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//! dispatcher / consume loop はここにしか依存しません。

pub mod broker;
pub mod clock;
pub mod id_generator;
pub mod sink;
pub mod source;

// 主要な trait を再エクスポート
pub use self::broker::BrokerClient;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::sink::DeliverySink;
pub use self::source::MessageSource;
