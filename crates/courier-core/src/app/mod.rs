//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **FlowController**: publish の件数・バイト数の上限
//! - **PublishDispatcher**: batch の fan-out と結果集計（deadline 付き）
//! - **ConsumeLoop**: pull → forward（retry）→ ack/nack、cancel まで
//! - **http**: publish endpoint（axum router）
//! - **Config**: 環境変数からの設定

pub mod config;
pub mod consume_loop;
pub mod dispatcher;
pub mod flow_control;
pub mod http;

// 主要な型を再エクスポート
pub use self::config::Config;
pub use self::consume_loop::{
    ConsumeLoop, ConsumeReport, ConsumeSettings, ConsumeStats, forward_with_retry,
};
pub use self::dispatcher::PublishDispatcher;
pub use self::flow_control::{FlowControlSettings, FlowController, FlowPermit};
pub use self::http::{PublishService, ServeError, router};
