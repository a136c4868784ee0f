//! Domain identifiers (strongly-typed names).
//!
//! # Phantom Type パターン
//! `Name<T>` というジェネリック型で共通実装を提供しつつ、
//! `T` は実行時には使わない（PhantomData）マーカー型として、
//! Topic と Subscription をコンパイル時に区別します。
//!
//! - broker 側の resource path（`projects/{p}/topics/{t}`）の組み立てもマーカーが持つ
//! - `MessageId` は broker が払い出す不透明な文字列

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// NameMarker は各 resource 名のマーカー trait
pub trait NameMarker: Send + Sync + 'static {
    /// REST path で使う collection 名（例: "topics"）
    fn collection() -> &'static str;
}

/// Broker 上の名前付き resource（topic / subscription）。
#[repr(transparent)]
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name<T: NameMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: NameMarker> Name<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Fully-qualified resource path: `projects/{project}/{collection}/{name}`.
    pub fn resource_path(&self, project: &ProjectId) -> String {
        format!(
            "projects/{}/{}/{}",
            project.as_str(),
            T::collection(),
            self.value
        )
    }
}

// derive(Clone) would require `T: Clone` on the marker.
impl<T: NameMarker> Clone for Name<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T: NameMarker> fmt::Display for Name<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: NameMarker> From<&str> for Name<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Topic のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {}

impl NameMarker for Topic {
    fn collection() -> &'static str {
        "topics"
    }
}

/// Subscription のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subscription {}

impl NameMarker for Subscription {
    fn collection() -> &'static str {
        "subscriptions"
    }
}

/// Named publish destination on the broker.
pub type TopicId = Name<Topic>;

/// Named consumption point on the broker.
pub type SubscriptionId = Name<Subscription>;

/// Cloud project that owns topics and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Broker-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
