//! Record - source から取得する不透明なデータ単位

use serde::{Deserialize, Serialize};

/// One unit of application data read from a `MessageSource`.
///
/// Only `id` is interpreted (for logging); every other field is carried through
/// verbatim. Both `{"id","message"}` and `{"id","name","date","description"}`
/// shapes decode into this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: serde_json::Value,

    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// Convenience constructor for the common `{id, message}` shape.
    pub fn with_message(id: impl Into<serde_json::Value>, message: impl Into<String>) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert(
            "message".to_string(),
            serde_json::Value::String(message.into()),
        );
        Self {
            id: id.into(),
            fields,
        }
    }
}
