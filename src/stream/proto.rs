use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One received stream payload.
///
/// Text frames are decoded as JSON when possible; anything else is kept
/// verbatim. Decode failure is not an error.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Entry {
    Structured(Value),
    Raw(String),
}

impl Entry {
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Raw(text.to_string()),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Structured(_) => None,
            Self::Raw(text) => Some(text),
        }
    }

    /// Best-effort view of the entry as a producer log record.
    pub fn as_log_record(&self) -> Option<LogRecord> {
        let value = self.as_value()?;
        LogRecord::deserialize(value).ok()
    }
}

/// Log event shape emitted by the log backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub timestamp: Value,
    pub module: String,
    pub message: String,
}

/// Outbound payload accepted by `LogStreamClient::send_message`.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    Text(String),
    Json(Value),
}

impl OutboundPayload {
    /// Frames the payload: text is sent unchanged, JSON values are encoded.
    pub fn into_text(self) -> Result<String, serde_json::Error> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Json(value) => serde_json::to_string(&value),
        }
    }
}

impl From<String> for OutboundPayload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for OutboundPayload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Value> for OutboundPayload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<LogRecord> for OutboundPayload {
    fn from(record: LogRecord) -> Self {
        Self::Json(json!({
            "timestamp": record.timestamp,
            "module": record.module,
            "message": record.message,
        }))
    }
}
