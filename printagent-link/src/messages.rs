//! Event payloads exchanged with the print server.

use serde_json::Value;

pub const PRINT_LABEL_EVENT: &str = "print_label";
pub const STATUS_EVENT: &str = "status";

/// Body of an inbound `print_label` event, read leniently.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrintLabel {
    pub job_id: Option<i64>,
    pub invoice: String,
    pub pcs: Option<i64>,
    pub data: String,
}

impl PrintLabel {
    /// Numbers may arrive as JSON numbers or numeric strings; anything else is treated as absent.
    /// Returns `None` when the body is not an object or `data` is not a string.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let data = obj.get("data")?.as_str()?.to_owned();
        Some(Self {
            job_id: obj.get("job_id").and_then(as_int),
            invoice: obj
                .get("invoice")
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .unwrap_or_default(),
            pcs: obj.get("pcs").and_then(as_int),
            data,
        })
    }
}

fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Body of an inbound `status` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub msg: String,
}

impl StatusMessage {
    pub fn from_value(value: &Value) -> Self {
        let msg = match value {
            Value::String(s) => s.clone(),
            other => other
                .get("msg")
                .map(|m| m.as_str().map(str::to_owned).unwrap_or_else(|| m.to_string()))
                .unwrap_or_else(|| other.to_string()),
        };
        Self { msg }
    }
}
