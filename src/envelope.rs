use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BridgeError;

/// Standard result envelope returned for every single call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when a long-running operation was cancelled after making progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
            cancelled: None,
        }
    }

    pub fn success_with(message: impl Into<String>, data: impl Serialize) -> Self {
        let mut resp = Self::success(message);
        resp.data = Some(to_value_or_null(data));
        resp
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            error: Some(message.clone()),
            message,
            data: None,
            cancelled: None,
        }
    }

    pub fn error_with(message: impl Into<String>, data: impl Serialize) -> Self {
        let mut resp = Self::error(message);
        resp.data = Some(to_value_or_null(data));
        resp
    }

    /// Partial success after a cooperative cancel.
    pub fn cancelled(message: impl Into<String>, data: impl Serialize) -> Self {
        let mut resp = Self::success_with(message, data);
        resp.cancelled = Some(true);
        resp
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error_text(&self) -> Option<&str> {
        if self.success {
            return None;
        }
        Some(self.error.as_deref().unwrap_or(&self.message))
    }
}

impl From<BridgeError> for Response {
    fn from(err: BridgeError) -> Self {
        Response::error_with(err.to_string(), serde_json::json!({ "kind": err.kind() }))
    }
}

fn to_value_or_null(data: impl Serialize) -> Value {
    serde_json::to_value(data).unwrap_or(Value::Null)
}

/// Result envelope of a whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub success: bool,
    pub results: Vec<Option<Response>>,
    pub total_calls: usize,
    pub successful_calls: usize,
    pub failed_calls: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-index error list, only filled in tolerant mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallRequest {
    pub func: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    #[default]
    Abort,
    Tolerant,
}

/// Batch wire shapes. `{"funcs": [...]}` is authoritative; the bare array is
/// the older shape and is still accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BatchRequest {
    Funcs {
        funcs: Vec<Value>,
        #[serde(default)]
        mode: BatchMode,
    },
    Bare(Vec<Value>),
}

impl BatchRequest {
    pub fn is_deprecated_shape(&self) -> bool {
        matches!(self, BatchRequest::Bare(_))
    }

    pub fn into_parts(self) -> (Vec<Value>, BatchMode) {
        match self {
            BatchRequest::Funcs { funcs, mode } => (funcs, mode),
            BatchRequest::Bare(funcs) => (funcs, BatchMode::Abort),
        }
    }
}

/// `type` is "in" (submit), "out" (poll) or "cancel".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AsyncRequest {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub func: Option<String>,
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
}
