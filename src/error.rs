use serde::Serialize;

/// Every failure the dispatch core can report. All of them end up as an
/// error envelope at the nearest dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Task with id '{0}' is already running.")]
    AlreadyRunning(String),
    #[error("{0}")]
    Execution(String),
    #[error("{0}")]
    Cancelled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    AlreadyRunning,
    Execution,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::Execution => "execution",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl BridgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Validation(_) => ErrorKind::Validation,
            BridgeError::NotFound(_) => ErrorKind::NotFound,
            BridgeError::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            BridgeError::Execution(_) => ErrorKind::Execution,
            BridgeError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Prefixes the message, keeping the kind. Used by the two-phase base to
    /// say which tree failed.
    pub fn context(self, prefix: &str) -> Self {
        match self {
            BridgeError::Validation(m) => BridgeError::Validation(format!("{prefix}: {m}")),
            BridgeError::NotFound(m) => BridgeError::NotFound(format!("{prefix}: {m}")),
            BridgeError::Execution(m) => BridgeError::Execution(format!("{prefix}: {m}")),
            BridgeError::Cancelled(m) => BridgeError::Cancelled(format!("{prefix}: {m}")),
            already @ BridgeError::AlreadyRunning(_) => already,
        }
    }
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_prefix_keeps_kind() {
        let err = BridgeError::validation("Invalid value 'x' for key 'mode'").context("Target location failed");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            err.to_string(),
            "Target location failed: Invalid value 'x' for key 'mode'"
        );
    }

    #[test]
    fn already_running_names_the_id() {
        let err = BridgeError::AlreadyRunning("t1".to_string());
        assert_eq!(err.kind().as_str(), "already_running");
        assert!(err.to_string().contains("'t1'"));
    }
}
