use crate::error::LifecycleError;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// The `{status, message}` envelope returned for every lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope {
    Success {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message: Option<String>,
    },
    Error {
        message: String,
        #[serde(skip)]
        code: Option<u16>,
    },
}

impl Envelope {
    pub fn success(message: impl Into<String>) -> Self {
        Envelope::Success {
            message: Some(message.into()),
        }
    }

    /// Error envelope carrying the caller-facing sentence for `err`. The full
    /// error chain goes to the log only.
    pub fn from_error(err: &LifecycleError) -> Self {
        match err {
            LifecycleError::Adapter { .. } | LifecycleError::Store(_) => {
                tracing::warn!(error = ?err, "operation failed");
            }
            _ => tracing::debug!("operation rejected: {err}"),
        }
        Envelope::Error {
            message: err.user_message(),
            code: Some(err.status_code().as_u16()),
        }
    }

    /// Error envelope for a request the engine never saw (bad operation name, bad body).
    pub fn rejected(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
            code: Some(StatusCode::BAD_REQUEST.as_u16()),
        }
    }

    pub fn from_result<T>(
        result: Result<T, LifecycleError>,
        message: impl FnOnce(&T) -> String,
    ) -> Self {
        match result {
            Ok(value) => Envelope::success(message(&value)),
            Err(e) => Envelope::from_error(&e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Envelope::Success { message } => message.as_deref(),
            Envelope::Error { message, .. } => Some(message),
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Envelope::Success { .. } => StatusCode::OK,
            Envelope::Error { code, .. } => code
                .and_then(|c| StatusCode::from_u16(c).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}
