use crate::runtime::RuntimeError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failure taxonomy of lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("operation already in progress for tenant {tenant_id}")]
    Conflict { tenant_id: String },
    #[error("tenant {tenant_id} has no container")]
    NotFound { tenant_id: String },
    #[error("container runtime failed during {step}: {source}")]
    Adapter {
        step: &'static str,
        #[source]
        source: RuntimeError,
    },
    #[error("{0}")]
    Validation(String),
    #[error("state store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Adapter,
    Validation,
    Internal,
}

impl LifecycleError {
    pub fn adapter(step: &'static str, source: RuntimeError) -> Self {
        Self::Adapter { step, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Adapter { .. } => ErrorKind::Adapter,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable, caller-facing sentence. Never includes engine output.
    pub fn user_message(&self) -> String {
        match self {
            Self::Conflict { tenant_id } => format!(
                "Another operation is already running for tenant {}. Try again once it finishes.",
                tenant_id
            ),
            Self::NotFound { tenant_id } => format!(
                "Tenant {} has no container. Recreate it first.",
                tenant_id
            ),
            Self::Adapter { step, source } => match source {
                RuntimeError::Timeout { .. } => {
                    format!("The container runtime timed out during {}.", step)
                }
                RuntimeError::NotFound(_) => {
                    format!("The container disappeared during {}.", step)
                }
                RuntimeError::Engine(_) => {
                    format!("The container runtime could not complete {}.", step)
                }
            },
            Self::Validation(msg) => msg.clone(),
            Self::Store(_) => "Tenant state could not be read or saved.".to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Adapter => StatusCode::BAD_GATEWAY,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors of the non-envelope endpoints (tenant listing and registration).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        let message = err.user_message();
        match err.kind() {
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Conflict => AppError::Conflict(message),
            ErrorKind::Validation => AppError::BadRequest(message),
            ErrorKind::Adapter | ErrorKind::Internal => AppError::Internal(err.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".into(),
                )
            }
        };
        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use std::time::Duration;

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_adapter_message_hides_engine_output() {
        let err = LifecycleError::adapter(
            "create",
            RuntimeError::Engine(
                "docker create failed: Error response from daemon: conflict".into(),
            ),
        );
        let msg = err.user_message();
        assert_eq!(msg, "The container runtime could not complete create.");
        assert!(!msg.contains("daemon"));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_timeout_message_names_the_step() {
        let err = LifecycleError::adapter(
            "start",
            RuntimeError::Timeout {
                op: "start",
                after: Duration::from_secs(60),
            },
        );
        assert_eq!(err.user_message(), "The container runtime timed out during start.");
    }

    #[test]
    fn test_kinds_map_to_status_codes() {
        let conflict = LifecycleError::Conflict {
            tenant_id: "t1".into(),
        };
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
        let missing = LifecycleError::NotFound {
            tenant_id: "t1".into(),
        };
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        let invalid = LifecycleError::Validation("no subdomain".into());
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_not_found_returns_404() {
        let resp = AppError::NotFound("tenant xyz".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "tenant xyz");
    }

    #[tokio::test]
    async fn test_internal_hides_details() {
        let err = AppError::Internal(anyhow::anyhow!("database is locked"));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "internal server error");
    }
}
