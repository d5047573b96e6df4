use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::lifecycle::Operation;
use crate::report::Envelope;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ContainerRequest {
    pub tenant_id: String,
}

/// POST /api/container/{operation}
///
/// Runs one lifecycle operation and answers with a `{status, message}`
/// envelope. The operation runs on its own task so a client that disconnects
/// mid-request does not abort it halfway.
pub async fn run_operation(
    State(state): State<SharedState>,
    Path(operation): Path<String>,
    body: Result<Json<ContainerRequest>, JsonRejection>,
) -> (StatusCode, Json<Envelope>) {
    let envelope = match (operation.parse::<Operation>(), body) {
        (Err(msg), _) => Envelope::rejected(msg),
        (Ok(_), Err(rejection)) => {
            Envelope::rejected(format!("Invalid request body: {}", rejection.body_text()))
        }
        (Ok(_), Ok(Json(req))) if req.tenant_id.trim().is_empty() => {
            Envelope::rejected("Missing tenant_id.")
        }
        (Ok(op), Ok(Json(req))) => {
            let engine = state.engine.clone();
            let task = tokio::spawn(async move { engine.run(op, &req.tenant_id).await });
            match task.await {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!("lifecycle task failed: {}", e);
                    Envelope::Error {
                        message: "The operation failed unexpectedly.".into(),
                        code: Some(StatusCode::INTERNAL_SERVER_ERROR.as_u16()),
                    }
                }
            }
        }
    };
    (envelope.http_status(), Json(envelope))
}
