use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use boxoffice_core::CoreError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("authentication required: {0}")]
    Authentication(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, missing) = match self {
            AppError::Authentication(msg) => (StatusCode::UNAUTHORIZED, "unauthenticated", msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg, None),
            AppError::Core(err) => {
                let code = err.code();
                match err {
                    CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, code, msg, None),
                    CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, code, msg, None),
                    CoreError::PartialNotFound { missing } => (
                        StatusCode::NOT_FOUND,
                        code,
                        "some tickets do not exist".to_string(),
                        Some(missing),
                    ),
                    CoreError::SeatConflict(msg) | CoreError::Conflict(msg) => (StatusCode::CONFLICT, code, msg, None),
                    CoreError::Payment(msg) => (StatusCode::PAYMENT_REQUIRED, code, msg, None),
                    CoreError::Authorization(msg) => (StatusCode::FORBIDDEN, code, msg, None),
                    CoreError::Unsupported(msg) => (StatusCode::UNPROCESSABLE_ENTITY, code, msg, None),
                    CoreError::ProviderUnavailable(msg)
                    | CoreError::ProviderUnreachable(msg)
                    | CoreError::ExternalService(msg) => {
                        tracing::warn!("Upstream unavailable: {}", msg);
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            code,
                            "Service temporarily unavailable, please try again".to_string(),
                            None,
                        )
                    }
                    CoreError::Integrity(msg) | CoreError::Storage(msg) => {
                        tracing::error!("Internal Server Error: {}", msg);
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            code,
                            "Internal error, please contact support".to_string(),
                            None,
                        )
                    }
                }
            }
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let Some(missing) = missing {
            body["missing"] = json!(missing);
        }

        (status, Json(body)).into_response()
    }
}
