use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("model is still loading")]
    ModelLoading,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("insufficient GPU memory: {0}")]
    OutOfMemory(String),
    #[error("model execution failed: {0}")]
    Inference(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("other: {0}")]
    Other(String),
}

impl ServiceError {
    /// Classifies a backend failure message, splitting out allocator exhaustion.
    pub fn from_inference(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_lowercase().contains("out of memory") {
            ServiceError::OutOfMemory(message)
        } else {
            ServiceError::Inference(message)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::ModelLoading => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidBody(_) | ServiceError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::OutOfMemory(_) => StatusCode::INSUFFICIENT_STORAGE,
            ServiceError::Tokenizer(_) | ServiceError::Inference(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ServiceError::Validation(errors.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_messages_map_to_507() {
        let err = ServiceError::from_inference("CUDA out of memory. Tried to allocate 2.00 GiB");
        assert!(matches!(err, ServiceError::OutOfMemory(_)));
        assert_eq!(err.status(), StatusCode::INSUFFICIENT_STORAGE);
    }

    #[test]
    fn other_inference_failures_map_to_500() {
        let err = ServiceError::from_inference("shape mismatch");
        assert!(matches!(err, ServiceError::Inference(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn client_errors_are_4xx() {
        assert!(ServiceError::Validation("x".into()).status().is_client_error());
        assert!(ServiceError::InvalidBody("x".into()).status().is_client_error());
        assert!(ServiceError::BadRequest("x".into()).status().is_client_error());
        assert_eq!(
            ServiceError::ModelLoading.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
