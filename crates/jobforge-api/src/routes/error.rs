use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jobforge_core::Error;

/// Wraps the core error type so route handlers can return it directly from
/// a `Result` and have axum turn it into `{error}` with the right status
/// code (§7).
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn not_found_maps_to_404_with_error_body() {
        let response = ApiError::from(Error::not_found("job 7")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Not found: job 7");
    }

    #[tokio::test]
    async fn validation_maps_to_400() {
        let response = ApiError::from(Error::validation("bad payload")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn transient_maps_to_503() {
        let response = ApiError::from(Error::transient("redis blip")).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn fatal_maps_to_500() {
        let response = ApiError::from(Error::fatal("panic recovered")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
