use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    /// The text-generation or mail service failed
    #[error("{0}")]
    ExternalService(String),

    #[error("Authentication required")]
    AuthenticationRequired { auth_url: Option<String> },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn external(err: anyhow::Error) -> Self {
        ApiError::ExternalService(format!("{:#}", err))
    }

    fn classification(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::ExternalService(_) => "external_service_error",
            ApiError::AuthenticationRequired { .. } => "authentication_required",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ApiError::AuthenticationRequired { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::ExternalService(msg) => warn!("external service error: {}", msg),
            ApiError::Internal(msg) => error!("internal error: {}", msg),
            _ => {}
        }

        let mut body = json!({
            "success": false,
            "error": self.classification(),
            "message": self.to_string(),
        });
        if let ApiError::AuthenticationRequired { auth_url: Some(url) } = &self {
            body["authUrl"] = json!(url);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let (status, body) = render(ApiError::Validation("subject or snippet is required".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["message"], "subject or snippet is required");

        let (status, body) = render(ApiError::ExternalService("model down".into())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "external_service_error");
    }

    #[tokio::test]
    async fn test_auth_error_carries_url() {
        let (status, body) = render(ApiError::AuthenticationRequired {
            auth_url: Some("https://accounts.example/auth".into()),
        })
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["authUrl"], "https://accounts.example/auth");

        let (_, body) = render(ApiError::AuthenticationRequired { auth_url: None }).await;
        assert!(body.get("authUrl").is_none());
    }
}
