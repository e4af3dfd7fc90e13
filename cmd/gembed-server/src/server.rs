//! HTTP front end.
//!
//! API endpoints:
//! - POST /        - Embed a batch of texts
//! - POST /embed   - Same as POST /
//! - GET /healthz  - Liveness probe

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gembed::{EmbedError, EmbeddingService};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::ServerConfig;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: EmbeddingService,
    config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(service: EmbeddingService, config: ServerConfig) -> Self {
        Self {
            service,
            config: Arc::new(config),
        }
    }
}

/// Request body for POST /embed.
#[derive(Debug, Default, Deserialize)]
pub struct EmbedRequest {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub texts: Option<Vec<String>>,
}

/// Response body for POST /embed.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub method: String,
    pub model: String,
    pub embeddings: Vec<Vec<f32>>,
}

/// Error response: a status code and `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<EmbedError> for ApiError {
    fn from(e: EmbedError) -> Self {
        if e.is_invalid_input() {
            Self::bad_request(e.to_string())
        } else if e.is_usage_error() {
            error!(error = %e, "embedding pipeline misuse");
            Self::internal(e.to_string())
        } else {
            error!(error = %e, "embedding request failed");
            Self::internal(e.to_string())
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(embed))
        .route("/embed", post(embed))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Binds the configured address and serves until the process exits.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gembed server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn pick(value: Option<String>, default: &str, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ if !default.is_empty() => Ok(default.to_string()),
        _ => Err(ApiError::bad_request(format!("{field} is required"))),
    }
}

pub(crate) async fn embed(
    State(state): State<AppState>,
    payload: Result<Json<EmbedRequest>, JsonRejection>,
) -> Result<Json<EmbedResponse>, ApiError> {
    let Json(req) = payload?;
    let method = pick(req.method, &state.config.default_method, "method")?;
    let model = pick(req.model, &state.config.default_model, "model")?;
    let texts = req.texts.unwrap_or_default();

    let max = state.config.max_texts;
    if max > 0 && texts.len() > max {
        return Err(ApiError::bad_request(format!(
            "too many texts: {} (max {max})",
            texts.len()
        )));
    }

    // The native call blocks; keep it off the async workers.
    let service = state.service.clone();
    let (m, mo) = (method.clone(), model.clone());
    let embeddings = tokio::task::spawn_blocking(move || service.embed(&m, &mo, &texts))
        .await
        .map_err(|e| ApiError::internal(format!("embedding task failed: {e}")))??;

    Ok(Json(EmbedResponse {
        method,
        model,
        embeddings,
    }))
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::extract::FromRequest;
    use axum::http::{Request, header};
    use gembed::testing::{MockEngine, expected_row};

    fn state(dim: usize, config: ServerConfig) -> (Arc<MockEngine>, AppState) {
        let mock = Arc::new(MockEngine::new(dim));
        let service = EmbeddingService::new(mock.clone());
        (mock, AppState::new(service, config))
    }

    fn request(method: &str, model: &str, texts: &[&str]) -> EmbedRequest {
        EmbedRequest {
            method: Some(method.to_string()),
            model: Some(model.to_string()),
            texts: Some(texts.iter().map(|t| t.to_string()).collect()),
        }
    }

    #[tokio::test]
    async fn embeds_in_order() {
        let (mock, st) = state(8, ServerConfig::default());
        let req = request("fastembed", "example-model", &["Hello world", "Another text"]);
        let Json(resp) = embed(State(st), Ok(Json(req))).await.unwrap();

        assert_eq!(resp.method, "fastembed");
        assert_eq!(resp.model, "example-model");
        assert_eq!(resp.embeddings.len(), 2);
        assert_eq!(resp.embeddings[0], expected_row("Hello world", 8));
        assert_eq!(resp.embeddings[1], expected_row("Another text", 8));
        assert_eq!(mock.heap().live(), 0);
    }

    #[tokio::test]
    async fn invalid_method_is_bad_request() {
        let (mock, st) = state(8, ServerConfig::default());
        let req = request("bogus", "example-model", &["Hello"]);
        let err = embed(State(st), Ok(Json(req))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("bogus"));
        assert_eq!(mock.heap().total(), 0);
    }

    #[tokio::test]
    async fn empty_texts_are_bad_request() {
        let (mock, st) = state(8, ServerConfig::default());
        let req = EmbedRequest {
            texts: None,
            ..request("fastembed", "example-model", &[])
        };
        let err = embed(State(st), Ok(Json(req))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(mock.generations(), 0);
    }

    #[tokio::test]
    async fn generation_failure_is_internal() {
        let (mock, st) = state(8, ServerConfig::default());
        mock.fail_with(5);
        let req = request("fastembed", "example-model", &["a"]);
        let err = embed(State(st), Ok(Json(req))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mock.heap().live(), 0);
    }

    #[tokio::test]
    async fn defaults_fill_missing_fields() {
        let config = ServerConfig {
            default_method: "fastembed".into(),
            default_model: "example-model".into(),
            ..ServerConfig::default()
        };
        let (_, st) = state(4, config);
        let req = EmbedRequest {
            texts: Some(vec!["x".into()]),
            ..EmbedRequest::default()
        };
        let Json(resp) = embed(State(st), Ok(Json(req))).await.unwrap();
        assert_eq!(resp.method, "fastembed");
        assert_eq!(resp.embeddings, vec![expected_row("x", 4)]);
    }

    #[tokio::test]
    async fn missing_method_without_default() {
        let (_, st) = state(4, ServerConfig::default());
        let req = EmbedRequest {
            method: None,
            ..request("", "example-model", &["x"])
        };
        let err = embed(State(st), Ok(Json(req))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "method is required");
    }

    #[tokio::test]
    async fn batch_limit() {
        let config = ServerConfig {
            max_texts: 2,
            ..ServerConfig::default()
        };
        let (mock, st) = state(4, config);
        let req = request("fastembed", "example-model", &["a", "b", "c"]);
        let err = embed(State(st), Ok(Json(req))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(mock.validations(), 0);
    }

    async fn post_body(st: AppState, content_type: Option<&str>, body: &'static str) -> ApiError {
        let mut builder = Request::builder().method("POST").uri("/embed");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let req = builder.body(Body::from(body)).unwrap();
        let payload = Json::<EmbedRequest>::from_request(req, &()).await;
        embed(State(st), payload).await.unwrap_err()
    }

    #[tokio::test]
    async fn malformed_body_is_json_error() {
        let (mock, st) = state(4, ServerConfig::default());
        let err = post_body(st, Some("application/json"), "{\"texts\": [").await;
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(!err.message.is_empty());

        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(v["error"].is_string());
        assert_eq!(mock.validations(), 0);
    }

    #[tokio::test]
    async fn missing_content_type_is_json_error() {
        let (_, st) = state(4, ServerConfig::default());
        let err = post_body(st, None, r#"{"texts":["a"]}"#).await;
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.to_lowercase().contains("content-type"));
    }

    #[test]
    fn error_classes_map_to_status() {
        assert_eq!(ApiError::from(EmbedError::EmptyInput).status, StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(EmbedError::Generation(2)).status, StatusCode::INTERNAL_SERVER_ERROR);

        let closed = ApiError::from(EmbedError::Closed);
        assert_eq!(closed.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(closed.message, EmbedError::Closed.to_string());
        let range = ApiError::from(EmbedError::IndexOutOfRange { index: 3, len: 1 });
        assert_eq!(range.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn request_json_shape() {
        let req: EmbedRequest = serde_json::from_str(
            r#"{"method":"fastembed","model":"example-model","texts":["Hello world","Another text"]}"#,
        )
        .unwrap();
        assert_eq!(req.texts.unwrap().len(), 2);

        let resp = EmbedResponse {
            method: "fastembed".into(),
            model: "example-model".into(),
            embeddings: vec![vec![0.5, 0.25]],
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["embeddings"][0][1], 0.25);
    }
}
