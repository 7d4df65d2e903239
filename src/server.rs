use crate::config::BridgeConfig;
use crate::error::ProxyError;
use crate::proxy;
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: BridgeConfig,
    pub client: reqwest::Client,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/:provider/v1/messages", post(handle_provider_messages))
        .route("/v1/models", get(handle_models))
        .route("/:provider/v1/models", get(handle_provider_models))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    dispatch(state, None, body).await
}

async fn handle_provider_messages(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Response {
    dispatch(state, Some(provider), body).await
}

async fn dispatch(state: Arc<AppState>, provider: Option<String>, body: Bytes) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Failed to parse request: {}", e);
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {}", e));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);

    tracing::info!(
        provider = provider.as_deref().unwrap_or(state.config.default_provider.as_str()),
        model = %req.model,
        streaming = is_streaming,
        messages = req.messages.len(),
        "Request"
    );

    if is_streaming {
        handle_streaming(&state, provider.as_deref(), &req)
    } else {
        handle_non_streaming(&state, provider.as_deref(), &req).await
    }
}

async fn handle_non_streaming(
    state: &AppState,
    provider: Option<&str>,
    req: &MessagesRequest,
) -> Response {
    match proxy::proxy_non_streaming(req, provider, &state.config, &state.client).await {
        Ok(proxy::ProxyResult::Success(resp)) => Json(resp).into_response(),
        Ok(proxy::ProxyResult::Error(err, status_code)) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(err)).into_response()
        }
        Err(e) => error_response(e),
    }
}

fn handle_streaming(state: &AppState, provider: Option<&str>, req: &MessagesRequest) -> Response {
    let rx = match proxy::proxy_streaming(req, provider, &state.config, &state.client) {
        Ok(rx) => rx,
        Err(e) => return error_response(e),
    };

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(e: ProxyError) -> Response {
    let (status, err) = match e {
        ProxyError::UnknownProvider { ref name } => (
            StatusCode::NOT_FOUND,
            ErrorResponse::not_found(format!("Unknown provider: {}", name)),
        ),
        ProxyError::Config { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::api_error(e.to_string()),
        ),
        other => (
            StatusCode::BAD_GATEWAY,
            ErrorResponse::api_error(format!("Proxy error: {}", other)),
        ),
    };

    tracing::error!(status = status.as_u16(), "{}", err.error.message);
    (status, Json(err)).into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut names: Vec<&String> = state.config.providers.keys().collect();
    names.sort();
    let models = names
        .into_iter()
        .flat_map(|name| model_entries(&state.config, name))
        .collect();

    Json(model_list(models))
}

async fn handle_provider_models(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Response {
    if !state.config.providers.contains_key(&provider) {
        return error_response(ProxyError::unknown_provider(provider));
    }
    Json(model_list(model_entries(&state.config, &provider))).into_response()
}

fn model_entries(config: &BridgeConfig, provider: &str) -> Vec<serde_json::Value> {
    let created = chrono::Utc::now().timestamp();
    let mut ids: Vec<&str> = config
        .providers
        .get(provider)
        .map(|p| p.advertised_models().collect())
        .unwrap_or_default();
    ids.sort_unstable();

    ids.into_iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": provider,
            })
        })
        .collect()
}

fn model_list(models: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "data": models, "object": "list" })
}
