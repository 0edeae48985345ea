pub mod api;
pub mod config;
pub mod cors;
pub mod error;
pub mod reaper;
pub mod reconciler;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod session;
pub mod ws;

use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{ErrorCode, RelayError, REQUEST_ID_HEADER};
use crate::reaper::Reaper;
use crate::reconciler::UpdateReconciler;
use crate::registry::ConnectionRegistry;
use crate::relay::BroadcastRelay;
use crate::rooms::RoomStore;
use crate::session::SessionManager;

pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Shared handles for every request and connection task. The stores live as
/// long as the server process.
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomStore>,
    pub sessions: SessionManager,
    pub reconciler: UpdateReconciler,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::default());
        let rooms = Arc::new(RoomStore::default());
        let relay = BroadcastRelay::new(Arc::clone(&registry));
        let sessions = SessionManager::new(Arc::clone(&registry), Arc::clone(&rooms), relay.clone());
        let reconciler = UpdateReconciler::new(Arc::clone(&rooms), relay, config.merge_strategy);

        Self { config: Arc::new(config), registry, rooms, sessions, reconciler }
    }

    pub fn reaper(&self) -> Reaper {
        Reaper::new(
            Arc::clone(&self.rooms),
            self.config.reaper_interval,
            self.config.room_grace_period,
        )
    }
}

pub fn build_router(state: RelayState) -> Router {
    let cors = cors::cors_layer(state.config.cors_origins.as_deref());
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(state.clone()))
            .merge(api::router(state)),
    )
    .layer(cors)
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, request_id = ?request_id, "request handling panicked");
            let relay_error = RelayError::from_code(ErrorCode::InternalError);
            match request_id {
                Some(request_id) => relay_error.with_request_id(request_id).into_response(),
                None => relay_error.into_response(),
            }
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, RelayState, MAX_REQUEST_BODY_BYTES};
    use crate::config::{LogFormat, RelayConfig};
    use crate::reconciler::MergeStrategy;
    use crate::registry::ConnectionOutbound;

    fn test_config() -> RelayConfig {
        RelayConfig {
            listen_addr: ([127, 0, 0, 1], 0).into(),
            room_grace_period: Duration::from_secs(30),
            reaper_interval: Duration::from_secs(3600),
            volatile_buffer: 8,
            max_frame_bytes: 64 * 1024,
            merge_strategy: MergeStrategy::ReplaceAll,
            cors_origins: None,
            log_filter: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("x-request-id", "req-test")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
        (status, serde_json::from_slice(&body).expect("body should be json"))
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = build_router(RelayState::new(test_config()))
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let (status, body) =
            get_json(build_router(RelayState::new(test_config())), "/v1/rooms/nowhere").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["request_id"], "req-test");
        assert_eq!(body["error"]["details"]["roomId"], "nowhere");
    }

    #[tokio::test]
    async fn joined_room_reports_members_and_version() {
        let state = RelayState::new(test_config());
        let (outbound, _receivers) = ConnectionOutbound::channel(4);
        let connection_id = state.registry.register(outbound).await;
        state.sessions.join(connection_id, "R1", None).await.expect("join should succeed");
        state.reconciler.clear("R1", connection_id).await.expect("clear should succeed");

        let (status, body) = get_json(build_router(state), "/v1/rooms/R1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["roomId"], "R1");
        assert_eq!(body["exists"], true);
        assert_eq!(body["memberCount"], 1);
        assert_eq!(body["version"], 1);
    }

    #[tokio::test]
    async fn panicking_route_returns_internal_error_envelope() {
        async fn panic_route() -> &'static str {
            panic!("room summary exploded");
        }

        let (status, body) =
            get_json(apply_middleware(Router::new().route("/panic", get(panic_route))), "/panic").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["retryable"], true);
        assert_eq!(body["error"]["request_id"], "req-test");
    }

    #[tokio::test]
    async fn room_summary_echoes_caller_request_id() {
        let state = RelayState::new(test_config());
        let (outbound, _receivers) = ConnectionOutbound::channel(4);
        let connection_id = state.registry.register(outbound).await;
        state.sessions.join(connection_id, "R1", None).await.expect("join should succeed");

        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/v1/rooms/R1")
                    .header("x-request-id", "req-summary")
                    .body(Body::empty())
                    .expect("room request should build"),
            )
            .await
            .expect("room request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-request-id").and_then(|value| value.to_str().ok()),
            Some("req-summary")
        );
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
