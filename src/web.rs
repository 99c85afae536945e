use crate::error::{ErrorBody, StoryError};
use crate::request::{StoryRequest, StoryResponse};
use crate::upstream::{ApiKey, CompletionClient, CompletionConfig};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn};

pub const STORY_ROUTE: &str = "/api/generate-story";

/// Largest request body the story route buffers. A body at both field caps,
/// fully `\u`-escaped, still fits.
pub const BODY_LIMIT: usize = 64 * 1024;

pub type SharedState = Arc<AppState>;

#[derive(Debug, Clone)]
pub struct AppState {
    pub completions: CompletionClient,
    pub api_key: Option<ApiKey>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment {other:?} (expected development or production)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub environment: Environment,
    pub allowed_origins: Vec<String>,
    pub static_dir: Option<PathBuf>,
    pub completions: CompletionConfig,
    pub api_key: Option<ApiKey>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            environment: Environment::default(),
            allowed_origins: Vec::new(),
            static_dir: None,
            completions: CompletionConfig::default(),
            api_key: None,
        }
    }
}

impl WebConfig {
    /// Origins the CORS layer accepts. An explicit list wins; otherwise
    /// development allows the local dev server and production allows none.
    pub fn allowed_origins(&self) -> Vec<String> {
        if !self.allowed_origins.is_empty() {
            return self.allowed_origins.clone();
        }
        match self.environment {
            Environment::Development => {
                let port = self.addr.port();
                vec![
                    format!("http://localhost:{port}"),
                    format!("http://127.0.0.1:{port}"),
                ]
            }
            Environment::Production => Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let origins = config.allowed_origins();
    if config.api_key.is_none() {
        warn!("no completion API key configured; story requests will fail");
    }
    let state = Arc::new(AppState {
        completions: CompletionClient::new(config.completions.clone())?,
        api_key: config.api_key.clone(),
    });
    let router = build_router(state, &origins, config.static_dir.as_deref());
    info!(
        %config.addr,
        environment = %config.environment,
        origins = ?origins,
        static_dir = ?config.static_dir,
        upstream = %config.completions.endpoint,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<StoryError> for ApiError {
    fn from(err: StoryError) -> Self {
        Self {
            status: StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: err.to_body(),
        }
    }
}

// Oversized bodies keep their 413 but answer with the same JSON shape as a
// field over its cap.
impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        let status = rejection.status();
        let err = if status == StatusCode::PAYLOAD_TOO_LARGE {
            StoryError::TooLong
        } else {
            StoryError::InvalidFormat
        };
        Self {
            status: if status.is_client_error() {
                status
            } else {
                StatusCode::BAD_REQUEST
            },
            body: err.to_body(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn build_router(state: SharedState, origins: &[String], static_dir: Option<&Path>) -> Router {
    let api = Router::new()
        .route(
            STORY_ROUTE,
            post(generate_story)
                .options(preflight)
                .fallback(method_not_allowed)
                .layer(DefaultBodyLimit::max(BODY_LIMIT)),
        )
        .route("/healthz", get(health))
        .with_state(state);
    let router = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };
    router.layer(cors_layer(origins)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().include_headers(true))
            .on_response(DefaultOnResponse::new().include_headers(true)),
    )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%origin, %err, "ignoring unusable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(false)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn generate_story(
    State(state): State<SharedState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<StoryResponse>, ApiError> {
    let body = body.inspect_err(|rejection| {
        warn!(status = %rejection.status(), "unreadable story request body");
    })?;
    let request = StoryRequest::from_json_slice(&body).inspect_err(|err| {
        warn!(%err, "rejected story request");
    })?;
    let Some(key) = state.api_key.as_ref() else {
        error!("completion API key missing; cannot generate story");
        return Err(StoryError::Configuration.into());
    };
    let story = state
        .completions
        .complete(key, &request)
        .await
        .inspect_err(|err| {
            error!(kind = %err.kind(), error = %err, "story generation failed");
        })?;
    info!(bytes = story.len(), "story generated");
    Ok(Json(StoryResponse { story }))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorBody::new("Method not allowed")),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "storytime-web" }))
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use axum::{body, body::Body, http::Request};
    use httpmock::prelude::*;
    use serde_json::Value;
    use tower::ServiceExt;

    const ORIGIN: &str = "http://localhost:8080";

    fn test_router(upstream: &MockServer, api_key: Option<&str>) -> Router {
        let completions = CompletionClient::new(CompletionConfig {
            endpoint: upstream.url("/v1/chat/completions"),
            ..CompletionConfig::default()
        })
        .unwrap();
        let state = Arc::new(AppState {
            completions,
            api_key: api_key.and_then(ApiKey::new),
        });
        build_router(state, &[ORIGIN.to_string()], None)
    }

    fn post_story(body: impl Into<Body>) -> Request<Body> {
        Request::post(STORY_ROUTE)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    fn valid_body() -> String {
        json!({
            "trainingDetails": "Giving feedback to peers",
            "personalStatement": "I restore old motorbikes"
        })
        .to_string()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_upstream() {
        let upstream = MockServer::start_async().await;
        let mock = upstream
            .mock_async(|when, then| {
                when.method(POST);
                then.status(500);
            })
            .await;

        let too_long = "x".repeat(2001);
        let cases = [
            (
                json!({ "personalStatement": "bees" }).to_string(),
                "Missing required fields",
            ),
            (
                json!({ "trainingDetails": 12, "personalStatement": "bees" }).to_string(),
                "Invalid input format",
            ),
            (
                json!({ "trainingDetails": too_long, "personalStatement": "bees" }).to_string(),
                "Input too long",
            ),
            ("not json at all".to_string(), "Invalid input format"),
        ];
        for (body, expected) in cases {
            let response = test_router(&upstream, Some("test-key"))
                .oneshot(post_story(body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let payload = json_body(response).await;
            assert_eq!(payload["error"], expected);
            assert_eq!(payload["kind"], "invalid_input");
        }
        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn oversized_body_gets_a_json_error() {
        let upstream = MockServer::start_async().await;
        let mock = upstream
            .mock_async(|when, then| {
                when.method(POST);
                then.status(500);
            })
            .await;

        let huge = json!({
            "trainingDetails": "x".repeat(BODY_LIMIT),
            "personalStatement": "bees"
        })
        .to_string();
        let response = test_router(&upstream, Some("test-key"))
            .oneshot(post_story(huge))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let payload = json_body(response).await;
        assert_eq!(payload["error"], "Input too long");
        assert_eq!(payload["kind"], "invalid_input");
        assert_eq!(mock.hits_async().await, 0);

        let escaped = json!({
            "trainingDetails": "\u{1F389}".repeat(1000),
            "personalStatement": "a<".repeat(500)
        })
        .to_string()
        .replace('<', "\\u003c");
        assert!(escaped.len() < BODY_LIMIT);
        let response = test_router(&upstream, None)
            .oneshot(post_story(escaped))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], "API configuration error");
    }

    #[tokio::test]
    async fn options_returns_empty_ok() {
        let upstream = MockServer::start_async().await;
        let response = test_router(&upstream, None)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri(STORY_ROUTE)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn other_methods_are_rejected() {
        let upstream = MockServer::start_async().await;
        for method in [Method::GET, Method::PUT, Method::DELETE] {
            let response = test_router(&upstream, Some("test-key"))
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(STORY_ROUTE)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(
                json_body(response).await,
                json!({ "error": "Method not allowed" })
            );
        }
    }

    #[tokio::test]
    async fn returns_trimmed_story() {
        let upstream = MockServer::start_async().await;
        let mock = upstream
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer test-key");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "content": "  <div>story</div>  " } }]
                }));
            })
            .await;

        let response = test_router(&upstream, Some("test-key"))
            .oneshot(post_story(valid_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "story": "<div>story</div>" }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn reply_without_choices_is_a_format_error() {
        let upstream = MockServer::start_async().await;
        upstream
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({ "id": "cmpl-1", "object": "chat.completion" }));
            })
            .await;

        let response = test_router(&upstream, Some("test-key"))
            .oneshot(post_story(valid_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let payload = json_body(response).await;
        assert_eq!(payload["error"], "Invalid response format from OpenAI API");
        assert_eq!(payload["kind"], "malformed_upstream_response");
    }

    #[tokio::test]
    async fn upstream_failure_hides_detail_and_tags_rate_limits() {
        let upstream = MockServer::start_async().await;
        upstream
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429)
                    .json_body(json!({ "error": { "message": "Rate limit reached for org-123" } }));
            })
            .await;

        let response = test_router(&upstream, Some("test-key"))
            .oneshot(post_story(valid_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let payload = json_body(response).await;
        assert_eq!(payload["error"], "Story generation temporarily unavailable");
        assert_eq!(payload["kind"], json!(ErrorKind::RateLimited));
        assert!(!payload.to_string().contains("org-123"));
    }

    #[tokio::test]
    async fn missing_key_is_a_configuration_error() {
        let upstream = MockServer::start_async().await;
        let mock = upstream
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200);
            })
            .await;

        let response = test_router(&upstream, None)
            .oneshot(post_story(valid_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let payload = json_body(response).await;
        assert_eq!(payload["error"], "API configuration error");
        assert_eq!(payload["kind"], "configuration");
        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn validation_runs_before_the_key_check() {
        let upstream = MockServer::start_async().await;
        let response = test_router(&upstream, None)
            .oneshot(post_story("{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cors_allows_only_listed_origins() {
        let upstream = MockServer::start_async().await;
        let preflight = |origin: &str| {
            Request::builder()
                .method(Method::OPTIONS)
                .uri(STORY_ROUTE)
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap()
        };

        let allowed = test_router(&upstream, None)
            .oneshot(preflight(ORIGIN))
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
        assert_eq!(
            allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            ORIGIN
        );
        let methods = allowed.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap();
        assert!(methods.contains("POST"));
        assert!(
            !allowed
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
        );

        let denied = test_router(&upstream, None)
            .oneshot(preflight("https://evil.example"))
            .await
            .unwrap();
        assert!(
            !denied
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }

    #[tokio::test]
    async fn healthz_reports_service() {
        let upstream = MockServer::start_async().await;
        let response = test_router(&upstream, None)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(
            json_body(response).await,
            json!({ "status": "ok", "service": "storytime-web" })
        );
    }

    #[test]
    fn development_origins_follow_the_bind_port() {
        let config = WebConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            ..WebConfig::default()
        };
        assert_eq!(
            config.allowed_origins(),
            vec!["http://localhost:3000", "http://127.0.0.1:3000"]
        );

        let production = WebConfig {
            environment: Environment::Production,
            ..WebConfig::default()
        };
        assert!(production.allowed_origins().is_empty());

        let explicit = WebConfig {
            environment: Environment::Production,
            allowed_origins: vec!["https://stories.example".to_string()],
            ..WebConfig::default()
        };
        assert_eq!(explicit.allowed_origins(), vec!["https://stories.example"]);
    }

    #[test]
    fn environment_parses_short_names() {
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!(
            "Development".parse::<Environment>(),
            Ok(Environment::Development)
        );
        assert!("staging".parse::<Environment>().is_err());
    }
}
