//! Purpose: Provide the loopback HTTP server behind the inspector page.
//! Exports: `ServeConfig`, `serve`, `router`, `validate_config`.
//! Role: Axum server exposing the request store to the UI and forwarding page fetches.
//! Invariants: Page fetches pass through `Intercept` exactly once before reaching upstream.
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: Compressed bodies and inflated payloads are both size-capped.
//! Notes: JSON error envelopes carry stable kind names; ids in paths are 1-based.

use axum::extract::{DefaultBodyLimit, Path as AxumPath, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::future::poll_fn;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tower_layer::Layer;
use tower_service::Service;
use tracing_subscriber::EnvFilter;
use url::Url;

use wa_inspect::api::{
    Error, ErrorKind, FetchFuture, FetchResponse, Inspector, Intercept, InterceptLayer,
    OutboundRequest, UreqFetch,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub target: String,
    pub max_body_bytes: u64,
    pub max_inflated_bytes: u64,
    pub upstream_timeout_ms: u64,
}

struct AppState<S> {
    inspector: Inspector,
    upstream: Intercept<S>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let body_limit = usize::try_from(config.max_body_bytes).map_err(|_| {
        Error::new(ErrorKind::Usage).with_message("--max-body-bytes does not fit in memory")
    })?;

    let inspector = Inspector::new().with_max_inflated_bytes(config.max_inflated_bytes);
    let fetch = UreqFetch::new(Duration::from_millis(config.upstream_timeout_ms));
    let upstream = InterceptLayer::new(inspector.clone())
        .with_target(&config.target)
        .layer(fetch);
    let app = router(inspector, upstream).layer(DefaultBodyLimit::max(body_limit));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind inspector address")
                .with_url(config.bind.to_string())
                .with_source(err)
        })?;
    tracing::info!(
        bind = %config.bind,
        target = %config.target,
        max_inflated_bytes = config.max_inflated_bytes,
        "inspector listening"
    );

    // In-flight fetches are bounded by the upstream timeout, so draining cannot hang.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            tracing::info!("shutdown requested, draining in-flight fetches");
        })
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("inspector server stopped unexpectedly")
                .with_source(err)
        })
}

pub fn router<S>(inspector: Inspector, upstream: Intercept<S>) -> Router
where
    S: Service<OutboundRequest, Response = FetchResponse, Error = Error, Future = FetchFuture>
        + Clone
        + Send
        + Sync
        + 'static,
{
    let state = Arc::new(AppState {
        inspector,
        upstream,
    });
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v0/requests", get(list_requests::<S>).delete(clear_requests::<S>))
        .route("/v0/requests/:id", get(get_request::<S>))
        .route("/v0/requests/:id/select", post(select_request::<S>))
        .route("/v0/status", get(status::<S>))
        .route("/v0/website-actions/check", post(check_website_actions::<S>))
        .route("/v0/fetch", post(forward_fetch::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !config.allow_non_loopback && !is_loopback(config.bind.ip()) {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint(
                "The inspector exposes captured payloads; bind 127.0.0.1 or pass --allow-non-loopback.",
            ));
    }

    require_positive(
        "--max-body-bytes",
        config.max_body_bytes,
        "Tracking bodies are small; 1048576 is plenty.",
    )?;
    if usize::try_from(config.max_body_bytes).is_err() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes does not fit in memory")
            .with_hint("Pick a body cap below the platform's address space."));
    }
    require_positive(
        "--max-inflated-bytes",
        config.max_inflated_bytes,
        "Decoded payloads are a few KiB; 16777216 leaves ample headroom.",
    )?;
    require_positive(
        "--upstream-timeout-ms",
        config.upstream_timeout_ms,
        "Give forwarded pixel calls time to finish, e.g. 30000.",
    )?;

    let target = Url::parse(&config.target).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("--target must be an absolute URL")
            .with_url(config.target.clone())
            .with_source(err)
    })?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--target must use http or https")
            .with_url(config.target.clone()));
    }

    Ok(())
}

fn require_positive(flag: &str, value: u64, hint: &str) -> Result<(), Error> {
    if value > 0 {
        return Ok(());
    }
    Err(Error::new(ErrorKind::Usage)
        .with_message(format!("{flag} must be greater than zero"))
        .with_hint(hint))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(err) => tracing::warn!(error = %err, "SIGTERM unavailable, stopping on ctrl-c only"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

async fn healthz() -> Response {
    json_response(json!({ "ok": true }))
}

async fn list_requests<S>(State(state): State<Arc<AppState<S>>>) -> Response {
    json_response(json!({ "requests": state.inspector.list() }))
}

async fn get_request<S>(
    State(state): State<Arc<AppState<S>>>,
    AxumPath(id): AxumPath<u64>,
) -> Response {
    match state.inspector.get(id) {
        Some(request) => json_response(json!({ "request": request })),
        None => error_response(
            Error::new(ErrorKind::NotFound)
                .with_message("request not found")
                .with_id(id),
        ),
    }
}

async fn select_request<S>(
    State(state): State<Arc<AppState<S>>>,
    AxumPath(id): AxumPath<u64>,
) -> Response {
    match state.inspector.select(id) {
        Ok(request) => json_response(json!({
            "request": request,
            "status": state.inspector.status(),
        })),
        Err(err) => error_response(err),
    }
}

async fn clear_requests<S>(State(state): State<Arc<AppState<S>>>) -> Response {
    state.inspector.clear();
    json_response(json!({ "ok": true }))
}

async fn status<S>(State(state): State<Arc<AppState<S>>>) -> Response {
    json_response(json!({ "status": state.inspector.status() }))
}

async fn check_website_actions<S>(State(state): State<Arc<AppState<S>>>) -> Response {
    let website_actions = state.inspector.check_website_actions();
    json_response(json!({ "website_actions": website_actions }))
}

async fn forward_fetch<S>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<OutboundRequest>,
) -> Response
where
    S: Service<OutboundRequest, Response = FetchResponse, Error = Error, Future = FetchFuture>
        + Clone
        + Send
        + Sync
        + 'static,
{
    let mut upstream = state.upstream.clone();
    let result = match poll_fn(|cx| upstream.poll_ready(cx)).await {
        Ok(()) => upstream.call(request).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(response) => json_response(json!({ "response": response })),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
}

fn json_response(payload: serde_json::Value) -> Response {
    versioned(Json(payload).into_response())
}

fn versioned(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert("wa-inspect-version", HeaderValue::from_static("0"));
    response
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), error = %err, "inspector route failed");
    }
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            url: err.url().map(str::to_string),
            id: err.id(),
        },
    };
    versioned((status, Json(body)).into_response())
}
