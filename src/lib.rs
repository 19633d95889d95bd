//! Postern is an identity bootstrap and TOTP authentication service.

#![forbid(unsafe_code)]
#![deny(unused_mut)]

mod cache;
pub mod config;
pub mod error;
pub mod flow;
pub mod identity;
mod qr;
mod router;
pub mod session;
pub mod telemetry;
mod totp;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::cache::CacheStore;
use crate::flow::AuthFlow;
use crate::identity::IdentityRepository;
use crate::session::SessionManager;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Local-mode state backed by a scoped cache under `dir`.
#[cfg(test)]
pub fn test_state(dir: &std::path::Path) -> AppState {
    let config = Arc::new(config::Configuration::default());
    let cache = CacheStore::new(dir.join("cache.json"));
    let repository = Arc::new(IdentityRepository::local(cache.clone()));
    let sessions = SessionManager::new(cache);
    let flow = AuthFlow::new(
        Arc::clone(&repository),
        sessions.clone(),
        config.issuer().to_owned(),
        config.totp.clone(),
    );

    AppState {
        config,
        repository,
        sessions,
        flow: Arc::new(tokio::sync::Mutex::new(flow)),
        metrics: None,
    }
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub repository: Arc<IdentityRepository>,
    pub sessions: SessionManager,
    /// Single authentication flow per session context. `try_lock` keeps the
    /// state machine non-reentrant.
    pub flow: Arc<tokio::sync::Mutex<AuthFlow>>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to Prometheus rendering.
        .route("/metrics", get(router::status::metrics))
        // `POST /login` goes to the address form.
        .route("/login", post(router::login::address))
        // `POST /login/code` completes enrollment or verification.
        .route("/login/code", post(router::login::code))
        // `POST /login/back` returns to the address form.
        .route("/login/back", post(router::login::back))
        // Session resume and teardown.
        .route("/session", get(router::session::restore))
        .route("/logout", post(router::session::logout))
        .nest("/users", router::users::router(state.clone()))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
///
/// The durable backend is probed exactly once here; the resulting
/// repository mode holds for the lifetime of the process.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file once, keep it in memory.
    let config = config::Configuration::default().read()?;

    let cache = CacheStore::new(config.cache.path.clone());
    let repository =
        Arc::new(IdentityRepository::probe(config.postgres.as_ref(), cache.clone()).await);
    let sessions = SessionManager::new(cache);

    let flow = AuthFlow::new(
        Arc::clone(&repository),
        sessions.clone(),
        config.issuer().to_owned(),
        config.totp.clone(),
    );

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder unavailable");
            None
        },
    };

    Ok(AppState {
        config,
        repository,
        sessions,
        flow: Arc::new(tokio::sync::Mutex::new(flow)),
        metrics,
    })
}
