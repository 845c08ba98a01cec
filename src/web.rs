use crate::{
    app::App,
    auth::{resolve_owner, AuthError},
    config::TokenEntry,
    search::{QueryOrchestrator, SearchError, SearchHit, SearchMode, SearchQuery},
};
use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, WWW_AUTHENTICATE},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use indicatif::ProgressBar;
use serde::Deserialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Response header carrying the hybrid degradation flag.
pub const PARTIAL_HEADER: &str = "x-search-partial";

#[derive(Clone)]
pub struct SharedState {
    pub orchestrator: Arc<QueryOrchestrator>,
    pub tokens: Arc<Vec<TokenEntry>>,
}

pub fn router(state: SharedState, cors_origins: &[String]) -> anyhow::Result<Router> {
    Ok(Router::new()
        .route("/api/v1/search", post(search))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(cors_layer(cors_origins)?)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let origins = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid cors origin {origin:?}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(PARTIAL_HEADER)]))
}

/// Serves the search API until Ctrl-C or SIGTERM.
pub async fn serve(app: Arc<App>) -> anyhow::Result<()> {
    let config = app.config().clone();

    if config.tokens.is_empty() {
        log::warn!("no tokens configured, every search request will be rejected");
    }

    let state = SharedState {
        orchestrator: Arc::new(app.orchestrator()),
        tokens: Arc::new(config.tokens.clone()),
    };
    let router = router(state, &config.cors_origins)?;

    if app.semantic_enabled() {
        let warmup_timeout = Duration::from_secs(config.semantic_search.download_timeout_secs);
        let sync_interval = Duration::from_secs(config.semantic_search.sync_interval_secs);
        tokio::spawn(prepare_semantic(app.clone(), warmup_timeout, sync_interval));
    }

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    log::info!("listening on {}", config.listen);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    log::info!("server stopped");
    Ok(())
}

/// Loads the embedding model, brings the vector index up to date, then keeps
/// it in step with bookmarks written by other processes.
///
/// Searches are served throughout; semantic retrieval fails (and hybrid
/// degrades to keyword results) until the model is ready.
async fn prepare_semantic(app: Arc<App>, warmup_timeout: Duration, sync_interval: Duration) {
    let warm = tokio::task::spawn_blocking({
        let app = app.clone();
        move || app.warm_up()
    });

    match tokio::time::timeout(warmup_timeout, warm).await {
        Ok(Ok(Ok(()))) => log::info!("embedding model ready"),
        Ok(Ok(Err(err))) => {
            log::error!("{err:#}");
            return;
        }
        Ok(Err(err)) => {
            log::error!("model warm-up task failed: {err}");
            return;
        }
        Err(_) => {
            log::warn!(
                "embedding model not ready after {}s, skipping startup reindex",
                warmup_timeout.as_secs()
            );
            return;
        }
    }

    let reconcile = tokio::task::spawn_blocking({
        let app = app.clone();
        move || app.reconcile(&ProgressBar::hidden())
    })
    .await;
    match reconcile {
        Ok(Ok(result)) => log::info!(
            "vector index up to date: {} embedded, {} removed, {} failed",
            result.embedded,
            result.removed,
            result.failed
        ),
        Ok(Err(err)) => log::error!("startup reindex failed: {err:#}"),
        Err(err) => log::error!("startup reindex task failed: {err}"),
    }

    let mut ticker = tokio::time::interval(sync_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let sync = tokio::task::spawn_blocking({
            let app = app.clone();
            move || app.sync()
        })
        .await;
        match sync {
            Ok(Ok(Some(result))) => log::info!(
                "vector index synced: {} embedded, {} removed, {} failed",
                result.embedded,
                result.removed,
                result.failed
            ),
            Ok(Ok(None)) => {}
            Ok(Err(err)) => log::warn!("vector index sync failed: {err:#}"),
            Err(err) => log::error!("vector index sync task failed: {err}"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("shutdown signal received");
}

#[derive(Debug)]
pub enum HttpError {
    Unauthorized(AuthError),
    BadRequest(String),
    Search(SearchError),
    NotFound,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self {
            HttpError::Unauthorized(err) => (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, "Bearer")],
                Json(json!({"detail": err.to_string()})),
            )
                .into_response(),
            HttpError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({"detail": detail}))).into_response()
            }
            HttpError::Search(err @ SearchError::InvalidQuery(_)) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": err.to_string()})),
            )
                .into_response(),
            HttpError::Search(err @ SearchError::RetrievalUnavailable(_)) => {
                log::error!("{err}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(RETRY_AFTER, "1")],
                    Json(json!({"detail": err.to_string()})),
                )
                    .into_response()
            }
            HttpError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"detail": "not found"}))).into_response()
            }
        }
    }
}

impl From<AuthError> for HttpError {
    fn from(err: AuthError) -> Self {
        HttpError::Unauthorized(err)
    }
}

impl From<SearchError> for HttpError {
    fn from(err: SearchError) -> Self {
        HttpError::Search(err)
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        HttpError::BadRequest(rejection.body_text())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,

    /// Defaults to hybrid
    #[serde(default)]
    pub mode: Option<SearchMode>,

    /// Defaults to `search.default_limit`
    #[serde(default)]
    pub limit: Option<i64>,

    /// Minimum fused score, defaults to `search.default_threshold`
    #[serde(default)]
    pub threshold: Option<f64>,
}

async fn search(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HttpError> {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let owner = resolve_owner(&state.tokens, authorization)?;

    let Json(payload) = payload?;
    log::debug!("payload: {payload:?}");

    let defaults = state.orchestrator.config();
    let query = SearchQuery::new(
        payload.query,
        payload.mode.unwrap_or_default(),
        payload.limit.unwrap_or(defaults.default_limit),
        payload.threshold.unwrap_or(defaults.default_threshold),
    )?;

    let response = state.orchestrator.search(&query, owner).await?;
    let partial = if response.partial { "true" } else { "false" };

    Ok((
        [(HeaderName::from_static(PARTIAL_HEADER), partial)],
        Json::<Vec<SearchHit>>(response.hits),
    ))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

async fn not_found() -> HttpError {
    HttpError::NotFound
}
