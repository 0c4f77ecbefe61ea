// Main entry point for the content enrichment service

use content_enrichment::{
    build_analyzer,
    core::{
        types::{AnalysisItem, CostSummary, PostAggregate, PromptVariant, Strategy},
        Config, RunError,
    },
    orchestration::{RunObserver, TracingObserver},
    services::OpenAiClient,
    utils::Metrics,
};

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    client: Arc<OpenAiClient>,
    observer: Arc<dyn RunObserver>,
    metrics: Metrics,
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    strategy: Strategy,
    variant: PromptVariant,
    items: Vec<AnalysisItem>,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    posts: Vec<PostAggregate>,
    cost: CostSummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new()?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "content_enrichment={},tower_http=warn",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== CONTENT ENRICHMENT ===");
    info!(
        "Config: model={} concurrency={} delay={}ms poll={}s timeout={}s",
        config.model(),
        config.concurrency.concurrency,
        config.concurrency.inter_batch_delay_ms,
        config.batch_job.poll_interval_secs,
        config.batch_job.timeout_secs
    );

    let metrics = Metrics::new();
    let client = Arc::new(OpenAiClient::new(config.clone(), Some(metrics.clone()))?);
    let observer: Arc<dyn RunObserver> = Arc::new(TracingObserver::new(Some(metrics.clone())));

    let state = AppState {
        config: config.clone(),
        client,
        observer,
        metrics,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/analyze", post(analyze))
        .with_state(state)
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("Server starting on http://{}", addr);
    info!("  GET  /health   - Health check");
    info!("  GET  /metrics  - Prometheus metrics");
    info!("  GET  /stats    - Detailed statistics");
    info!("  POST /analyze  - Analyze a list of images");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    serde_json::to_value(state.metrics.snapshot())
        .map(Json)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialize metrics: {}", e),
            )
        })
}

/// Run one analysis over the submitted items.
///
/// The run executes on its own task; if the client goes away the drop guard
/// cancels it, which lets a batch run cancel its remote job.
async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, (StatusCode, String)> {
    let start_time = std::time::Instant::now();
    info!(
        "Received {} request for {} items ({})",
        request.strategy,
        request.items.len(),
        request.variant
    );

    let analyzer = build_analyzer(
        request.strategy,
        request.variant,
        &state.config,
        state.client.clone(),
        state.observer.clone(),
    );

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let items = request.items;

    let run = tokio::spawn(async move {
        let posts = analyzer.process(items, &cancel).await;
        (posts, analyzer.cost_summary())
    });

    let (posts, cost) = run.await.map_err(|e| {
        error!("Analysis task failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Analysis task failed: {}", e),
        )
    })?;

    let posts = posts.map_err(|e| {
        error!("Analysis run aborted: {}", e);
        (status_for(&e), format!("Analysis aborted: {}", e))
    })?;

    info!(
        "Request completed in {:.2}s: {} posts, {} images, ${:.6}",
        start_time.elapsed().as_secs_f64(),
        posts.len(),
        cost.processed_count,
        cost.total_cost
    );

    Ok(Json(AnalyzeResponse { posts, cost }))
}

fn status_for(error: &RunError) -> StatusCode {
    match error {
        RunError::BatchTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RunError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        RunError::TaskFile(_) | RunError::TaskJoinFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RunError::BatchSubmit { .. }
        | RunError::BatchJobFailed { .. }
        | RunError::BatchPoll { .. }
        | RunError::BatchDownload { .. }
        | RunError::InvalidTransition { .. } => StatusCode::BAD_GATEWAY,
    }
}
