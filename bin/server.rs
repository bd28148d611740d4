// Recognition Wall - Web Server
// REST API over the store, the importer and the display player

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use recognition_wall::{
    admin, group_by_rank, AffiliateRecord, Config, Error, Player, PromotionInbox, RankCatalog,
    RecordStore, SqliteStore,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "recognition-server")]
#[command(about = "REST API for the recognition wall")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "RECOGNITION_WALL_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database, overrides the config file
    #[arg(long, env = "RECOGNITION_WALL_DB")]
    database: Option<PathBuf>,

    /// Address to bind, overrides the config file
    #[arg(long)]
    bind: Option<String>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<SqliteStore>>,
    player: Arc<Player>,
    /// Promotions waiting for confirm/reject
    promotions: Arc<Mutex<PromotionInbox>>,
    catalog: Arc<RankCatalog>,
    config: Arc<Config>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Serialize)]
struct RankGroup {
    rank: String,
    affiliates: Vec<AffiliateRecord>,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    search: String,
}

#[derive(Serialize)]
struct Resolved {
    count: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fail(status: StatusCode, message: String) -> Response {
    (status, Json(ApiResponse::<()>::err(message))).into_response()
}

fn error_response(err: Error) -> Response {
    let status = match &err {
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::PlayerStopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    fail(status, err.to_string())
}

fn respond<T: Serialize>(result: recognition_wall::Result<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/affiliates?search= - Admin listing grouped by rank
async fn list_affiliates(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Response {
    let store = lock(&state.store);
    respond(store.all_records().map(|records| {
        group_by_rank(&records, &state.catalog, &params.search)
            .into_iter()
            .map(|(rank, items)| RankGroup {
                rank,
                affiliates: items.into_iter().cloned().collect(),
            })
            .collect::<Vec<_>>()
    }))
}

/// GET /api/timeline - Current display sequence
async fn get_timeline(State(state): State<AppState>) -> Response {
    let store = lock(&state.store);
    respond(admin::load_timeline(&*store, &state.catalog, &state.config.schedule))
}

/// GET /api/now - What the wall is showing right now
async fn now_showing(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.player.now_showing()))
}

/// POST /api/import - Raw delimited text; additions commit, promotions wait
async fn import(State(state): State<AppState>, body: String) -> Response {
    let result = {
        let mut store = lock(&state.store);
        admin::import_batch(&mut *store, &state.catalog, &body, &state.config.import)
    };

    match result {
        Ok(summary) => {
            if lock(&state.promotions).offer(summary.pending.clone()) {
                warn!("new import replaces unresolved promotions");
            }
            (StatusCode::OK, Json(ApiResponse::ok(summary))).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// POST /api/import/confirm - Apply every pending promotion
async fn confirm_import(State(state): State<AppState>) -> Response {
    let mut promotions = lock(&state.promotions);
    let mut store = lock(&state.store);
    respond(promotions.confirm(&mut *store).map(|count| Resolved { count }))
}

/// POST /api/import/reject - Discard every pending promotion
async fn reject_import(State(state): State<AppState>) -> Response {
    respond(lock(&state.promotions).reject().map(|count| Resolved { count }))
}

/// POST /api/display/suspend - Operator switched to the admin view
async fn suspend_display(State(state): State<AppState>) -> Response {
    respond(state.player.suspend().await)
}

/// POST /api/display/resume - Back to the slideshow
async fn resume_display(State(state): State<AppState>) -> Response {
    respond(state.player.resume().await)
}

// ============================================================================
// Store → Player
// ============================================================================

/// Rebuild the timeline after every committed store change
async fn follow_store(state: AppState) {
    let mut revisions = lock(&state.store).subscribe();

    while revisions.changed().await.is_ok() {
        let timeline = {
            let store = lock(&state.store);
            admin::load_timeline(&*store, &state.catalog, &state.config.schedule)
        };

        match timeline {
            Ok(timeline) => {
                if state.player.replace_timeline(timeline).await.is_err() {
                    break;
                }
            }
            Err(e) => error!(error = %e, "timeline rebuild failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c");
    }
    info!("shutdown requested");
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recognition_wall=info,recognition_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::resolve(cli.config.as_deref()).context("loading configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    info!(path = %config.database_path.display(), records = store.count()?, "database opened");

    let catalog = RankCatalog::default();
    let timeline = admin::load_timeline(&store, &catalog, &config.schedule)?;
    let player = Player::spawn(timeline, config.schedule);

    let state = AppState {
        store: Arc::new(Mutex::new(store)),
        player: Arc::new(player),
        promotions: Arc::new(Mutex::new(PromotionInbox::new())),
        catalog: Arc::new(catalog),
        config: Arc::new(config),
    };

    let follower = tokio::spawn(follow_store(state.clone()));

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/affiliates", get(list_affiliates))
        .route("/timeline", get(get_timeline))
        .route("/now", get(now_showing))
        .route("/import", post(import))
        .route("/import/confirm", post(confirm_import))
        .route("/import/reject", post(reject_import))
        .route("/display/suspend", post(suspend_display))
        .route("/display/resume", post(resume_display))
        .with_state(state.clone());

    let app = Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let listener = tokio::net::TcpListener::bind(&state.config.server.bind)
        .await
        .with_context(|| format!("binding {}", state.config.server.bind))?;
    info!(addr = %state.config.server.bind, "server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    follower.abort();
    let _ = follower.await;

    // Handlers are gone; the follower was the last other owner of the player
    if let Ok(player) = Arc::try_unwrap(state.player) {
        player.shutdown().await?;
    }

    Ok(())
}
