use anyhow::Result;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use clap::Parser;
use questlog_engine::{
    BoardAssembler, ChainBuilder, QuestError, QuestLifecycle, QuestStore, ReconciliationEngine,
};
use questlog_schemas::{
    CreateQuestInput, LifeChangeSignals, MilestoneId, ProgressSignal, QuestId, UserId,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};

#[derive(Debug, Parser)]
#[command(name = "questlog-engine", about = "QuestLog quest engine service")]
struct Args {
    /// Path to the sqlite database; falls back to DB_PATH, then the platform default
    #[arg(long)]
    db_path: Option<String>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:21971")]
    addr: String,
}

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<QuestStore>>,
    lifecycle: Arc<QuestLifecycle>,
    chains: Arc<ChainBuilder>,
    boards: Arc<BoardAssembler>,
    reconciler: Arc<ReconciliationEngine>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("QuestLog Engine Service v0.1.0");

    let args = Args::parse();

    let db_path = args
        .db_path
        .or_else(|| std::env::var("DB_PATH").ok())
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{}/Library/Application Support/QuestLog/questlog.db", home)
        });

    // Create directory if it doesn't exist
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = QuestStore::new(&db_path)?;
    info!("Quest store initialized at: {}", db_path);

    let state = AppState {
        store: Arc::new(Mutex::new(store)),
        lifecycle: Arc::new(QuestLifecycle::new()),
        chains: Arc::new(ChainBuilder::new()),
        boards: Arc::new(BoardAssembler::new()),
        reconciler: Arc::new(ReconciliationEngine::new()),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))

        // Quest lifecycle
        .route("/quests", post(create_quest).get(list_quests))
        .route("/quests/:quest_id", get(get_quest).delete(delete_quest))
        .route("/quests/:quest_id/history", get(get_history))
        .route("/quests/:quest_id/start", post(start_quest))
        .route("/quests/:quest_id/pause", post(pause_quest))
        .route("/quests/:quest_id/complete", post(complete_quest))
        .route("/quests/:quest_id/abandon", post(abandon_quest))
        .route("/quests/:quest_id/progress", post(update_progress))
        .route(
            "/quests/:quest_id/milestones/:milestone_id/achieve",
            post(achieve_milestone),
        )
        .route("/quests/:quest_id/reflect", post(reflect_on_quest))
        .route("/quests/:quest_id/archive", post(archive_quest))

        // Derived views
        .route("/board", get(get_board))
        .route("/analytics", get(get_analytics))
        .route("/chains", get(get_chains))

        // Signal reconciliation
        .route("/reconcile/progress", post(reconcile_progress))
        .route("/reconcile/life-changes", post(reconcile_life_changes))

        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    info!("Starting HTTP server on {}", args.addr);

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn quest_error(e: QuestError) -> (StatusCode, String) {
    let status = match &e {
        QuestError::NotFound => StatusCode::NOT_FOUND,
        QuestError::InvalidTransition(_) => StatusCode::CONFLICT,
        QuestError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
        QuestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!("Request failed: {}", e);
    (status, e.to_string())
}

#[derive(Debug, Deserialize)]
struct OwnerQuery {
    user_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct NoteBody {
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReflectBody {
    note: String,
}

#[derive(Debug, Deserialize)]
struct ProgressBody {
    percent: u8,
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "questlog-engine",
        "status": "healthy",
        "version": "0.1.0"
    }))
}

async fn get_stats(
    State(state): State<AppState>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let quests = store.count_quests(&user_id).map_err(quest_error)?;
    let history_events = store.count_history(&user_id).map_err(quest_error)?;

    Ok(Json(serde_json::json!({
        "quests": quests,
        "history_events": history_events
    })))
}

async fn create_quest(
    State(state): State<AppState>,
    Query(owner): Query<OwnerQuery>,
    Json(input): Json<CreateQuestInput>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let quest = state
        .lifecycle
        .create_quest(&store, &user_id, input)
        .map_err(quest_error)?;

    Ok((StatusCode::CREATED, Json(quest)))
}

async fn list_quests(
    State(state): State<AppState>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let quests = store.list_quests(&user_id).map_err(quest_error)?;

    Ok(Json(serde_json::json!({ "quests": quests })))
}

async fn get_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let quest = store
        .get_quest(&user_id, &QuestId(quest_id))
        .map_err(quest_error)?;

    Ok(Json(quest))
}

async fn delete_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let quest_id = QuestId(quest_id);
    let store = state.store.lock().await;

    state
        .lifecycle
        .delete(&store, &user_id, &quest_id)
        .map_err(quest_error)?;

    Ok(Json(serde_json::json!({ "deleted": quest_id.0 })))
}

async fn get_history(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let history = state
        .lifecycle
        .history(&store, &user_id, &QuestId(quest_id))
        .map_err(quest_error)?;

    Ok(Json(serde_json::json!({ "history": history })))
}

async fn start_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let quest = state
        .lifecycle
        .start(&store, &user_id, &QuestId(quest_id))
        .map_err(quest_error)?;

    Ok(Json(quest))
}

async fn pause_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
    body: Option<Json<NoteBody>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let note = body.map(|b| b.0).unwrap_or_default().note;
    let store = state.store.lock().await;

    let quest = state
        .lifecycle
        .pause(&store, &user_id, &QuestId(quest_id), note)
        .map_err(quest_error)?;

    Ok(Json(quest))
}

async fn complete_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
    body: Option<Json<NoteBody>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let notes = body.map(|b| b.0).unwrap_or_default().note;
    let store = state.store.lock().await;

    let quest = state
        .lifecycle
        .complete(&store, &user_id, &QuestId(quest_id), notes)
        .map_err(quest_error)?;

    Ok(Json(quest))
}

async fn abandon_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
    body: Option<Json<NoteBody>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let reason = body.map(|b| b.0).unwrap_or_default().note;
    let store = state.store.lock().await;

    let quest = state
        .lifecycle
        .abandon(&store, &user_id, &QuestId(quest_id), reason)
        .map_err(quest_error)?;

    Ok(Json(quest))
}

async fn update_progress(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
    Json(body): Json<ProgressBody>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let quest = state
        .lifecycle
        .update_progress(&store, &user_id, &QuestId(quest_id), body.percent)
        .map_err(quest_error)?;

    Ok(Json(quest))
}

async fn achieve_milestone(
    State(state): State<AppState>,
    Path((quest_id, milestone_id)): Path<(String, String)>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let quest = state
        .lifecycle
        .achieve_milestone(
            &store,
            &user_id,
            &QuestId(quest_id),
            &MilestoneId(milestone_id),
        )
        .map_err(quest_error)?;

    Ok(Json(quest))
}

async fn reflect_on_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
    Json(body): Json<ReflectBody>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let quest = state
        .lifecycle
        .reflect(&store, &user_id, &QuestId(quest_id), body.note)
        .map_err(quest_error)?;

    Ok(Json(quest))
}

async fn archive_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let quest = state
        .lifecycle
        .archive(&store, &user_id, &QuestId(quest_id))
        .map_err(quest_error)?;

    Ok(Json(quest))
}

async fn get_board(
    State(state): State<AppState>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let board = state
        .boards
        .board_for(&store, &user_id)
        .map_err(quest_error)?;

    Ok(Json(board))
}

async fn get_analytics(
    State(state): State<AppState>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let analytics = state
        .boards
        .analytics_for(&store, &user_id)
        .map_err(quest_error)?;

    Ok(Json(analytics))
}

async fn get_chains(
    State(state): State<AppState>,
    Query(owner): Query<OwnerQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let chains = state
        .chains
        .chains_for(&store, &user_id)
        .map_err(quest_error)?;

    Ok(Json(serde_json::json!({ "chains": chains })))
}

async fn reconcile_progress(
    State(state): State<AppState>,
    Query(owner): Query<OwnerQuery>,
    Json(signals): Json<Vec<ProgressSignal>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let results = state
        .reconciler
        .reconcile_progress(&store, &user_id, &signals)
        .map_err(quest_error)?;

    let applied = results.iter().filter(|r| r.applied).count();
    info!(
        "Reconciled {} progress signal(s) for user {}: {} applied, {} skipped",
        results.len(),
        user_id,
        applied,
        results.len() - applied
    );

    Ok(Json(serde_json::json!({ "results": results })))
}

async fn reconcile_life_changes(
    State(state): State<AppState>,
    Query(owner): Query<OwnerQuery>,
    Json(signals): Json<LifeChangeSignals>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = UserId(owner.user_id);
    let store = state.store.lock().await;

    let outcome = state
        .reconciler
        .reconcile_life_changes(&store, &user_id, &signals)
        .map_err(quest_error)?;

    Ok(Json(outcome))
}
