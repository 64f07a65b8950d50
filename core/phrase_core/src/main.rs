use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

mod db;
mod reward;
mod selection;
mod settings;
mod share;
mod unlock;

use db::Phrase;
use reward::RewardGate;
use selection::SelectionService;
use settings::{Settings, SettingsUpdate};
use unlock::{ExplanationLookup, UnlockOutcome};

const DEFAULT_PORT: u16 = 17620;
const MOST_VIEWED_LIMIT: usize = 10;
const GATE_TICK: Duration = Duration::from_secs(1);
const BUNDLED_DATASET: &str = include_str!("../data/phrases.json");

#[derive(Parser, Debug)]
#[command(name = "phrase_core", version)]
struct Args {
    /// Listen address, ip:port or ip (implies port 17620).
    #[arg(long, default_value = "127.0.0.1:17620")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/phrases.db")]
    db: PathBuf,

    /// JSON dataset used to seed an empty database instead of the bundled one.
    #[arg(long)]
    seed: Option<PathBuf>,
}

// Lock order: selection, gate, settings, then conn.
#[derive(Clone)]
struct AppState {
    conn: Arc<Mutex<Connection>>,
    selection: Arc<Mutex<SelectionService>>,
    gate: Arc<Mutex<RewardGate>>,
    settings: Arc<Mutex<Settings>>,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

fn ok_data<T: Serialize>(data: T) -> Response {
    Json(OkResponse {
        ok: true,
        data: Some(data),
    })
    .into_response()
}

fn ok_empty() -> Response {
    Json(OkResponse::<()> {
        ok: true,
        data: None,
    })
    .into_response()
}

fn fail(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrResponse { ok: false, error })).into_response()
}

#[derive(Deserialize)]
struct RandomQuery {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    subcategory: Option<String>,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct TextQuery {
    text: String,
}

#[derive(Deserialize)]
struct UnlockRequest {
    text: String,
}

#[derive(Serialize)]
struct UnlockStatus {
    unlocked: bool,
    favorite: bool,
}

#[derive(Serialize)]
struct UnlockResult {
    outcome: UnlockOutcome,
    unlocked: bool,
}

#[derive(Deserialize)]
struct AdLoadedRequest {
    ok: bool,
}

#[derive(Serialize)]
struct ExplanationInfo {
    id: i64,
    explanation: String,
}

#[derive(Serialize)]
struct ShareInfo {
    id: i64,
    text: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phrase_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut conn = Connection::open(&args.db)?;
    db::init_db(&conn)?;

    let dataset = match &args.seed {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(err) => {
                warn!("cannot read seed {}: {err}; using bundled dataset", path.display());
                BUNDLED_DATASET.to_string()
            }
        },
        None => BUNDLED_DATASET.to_string(),
    };
    db::seed_if_empty(&mut conn, &dataset)?;
    let settings = settings::load_settings(&conn)?;

    let state = AppState {
        conn: Arc::new(Mutex::new(conn)),
        selection: Arc::new(Mutex::new(SelectionService::new())),
        gate: Arc::new(Mutex::new(RewardGate::new())),
        settings: Arc::new(Mutex::new(settings)),
    };

    let gate = state.gate.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(GATE_TICK);
        loop {
            interval.tick().await;
            gate.lock().await.tick(Instant::now());
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health))
        .route("/categories", get(get_categories))
        .route(
            "/categories/:category/subcategories",
            get(get_subcategories),
        )
        .route("/phrases/random", get(get_random_phrase))
        .route("/phrases/today", get(get_phrase_of_day))
        .route("/phrases/search", get(get_search))
        .route("/phrases/favorites", get(get_favorites))
        .route("/phrases/most_viewed", get(get_most_viewed))
        .route("/phrases/by_text", get(get_phrase_by_text))
        .route("/phrases/:id", get(get_phrase))
        .route(
            "/phrases/:id/favorite",
            post(post_toggle_favorite).options(options_ok),
        )
        .route("/phrases/:id/explanation", get(get_explanation))
        .route("/phrases/:id/share", get(get_share))
        .route(
            "/unlocks",
            get(get_unlock_status).post(post_unlock).options(options_ok),
        )
        .route("/reward/status", get(get_reward_status))
        .route("/reward/load", post(post_reward_load).options(options_ok))
        .route("/reward/loaded", post(post_reward_loaded).options(options_ok))
        .route(
            "/reward/dismissed",
            post(post_reward_dismissed).options(options_ok),
        )
        .route(
            "/settings",
            get(get_settings).post(post_settings).options(options_ok),
        )
        .with_state(state)
        .layer(cors);

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    let localhost = IpAddr::from([127, 0, 0, 1]);
    if input == "localhost" {
        return Ok(SocketAddr::new(localhost, DEFAULT_PORT));
    }
    if let Some(port) = input.strip_prefix("localhost:") {
        let port: u16 = port
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid --listen '{input}': bad port"))?;
        return Ok(SocketAddr::new(localhost, port));
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip.",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(OkResponse {
        ok: true,
        data: Some(HealthInfo {
            service: "phrase_core",
            version: env!("CARGO_PKG_VERSION"),
        }),
    })
}

async fn get_categories(State(state): State<AppState>) -> Response {
    let conn = state.conn.lock().await;
    let categories = db::list_categories(&conn).unwrap_or_else(|err| {
        error!("list_categories failed: {err}");
        Vec::new()
    });
    ok_data(categories)
}

async fn get_subcategories(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Response {
    let conn = state.conn.lock().await;
    let subcategories = db::list_subcategories(&conn, &category).unwrap_or_else(|err| {
        error!("list_subcategories failed: {err}");
        Vec::new()
    });
    ok_data(subcategories)
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

async fn get_random_phrase(State(state): State<AppState>, Query(q): Query<RandomQuery>) -> Response {
    // Without an explicit category, draw from the user's saved filter.
    let (category, subcategory) = match non_blank(q.category) {
        Some(c) => (c, non_blank(q.subcategory)),
        None => {
            let s = state.settings.lock().await;
            (
                s.selected_category.trim().to_string(),
                non_blank(Some(s.selected_subcategory.clone())),
            )
        }
    };
    if category.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "missing_category");
    }

    let mut selection = state.selection.lock().await;
    let conn = state.conn.lock().await;
    let drawn = match subcategory.as_deref() {
        Some(sub) => selection.random_phrase_for_subcategory(&conn, &category, sub),
        None => selection.random_phrase(&conn, &category),
    };
    match drawn {
        Ok(Some(phrase)) => ok_data(phrase),
        Ok(None) => ok_empty(),
        Err(err) => {
            error!("random phrase for '{category}' failed: {err}");
            ok_empty()
        }
    }
}

async fn get_phrase_of_day(State(state): State<AppState>) -> Response {
    let today = selection::days_since_epoch(OffsetDateTime::now_utc());
    let mut selection = state.selection.lock().await;
    let conn = state.conn.lock().await;
    match selection.phrase_of_day(&conn, today) {
        Ok(Some(phrase)) => ok_data(phrase),
        Ok(None) => ok_empty(),
        Err(err) => {
            error!("phrase_of_day failed: {err}");
            ok_empty()
        }
    }
}

async fn get_search(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Response {
    let conn = state.conn.lock().await;
    let hits = selection::search(&conn, &q.q).unwrap_or_else(|err| {
        error!("search failed: {err}");
        Vec::new()
    });
    ok_data(hits)
}

async fn get_favorites(State(state): State<AppState>) -> Response {
    let conn = state.conn.lock().await;
    let favorites = db::list_favorites(&conn).unwrap_or_else(|err| {
        error!("list_favorites failed: {err}");
        Vec::new()
    });
    ok_data(favorites)
}

async fn get_most_viewed(State(state): State<AppState>) -> Response {
    let conn = state.conn.lock().await;
    let phrases = db::list_most_viewed(&conn, MOST_VIEWED_LIMIT).unwrap_or_else(|err| {
        error!("list_most_viewed failed: {err}");
        Vec::new()
    });
    ok_data(phrases)
}

async fn lookup_phrase(state: &AppState, id: i64) -> Result<Phrase, Response> {
    let conn = state.conn.lock().await;
    match db::get_phrase(&conn, id) {
        Ok(Some(p)) => Ok(p),
        Ok(None) => Err(fail(StatusCode::NOT_FOUND, "not_found")),
        Err(err) => {
            error!("get_phrase {id} failed: {err}");
            Err(fail(StatusCode::INTERNAL_SERVER_ERROR, "db_error"))
        }
    }
}

async fn get_phrase(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match lookup_phrase(&state, id).await {
        Ok(phrase) => ok_data(phrase),
        Err(resp) => resp,
    }
}

async fn get_phrase_by_text(State(state): State<AppState>, Query(q): Query<TextQuery>) -> Response {
    let conn = state.conn.lock().await;
    match db::find_phrase_by_text(&conn, q.text.trim()) {
        Ok(Some(phrase)) => ok_data(phrase),
        Ok(None) => ok_empty(),
        Err(err) => {
            error!("find_phrase_by_text failed: {err}");
            ok_empty()
        }
    }
}

async fn post_toggle_favorite(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let conn = state.conn.lock().await;
    match db::toggle_favorite(&conn, id) {
        Ok(Some(phrase)) => {
            info!("phrase {id} favorite={}", phrase.is_favorite);
            ok_data(phrase)
        }
        Ok(None) => fail(StatusCode::NOT_FOUND, "not_found"),
        Err(err) => {
            error!("toggle_favorite {id} failed: {err}");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn get_explanation(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let conn = state.conn.lock().await;
    match unlock::explanation_for(&conn, id) {
        Ok(ExplanationLookup::Found(explanation)) => ok_data(ExplanationInfo { id, explanation }),
        Ok(ExplanationLookup::Locked) => fail(StatusCode::FORBIDDEN, "locked"),
        Ok(ExplanationLookup::NotFound) => fail(StatusCode::NOT_FOUND, "not_found"),
        Err(err) => {
            error!("explanation {id} failed: {err}");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn get_share(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let phrase = match lookup_phrase(&state, id).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let unlocked = {
        let conn = state.conn.lock().await;
        db::is_unlocked(&conn, &phrase.text).unwrap_or_else(|err| {
            error!("is_unlocked failed: {err}");
            false
        })
    };
    ok_data(ShareInfo {
        id,
        text: share::share_text(&phrase, unlocked),
    })
}

async fn get_unlock_status(State(state): State<AppState>, Query(q): Query<TextQuery>) -> Response {
    let conn = state.conn.lock().await;
    let unlocked = db::is_unlocked(&conn, &q.text).unwrap_or_else(|err| {
        error!("is_unlocked failed: {err}");
        false
    });
    let favorite = db::is_favorite_text(&conn, &q.text).unwrap_or_else(|err| {
        error!("is_favorite_text failed: {err}");
        false
    });
    ok_data(UnlockStatus { unlocked, favorite })
}

async fn post_unlock(State(state): State<AppState>, Json(req): Json<UnlockRequest>) -> Response {
    if req.text.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "invalid_text");
    }

    let mut gate = state.gate.lock().await;
    let conn = state.conn.lock().await;
    match unlock::request_unlock(&conn, &mut gate, &req.text, OffsetDateTime::now_utc()) {
        Ok(UnlockOutcome::AdLoading) => fail(StatusCode::CONFLICT, "ad_loading"),
        Ok(outcome) => ok_data(UnlockResult {
            outcome,
            unlocked: outcome.unlocked(),
        }),
        Err(err) => {
            error!("unlock failed: {err}");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn get_reward_status(State(state): State<AppState>) -> Response {
    let status = state.gate.lock().await.status();
    ok_data(status)
}

async fn post_reward_load(State(state): State<AppState>) -> Response {
    let mut gate = state.gate.lock().await;
    gate.begin_load();
    ok_data(gate.status())
}

async fn post_reward_loaded(
    State(state): State<AppState>,
    Json(req): Json<AdLoadedRequest>,
) -> Response {
    let mut gate = state.gate.lock().await;
    gate.load_finished(req.ok, Instant::now());
    ok_data(gate.status())
}

async fn post_reward_dismissed(State(state): State<AppState>) -> Response {
    let mut gate = state.gate.lock().await;
    gate.dismissed();
    ok_data(gate.status())
}

async fn get_settings(State(state): State<AppState>) -> Response {
    let settings = state.settings.lock().await.clone();
    ok_data(settings)
}

async fn post_settings(State(state): State<AppState>, Json(req): Json<SettingsUpdate>) -> Response {
    let mut guard = state.settings.lock().await;
    let next = match settings::apply_update(&guard, req) {
        Ok(v) => v,
        Err(code) => return fail(StatusCode::BAD_REQUEST, code),
    };

    {
        let conn = state.conn.lock().await;
        if let Err(err) = settings::save_settings(&conn, &next) {
            error!("save_settings failed: {err}");
            return fail(StatusCode::INTERNAL_SERVER_ERROR, "db_error");
        }
    }

    if next.selected_category != guard.selected_category {
        info!("selected category: '{}'", next.selected_category);
    }
    *guard = next.clone();
    ok_data(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_accepts_common_forms() {
        assert_eq!(
            parse_listen("127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_listen("0.0.0.0").unwrap().port(), DEFAULT_PORT);
        assert_eq!(parse_listen("localhost:8080").unwrap().port(), 8080);
        assert!(parse_listen("localhost:abc").is_err());
        assert!(parse_listen("example.com").is_err());
    }

    #[test]
    fn bundled_dataset_parses() {
        let phrases: Vec<db::SeedPhrase> = serde_json::from_str(BUNDLED_DATASET).unwrap();
        assert!(phrases.len() >= 20);
        assert!(phrases.iter().all(|p| !p.text.trim().is_empty() && !p.category.trim().is_empty()));
        assert!(phrases.iter().any(|p| p.category == "Motivation"));
    }
}
