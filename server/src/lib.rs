use anyhow::Result;
use axum::{extract::{Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use lexbarrel_core::persist::IndexPaths;
use lexbarrel_core::ranker::{semantic_k, ScoreMap, SemanticScorer};
use lexbarrel_core::searcher::{SearchHit, Searcher};
use lexbarrel_core::tokenizer::{normalize_prefix, normalize_query};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const DEFAULT_ALPHA: f32 = 0.6;
const MAX_RESULTS: usize = 100;
const MAX_SUGGESTIONS: usize = 20;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_alpha() -> f32 { DEFAULT_ALPHA }
fn default_k() -> usize { 15 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Deserialize)]
pub struct AutocompleteParams {
    pub prefix: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}
fn default_limit() -> usize { 5 }

#[derive(Serialize)]
pub struct AutocompleteResponse {
    pub prefix: String,
    pub suggestions: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub index_root: PathBuf,
    /// Current snapshot; reload swaps the inner `Arc` so in-flight queries
    /// finish against the snapshot they started with.
    pub searcher: Arc<RwLock<Arc<Searcher>>>,
    pub semantic: Option<Arc<SemanticScorer>>,
    pub admin_token: Option<String>,
}

impl AppState {
    fn snapshot(&self) -> Arc<Searcher> {
        self.searcher.read().clone()
    }
}

pub fn build_app<P: AsRef<Path>>(index_dir: P) -> Result<Router> {
    build_app_with_semantic(index_dir, None)
}

/// Like [`build_app`], with a vector-similarity side for hybrid ranking.
pub fn build_app_with_semantic<P: AsRef<Path>>(index_dir: P, semantic: Option<Arc<SemanticScorer>>) -> Result<Router> {
    let index_root = index_dir.as_ref().to_path_buf();
    let searcher = Searcher::open(&IndexPaths::new(&index_root))?;
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let app_state = AppState { index_root, searcher: Arc::new(RwLock::new(Arc::new(searcher))), semantic, admin_token };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/autocomplete", get(autocomplete_handler))
        .route("/admin/reload", post(reload_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);
    Ok(app)
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let tokens = normalize_query(&params.q);
    let k = params.k.clamp(1, MAX_RESULTS);
    let semantic = match &state.semantic {
        Some(scorer) if !tokens.is_empty() => scorer.scores(&tokens, semantic_k(k)),
        _ => ScoreMap::new(),
    };

    let hits = state
        .snapshot()
        .search(&tokens, params.alpha, semantic)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let total_hits = hits.len();
    let results: Vec<SearchHit> = hits.into_iter().take(k).collect();

    let elapsed = start.elapsed();
    tracing::debug!(query = %params.q, total_hits, "search served");
    Ok(Json(SearchResponse { query: params.q, took_s: elapsed.as_secs_f64(), total_hits, results }))
}

pub async fn autocomplete_handler(
    State(state): State<AppState>,
    Query(params): Query<AutocompleteParams>,
) -> Json<AutocompleteResponse> {
    let prefix = normalize_prefix(&params.prefix);
    let suggestions = if prefix.is_empty() {
        Vec::new()
    } else {
        state.snapshot().autocomplete(&prefix, params.limit.clamp(1, MAX_SUGGESTIONS))
    };
    Json(AutocompleteResponse { prefix, suggestions })
}

/// Reopens the data directory after an offline build and swaps the snapshot.
async fn reload_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let searcher = Searcher::open(&IndexPaths::new(&state.index_root)).map_err(|e| {
        tracing::warn!(error = %e, "reload failed; keeping current snapshot");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    })?;
    let terms = searcher.lexicon().len();
    *state.searcher.write() = Arc::new(searcher);
    tracing::info!(terms, "index snapshot reloaded");
    Ok(Json(serde_json::json!({ "reloaded": true, "terms": terms })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
