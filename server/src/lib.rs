use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use notso_core::persist::load_index;
use notso_core::tokenizer::tokenize;
use notso_core::{search, SearchConfig, SharedIndex, StopReason};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Upper bound on `k` accepted over HTTP.
pub const MAX_K: usize = 100;

const SNIPPET_BEFORE: usize = 100;
const SNIPPET_AFTER: usize = 200;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub k: Option<usize>,
    pub max_seconds: Option<f64>,
    pub max_memory_bytes: Option<u64>,
    pub max_query_terms: Option<usize>,
    pub max_docs: Option<usize>,
    pub term_block_size: Option<usize>,
}

impl SearchParams {
    /// Layer the request's options over the server defaults.
    fn apply(&self, defaults: &SearchConfig) -> SearchConfig {
        let mut cfg = defaults.clone();
        if let Some(k) = self.k {
            cfg.top_k = k;
        }
        cfg.top_k = cfg.top_k.min(MAX_K);
        if self.max_seconds.is_some() {
            cfg.limits.max_seconds = self.max_seconds;
        }
        if self.max_memory_bytes.is_some() {
            cfg.limits.max_memory_bytes = self.max_memory_bytes;
        }
        if self.max_query_terms.is_some() {
            cfg.limits.max_query_terms = self.max_query_terms;
        }
        if self.max_docs.is_some() {
            cfg.limits.max_docs = self.max_docs;
        }
        if let Some(size) = self.term_block_size {
            cfg.limits = cfg.limits.with_term_block_size(size);
        }
        cfg
    }
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub stop_reason: StopReason,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f64,
    pub snippet: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub index: SharedIndex,
    pub index_path: PathBuf,
    pub defaults: SearchConfig,
    pub admin_token: Option<String>,
}

pub fn build_app(index_path: PathBuf, defaults: SearchConfig) -> Result<Router> {
    // Load the index at startup
    let index = load_index(&index_path)?;
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let state = AppState { index: SharedIndex::new(index), index_path, defaults, admin_token };
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
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

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/index/reload", post(reload_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let cfg = params.apply(&state.defaults);
    cfg.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    // Pin one snapshot for the whole request; a concurrent reload swaps the next one.
    let index = state.index.snapshot();
    let outcome = search(&index, &params.q, cfg.top_k, &cfg.limits);

    let highlighter = highlighter(&tokenize(&params.q));
    let results = outcome
        .results
        .iter()
        .map(|hit| SearchHit {
            doc_id: hit.doc_id.clone(),
            score: hit.score,
            snippet: index.document(&hit.doc_id).and_then(|d| snippet(&d.text, highlighter.as_ref())),
        })
        .collect();

    let elapsed = start.elapsed();
    Ok(Json(SearchResponse {
        query: params.q,
        took_s: elapsed.as_secs_f64(),
        stop_reason: outcome.stop_reason,
        total_hits: outcome.total_hits,
        results,
    }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let index = state.index.snapshot();
    match index.document(&doc_id) {
        Some(doc) => (StatusCode::OK, Json(serde_json::json!({ "doc_id": doc.id, "text": doc.text }))),
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" }))),
    }
}

/// Re-read the index file and swap it in whole. On failure the served index is untouched.
async fn reload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let index = load_index(&state.index_path).map_err(|e| {
        tracing::error!(error = %e, path = %state.index_path.display(), "index reload failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    let body = serde_json::json!({ "version": index.version, "num_docs": index.num_docs() });
    state.index.replace(index);
    tracing::info!(path = %state.index_path.display(), "index reloaded");
    Ok(Json(body))
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

/// Case-insensitive matcher over the query's tokens, `None` for an empty query.
fn highlighter(terms: &[String]) -> Option<Regex> {
    if terms.is_empty() {
        return None;
    }
    let alternation = terms.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    RegexBuilder::new(&alternation).case_insensitive(true).build().ok()
}

/// A window of text around the first query match, matches wrapped in `<em>`.
fn snippet(text: &str, highlighter: Option<&Regex>) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let first = highlighter.and_then(|re| re.find(text)).map(|m| m.start());
    let window = match first {
        Some(idx) => {
            let start = floor_char_boundary(text, idx.saturating_sub(SNIPPET_BEFORE));
            let end = ceil_char_boundary(text, (idx + SNIPPET_AFTER).min(text.len()));
            &text[start..end]
        }
        None => {
            let end = text.char_indices().nth(SNIPPET_AFTER).map(|(i, _)| i).unwrap_or(text.len());
            &text[..end]
        }
    };
    Some(match highlighter {
        Some(re) => re.replace_all(window, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).into_owned(),
        None => window.to_string(),
    })
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
