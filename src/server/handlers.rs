//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::AppState;
use crate::core::query::{GraphMode, GraphReader, SearchHit};
use crate::core::wiki::WikiReader;
use crate::storage::models::{RepoStatus, Repository};

// ==================== Response Types ====================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct LanguageInfo {
    pub id: String,
    pub extensions: Vec<String>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

fn internal_error(e: anyhow::Error) -> ApiError {
    error!("Request failed: {:#}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", format!("{:#}", e))
}

/// Run database work on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| internal_error(e.into()))?
        .map_err(internal_error)
}

fn not_found(what: &str, id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", format!("{} {} not found", what, id))
}

async fn require_repository(state: &AppState, id: &str) -> Result<Repository, ApiError> {
    let db = state.db.clone();
    let repo_id = id.to_string();
    blocking(move || db.get_repository(&repo_id))
        .await?
        .ok_or_else(|| not_found("Repository", id))
}

/// Index `repo` in the background
fn spawn_indexing(state: &AppState, repo: Repository) {
    let indexer = state.indexer.clone();
    tokio::spawn(async move {
        if let Err(e) = indexer.index_repository(&repo).await {
            warn!("Background indexing of {} failed: {:#}", repo.name, e);
        }
    });
}

// ==================== Request Types ====================

#[derive(Deserialize)]
pub struct CreateRepositoryRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Deserialize)]
pub struct GraphQuery {
    #[serde(rename = "type")]
    pub graph_type: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

// ==================== Handlers ====================

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List all repositories
pub async fn list_repositories(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let repos = blocking(move || db.list_repositories()).await?;
    Ok(Json(repos))
}

/// Register a repository and start indexing it
pub async fn create_repository(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRepositoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let url = match req.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => return Err(api_error(StatusCode::BAD_REQUEST, "bad_request", "url is required")),
    };

    let db = state.db.clone();
    let lookup = url.clone();
    if blocking(move || db.get_repository_by_url(&lookup)).await?.is_some() {
        return Err(api_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("Repository {} already exists", url),
        ));
    }

    let indexer = state.indexer.clone();
    let repo = blocking(move || indexer.register_repository(&url, req.name.as_deref(), req.branch.as_deref())).await?;
    spawn_indexing(&state, repo.clone());

    Ok((StatusCode::CREATED, Json(repo)))
}

/// Get repository details
pub async fn get_repository(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(require_repository(&state, &id).await?))
}

/// Delete a repository and its graph
pub async fn delete_repository(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let repo_id = id.clone();
    if blocking(move || db.delete_repository(&repo_id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Repository", &id))
    }
}

/// Re-index a repository in the background
pub async fn reindex_repository(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = require_repository(&state, &id).await?;
    if repo.status == RepoStatus::Indexing {
        return Err(api_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("Repository {} is already being indexed", id),
        ));
    }

    spawn_indexing(&state, repo.clone());
    Ok((StatusCode::ACCEPTED, Json(repo)))
}

/// Files of a repository with their functions
pub async fn get_file_tree(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository(&state, &id).await?;
    let reader = GraphReader::new(state.db.clone());
    let tree = blocking(move || reader.get_file_tree(&id)).await?;
    Ok(Json(tree))
}

/// Structure or call graph of a repository
pub async fn get_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<GraphQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository(&state, &id).await?;
    let mode: GraphMode = query
        .graph_type
        .as_deref()
        .unwrap_or("structure")
        .parse()
        .map_err(|e: anyhow::Error| api_error(StatusCode::BAD_REQUEST, "bad_request", e.to_string()))?;

    let reader = GraphReader::new(state.db.clone());
    let graph = blocking(move || reader.get_graph(&id, mode)).await?;
    Ok(Json(graph))
}

/// Detail of a file or entity
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path((id, node_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository(&state, &id).await?;
    let reader = GraphReader::new(state.db.clone());
    let lookup = node_id.clone();
    blocking(move || reader.get_node_detail(&id, &lookup))
        .await?
        .map(Json)
        .ok_or_else(|| not_found("Node", &node_id))
}

/// Similarity search within one repository
pub async fn search_repository(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository(&state, &id).await?;
    search(&state, query, Some(id)).await
}

/// Similarity search across all repositories
pub async fn search_all(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    search(&state, query, None).await
}

async fn search(state: &AppState, query: SearchQuery, repo_id: Option<String>) -> Result<Json<SearchResponse>, ApiError> {
    let text = match query.q.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => return Err(api_error(StatusCode::BAD_REQUEST, "bad_request", "q is required")),
    };

    let Some(embedder) = &state.embedder else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "embedding_unavailable",
            "No embedding backend is configured",
        ));
    };

    let vectors = embedder
        .embed(std::slice::from_ref(&text))
        .await
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, "embedding_error", e.to_string()))?;
    let Some(vector) = vectors.into_iter().next() else {
        return Err(api_error(StatusCode::BAD_GATEWAY, "embedding_error", "empty embedding response"));
    };

    let limit = state.search.effective_limit(query.limit);
    let reader = GraphReader::new(state.db.clone()).with_min_score(state.search.min_score);
    let results = blocking(move || reader.vector_search(&vector, limit, repo_id.as_deref())).await?;

    Ok(Json(SearchResponse { query: text, results }))
}

/// List supported languages
pub async fn list_languages(State(state): State<Arc<AppState>>) -> Json<Vec<LanguageInfo>> {
    let languages: Vec<LanguageInfo> = state
        .registry
        .list_languages()
        .iter()
        .map(|l| LanguageInfo {
            id: l.language_id().to_string(),
            extensions: l.file_extensions().iter().map(|s| s.to_string()).collect(),
        })
        .collect();

    Json(languages)
}

/// Wiki navigation tree of a repository
pub async fn get_wiki_navigation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository(&state, &id).await?;
    let reader = WikiReader::new(state.db.clone());
    let navigation = blocking(move || reader.get_navigation(&id)).await?;
    Ok(Json(navigation))
}

/// Wiki generation progress of a repository
pub async fn get_wiki_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let status = blocking(move || db.get_wiki_status(&id)).await?;
    Ok(Json(status))
}

/// One wiki page with its table of contents
pub async fn get_wiki_page(
    State(state): State<Arc<AppState>>,
    Path((id, slug)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let reader = WikiReader::new(state.db.clone());
    let lookup = slug.clone();
    blocking(move || reader.get_page(&id, &lookup))
        .await?
        .map(Json)
        .ok_or_else(|| not_found("Wiki page", &slug))
}
