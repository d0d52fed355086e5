//! HTTP server for the neograph service

mod handlers;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::config::{Config, SearchConfig};
use crate::core::pipeline::IndexPipeline;
use crate::core::registry::LanguageRegistry;
use crate::core::Indexer;
use crate::embedding::{EmbeddingBackend, TeiClient};
use crate::git::GitService;
use crate::storage::Database;

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub indexer: Arc<Indexer>,
    pub registry: Arc<LanguageRegistry>,
    pub embedder: Option<Arc<dyn EmbeddingBackend>>,
    pub search: SearchConfig,
}

impl AppState {
    /// Open the configured database and wire up indexing and search
    pub fn from_config(config: &Config) -> Result<Self> {
        let db = Database::open(&config.database.path, config.database.pool_size)?;
        db.init_schema()?;

        let embedder = build_embedder(config)?;
        Ok(Self::with_database(db, config, embedder))
    }

    pub fn with_database(db: Database, config: &Config, embedder: Option<Arc<dyn EmbeddingBackend>>) -> Self {
        let registry = Arc::new(LanguageRegistry::new());

        let mut pipeline = IndexPipeline::new(registry.clone(), config.indexer.clone());
        if let Some(embedder) = &embedder {
            pipeline = pipeline.with_embedder(embedder.clone());
        }
        let git = GitService::new(config.repos.checkout_dir.clone());

        Self {
            db: db.clone(),
            indexer: Arc::new(Indexer::new(db, pipeline, git)),
            registry,
            embedder,
            search: config.search.clone(),
        }
    }
}

/// TEI client for `embedding.url`, if set
pub fn build_embedder(config: &Config) -> Result<Option<Arc<dyn EmbeddingBackend>>> {
    match &config.embedding.url {
        Some(url) => {
            info!("Embedding with {}", url);
            let client = TeiClient::new(url, Duration::from_secs(config.embedding.timeout_secs))?;
            Ok(Some(Arc::new(client)))
        }
        None => Ok(None),
    }
}

/// API router with request tracing and optional CORS
pub fn build_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
    let app = Router::new()
        .merge(routes::api_routes())
        .layer(TraceLayer::new_for_http());

    let app = if cors_enabled {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    };

    app.with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: &Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(config)?);
    let app = build_router(state, config.server.cors_enabled);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::embedding::testing::FakeBackend;
    use crate::storage::models::{Repository, WikiPage, WikiState, WikiStatus};

    const SHOP_GO: &str = r#"package shop

// Total sums the cart.
func Total(prices []int) int {
	return sum(prices)
}

func sum(xs []int) int {
	return 0
}
"#;

    fn state(embedder: Option<Arc<dyn EmbeddingBackend>>) -> Arc<AppState> {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        Arc::new(AppState::with_database(db, &Config::default(), embedder))
    }

    async fn indexed_repo(state: &Arc<AppState>, dir: &tempfile::TempDir) -> Repository {
        std::fs::write(dir.path().join("shop.go"), SHOP_GO).unwrap();
        let url = dir.path().to_string_lossy().into_owned();
        let repo = state.indexer.register_repository(&url, None, None).unwrap();
        state.indexer.index_repository(&repo).await.unwrap();
        repo
    }

    async fn call(state: &Arc<AppState>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = build_router(state.clone(), true)
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_and_languages() {
        let state = state(None);

        let (status, body) = call(&state, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&state, "GET", "/api/v1/languages", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<_> = body.as_array().unwrap().iter().map(|l| l["id"].as_str().unwrap()).collect();
        assert!(ids.contains(&"go") && ids.contains(&"kotlin") && ids.contains(&"tsx"));
    }

    #[tokio::test]
    async fn test_create_repository_validation() {
        let state = state(None);
        let dir = tempfile::tempdir().unwrap();
        let url = dir.path().to_string_lossy().into_owned();

        let (status, body) = call(&state, "POST", "/api/v1/repositories", Some(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");

        let (status, body) = call(&state, "POST", "/api/v1/repositories", Some(serde_json::json!({ "url": url }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["defaultBranch"], "main");

        let (status, _) = call(&state, "POST", "/api/v1/repositories", Some(serde_json::json!({ "url": url }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_repository_not_found() {
        let state = state(None);
        for uri in [
            "/api/v1/repositories/missing",
            "/api/v1/repositories/missing/files",
            "/api/v1/repositories/missing/graph",
            "/api/v1/repositories/missing/nodes/n1",
        ] {
            let (status, body) = call(&state, "GET", uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
            assert_eq!(body["error"], "not_found");
        }

        let (status, _) = call(&state, "DELETE", "/api/v1/repositories/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&state, "POST", "/api/v1/repositories/missing/reindex", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_files_graph_and_nodes() {
        let state = state(None);
        let dir = tempfile::tempdir().unwrap();
        let repo = indexed_repo(&state, &dir).await;
        let base = format!("/api/v1/repositories/{}", repo.id);

        let (status, files) = call(&state, "GET", &format!("{}/files", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(files[0]["path"], "shop.go");
        assert_eq!(files[0]["functions"].as_array().unwrap().len(), 2);

        let (status, graph) = call(&state, "GET", &format!("{}/graph?type=calls", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(graph["edges"].as_array().unwrap().len(), 1);
        assert_eq!(graph["edges"][0]["type"], "CALLS");

        let (status, _) = call(&state, "GET", &format!("{}/graph?type=imports", base), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let total_id = files[0]["functions"][0]["id"].as_str().unwrap();
        let (status, node) = call(&state, "GET", &format!("{}/nodes/{}", base, total_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(node["name"], "Total");
        assert_eq!(node["docstring"], "Total sums the cart.");
        assert_eq!(node["calls"], serde_json::json!(["sum"]));

        let (status, _) = call(&state, "GET", &format!("{}/nodes/unknown", base), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_search_requires_query_and_backend() {
        let without = state(None);
        let (status, body) = call(&without, "GET", "/api/v1/search?q=cart", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "embedding_unavailable");

        let with = state(Some(Arc::new(FakeBackend::new())));
        let (status, _) = call(&with, "GET", "/api/v1/search", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_returns_ranked_hits() {
        let state = state(Some(Arc::new(FakeBackend::new())));
        let dir = tempfile::tempdir().unwrap();
        let repo = indexed_repo(&state, &dir).await;

        let (status, body) = call(&state, "GET", "/api/v1/search?q=cart&limit=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);

        let uri = format!("/api/v1/repositories/{}/search?q=cart&limit=500", repo.id);
        let (status, body) = call(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r["repoId"] == repo.id.as_str()));
        assert!(results[0]["score"].as_f64().unwrap() >= results[1]["score"].as_f64().unwrap());
    }

    #[tokio::test]
    async fn test_delete_repository() {
        let state = state(None);
        let dir = tempfile::tempdir().unwrap();
        let repo = indexed_repo(&state, &dir).await;
        let uri = format!("/api/v1/repositories/{}", repo.id);

        let (status, _) = call(&state, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, repos) = call(&state, "GET", "/api/v1/repositories", None).await;
        assert!(repos.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wiki_routes() {
        let state = state(None);
        let repo = Repository::new("https://example.com/acme/shop.git", "shop", "main");
        state.db.insert_repository(&repo).unwrap();
        let base = format!("/api/v1/repositories/{}/wiki", repo.id);

        let (status, nav) = call(&state, "GET", &base, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(nav, serde_json::json!({ "items": [] }));

        let (status, body) = call(&state, "GET", &format!("{}/status", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "none");

        let mut overview = WikiPage::new(&repo.id, "overview", "Overview", "# Overview\n\n## Layout");
        overview.order = 1;
        state.db.write_page(&overview).unwrap();
        let mut layout = WikiPage::new(&repo.id, "layout", "Layout", "");
        layout.parent_slug = "overview".to_string();
        state.db.write_page(&layout).unwrap();
        state
            .db
            .update_wiki_status(&repo.id, &WikiStatus { status: WikiState::Ready, progress: 100, total_pages: 2, ..WikiStatus::default() })
            .unwrap();

        let (_, nav) = call(&state, "GET", &base, None).await;
        assert_eq!(nav["items"][0]["slug"], "overview");
        assert_eq!(nav["items"][0]["children"][0]["slug"], "layout");

        let (status, page) = call(&state, "GET", &format!("{}/pages/overview", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["title"], "Overview");
        assert_eq!(page["tableOfContents"][1]["id"], "layout");
        assert_eq!(page["tableOfContents"][1]["level"], 2);

        let (_, body) = call(&state, "GET", &format!("{}/status", base), None).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["totalPages"], 2);

        let (status, body) = call(&state, "GET", &format!("{}/pages/missing", base), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = call(&state, "GET", "/api/v1/repositories/missing/wiki", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_share_pool() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("graph.db"), 2).unwrap();
        db.init_schema().unwrap();
        let state = Arc::new(AppState::with_database(db, &Config::default(), None));
        let project = tempfile::tempdir().unwrap();
        let repo = indexed_repo(&state, &project).await;

        let uris = [
            format!("/api/v1/repositories/{}", repo.id),
            format!("/api/v1/repositories/{}/files", repo.id),
            format!("/api/v1/repositories/{}/graph", repo.id),
            format!("/api/v1/repositories/{}/wiki", repo.id),
            "/api/v1/repositories".to_string(),
        ];
        let responses = get_all(&state, &uris).await;
        assert!(responses.iter().all(|status| *status == StatusCode::OK), "{:?}", responses);
    }

    async fn get_all(state: &Arc<AppState>, uris: &[String]) -> Vec<StatusCode> {
        let handles: Vec<_> = uris
            .iter()
            .map(|uri| {
                let state = state.clone();
                let uri = uri.clone();
                tokio::spawn(async move { call(&state, "GET", &uri, None).await.0 })
            })
            .collect();

        let mut statuses = Vec::new();
        for handle in handles {
            statuses.push(handle.await.unwrap());
        }
        statuses
    }
}
