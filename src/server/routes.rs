//! API route definitions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::AppState;

/// Create API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health check
        .route("/api/v1/health", get(handlers::health_check))
        // Repository management
        .route(
            "/api/v1/repositories",
            get(handlers::list_repositories).post(handlers::create_repository),
        )
        .route(
            "/api/v1/repositories/:id",
            get(handlers::get_repository).delete(handlers::delete_repository),
        )
        .route("/api/v1/repositories/:id/reindex", post(handlers::reindex_repository))
        // Graph queries
        .route("/api/v1/repositories/:id/files", get(handlers::get_file_tree))
        .route("/api/v1/repositories/:id/graph", get(handlers::get_graph))
        .route("/api/v1/repositories/:id/nodes/:node_id", get(handlers::get_node))
        // Similarity search
        .route("/api/v1/repositories/:id/search", get(handlers::search_repository))
        .route("/api/v1/search", get(handlers::search_all))
        // Wiki
        .route("/api/v1/repositories/:id/wiki", get(handlers::get_wiki_navigation))
        .route("/api/v1/repositories/:id/wiki/status", get(handlers::get_wiki_status))
        .route("/api/v1/repositories/:id/wiki/pages/:slug", get(handlers::get_wiki_page))
        // Languages
        .route("/api/v1/languages", get(handlers::list_languages))
}
