//! Core engine: extraction, indexing, graph writes and queries

pub mod config;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod wiki;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::core::graph::{GraphWriter, WriteSummary};
use crate::core::pipeline::IndexPipeline;
use crate::git::{extract_repo_name, GitService};
use crate::storage::models::{RepoStatus, Repository};
use crate::storage::Database;

/// Drives a repository from registration to a written graph
pub struct Indexer {
    db: Database,
    pipeline: IndexPipeline,
    git: GitService,
}

impl Indexer {
    pub fn new(db: Database, pipeline: IndexPipeline, git: GitService) -> Self {
        Self { db, pipeline, git }
    }

    /// Create a pending repository. The name defaults to the last segment
    /// of `url` and the branch to `main`.
    pub fn register_repository(&self, url: &str, name: Option<&str>, branch: Option<&str>) -> Result<Repository> {
        let name = name.map(str::to_string).unwrap_or_else(|| extract_repo_name(url));
        let repo = Repository::new(url, &name, branch.unwrap_or("main"));
        self.db
            .insert_repository(&repo)
            .with_context(|| format!("registering repository {}", url))?;
        info!("Registered repository {} ({})", repo.name, repo.id);
        Ok(repo)
    }

    /// Checkout, clear, index and write `repo`.
    ///
    /// The repository ends `ready` on success and `error` on any failure.
    pub async fn index_repository(&self, repo: &Repository) -> Result<WriteSummary> {
        match self.run(repo).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!("Indexing {} failed: {:#}", repo.name, e);
                if let Err(status_err) = self.db.update_repository_status(&repo.id, RepoStatus::Error) {
                    warn!("Could not mark {} as failed: {}", repo.id, status_err);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, repo: &Repository) -> Result<WriteSummary> {
        let root = self
            .git
            .checkout(&repo.url, Some(&repo.default_branch))
            .await
            .with_context(|| format!("checking out {}", repo.url))?;

        let db = self.db.clone();
        let repo_id = repo.id.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            GraphWriter::new(db.clone()).clear_repository(&repo_id)?;
            db.update_repository_status(&repo_id, RepoStatus::Indexing)
        })
        .await??;

        info!("Indexing {} from {}", repo.name, root.display());
        let result = self.pipeline.index_directory(&root, &repo.id).await?;

        let writer = GraphWriter::new(self.db.clone());
        let summary = tokio::task::spawn_blocking(move || writer.write_index_result(&result)).await??;
        Ok(summary)
    }
}
