//! Graph writer: persists an index result into the property graph

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::storage::models::IndexResult;
use crate::storage::Database;

/// Counters from one write
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WriteSummary {
    pub files_written: usize,
    pub entities_written: usize,
    pub call_edges: usize,
    pub ambiguous_calls: usize,
    pub unresolved_calls: usize,
}

/// Writes index results for a repository
pub struct GraphWriter {
    db: Database,
}

impl GraphWriter {
    /// Create a new graph writer with the given database
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist `result` and mark its repository ready.
    ///
    /// Files first, then entities, then calls, so every call target that
    /// exists in the result is present before resolution. Each item commits
    /// on its own; the first failure stops the write.
    pub fn write_index_result(&self, result: &IndexResult) -> Result<WriteSummary> {
        let repo_id = result.repo_id.as_str();
        let mut summary = WriteSummary::default();

        for file in &result.files {
            self.db
                .upsert_file(file)
                .with_context(|| format!("writing file {}", file.path))?;
            summary.files_written += 1;
        }
        debug!("Wrote {} files for {}", summary.files_written, repo_id);

        for entity in &result.entities {
            self.db
                .insert_entity(repo_id, entity)
                .with_context(|| format!("writing {} {} in {}", entity.kind, entity.name, entity.file_path))?;
            summary.entities_written += 1;
        }
        debug!("Wrote {} entities for {}", summary.entities_written, repo_id);

        for entity in result.entities.iter().filter(|e| e.kind.is_callable()) {
            let stats = self
                .db
                .link_calls(repo_id, entity)
                .with_context(|| format!("linking calls of {} in {}", entity.name, entity.file_path))?;
            summary.call_edges += stats.edges;
            summary.ambiguous_calls += stats.ambiguous;
            summary.unresolved_calls += stats.unresolved;
        }

        self.db
            .update_repository_stats(repo_id, result.files.len(), result.entities_found)?;

        info!(
            "Wrote graph for {}: {} files, {} entities, {} call edges ({} ambiguous names, {} unresolved)",
            repo_id,
            summary.files_written,
            summary.entities_written,
            summary.call_edges,
            summary.ambiguous_calls,
            summary.unresolved_calls
        );
        Ok(summary)
    }

    /// Remove the repository's files and entities, keeping the repository
    pub fn clear_repository(&self, repo_id: &str) -> Result<()> {
        let (files, entities) = self.db.clear_repository(repo_id)?;
        info!("Cleared {} files and {} entities from {}", files, entities, repo_id);
        Ok(())
    }
}
