//! SQLite-backed property graph

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::debug;

use super::models::{CodeEntity, FileRecord, RepoStatus, Repository};

pub type PooledConn = PooledConnection<SqliteConnectionManager>;

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        Ok(())
    }
}

/// Outcome of resolving one caller's call names
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallLinkStats {
    /// CALLS edges created
    pub edges: usize,
    /// Call names that matched more than one callee
    pub ambiguous: usize,
    /// Call names that matched nothing in the repository
    pub unresolved: usize,
}

/// Pooled handle to the graph database. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(SqliteConnectionManager::file(path))
            .with_context(|| format!("Failed to open database: {:?}", path))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    ///
    /// Every in-memory connection is its own database, so the pool holds
    /// exactly one connection that is never recycled.
    pub fn open_in_memory() -> Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(SqliteConnectionManager::memory())
            .context("Failed to open in-memory database")?;
        Ok(Self { pool })
    }

    /// Check out a connection from the pool
    pub fn conn(&self) -> Result<PooledConn> {
        self.pool.get().context("Failed to get database connection")
    }

    /// Initialize the database schema
    pub fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            -- Repository nodes
            CREATE TABLE IF NOT EXISTS repositories (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                default_branch TEXT NOT NULL,
                status TEXT NOT NULL,
                files_count INTEGER NOT NULL DEFAULT 0,
                functions_count INTEGER NOT NULL DEFAULT 0,
                last_indexed TEXT,
                created_at TEXT NOT NULL
            );

            -- File nodes
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                repo_id TEXT NOT NULL,
                path TEXT NOT NULL,
                language TEXT NOT NULL,
                hash TEXT NOT NULL,
                size INTEGER NOT NULL,
                FOREIGN KEY (repo_id) REFERENCES repositories(id),
                UNIQUE(repo_id, path)
            );

            -- Function, Method and Class nodes
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                repo_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                subkind TEXT,
                name TEXT NOT NULL,
                signature TEXT NOT NULL,
                docstring TEXT,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                content TEXT NOT NULL,
                nl_description TEXT,
                embedding BLOB,
                FOREIGN KEY (repo_id) REFERENCES repositories(id)
            );

            -- CONTAINS, DECLARES and CALLS relationships
            CREATE TABLE IF NOT EXISTS edges (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                edge_type TEXT NOT NULL,
                ambiguous INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (source_id, target_id, edge_type)
            );

            -- Wiki pages, linked from their repository by HAS_WIKI
            CREATE TABLE IF NOT EXISTS wiki_pages (
                id TEXT PRIMARY KEY,
                repo_id TEXT NOT NULL,
                slug TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0,
                parent_slug TEXT NOT NULL DEFAULT '',
                diagrams TEXT NOT NULL DEFAULT '[]',
                generated_at TEXT NOT NULL,
                FOREIGN KEY (repo_id) REFERENCES repositories(id),
                UNIQUE(repo_id, slug)
            );

            -- Wiki generation progress, one row per repository
            CREATE TABLE IF NOT EXISTS wiki_status (
                repo_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                current_page TEXT NOT NULL DEFAULT '',
                total_pages INTEGER NOT NULL DEFAULT 0,
                error_message TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (repo_id) REFERENCES repositories(id)
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_files_path ON files(path);
            CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
            CREATE INDEX IF NOT EXISTS idx_entities_file ON entities(repo_id, file_path);
            CREATE INDEX IF NOT EXISTS idx_entities_embedded ON entities(repo_id) WHERE embedding IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, edge_type);
            "#,
        )?;

        Ok(())
    }

    // ==================== Repository Operations ====================

    /// Insert a new repository
    pub fn insert_repository(&self, repo: &Repository) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO repositories (id, url, name, default_branch, status, files_count, functions_count, last_indexed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    repo.id,
                    repo.url,
                    repo.name,
                    repo.default_branch,
                    repo.status.as_str(),
                    repo.files_count as i64,
                    repo.functions_count as i64,
                    repo.last_indexed.map(|t| t.to_rfc3339()),
                    repo.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to insert repository {}", repo.url))?;
        Ok(())
    }

    /// Get a repository by id
    pub fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        self.conn()?
            .query_row(
                &format!("SELECT {} FROM repositories WHERE id = ?1", REPOSITORY_COLUMNS),
                params![id],
                row_to_repository,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Get a repository by its URL
    pub fn get_repository_by_url(&self, url: &str) -> Result<Option<Repository>> {
        self.conn()?
            .query_row(
                &format!("SELECT {} FROM repositories WHERE url = ?1", REPOSITORY_COLUMNS),
                params![url],
                row_to_repository,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List repositories, most recently indexed first
    pub fn list_repositories(&self) -> Result<Vec<Repository>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM repositories ORDER BY last_indexed IS NULL, last_indexed DESC, created_at DESC",
            REPOSITORY_COLUMNS
        ))?;

        let rows = stmt.query_map([], row_to_repository)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Set a repository's status and stamp `last_indexed`
    pub fn update_repository_status(&self, id: &str, status: RepoStatus) -> Result<()> {
        self.conn()?.execute(
            "UPDATE repositories SET status = ?1, last_indexed = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Record index counts and mark the repository ready
    pub fn update_repository_stats(&self, id: &str, files: usize, functions: usize) -> Result<()> {
        self.conn()?.execute(
            "UPDATE repositories SET files_count = ?1, functions_count = ?2, status = ?3, last_indexed = ?4 WHERE id = ?5",
            params![
                files as i64,
                functions as i64,
                RepoStatus::Ready.as_str(),
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    /// Remove a repository with its whole subgraph and wiki. Returns false if absent.
    pub fn delete_repository(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        clear_subgraph(&tx, id)?;
        tx.execute("DELETE FROM wiki_pages WHERE repo_id = ?1", params![id])?;
        tx.execute("DELETE FROM wiki_status WHERE repo_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )?;
        let deleted = tx.execute("DELETE FROM repositories WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(deleted > 0)
    }

    // ==================== Graph Write Operations ====================

    /// Upsert a file by (repo, path) and link it from its repository.
    ///
    /// An existing file keeps its id; language, hash and size are updated.
    pub fn upsert_file(&self, file: &FileRecord) -> Result<String> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO files (id, repo_id, path, language, hash, size) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(repo_id, path) DO UPDATE SET language = excluded.language, hash = excluded.hash, size = excluded.size",
            params![
                uuid::Uuid::new_v4().to_string(),
                file.repo_id,
                file.path,
                file.language,
                file.hash,
                file.size as i64
            ],
        )
        .with_context(|| format!("Failed to write file {}", file.path))?;

        let file_id: String = tx.query_row(
            "SELECT id FROM files WHERE repo_id = ?1 AND path = ?2",
            params![file.repo_id, file.path],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT OR IGNORE INTO edges (source_id, target_id, edge_type) VALUES (?1, ?2, 'CONTAINS')",
            params![file.repo_id, file_id],
        )?;

        tx.commit()?;
        Ok(file_id)
    }

    /// Create an entity node with a fresh id and link it from its file
    pub fn insert_entity(&self, repo_id: &str, entity: &CodeEntity) -> Result<String> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let file_id: String = tx
            .query_row(
                "SELECT id FROM files WHERE repo_id = ?1 AND path = ?2",
                params![repo_id, entity.file_path],
                |row| row.get(0),
            )
            .optional()?
            .with_context(|| format!("File {} not written before its entities", entity.file_path))?;

        let id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO entities (id, repo_id, kind, subkind, name, signature, docstring, start_line, end_line, file_path, content, nl_description, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id,
                repo_id,
                entity.kind.as_str(),
                entity.subkind,
                entity.name,
                entity.signature,
                entity.docstring,
                entity.start_line,
                entity.end_line,
                entity.file_path,
                entity.content,
                entity.nl_description,
                entity.embedding.as_deref().map(encode_embedding),
            ],
        )?;

        tx.execute(
            "INSERT OR IGNORE INTO edges (source_id, target_id, edge_type) VALUES (?1, ?2, 'DECLARES')",
            params![file_id, id],
        )?;

        tx.commit()?;
        Ok(id)
    }

    /// Create CALLS edges from every same-named callable in the caller's
    /// file to every callable in the repository named by each call.
    pub fn link_calls(&self, repo_id: &str, caller: &CodeEntity) -> Result<CallLinkStats> {
        let mut stats = CallLinkStats::default();
        if caller.calls.is_empty() {
            return Ok(stats);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut count_callees = tx.prepare_cached(
                "SELECT COUNT(*) FROM entities WHERE repo_id = ?1 AND name = ?2 AND kind IN ('Function', 'Method')",
            )?;
            let mut link = tx.prepare_cached(
                "INSERT OR IGNORE INTO edges (source_id, target_id, edge_type, ambiguous)
                 SELECT caller.id, callee.id, 'CALLS', ?5
                 FROM entities caller, entities callee
                 WHERE caller.repo_id = ?1 AND caller.name = ?2 AND caller.file_path = ?3
                   AND caller.kind IN ('Function', 'Method')
                   AND callee.repo_id = ?1 AND callee.name = ?4
                   AND callee.kind IN ('Function', 'Method')",
            )?;

            for callee in &caller.calls {
                let candidates: i64 = count_callees.query_row(params![repo_id, callee], |row| row.get(0))?;
                if candidates == 0 {
                    stats.unresolved += 1;
                    continue;
                }
                let ambiguous = candidates > 1;
                if ambiguous {
                    stats.ambiguous += 1;
                }
                stats.edges += link.execute(params![
                    repo_id,
                    caller.name,
                    caller.file_path,
                    callee,
                    ambiguous
                ])?;
            }
        }
        tx.commit()?;

        Ok(stats)
    }

    /// Delete every file and entity reachable from the repository, with
    /// all their edges. The repository node stays.
    pub fn clear_repository(&self, repo_id: &str) -> Result<(usize, usize)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = clear_subgraph(&tx, repo_id)?;
        tx.commit()?;
        debug!(
            "Cleared repository {}: {} files, {} entities",
            repo_id, removed.0, removed.1
        );
        Ok(removed)
    }
}

const REPOSITORY_COLUMNS: &str =
    "id, url, name, default_branch, status, files_count, functions_count, last_indexed, created_at";

fn row_to_repository(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let status: String = row.get(4)?;
    let last_indexed: Option<String> = row.get(7)?;

    Ok(Repository {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        default_branch: row.get(3)?,
        status: status
            .parse()
            .map_err(|e: anyhow::Error| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?,
        files_count: row.get::<_, i64>(5)? as u64,
        functions_count: row.get::<_, i64>(6)? as u64,
        last_indexed: last_indexed.map(|t| parse_timestamp(7, &t)).transpose()?,
        created_at: parse_timestamp(8, &row.get::<_, String>(8)?)?,
    })
}

pub(crate) fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn clear_subgraph(tx: &Transaction<'_>, repo_id: &str) -> Result<(usize, usize)> {
    let file_ids = query_ids(
        tx,
        "SELECT target_id FROM edges WHERE source_id = ?1 AND edge_type = 'CONTAINS'",
        repo_id,
    )?;
    let entity_ids = query_ids(
        tx,
        "SELECT d.target_id FROM edges c
         JOIN edges d ON d.source_id = c.target_id AND d.edge_type = 'DECLARES'
         WHERE c.source_id = ?1 AND c.edge_type = 'CONTAINS'",
        repo_id,
    )?;

    let mut delete_edges = tx.prepare_cached("DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1")?;
    let mut delete_entity = tx.prepare_cached("DELETE FROM entities WHERE id = ?1")?;
    let mut delete_file = tx.prepare_cached("DELETE FROM files WHERE id = ?1")?;

    for id in &entity_ids {
        delete_edges.execute(params![id])?;
        delete_entity.execute(params![id])?;
    }
    for id in &file_ids {
        delete_edges.execute(params![id])?;
        delete_file.execute(params![id])?;
    }

    Ok((file_ids.len(), entity_ids.len()))
}

fn query_ids(tx: &Transaction<'_>, sql: &str, repo_id: &str) -> Result<Vec<String>> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map(params![repo_id], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Little-endian f32 bytes
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
