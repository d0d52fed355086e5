//! Wiki pages and generation status

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::models::{Diagram, WikiPage, WikiStatus};
use super::sqlite::{parse_timestamp, Database};

const WIKI_PAGE_COLUMNS: &str = "id, repo_id, slug, title, content, sort_order, parent_slug, diagrams, generated_at";

/// Slug, title, order and parent of one page; enough to build navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiPageInfo {
    pub slug: String,
    pub title: String,
    pub order: i64,
    pub parent_slug: String,
}

impl Database {
    /// Upsert a page by (repository, slug) and link it from its repository.
    ///
    /// A page without an id gets a fresh one. Rewriting an existing slug
    /// keeps the stored id and stamps `generated_at`. Returns the stored id.
    pub fn write_page(&self, page: &WikiPage) -> Result<String> {
        let id = if page.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            page.id.clone()
        };
        let diagrams = serde_json::to_string(&page.diagrams)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO wiki_pages (id, repo_id, slug, title, content, sort_order, parent_slug, diagrams, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(repo_id, slug) DO UPDATE SET
                title = excluded.title, content = excluded.content, sort_order = excluded.sort_order,
                parent_slug = excluded.parent_slug, diagrams = excluded.diagrams, generated_at = excluded.generated_at",
            params![
                id,
                page.repo_id,
                page.slug,
                page.title,
                page.content,
                page.order,
                page.parent_slug,
                diagrams,
                Utc::now().to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to write wiki page {}", page.slug))?;

        let stored_id: String = tx.query_row(
            "SELECT id FROM wiki_pages WHERE repo_id = ?1 AND slug = ?2",
            params![page.repo_id, page.slug],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT OR IGNORE INTO edges (source_id, target_id, edge_type) VALUES (?1, ?2, 'HAS_WIKI')",
            params![page.repo_id, stored_id],
        )?;

        tx.commit()?;
        Ok(stored_id)
    }

    /// Delete every wiki page of a repository. Returns the number removed.
    pub fn clear_wiki(&self, repo_id: &str) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM edges WHERE source_id = ?1 AND edge_type = 'HAS_WIKI'",
            params![repo_id],
        )?;
        let removed = tx.execute("DELETE FROM wiki_pages WHERE repo_id = ?1", params![repo_id])?;
        tx.commit()?;
        debug!("Cleared {} wiki pages of {}", removed, repo_id);
        Ok(removed)
    }

    /// Record wiki generation progress for a repository
    pub fn update_wiki_status(&self, repo_id: &str, status: &WikiStatus) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO wiki_status (repo_id, status, progress, current_page, total_pages, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(repo_id) DO UPDATE SET
                    status = excluded.status, progress = excluded.progress, current_page = excluded.current_page,
                    total_pages = excluded.total_pages, error_message = excluded.error_message",
                params![
                    repo_id,
                    status.status.as_str(),
                    status.progress,
                    status.current_page,
                    status.total_pages,
                    status.error_message,
                ],
            )
            .with_context(|| format!("Failed to update wiki status of {}", repo_id))?;
        Ok(())
    }

    /// Wiki generation progress; `none` when nothing was ever recorded
    pub fn get_wiki_status(&self, repo_id: &str) -> Result<WikiStatus> {
        let status = self
            .conn()?
            .query_row(
                "SELECT status, progress, current_page, total_pages, error_message FROM wiki_status WHERE repo_id = ?1",
                params![repo_id],
                |row| {
                    let state: String = row.get(0)?;
                    Ok(WikiStatus {
                        status: state.parse().map_err(|e: anyhow::Error| {
                            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into())
                        })?,
                        progress: row.get(1)?,
                        current_page: row.get(2)?,
                        total_pages: row.get(3)?,
                        error_message: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(status.unwrap_or_default())
    }

    /// Navigation fields of every page of a repository, by order
    pub fn list_wiki_pages(&self, repo_id: &str) -> Result<Vec<WikiPageInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT slug, title, sort_order, parent_slug FROM wiki_pages WHERE repo_id = ?1 ORDER BY sort_order, rowid",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| {
            Ok(WikiPageInfo {
                slug: row.get(0)?,
                title: row.get(1)?,
                order: row.get(2)?,
                parent_slug: row.get(3)?,
            })
        })?;

        let mut pages = Vec::new();
        for row in rows {
            pages.push(row?);
        }
        Ok(pages)
    }

    /// One page by slug
    pub fn get_wiki_page(&self, repo_id: &str, slug: &str) -> Result<Option<WikiPage>> {
        self.conn()?
            .query_row(
                &format!("SELECT {} FROM wiki_pages WHERE repo_id = ?1 AND slug = ?2", WIKI_PAGE_COLUMNS),
                params![repo_id, slug],
                row_to_wiki_page,
            )
            .optional()
            .map_err(Into::into)
    }
}

fn row_to_wiki_page(row: &Row<'_>) -> rusqlite::Result<WikiPage> {
    let diagrams: String = row.get(7)?;
    let diagrams: Vec<Diagram> = serde_json::from_str(&diagrams)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(WikiPage {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        slug: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        order: row.get(5)?,
        parent_slug: row.get(6)?,
        diagrams,
        generated_at: parse_timestamp(8, &row.get::<_, String>(8)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{Repository, WikiState};

    fn setup() -> (Database, Repository) {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let repo = Repository::new("https://example.com/acme/shop.git", "shop", "main");
        db.insert_repository(&repo).unwrap();
        (db, repo)
    }

    fn count(db: &Database, sql: &str) -> i64 {
        db.conn().unwrap().query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_write_page_assigns_id_and_links_repository() {
        let (db, repo) = setup();
        let page = WikiPage::new(&repo.id, "overview", "Overview", "# Overview");

        let id = db.write_page(&page).unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM edges WHERE edge_type = 'HAS_WIKI'"),
            1
        );

        let stored = db.get_wiki_page(&repo.id, "overview").unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.title, "Overview");
        assert!(stored.diagrams.is_empty());
    }

    #[test]
    fn test_write_page_keeps_given_id() {
        let (db, repo) = setup();
        let mut page = WikiPage::new(&repo.id, "guide", "Guide", "");
        page.id = "existing-id".to_string();
        assert_eq!(db.write_page(&page).unwrap(), "existing-id");
    }

    #[test]
    fn test_rewrite_same_slug_updates_in_place() {
        let (db, repo) = setup();
        let first = db.write_page(&WikiPage::new(&repo.id, "api", "API", "old")).unwrap();

        let mut updated = WikiPage::new(&repo.id, "api", "API Reference", "new");
        updated.order = 3;
        updated.parent_slug = "guide".to_string();
        updated.diagrams = vec![Diagram {
            id: "diagram-1".to_string(),
            title: "Sequence".to_string(),
            code: "sequenceDiagram\n  A->>B: Hello".to_string(),
        }];
        let second = db.write_page(&updated).unwrap();

        assert_eq!(first, second);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM wiki_pages"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM edges WHERE edge_type = 'HAS_WIKI'"), 1);

        let stored = db.get_wiki_page(&repo.id, "api").unwrap().unwrap();
        assert_eq!(stored.title, "API Reference");
        assert_eq!(stored.content, "new");
        assert_eq!(stored.order, 3);
        assert_eq!(stored.parent_slug, "guide");
        assert_eq!(stored.diagrams, updated.diagrams);
    }

    #[test]
    fn test_diagrams_with_unicode_and_quotes_survive() {
        let (db, repo) = setup();
        let mut page = WikiPage::new(&repo.id, "arch", "Architecture", "");
        page.diagrams = vec![Diagram {
            id: "d".to_string(),
            title: "日本語 \"quotes\" and 'apostrophes'".to_string(),
            code: "graph TD\n  A[\"你好\"] --> B[\"مرحبا\"]".to_string(),
        }];
        db.write_page(&page).unwrap();

        let stored = db.get_wiki_page(&repo.id, "arch").unwrap().unwrap();
        assert_eq!(stored.diagrams, page.diagrams);
    }

    #[test]
    fn test_page_for_unknown_repository_fails() {
        let (db, _) = setup();
        assert!(db.write_page(&WikiPage::new("nope", "x", "X", "")).is_err());
    }

    #[test]
    fn test_clear_wiki_is_scoped_to_repository() {
        let (db, repo) = setup();
        let other = Repository::new("https://example.com/acme/blog.git", "blog", "main");
        db.insert_repository(&other).unwrap();

        db.write_page(&WikiPage::new(&repo.id, "a", "A", "")).unwrap();
        db.write_page(&WikiPage::new(&repo.id, "b", "B", "")).unwrap();
        db.write_page(&WikiPage::new(&other.id, "a", "A", "")).unwrap();

        assert_eq!(db.clear_wiki(&repo.id).unwrap(), 2);
        assert!(db.list_wiki_pages(&repo.id).unwrap().is_empty());
        assert_eq!(db.list_wiki_pages(&other.id).unwrap().len(), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM edges WHERE edge_type = 'HAS_WIKI'"), 1);
        assert_eq!(db.clear_wiki(&repo.id).unwrap(), 0);
    }

    #[test]
    fn test_wiki_status_round_trip() {
        let (db, repo) = setup();
        assert_eq!(db.get_wiki_status(&repo.id).unwrap(), WikiStatus::default());
        assert_eq!(db.get_wiki_status("missing").unwrap().status, WikiState::Absent);

        let generating = WikiStatus {
            status: WikiState::Generating,
            progress: 40,
            current_page: "Overview".to_string(),
            total_pages: 5,
            error_message: String::new(),
        };
        db.update_wiki_status(&repo.id, &generating).unwrap();
        assert_eq!(db.get_wiki_status(&repo.id).unwrap(), generating);

        let failed = WikiStatus {
            status: WikiState::Error,
            error_message: "generation failed".to_string(),
            ..WikiStatus::default()
        };
        db.update_wiki_status(&repo.id, &failed).unwrap();
        assert_eq!(db.get_wiki_status(&repo.id).unwrap(), failed);
    }

    #[test]
    fn test_list_wiki_pages_by_order() {
        let (db, repo) = setup();
        for (slug, order) in [("third", 30), ("first", 10), ("second", 20)] {
            let mut page = WikiPage::new(&repo.id, slug, slug, "");
            page.order = order;
            db.write_page(&page).unwrap();
        }

        let slugs: Vec<_> = db
            .list_wiki_pages(&repo.id)
            .unwrap()
            .into_iter()
            .map(|p| p.slug)
            .collect();
        assert_eq!(slugs, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_delete_repository_removes_wiki() {
        let (db, repo) = setup();
        db.write_page(&WikiPage::new(&repo.id, "overview", "Overview", "")).unwrap();
        db.update_wiki_status(&repo.id, &WikiStatus { status: WikiState::Ready, progress: 100, ..WikiStatus::default() })
            .unwrap();

        assert!(db.delete_repository(&repo.id).unwrap());
        assert_eq!(count(&db, "SELECT COUNT(*) FROM wiki_pages"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM wiki_status"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM edges"), 0);
    }
}
