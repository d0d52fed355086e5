//! Data models for the code property graph

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indexing lifecycle of a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Pending,
    Indexing,
    Ready,
    Error,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Pending => "pending",
            RepoStatus::Indexing => "indexing",
            RepoStatus::Ready => "ready",
            RepoStatus::Error => "error",
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RepoStatus::Pending),
            "indexing" => Ok(RepoStatus::Indexing),
            "ready" => Ok(RepoStatus::Ready),
            "error" => Ok(RepoStatus::Error),
            other => anyhow::bail!("unknown repository status: {}", other),
        }
    }
}

/// Repository node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub url: String,
    pub name: String,
    pub default_branch: String,
    pub status: RepoStatus,
    pub files_count: u64,
    pub functions_count: u64,
    pub last_indexed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    /// Build a new pending repository with a fresh id
    pub fn new(url: &str, name: &str, default_branch: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            name: name.to_string(),
            default_branch: default_branch.to_string(),
            status: RepoStatus::Pending,
            files_count: 0,
            functions_count: 0,
            last_indexed: None,
            created_at: Utc::now(),
        }
    }
}

/// Kind of a code entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Function,
    Method,
    Class,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Function => "Function",
            EntityKind::Method => "Method",
            EntityKind::Class => "Class",
        }
    }

    /// Functions and methods take part in call resolution
    pub fn is_callable(&self) -> bool {
        matches!(self, EntityKind::Function | EntityKind::Method)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Function" => Ok(EntityKind::Function),
            "Method" => Ok(EntityKind::Method),
            "Class" => Ok(EntityKind::Class),
            other => anyhow::bail!("unknown entity kind: {}", other),
        }
    }
}

/// A source file discovered and read by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub repo_id: String,
    /// Path relative to the repository root, `/`-separated
    pub path: String,
    pub language: String,
    /// djb2 digest of the raw bytes, lowercase hex
    pub hash: String,
    pub size: u64,
}

/// A function, method or class extracted from a file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEntity {
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subkind: Option<String>,
    pub name: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// 1-based, inclusive
    pub start_line: u32,
    pub end_line: u32,
    pub file_path: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nl_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Unqualified callee names in first-seen order
    #[serde(default)]
    pub calls: Vec<String>,
}

/// Aggregate output of one indexing run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexResult {
    pub repo_id: String,
    pub files_processed: usize,
    pub entities_found: usize,
    /// One `"<path>: <message>"` entry per failed file
    pub errors: Vec<String>,
    #[serde(default)]
    pub embedding_failures: Vec<String>,
    pub files: Vec<FileRecord>,
    pub entities: Vec<CodeEntity>,
}

// ==================== Wiki ====================

/// A generated documentation page attached to a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiPage {
    pub id: String,
    pub repo_id: String,
    /// URL-friendly identifier, unique per repository
    pub slug: String,
    pub title: String,
    /// Markdown
    pub content: String,
    /// Position among siblings in the navigation
    pub order: i64,
    /// Empty for top-level pages
    #[serde(default)]
    pub parent_slug: String,
    #[serde(default)]
    pub diagrams: Vec<Diagram>,
    pub generated_at: DateTime<Utc>,
}

impl WikiPage {
    /// Build a root page with no id yet; `Database::write_page` assigns one
    pub fn new(repo_id: &str, slug: &str, title: &str, content: &str) -> Self {
        Self {
            id: String::new(),
            repo_id: repo_id.to_string(),
            slug: slug.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            order: 0,
            parent_slug: String::new(),
            diagrams: Vec::new(),
            generated_at: Utc::now(),
        }
    }
}

/// Mermaid diagram embedded in a wiki page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagram {
    pub id: String,
    pub title: String,
    pub code: String,
}

/// Node of the wiki navigation tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiNavItem {
    pub slug: String,
    pub title: String,
    pub order: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<WikiNavItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiNavigation {
    pub items: Vec<WikiNavItem>,
}

/// Table of contents entry for a markdown heading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocItem {
    /// Anchor derived from the title
    pub id: String,
    pub title: String,
    /// 1 for `#` through 6 for `######`
    pub level: u8,
}

/// A wiki page with its table of contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiPageDetail {
    #[serde(flatten)]
    pub page: WikiPage,
    pub table_of_contents: Vec<TocItem>,
}

/// Wiki generation lifecycle of a repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WikiState {
    /// Never generated
    #[default]
    #[serde(rename = "none")]
    Absent,
    Pending,
    Generating,
    Ready,
    Error,
}

impl WikiState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WikiState::Absent => "none",
            WikiState::Pending => "pending",
            WikiState::Generating => "generating",
            WikiState::Ready => "ready",
            WikiState::Error => "error",
        }
    }
}

impl fmt::Display for WikiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WikiState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(WikiState::Absent),
            "pending" => Ok(WikiState::Pending),
            "generating" => Ok(WikiState::Generating),
            "ready" => Ok(WikiState::Ready),
            "error" => Ok(WikiState::Error),
            other => anyhow::bail!("unknown wiki status: {}", other),
        }
    }
}

/// Progress of wiki generation for one repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiStatus {
    pub status: WikiState,
    /// 0-100
    pub progress: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_page: String,
    pub total_pages: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}
