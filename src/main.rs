//! Neograph - multi-language code property graph service
//!
//! A command-line tool for indexing repositories into a code graph and
//! querying its structure, call relationships and embeddings.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use neograph::core::config::LoggingConfig;
use neograph::core::query::GraphMode;
use neograph::core::wiki::WikiReader;
use neograph::server::{self, AppState};
use neograph::storage::models::Repository;
use neograph::{Config, Database, GraphReader};

/// Neograph - multi-language code property graph service
#[derive(Parser)]
#[command(name = "neograph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Index a local directory
    Index {
        /// Path to the repository root
        #[arg(short, long)]
        path: PathBuf,

        /// Repository name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Register a git repository and index it
    Add {
        /// Clone URL
        #[arg(short, long)]
        url: String,

        /// Branch to check out
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// List repositories
    Repos,

    /// Show the file tree of a repository
    Files {
        /// Repository id or name
        #[arg(short, long)]
        repo: String,
    },

    /// Show the structure or call graph of a repository
    Graph {
        /// Repository id or name
        #[arg(short, long)]
        repo: String,

        /// Graph type: structure or calls
        #[arg(short, long, default_value = "structure")]
        mode: GraphMode,
    },

    /// Show a file or entity
    Node {
        /// Repository id or name
        #[arg(short, long)]
        repo: String,

        /// Node id
        #[arg(short, long)]
        id: String,
    },

    /// Similarity search over embedded entities
    Search {
        /// Natural language query
        #[arg(short, long)]
        query: String,

        /// Restrict to one repository (id or name)
        #[arg(short, long)]
        repo: Option<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show a repository's wiki navigation, or one page with --page
    Wiki {
        /// Repository id or name
        #[arg(short, long)]
        repo: String,

        /// Page slug
        #[arg(short, long)]
        page: Option<String>,
    },

    /// List supported languages
    Languages,
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("neograph={},tower_http={}", level, level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match config.format.as_str() {
        "pretty" => builder.pretty().init(),
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve a repository id or name
fn resolve_repository(db: &Database, repo: &str) -> anyhow::Result<Repository> {
    if let Some(found) = db.get_repository(repo)? {
        return Ok(found);
    }

    let mut matches: Vec<_> = db.list_repositories()?.into_iter().filter(|r| r.name == repo).collect();
    match matches.len() {
        0 => anyhow::bail!("Repository '{}' not found", repo),
        1 => Ok(matches.remove(0)),
        _ => {
            eprintln!("Multiple repositories are named '{}'. Use an id:", repo);
            for r in &matches {
                eprintln!("  - {} (id={}, url={})", r.name, r.id, r.url);
            }
            anyhow::bail!("Ambiguous repository name '{}'", repo)
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexReport {
    repository: Repository,
    summary: neograph::core::graph::WriteSummary,
}

async fn index_and_report(state: &AppState, repo: Repository) -> anyhow::Result<()> {
    let summary = state.indexer.index_repository(&repo).await?;
    let repository = state.db.get_repository(&repo.id)?.unwrap_or(repo);
    print_json(&IndexReport { repository, summary })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            info!("Starting neograph server on {}:{}", config.server.host, config.server.port);
            server::run_server(&config).await?;
        }

        Commands::Index { path, name } => {
            let root = path
                .canonicalize()
                .with_context(|| format!("resolving {}", path.display()))?;
            let url = root.to_string_lossy().into_owned();

            let state = AppState::from_config(&config)?;
            let repo = match state.db.get_repository_by_url(&url)? {
                Some(existing) => existing,
                None => state.indexer.register_repository(&url, name.as_deref(), None)?,
            };

            info!("Indexing '{}' at {}", repo.name, url);
            index_and_report(&state, repo).await?;
        }

        Commands::Add { url, branch } => {
            let state = AppState::from_config(&config)?;
            if state.db.get_repository_by_url(&url)?.is_some() {
                anyhow::bail!("Repository {} already exists", url);
            }
            let repo = state.indexer.register_repository(&url, None, branch.as_deref())?;
            index_and_report(&state, repo).await?;
        }

        Commands::Repos => {
            let db = Database::open(&config.database.path, config.database.pool_size)?;
            db.init_schema()?;
            print_json(&db.list_repositories()?)?;
        }

        Commands::Files { repo } => {
            let db = Database::open(&config.database.path, config.database.pool_size)?;
            let repo = resolve_repository(&db, &repo)?;
            print_json(&GraphReader::new(db).get_file_tree(&repo.id)?)?;
        }

        Commands::Graph { repo, mode } => {
            let db = Database::open(&config.database.path, config.database.pool_size)?;
            let repo = resolve_repository(&db, &repo)?;
            print_json(&GraphReader::new(db).get_graph(&repo.id, mode)?)?;
        }

        Commands::Node { repo, id } => {
            let db = Database::open(&config.database.path, config.database.pool_size)?;
            let repo = resolve_repository(&db, &repo)?;
            let detail = GraphReader::new(db)
                .get_node_detail(&repo.id, &id)?
                .ok_or_else(|| anyhow::anyhow!("Node '{}' not found in {}", id, repo.name))?;
            print_json(&detail)?;
        }

        Commands::Search { query, repo, limit } => {
            let embedder = server::build_embedder(&config)?
                .context("search needs an embedding backend: set embedding.url or TEI_URL")?;
            let db = Database::open(&config.database.path, config.database.pool_size)?;
            let repo = repo.map(|r| resolve_repository(&db, &r)).transpose()?;

            let vector = embedder
                .embed(std::slice::from_ref(&query))
                .await?
                .into_iter()
                .next()
                .context("embedding backend returned no vector")?;

            let hits = GraphReader::new(db)
                .with_min_score(config.search.min_score)
                .vector_search(&vector, config.search.effective_limit(limit), repo.as_ref().map(|r| r.id.as_str()))?;
            print_json(&hits)?;
        }

        Commands::Wiki { repo, page } => {
            let db = Database::open(&config.database.path, config.database.pool_size)?;
            db.init_schema()?;
            let repo = resolve_repository(&db, &repo)?;
            let reader = WikiReader::new(db);
            match page {
                Some(slug) => {
                    let page = reader
                        .get_page(&repo.id, &slug)?
                        .ok_or_else(|| anyhow::anyhow!("Wiki page '{}' not found in {}", slug, repo.name))?;
                    print_json(&page)?;
                }
                None => print_json(&reader.get_navigation(&repo.id)?)?,
            }
        }

        Commands::Languages => {
            let registry = neograph::LanguageRegistry::new();
            let languages: Vec<_> = registry
                .list_languages()
                .iter()
                .map(|l| serde_json::json!({ "id": l.language_id(), "extensions": l.file_extensions() }))
                .collect();
            print_json(&languages)?;
        }
    }

    Ok(())
}
