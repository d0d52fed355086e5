//! Directory indexing: discovery, bounded parallel extraction, aggregation

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::config::IndexerConfig;
use crate::core::error::{FileError, PipelineError};
use crate::core::extractor::Extractor;
use crate::core::registry::LanguageRegistry;
use crate::embedding::{embed_entities, EmbeddingBackend};
use crate::storage::models::{CodeEntity, FileRecord, IndexResult};

/// A supported file found under the root
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub abs_path: PathBuf,
    /// `/`-separated path relative to the root
    pub rel_path: String,
    pub language: String,
}

/// Output of the discovery walk
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<DiscoveredFile>,
    /// Entries below the root that could not be read
    pub errors: Vec<String>,
}

type FileOutcome = (String, Result<(FileRecord, Vec<CodeEntity>), FileError>);

/// Indexes a directory into an [`IndexResult`]
pub struct IndexPipeline {
    registry: Arc<LanguageRegistry>,
    config: IndexerConfig,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
}

impl IndexPipeline {
    pub fn new(registry: Arc<LanguageRegistry>, config: IndexerConfig) -> Self {
        Self {
            registry,
            config,
            embedder: None,
        }
    }

    /// Enable the embedding stage
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn registry(&self) -> &Arc<LanguageRegistry> {
        &self.registry
    }

    /// Walk `root`, pruning ignored directories and keeping supported files
    pub fn discover(&self, root: &Path) -> Result<Discovery, PipelineError> {
        discover_files(&self.registry, &self.config.ignore_dirs, root)
    }

    /// Index every supported file under `root`.
    ///
    /// Per-file failures are collected in [`IndexResult::errors`]; only an
    /// unwalkable root fails the run.
    pub async fn index_directory(&self, root: &Path, repo_id: &str) -> Result<IndexResult, PipelineError> {
        let started = Instant::now();

        let discovery = {
            let registry = self.registry.clone();
            let ignore = self.config.ignore_dirs.clone();
            let root = root.to_path_buf();
            tokio::task::spawn_blocking(move || discover_files(&registry, &ignore, &root))
                .await
                .map_err(|e| PipelineError::Worker(e.to_string()))??
        };
        info!(
            "Discovered {} files under {}",
            discovery.files.len(),
            root.display()
        );

        let mut result = IndexResult {
            repo_id: repo_id.to_string(),
            errors: discovery.errors,
            ..Default::default()
        };

        let mut outcomes = self.spawn_workers(repo_id, discovery.files);
        while let Some((rel_path, outcome)) = outcomes.recv().await {
            match outcome {
                Ok((file, entities)) => {
                    debug!("{}: {} entities", rel_path, entities.len());
                    result.files_processed += 1;
                    result.entities_found += entities.len();
                    result.files.push(file);
                    result.entities.extend(entities);
                }
                Err(e) => {
                    warn!("Failed to index {}: {}", rel_path, e);
                    result.errors.push(format!("{}: {}", rel_path, e));
                }
            }
        }

        if let Some(embedder) = &self.embedder {
            if let Err(partial) =
                embed_entities(embedder.as_ref(), &mut result.entities, self.config.embed_batch_size).await
            {
                warn!(
                    "{} ({} of {} entities embedded)",
                    partial, partial.embedded, result.entities_found
                );
                result.embedding_failures = partial.failures;
            }
        }

        info!(
            "Indexed {} files, {} entities, {} errors in {:?}",
            result.files_processed,
            result.entities_found,
            result.errors.len(),
            started.elapsed()
        );
        Ok(result)
    }

    /// Like [`index_directory`](Self::index_directory), but gives up with
    /// [`PipelineError::Cancelled`] as soon as `cancelled` completes.
    ///
    /// Partial results are discarded. Queued files are never started and
    /// each worker stops after the file it is currently parsing.
    pub async fn index_directory_until<F>(
        &self,
        root: &Path,
        repo_id: &str,
        cancelled: F,
    ) -> Result<IndexResult, PipelineError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancelled => {
                info!("Indexing of {} cancelled", root.display());
                Err(PipelineError::Cancelled)
            }
            result = self.index_directory(root, repo_id) => result,
        }
    }

    /// Start the worker pool; outcomes arrive on the returned channel
    fn spawn_workers(&self, repo_id: &str, files: Vec<DiscoveredFile>) -> mpsc::Receiver<FileOutcome> {
        let workers = self.config.concurrency.max(1).min(files.len().max(1));
        let (tx, rx) = mpsc::channel(workers * 2);
        let queue = Arc::new(Mutex::new(files.into_iter()));

        for worker in 0..workers {
            let tx = tx.clone();
            let queue = queue.clone();
            let registry = self.registry.clone();
            let repo_id = repo_id.to_string();
            let max_bytes = self.config.max_file_bytes;

            tokio::task::spawn_blocking(move || {
                let mut extractor = Extractor::new(registry);
                loop {
                    let next = queue.lock().unwrap_or_else(|e| e.into_inner()).next();
                    let Some(file) = next else { break };

                    let outcome = process_file(&mut extractor, &repo_id, &file, max_bytes);
                    if tx.blocking_send((file.rel_path, outcome)).is_err() {
                        debug!("worker {} stopping: receiver dropped", worker);
                        break;
                    }
                }
            });
        }

        rx
    }
}

/// Walk `root` and collect files the registry can extract
pub fn discover_files(
    registry: &LanguageRegistry,
    ignore_dirs: &[String],
    root: &Path,
) -> Result<Discovery, PipelineError> {
    let metadata = std::fs::metadata(root).map_err(|source| PipelineError::Root {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(PipelineError::NotADirectory(root.to_path_buf()));
    }

    let mut discovery = Discovery::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e, ignore_dirs));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| relative_path(root, p))
                    .unwrap_or_else(|| root.display().to_string());
                discovery.errors.push(format!("{}: {}", path, e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(language) = registry.detect_language(entry.path()) {
            discovery.files.push(DiscoveredFile {
                abs_path: entry.path().to_path_buf(),
                rel_path: relative_path(root, entry.path()),
                language: language.to_string(),
            });
        }
    }

    Ok(discovery)
}

/// Stat, read, hash and extract one file
pub fn process_file(
    extractor: &mut Extractor,
    repo_id: &str,
    file: &DiscoveredFile,
    max_bytes: u64,
) -> Result<(FileRecord, Vec<CodeEntity>), FileError> {
    let size = std::fs::metadata(&file.abs_path).map_err(FileError::Stat)?.len();
    if size > max_bytes {
        return Err(FileError::TooLarge {
            size,
            limit: max_bytes,
        });
    }

    let bytes = std::fs::read(&file.abs_path).map_err(FileError::Read)?;
    std::str::from_utf8(&bytes)?;

    let entities = extractor.extract(&bytes, &file.language, &file.rel_path)?;
    let record = FileRecord {
        repo_id: repo_id.to_string(),
        path: file.rel_path.clone(),
        language: file.language.clone(),
        hash: djb2_hex(&bytes),
        size: bytes.len() as u64,
    };
    Ok((record, entities))
}

/// djb2 (`h = h * 33 + byte`, seed 5381) over raw bytes, as lowercase hex
pub fn djb2_hex(bytes: &[u8]) -> String {
    let hash = bytes
        .iter()
        .fold(5381u64, |h, b| h.wrapping_mul(33).wrapping_add(*b as u64));
    format!("{:x}", hash)
}

fn is_ignored(entry: &walkdir::DirEntry, ignore_dirs: &[String]) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| ignore_dirs.iter().any(|ignored| ignored == name))
            .unwrap_or(false)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::FakeBackend;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &[u8]) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn pipeline() -> IndexPipeline {
        IndexPipeline::new(Arc::new(LanguageRegistry::new()), IndexerConfig::default())
    }

    #[test]
    fn test_djb2() {
        assert_eq!(djb2_hex(b""), "1505");
        assert_eq!(djb2_hex(b"a"), format!("{:x}", 5381u64 * 33 + 97));
        assert_eq!(djb2_hex(b"package main"), djb2_hex(b"package main"));
        assert_ne!(djb2_hex(b"ab"), djb2_hex(b"ba"));
    }

    #[test]
    fn test_discovery_prunes_ignored_directories() {
        let dir = TempDir::new().unwrap();
        write(&dir, "main.go", b"package main\n");
        write(&dir, "pkg/util.py", b"def f():\n    pass\n");
        write(&dir, "node_modules/lib/index.js", b"function x() {}\n");
        write(&dir, "vendor/dep/dep.go", b"package dep\n");
        write(&dir, ".git/hooks/pre-commit.py", b"def hook():\n    pass\n");
        write(&dir, "README.md", b"# readme\n");

        let discovery = pipeline().discover(dir.path()).unwrap();
        let paths: Vec<_> = discovery.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["main.go", "pkg/util.py"]);
        assert!(discovery.errors.is_empty());
    }

    #[test]
    fn test_discovery_of_missing_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = pipeline().discover(&missing).unwrap_err();
        assert!(matches!(err, PipelineError::Root { .. }));

        write(&dir, "file.go", b"package x\n");
        let err = pipeline().discover(&dir.path().join("file.go")).unwrap_err();
        assert!(matches!(err, PipelineError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_index_directory_collects_entities() {
        let dir = TempDir::new().unwrap();
        write(&dir, "main.go", b"package main\n\nfunc main() {\n\thelper()\n}\n\nfunc helper() {}\n");
        write(&dir, "utils.py", b"def util():\n    return 1\n");

        let result = pipeline().index_directory(dir.path(), "repo-1").await.unwrap();
        assert_eq!(result.repo_id, "repo-1");
        assert_eq!(result.files_processed, 2);
        assert_eq!(result.entities_found, 3);
        assert_eq!(result.entities.len(), result.entities_found);
        assert!(result.errors.is_empty());

        let main_go = result.files.iter().find(|f| f.path == "main.go").unwrap();
        assert_eq!(main_go.language, "go");
        assert_eq!(main_go.repo_id, "repo-1");
        assert_eq!(main_go.hash, djb2_hex(&fs::read(dir.path().join("main.go")).unwrap()));
    }

    #[tokio::test]
    async fn test_malformed_file_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.go", b"package a\nfunc A() {}\n");
        write(&dir, "b.py", b"def b():\n    pass\n");
        write(&dir, "broken.js", &[0x66, 0x6e, 0xff, 0xfe, 0x00, 0x28]);

        let result = pipeline().index_directory(dir.path(), "r").await.unwrap();
        assert_eq!(result.files_processed, 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("broken.js: "), "{}", result.errors[0]);
    }

    #[tokio::test]
    async fn test_oversized_file_is_reported() {
        let dir = TempDir::new().unwrap();
        write(&dir, "big.py", "x = 1\n".repeat(100).as_bytes());

        let config = IndexerConfig {
            max_file_bytes: 64,
            ..IndexerConfig::default()
        };
        let pipeline = IndexPipeline::new(Arc::new(LanguageRegistry::new()), config);
        let result = pipeline.index_directory(dir.path(), "r").await.unwrap();
        assert_eq!(result.files_processed, 0);
        assert!(result.errors[0].contains("exceeds size limit"));
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let result = pipeline().index_directory(dir.path(), "r").await.unwrap();
        assert_eq!(result.files_processed, 0);
        assert_eq!(result.entities_found, 0);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        write(&dir, "main.go", b"package main\nfunc main() {}\n");

        let err = pipeline()
            .index_directory_until(dir.path(), "r", std::future::ready(()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_uncancelled_run_completes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "main.go", b"package main\nfunc main() {}\n");

        let result = pipeline()
            .index_directory_until(dir.path(), "r", std::future::pending())
            .await
            .unwrap();
        assert_eq!(result.entities_found, 1);
    }

    #[tokio::test]
    async fn test_embedding_stage_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", b"def a():\n    pass\n\ndef b():\n    pass\n");

        let config = IndexerConfig {
            embed_batch_size: 1,
            ..IndexerConfig::default()
        };
        let pipeline = IndexPipeline::new(Arc::new(LanguageRegistry::new()), config)
            .with_embedder(Arc::new(FakeBackend::failing(0)));

        let result = pipeline.index_directory(dir.path(), "r").await.unwrap();
        assert_eq!(result.entities_found, 2);
        assert_eq!(result.embedding_failures.len(), 1);
        let embedded = result.entities.iter().filter(|e| e.embedding.is_some()).count();
        assert_eq!(embedded, 1);
    }

    #[tokio::test]
    async fn test_many_files_with_small_pool() {
        let dir = TempDir::new().unwrap();
        for i in 0..25 {
            write(&dir, &format!("pkg{}/f.go", i), format!("package p\nfunc F{}() {{}}\n", i).as_bytes());
        }
        let config = IndexerConfig {
            concurrency: 3,
            ..IndexerConfig::default()
        };
        let pipeline = IndexPipeline::new(Arc::new(LanguageRegistry::new()), config);
        let result = pipeline.index_directory(dir.path(), "r").await.unwrap();
        assert_eq!(result.files_processed, 25);
        assert_eq!(result.entities_found, 25);
    }
}
