//! Neograph - multi-language code property graph
//!
//! Parses repositories with tree-sitter, stores files, functions, classes
//! and their call relationships as a graph in SQLite, and serves structure,
//! call graph and similarity queries over it.

pub mod core;
pub mod embedding;
pub mod git;
pub mod languages;
pub mod server;
pub mod storage;

pub use crate::core::config::Config;
pub use crate::core::graph::GraphWriter;
pub use crate::core::pipeline::IndexPipeline;
pub use crate::core::query::GraphReader;
pub use crate::core::registry::LanguageRegistry;
pub use crate::core::Indexer;
pub use crate::storage::Database;
