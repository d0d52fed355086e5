//! Language support for entity extraction
//!
//! Each language contributes a grammar and a table of extraction rules keyed
//! by tree-sitter node kind. The generic traversal in
//! [`crate::core::extractor`] dispatches on that table.

pub mod go;
pub mod java;
pub mod kotlin;
pub mod python;
pub mod typescript;

use tree_sitter::Node;

use crate::storage::models::CodeEntity;

/// Source buffer being extracted, plus the path recorded on every entity
pub struct Source<'a> {
    pub text: &'a [u8],
    pub file_path: &'a str,
}

impl<'a> Source<'a> {
    pub fn new(text: &'a [u8], file_path: &'a str) -> Self {
        Self { text, file_path }
    }

    /// Raw text covered by `node`
    pub fn text_of(&self, node: Node<'_>) -> String {
        String::from_utf8_lossy(&self.text[node.byte_range()]).into_owned()
    }
}

/// Turns a matching node into an entity, or declines it
pub type ExtractFn = fn(Node<'_>, &Source<'_>) -> Option<CodeEntity>;

/// One entry in a language's strategy table
#[derive(Clone, Copy)]
pub struct EntityRule {
    pub node_kind: &'static str,
    pub extract: ExtractFn,
}

/// Trait for language support plugins
pub trait LanguageSupport: Send + Sync {
    /// Get the language identifier (e.g., "go", "python")
    fn language_id(&self) -> &str;

    /// Get supported file extensions (e.g., [".go"], [".py"])
    fn file_extensions(&self) -> &[&str];

    /// Get the tree-sitter grammar
    fn grammar(&self) -> tree_sitter::Language;

    /// Extraction rules, keyed by node kind
    fn rules(&self) -> &'static [EntityRule];
}
