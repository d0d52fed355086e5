//! Code parser using tree-sitter

use tree_sitter::Tree;

use crate::core::error::ExtractError;
use crate::languages::LanguageSupport;

/// A reusable tree-sitter parser context.
///
/// A `CodeParser` is not shared between threads: each indexing worker owns
/// one and drops it when the worker finishes. Switching languages reloads
/// the grammar, parsing the same language repeatedly does not.
pub struct CodeParser {
    parser: tree_sitter::Parser,
    current_language: Option<String>,
}

impl CodeParser {
    pub fn new() -> Self {
        Self {
            parser: tree_sitter::Parser::new(),
            current_language: None,
        }
    }

    /// Parse `source` with the grammar of `language`
    pub fn parse(&mut self, source: &[u8], language: &dyn LanguageSupport) -> Result<Tree, ExtractError> {
        let language_id = language.language_id();

        if self.current_language.as_deref() != Some(language_id) {
            self.parser
                .set_language(&language.grammar())
                .map_err(|source| ExtractError::Grammar {
                    language: language_id.to_string(),
                    source,
                })?;
            self.current_language = Some(language_id.to_string());
        }

        self.parser.reset();
        self.parser
            .parse(source, None)
            .ok_or_else(|| ExtractError::ParseAborted(language_id.to_string()))
    }
}

impl Default for CodeParser {
    fn default() -> Self {
        Self::new()
    }
}
