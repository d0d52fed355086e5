//! Language registry: extension lookup plus the (language, node kind) rule table

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::languages::{go, java, kotlin, python, typescript, ExtractFn, LanguageSupport};

/// Registry for managing language support plugins
pub struct LanguageRegistry {
    languages: HashMap<String, Arc<dyn LanguageSupport>>,
    extension_map: HashMap<String, String>,
    rules: HashMap<String, HashMap<&'static str, ExtractFn>>,
}

impl LanguageRegistry {
    /// Create a registry with every built-in language
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(Arc::new(go::GoLanguage::new()));
        registry.register(Arc::new(python::PythonLanguage::new()));
        registry.register(Arc::new(typescript::TypeScriptLanguage::typescript()));
        registry.register(Arc::new(typescript::TypeScriptLanguage::tsx()));
        registry.register(Arc::new(typescript::TypeScriptLanguage::javascript()));
        registry.register(Arc::new(java::JavaLanguage::new()));
        registry.register(Arc::new(kotlin::KotlinLanguage::new()));

        registry
    }

    /// Create a new empty registry
    pub fn empty() -> Self {
        Self {
            languages: HashMap::new(),
            extension_map: HashMap::new(),
            rules: HashMap::new(),
        }
    }

    /// Register a language support plugin
    pub fn register(&mut self, language: Arc<dyn LanguageSupport>) {
        let id = language.language_id().to_string();

        for ext in language.file_extensions() {
            self.extension_map.insert(ext.to_string(), id.clone());
        }

        let table = self.rules.entry(id.clone()).or_default();
        for rule in language.rules() {
            table.insert(rule.node_kind, rule.extract);
        }

        self.languages.insert(id, language);
    }

    /// Get language support by ID
    pub fn get(&self, language_id: &str) -> Option<&Arc<dyn LanguageSupport>> {
        self.languages.get(language_id)
    }

    /// Get language support by file extension, with or without the leading dot
    pub fn get_by_extension(&self, extension: &str) -> Option<&Arc<dyn LanguageSupport>> {
        let ext = if extension.starts_with('.') {
            extension.to_ascii_lowercase()
        } else {
            format!(".{}", extension.to_ascii_lowercase())
        };

        self.extension_map
            .get(&ext)
            .and_then(|id| self.languages.get(id))
    }

    /// Language id for a path, or `None` when the extension is unknown
    pub fn detect_language(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?;
        self.get_by_extension(ext).map(|lang| lang.language_id())
    }

    /// Extraction rule for a node kind in a language
    pub fn rule(&self, language_id: &str, node_kind: &str) -> Option<ExtractFn> {
        self.rules.get(language_id)?.get(node_kind).copied()
    }

    /// List all supported language IDs, sorted
    pub fn language_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.languages.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// List all registered languages, sorted by id
    pub fn list_languages(&self) -> Vec<&Arc<dyn LanguageSupport>> {
        let mut langs: Vec<_> = self.languages.values().collect();
        langs.sort_by(|a, b| a.language_id().cmp(b.language_id()));
        langs
    }

    /// Check if a file extension is supported
    pub fn is_supported(&self, extension: &str) -> bool {
        self.get_by_extension(extension).is_some()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
