//! Kotlin language support

use tree_sitter::Node;

use crate::core::extractor::{build_entity, has_ancestor, name_of};
use crate::languages::{EntityRule, LanguageSupport, Source};
use crate::storage::models::{CodeEntity, EntityKind};

/// Kotlin language support implementation
pub struct KotlinLanguage;

impl KotlinLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KotlinLanguage {
    fn default() -> Self {
        Self::new()
    }
}

const RULES: &[EntityRule] = &[
    EntityRule {
        node_kind: "function_declaration",
        extract: extract_function,
    },
    EntityRule {
        node_kind: "class_declaration",
        extract: extract_class,
    },
];

impl LanguageSupport for KotlinLanguage {
    fn language_id(&self) -> &str {
        "kotlin"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".kt", ".kts"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_kotlin_ng::LANGUAGE.into()
    }

    fn rules(&self) -> &'static [EntityRule] {
        RULES
    }
}

fn extract_function(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["identifier", "simple_identifier"])?;
    let kind = if has_ancestor(node, &["class_body", "enum_class_body"]) {
        EntityKind::Method
    } else {
        EntityKind::Function
    };
    Some(build_entity(kind, node, name, source))
}

fn extract_class(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["identifier", "type_identifier", "simple_identifier"])?;
    Some(build_entity(EntityKind::Class, node, name, source))
}
