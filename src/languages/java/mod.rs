//! Java language support

use tree_sitter::Node;

use crate::core::extractor::{build_entity, name_of};
use crate::languages::{EntityRule, LanguageSupport, Source};
use crate::storage::models::{CodeEntity, EntityKind};

/// Java language support implementation
pub struct JavaLanguage;

impl JavaLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JavaLanguage {
    fn default() -> Self {
        Self::new()
    }
}

const RULES: &[EntityRule] = &[
    EntityRule {
        node_kind: "method_declaration",
        extract: extract_method,
    },
    EntityRule {
        node_kind: "class_declaration",
        extract: extract_class,
    },
    EntityRule {
        node_kind: "interface_declaration",
        extract: extract_interface,
    },
];

impl LanguageSupport for JavaLanguage {
    fn language_id(&self) -> &str {
        "java"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".java"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_java::LANGUAGE.into()
    }

    fn rules(&self) -> &'static [EntityRule] {
        RULES
    }
}

fn extract_method(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["identifier"])?;
    Some(build_entity(EntityKind::Method, node, name, source))
}

fn extract_class(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["identifier"])?;
    Some(build_entity(EntityKind::Class, node, name, source))
}

fn extract_interface(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["identifier"])?;
    let mut entity = build_entity(EntityKind::Class, node, name, source);
    entity.subkind = Some("interface".to_string());
    Some(entity)
}
