//! TypeScript, TSX and JavaScript support
//!
//! The three grammars share node kinds for the declarations we index, so
//! they share one rule table.

use tree_sitter::Node;

use crate::core::extractor::{build_entity, name_of};
use crate::languages::{EntityRule, LanguageSupport, Source};
use crate::storage::models::{CodeEntity, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    TypeScript,
    Tsx,
    JavaScript,
}

/// One of the ECMAScript-family grammars
pub struct TypeScriptLanguage {
    dialect: Dialect,
}

impl TypeScriptLanguage {
    pub fn typescript() -> Self {
        Self {
            dialect: Dialect::TypeScript,
        }
    }

    pub fn tsx() -> Self {
        Self { dialect: Dialect::Tsx }
    }

    pub fn javascript() -> Self {
        Self {
            dialect: Dialect::JavaScript,
        }
    }
}

const RULES: &[EntityRule] = &[
    EntityRule {
        node_kind: "function_declaration",
        extract: extract_function,
    },
    EntityRule {
        node_kind: "generator_function_declaration",
        extract: extract_function,
    },
    EntityRule {
        node_kind: "method_definition",
        extract: extract_method,
    },
    EntityRule {
        node_kind: "class_declaration",
        extract: extract_class,
    },
    EntityRule {
        node_kind: "abstract_class_declaration",
        extract: extract_class,
    },
];

impl LanguageSupport for TypeScriptLanguage {
    fn language_id(&self) -> &str {
        match self.dialect {
            Dialect::TypeScript => "typescript",
            Dialect::Tsx => "tsx",
            Dialect::JavaScript => "javascript",
        }
    }

    fn file_extensions(&self) -> &[&str] {
        match self.dialect {
            Dialect::TypeScript => &[".ts", ".mts", ".cts"],
            Dialect::Tsx => &[".tsx"],
            Dialect::JavaScript => &[".js", ".jsx", ".mjs", ".cjs"],
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self.dialect {
            Dialect::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Dialect::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Dialect::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }

    fn rules(&self) -> &'static [EntityRule] {
        RULES
    }
}

fn extract_function(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["identifier"])?;
    Some(build_entity(EntityKind::Function, node, name, source))
}

fn extract_method(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["property_identifier", "private_property_identifier"])?;
    Some(build_entity(EntityKind::Method, node, name, source))
}

fn extract_class(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["type_identifier", "identifier"])?;
    Some(build_entity(EntityKind::Class, node, name, source))
}
