//! Python language support

use tree_sitter::Node;

use crate::core::extractor::{body_of, build_entity, has_ancestor, name_of};
use crate::languages::{EntityRule, LanguageSupport, Source};
use crate::storage::models::{CodeEntity, EntityKind};

/// Python language support implementation
pub struct PythonLanguage;

impl PythonLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonLanguage {
    fn default() -> Self {
        Self::new()
    }
}

const RULES: &[EntityRule] = &[
    EntityRule {
        node_kind: "function_definition",
        extract: extract_function,
    },
    EntityRule {
        node_kind: "class_definition",
        extract: extract_class,
    },
];

impl LanguageSupport for PythonLanguage {
    fn language_id(&self) -> &str {
        "python"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".py", ".pyi"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn rules(&self) -> &'static [EntityRule] {
        RULES
    }
}

/// Functions nested anywhere inside a class are methods
fn extract_function(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["identifier"])?;
    let kind = if has_ancestor(node, &["class_definition"]) {
        EntityKind::Method
    } else {
        EntityKind::Function
    };
    Some(with_docstring(build_entity(kind, node, name, source), node, source))
}

fn extract_class(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let name = name_of(node, source, &["identifier"])?;
    Some(with_docstring(build_entity(EntityKind::Class, node, name, source), node, source))
}

/// A body docstring takes precedence over a leading `#` comment
fn with_docstring(mut entity: CodeEntity, node: Node<'_>, source: &Source<'_>) -> CodeEntity {
    if let Some(doc) = body_docstring(node, source) {
        entity.docstring = Some(doc);
    }
    entity
}

fn body_docstring(node: Node<'_>, source: &Source<'_>) -> Option<String> {
    let body = body_of(node)?;
    let mut cursor = body.walk();
    let first = body
        .named_children(&mut cursor)
        .find(|child| child.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let literal = first.named_child(0)?;
    if literal.kind() != "string" {
        return None;
    }

    let doc = string_body(&source.text_of(literal)).trim().to_string();
    (!doc.is_empty()).then_some(doc)
}

/// Text between a string literal's delimiters, after any `r`/`u`/`b`/`f`
/// prefix. Quotes inside the body are kept.
fn string_body(raw: &str) -> &str {
    let literal = raw.trim_start_matches(|c: char| matches!(c, 'r' | 'R' | 'u' | 'U' | 'b' | 'B' | 'f' | 'F'));
    for delimiter in ["\"\"\"", "'''", "\"", "'"] {
        if literal.len() >= 2 * delimiter.len() && literal.starts_with(delimiter) && literal.ends_with(delimiter) {
            return &literal[delimiter.len()..literal.len() - delimiter.len()];
        }
    }
    literal
}
