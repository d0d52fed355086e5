//! Entity extraction: one pre-order walk, dispatched through the rule table

use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;
use tree_sitter::Node;

use crate::core::error::ExtractError;
use crate::core::parser::CodeParser;
use crate::core::registry::LanguageRegistry;
use crate::languages::Source;
use crate::storage::models::{CodeEntity, EntityKind};

const COMMENT_KINDS: &[&str] = &["comment", "line_comment", "block_comment", "multiline_comment"];

/// Wrappers whose leading comment documents the wrapped declaration
const DOC_WRAPPERS: &[&str] = &["export_statement", "decorated_definition"];

const BODY_KINDS: &[&str] = &[
    "block",
    "statement_block",
    "class_body",
    "interface_body",
    "enum_class_body",
    "function_body",
];

const CALL_KINDS: &[&str] = &["call_expression", "call", "method_invocation"];

/// Extracts entities from source buffers.
///
/// Owns a parser context, so one extractor serves one thread at a time.
pub struct Extractor {
    registry: Arc<LanguageRegistry>,
    parser: CodeParser,
}

impl Extractor {
    pub fn new(registry: Arc<LanguageRegistry>) -> Self {
        Self {
            registry,
            parser: CodeParser::new(),
        }
    }

    /// Extract every function, method and class from `content`.
    ///
    /// Nested declarations are all reported. Syntax errors do not fail the
    /// call: whatever the grammar recovers is extracted.
    pub fn extract(
        &mut self,
        content: &[u8],
        language: &str,
        file_path: &str,
    ) -> Result<Vec<CodeEntity>, ExtractError> {
        let support = self
            .registry
            .get(language)
            .ok_or_else(|| ExtractError::UnsupportedLanguage(language.to_string()))?;

        let tree = self.parser.parse(content, support.as_ref())?;
        let source = Source::new(content, file_path);
        let mut entities = Vec::new();

        for_each_node(tree.root_node(), |node| {
            if !node.is_named() {
                return;
            }
            if let Some(extract) = self.registry.rule(language, node.kind()) {
                if let Some(entity) = extract(node, &source) {
                    entities.push(entity);
                }
            }
        });

        trace!("{}: {} entities", file_path, entities.len());
        Ok(entities)
    }
}

/// Pre-order walk over `root` and all of its descendants
pub(crate) fn for_each_node<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Assemble an entity from a declaration node and its resolved name
pub(crate) fn build_entity(kind: EntityKind, node: Node<'_>, name: String, source: &Source<'_>) -> CodeEntity {
    let calls = if kind.is_callable() {
        collect_calls(node, source)
    } else {
        Vec::new()
    };

    CodeEntity {
        kind,
        subkind: None,
        name,
        signature: signature(node, source),
        docstring: doc_comment(node, source),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        file_path: source.file_path.to_string(),
        content: source.text_of(node),
        nl_description: None,
        embedding: None,
        calls,
    }
}

/// The `name` field, else the first named child of one of `kinds`
pub(crate) fn name_of(node: Node<'_>, source: &Source<'_>, kinds: &[&str]) -> Option<String> {
    let name_node = node
        .child_by_field_name("name")
        .or_else(|| first_child_of_kind(node, kinds))?;
    let name = source.text_of(name_node);
    (!name.is_empty()).then_some(name)
}

pub(crate) fn first_child_of_kind<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .find(|child| kinds.contains(&child.kind()));
    found
}

pub(crate) fn has_ancestor(node: Node<'_>, kinds: &[&str]) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        if kinds.contains(&parent.kind()) {
            return true;
        }
        current = parent.parent();
    }
    false
}

pub(crate) fn body_of(node: Node<'_>) -> Option<Node<'_>> {
    node.child_by_field_name("body")
        .or_else(|| first_child_of_kind(node, BODY_KINDS))
}

/// Declaration header: text up to the body, else the first line
pub(crate) fn signature(node: Node<'_>, source: &Source<'_>) -> String {
    let header = match body_of(node) {
        Some(body) if body.start_byte() > node.start_byte() => {
            String::from_utf8_lossy(&source.text[node.start_byte()..body.start_byte()]).into_owned()
        }
        _ => source
            .text_of(node)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    header.trim().trim_end_matches(':').trim_end().to_string()
}

/// Comment run ending on the line directly above the declaration
pub(crate) fn doc_comment(node: Node<'_>, source: &Source<'_>) -> Option<String> {
    let anchor = match node.parent() {
        Some(parent) if DOC_WRAPPERS.contains(&parent.kind()) => parent,
        _ => node,
    };

    let mut parts = Vec::new();
    let mut next_row = anchor.start_position().row;
    let mut current = anchor.prev_named_sibling();

    while let Some(sibling) = current {
        if !COMMENT_KINDS.contains(&sibling.kind()) || sibling.end_position().row + 1 < next_row {
            break;
        }
        parts.push(clean_comment(&source.text_of(sibling)));
        next_row = sibling.start_position().row;
        current = sibling.prev_named_sibling();
    }

    parts.reverse();
    let doc = parts.join("\n").trim().to_string();
    (!doc.is_empty()).then_some(doc)
}

/// Strip comment markers from a single comment node's text
pub(crate) fn clean_comment(raw: &str) -> String {
    let text = raw.trim();

    if let Some(inner) = text.strip_prefix("/*") {
        let inner = inner.strip_suffix("*/").unwrap_or(inner);
        let inner = inner.trim_start_matches('*');
        return inner
            .lines()
            .map(|line| {
                let line = line.trim();
                line.strip_prefix('*').unwrap_or(line).trim()
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
    }

    let stripped = if let Some(rest) = text.strip_prefix("//") {
        rest.trim_start_matches('/')
    } else if let Some(rest) = text.strip_prefix('#') {
        rest.trim_start_matches('#')
    } else {
        text
    };
    stripped.trim().to_string()
}

/// Distinct callee names in the body, in first-seen order
pub(crate) fn collect_calls(node: Node<'_>, source: &Source<'_>) -> Vec<String> {
    let Some(body) = body_of(node) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut calls = Vec::new();

    for_each_node(body, |candidate| {
        if !CALL_KINDS.contains(&candidate.kind()) {
            return;
        }
        if let Some(name) = callee_name(candidate, source) {
            if seen.insert(name.clone()) {
                calls.push(name);
            }
        }
    });

    calls
}

fn callee_name(call: Node<'_>, source: &Source<'_>) -> Option<String> {
    let callee = match call.kind() {
        "method_invocation" => call.child_by_field_name("name")?,
        _ => call
            .child_by_field_name("function")
            .or_else(|| call.named_child(0))?,
    };
    last_segment(&source.text_of(callee))
}

/// Final member of a qualified callee (`a.b.c`, `a::b`, `a?.b`, `a->b`)
pub(crate) fn last_segment(text: &str) -> Option<String> {
    let tail = text
        .rsplit(|c: char| c == '.' || c == ':' || c == '>')
        .next()?
        .trim();
    is_identifier(tail).then(|| tail.to_string())
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {
            chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}
