//! Go language support

use tree_sitter::Node;

use crate::core::extractor::{build_entity, name_of};
use crate::languages::{EntityRule, LanguageSupport, Source};
use crate::storage::models::{CodeEntity, EntityKind};

/// Go language support implementation
pub struct GoLanguage;

impl GoLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoLanguage {
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
        node_kind: "method_declaration",
        extract: extract_method,
    },
    EntityRule {
        node_kind: "type_spec",
        extract: extract_struct,
    },
];

impl LanguageSupport for GoLanguage {
    fn language_id(&self) -> &str {
        "go"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".go"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
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
    let name = name_of(node, source, &["field_identifier"])?;
    Some(build_entity(EntityKind::Method, node, name, source))
}

/// `type X struct {...}` becomes a class.
///
/// A lone spec reports the whole `type` declaration so the doc comment
/// above the keyword is found. Specs in a grouped `type (...)` block
/// report themselves.
fn extract_struct(node: Node<'_>, source: &Source<'_>) -> Option<CodeEntity> {
    let ty = node.child_by_field_name("type")?;
    if ty.kind() != "struct_type" {
        return None;
    }
    let name = name_of(node, source, &["type_identifier"])?;

    let declaration = node
        .parent()
        .filter(|parent| parent.kind() == "type_declaration" && type_spec_count(*parent) == 1)
        .unwrap_or(node);

    Some(build_entity(EntityKind::Class, declaration, name, source))
}

fn type_spec_count(declaration: Node<'_>) -> usize {
    let mut cursor = declaration.walk();
    let count = declaration
        .named_children(&mut cursor)
        .filter(|child| child.kind() == "type_spec")
        .count();
    count
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::core::extractor::Extractor;
    use crate::core::registry::LanguageRegistry;
    use crate::storage::models::{CodeEntity, EntityKind};

    const CALCULATOR: &str = r#"package main

// Add adds two numbers together
func Add(a, b int) int {
	return a + b
}

// Calculator holds running state
type Calculator struct {
	total int
}

// Multiply multiplies two numbers
func (c *Calculator) Multiply(a, b int) int {
	result := a * b
	c.record(result)
	fmt.Println(Add(result, 0))
	return result
}
"#;

    fn extract(src: &str) -> Vec<CodeEntity> {
        let mut extractor = Extractor::new(Arc::new(LanguageRegistry::new()));
        extractor.extract(src.as_bytes(), "go", "calc/main.go").unwrap()
    }

    fn find<'a>(entities: &'a [CodeEntity], name: &str) -> &'a CodeEntity {
        entities.iter().find(|e| e.name == name).unwrap()
    }

    #[test]
    fn test_function_extraction() {
        let entities = extract(CALCULATOR);
        let add = find(&entities, "Add");

        assert_eq!(add.kind, EntityKind::Function);
        assert_eq!(add.start_line, 4);
        assert_eq!(add.end_line, 6);
        assert_eq!(add.signature, "func Add(a, b int) int");
        assert_eq!(add.docstring.as_deref(), Some("Add adds two numbers together"));
        assert_eq!(add.file_path, "calc/main.go");
        assert!(add.content.starts_with("func Add"));
        assert!(add.calls.is_empty());
    }

    #[test]
    fn test_struct_is_class() {
        let entities = extract(CALCULATOR);
        let calc = find(&entities, "Calculator");

        assert_eq!(calc.kind, EntityKind::Class);
        assert_eq!(calc.start_line, 9);
        assert_eq!(calc.docstring.as_deref(), Some("Calculator holds running state"));
        assert!(calc.calls.is_empty());
    }

    #[test]
    fn test_method_with_receiver() {
        let entities = extract(CALCULATOR);
        let multiply = find(&entities, "Multiply");

        assert_eq!(multiply.kind, EntityKind::Method);
        assert_eq!(multiply.signature, "func (c *Calculator) Multiply(a, b int) int");
        assert_eq!(multiply.docstring.as_deref(), Some("Multiply multiplies two numbers"));
        assert_eq!(multiply.calls, vec!["record", "Println", "Add"]);
    }

    #[test]
    fn test_non_struct_types_are_skipped() {
        let entities = extract("package main\n\ntype ID string\n\ntype Reader interface {\n\tRead() error\n}\n");
        assert!(entities.is_empty());
    }

    #[test]
    fn test_grouped_type_declaration() {
        let src = "package main\n\ntype (\n\t// A is first\n\tA struct{}\n\tB struct{ x int }\n)\n";
        let entities = extract(src);
        let names: Vec<_> = entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(entities[0].start_line, 5);
        assert_eq!(entities[0].docstring.as_deref(), Some("A is first"));
    }
}
