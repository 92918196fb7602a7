//! C and C++.
//!
//! Function names come from the declarator chain, since C puts the name
//! inside pointer and function declarators. Out-of-line member definitions
//! (`void Foo::bar() {}`) are methods named by their qualified identifier.
//! Struct, union, enum, and class specifiers count only when they have a
//! body; an anonymous one takes its `typedef` name when it has one.
//!
//! `.h` headers are classified as C but often hold C++; [`header_dialect`]
//! picks the C++ grammar for those.

use tree_sitter::Node;

use super::{field_text, node_text, Definition};
use crate::language::Language;
use crate::models::ChunkKind;

pub(super) fn definition(node: Node<'_>, src: &str) -> Option<Definition> {
    let mut def = match node.kind() {
        "function_definition" => function(node, src)?,
        "struct_specifier" | "union_specifier" | "enum_specifier" | "class_specifier" => {
            node.child_by_field_name("body")?;
            let name = field_text(node, "name", src).or_else(|| typedef_name(node, src));
            Definition::named(ChunkKind::Class, name)
        }
        "lambda_expression" => Definition::anonymous(ChunkKind::Function),
        _ => return None,
    };
    if let Some(parent) = node.parent() {
        if parent.kind() == "template_declaration" {
            def.start_row = Some(parent.start_position().row);
        }
    }
    Some(def)
}

/// `None` when the declarator chain holds no function declarator, which is
/// how the C grammar reads a C++ class body it cannot recognize.
fn function(node: Node<'_>, src: &str) -> Option<Definition> {
    let mut current = node.child_by_field_name("declarator");
    while let Some(decl) = current {
        match decl.kind() {
            "function_declarator" => {
                let Some(target) = decl.child_by_field_name("declarator") else {
                    break;
                };
                let kind = if target.kind() == "qualified_identifier" {
                    ChunkKind::Method
                } else {
                    ChunkKind::Function
                };
                return Some(Definition::named(kind, node_text(target, src)));
            }
            "pointer_declarator"
            | "reference_declarator"
            | "parenthesized_declarator"
            | "attributed_declarator" => {
                current = decl
                    .child_by_field_name("declarator")
                    .or_else(|| decl.named_child(0));
            }
            _ => break,
        }
    }
    None
}

/// C++ markers that never start a line of valid C.
const CPP_LINE_PREFIXES: &[&str] = &[
    "class ",
    "namespace ",
    "template <",
    "template<",
    "public:",
    "private:",
    "protected:",
    "using namespace ",
];

/// Grammar to parse C source with: C++ when the text carries C++ markers.
pub(super) fn header_dialect(text: &str) -> Language {
    let cpp = text.lines().any(|line| {
        let line = line.trim_start();
        CPP_LINE_PREFIXES.iter().any(|p| line.starts_with(p))
    });
    if cpp {
        Language::Cpp
    } else {
        Language::C
    }
}

fn typedef_name(node: Node<'_>, src: &str) -> Option<String> {
    let parent = node.parent()?;
    if parent.kind() != "type_definition" {
        return None;
    }
    field_text(parent, "declarator", src)
}
