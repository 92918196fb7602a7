//! Java: type declarations, methods, constructors, and block lambdas.

use tree_sitter::Node;

use super::{field_text, Definition};
use crate::models::ChunkKind;

pub(super) fn definition(node: Node<'_>, src: &str) -> Option<Definition> {
    match node.kind() {
        "class_declaration"
        | "interface_declaration"
        | "enum_declaration"
        | "record_declaration"
        | "annotation_type_declaration" => Some(Definition::named(
            ChunkKind::Class,
            field_text(node, "name", src),
        )),
        "method_declaration" | "constructor_declaration" | "compact_constructor_declaration" => {
            Some(Definition::named(
                ChunkKind::Method,
                field_text(node, "name", src),
            ))
        }
        "lambda_expression" => node
            .child_by_field_name("body")
            .filter(|body| body.kind() == "block")
            .map(|_| Definition::anonymous(ChunkKind::Function)),
        _ => None,
    }
}
