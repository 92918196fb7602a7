//! Go: functions, methods, type declarations, and function literals.

use tree_sitter::Node;

use super::{field_text, Definition};
use crate::models::ChunkKind;

pub(super) fn definition(node: Node<'_>, src: &str) -> Option<Definition> {
    match node.kind() {
        "function_declaration" => Some(Definition::named(
            ChunkKind::Function,
            field_text(node, "name", src),
        )),
        "method_declaration" => Some(Definition::named(
            ChunkKind::Method,
            field_text(node, "name", src),
        )),
        "type_spec" | "type_alias" => Some(Definition::named(
            ChunkKind::Class,
            field_text(node, "name", src),
        )),
        "func_literal" => Some(Definition::anonymous(ChunkKind::Function)),
        _ => None,
    }
}
