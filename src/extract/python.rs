//! Python: `def` and `class`, including decorated forms.

use tree_sitter::Node;

use super::{field_text, Definition};
use crate::models::ChunkKind;

pub(super) fn definition(node: Node<'_>, src: &str) -> Option<Definition> {
    let kind = match node.kind() {
        "function_definition" => ChunkKind::Function,
        "class_definition" => ChunkKind::Class,
        _ => return None,
    };
    let mut def = Definition::named(kind, field_text(node, "name", src));
    // Decorators belong to the chunk.
    if let Some(parent) = node.parent() {
        if parent.kind() == "decorated_definition" {
            def.start_row = Some(parent.start_position().row);
        }
    }
    Some(def)
}
