//! Rust: items with bodies, impl blocks, trait methods, and block closures.
//!
//! `impl` blocks are classes named after their self type (`Trait for Type`
//! for trait impls), so functions inside them report as methods. Outer
//! attributes directly above an item are included in its chunk.

use tree_sitter::Node;

use super::{field_text, Definition};
use crate::models::ChunkKind;

pub(super) fn definition(node: Node<'_>, src: &str) -> Option<Definition> {
    let mut def = match node.kind() {
        "function_item" | "function_signature_item" => {
            Definition::named(ChunkKind::Function, field_text(node, "name", src))
        }
        "struct_item" | "enum_item" | "union_item" | "trait_item" => {
            Definition::named(ChunkKind::Class, field_text(node, "name", src))
        }
        "impl_item" => Definition::named(ChunkKind::Class, impl_name(node, src)),
        "closure_expression" => {
            let body = node.child_by_field_name("body")?;
            if body.kind() != "block" {
                return None;
            }
            return Some(Definition::anonymous(ChunkKind::Function));
        }
        _ => return None,
    };
    def.start_row = attributes_start(node);
    Some(def)
}

fn impl_name(node: Node<'_>, src: &str) -> Option<String> {
    let ty = field_text(node, "type", src)?;
    Some(match field_text(node, "trait", src) {
        Some(tr) => format!("{tr} for {ty}"),
        None => ty,
    })
}

/// Row of the first attribute in the run directly above `node`.
fn attributes_start(node: Node<'_>) -> Option<usize> {
    let mut first = None;
    let mut prev = node.prev_sibling();
    while let Some(sibling) = prev {
        if sibling.kind() != "attribute_item" {
            break;
        }
        first = Some(sibling.start_position().row);
        prev = sibling.prev_sibling();
    }
    first
}
