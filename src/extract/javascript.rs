//! JavaScript, TypeScript, and TSX.
//!
//! Function expressions and arrow functions count as definitions when they
//! are bound to a name (`const f = () => ..`, `obj.f = function ..`, object
//! keys, class fields). Unbound ones count only when they have a block body,
//! so one-line callbacks such as `xs.map(x => x + 1)` stay inside their
//! enclosing chunk.

use tree_sitter::Node;

use super::{field_text, node_text, Definition};
use crate::models::ChunkKind;

pub(super) fn definition(node: Node<'_>, src: &str) -> Option<Definition> {
    // Keyword tokens share kinds like `function` and `class`.
    if !node.is_named() {
        return None;
    }
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => Some(Definition::named(
            ChunkKind::Function,
            field_text(node, "name", src),
        )),
        "class_declaration" | "abstract_class_declaration" => Some(Definition::named(
            ChunkKind::Class,
            field_text(node, "name", src),
        )),
        // TypeScript declarations with a body.
        "interface_declaration" | "enum_declaration" => Some(Definition::named(
            ChunkKind::Class,
            field_text(node, "name", src),
        )),
        "class" => {
            let name = field_text(node, "name", src).or_else(|| binding_name(node, src));
            Some(Definition::named(ChunkKind::Class, name))
        }
        "method_definition" => Some(Definition::named(
            ChunkKind::Method,
            field_text(node, "name", src),
        )),
        "function_expression" | "function" | "generator_function" | "arrow_function" => {
            let name = field_text(node, "name", src).or_else(|| binding_name(node, src));
            if name.is_none() && !has_block_body(node) {
                return None;
            }
            Some(Definition::named(ChunkKind::Function, name))
        }
        _ => None,
    }
}

/// Name an expression is bound to by its parent, if any.
fn binding_name(node: Node<'_>, src: &str) -> Option<String> {
    let parent = node.parent()?;
    let field = match parent.kind() {
        "variable_declarator" => "name",
        "assignment_expression" => "left",
        "pair" => "key",
        "field_definition" => "property",
        "public_field_definition" => "name",
        _ => return None,
    };
    // Only when the expression is the bound value, not the name itself.
    let value = parent
        .child_by_field_name("value")
        .or_else(|| parent.child_by_field_name("right"))?;
    if value.id() != node.id() {
        return None;
    }
    let key = parent.child_by_field_name(field)?;
    let text = node_text(key, src)?;
    if key.kind() == "string" {
        return Some(unquote(&text).to_string());
    }
    Some(text)
}

fn unquote(literal: &str) -> &str {
    literal
        .strip_prefix(['"', '\''])
        .and_then(|s| s.strip_suffix(['"', '\'']))
        .unwrap_or(literal)
}

fn has_block_body(node: Node<'_>) -> bool {
    node.child_by_field_name("body")
        .is_some_and(|body| body.kind() == "statement_block")
}
