//! Structural extraction of functions, methods, and classes.
//!
//! Each supported [`Language`] has a rules module that recognizes definition
//! nodes in its tree-sitter grammar. A single traversal in this module drives
//! every language:
//!
//! 1. Parse the file. A tree containing any `ERROR` or `MISSING` node is a
//!    [`ParseFailure`]; the caller re-chunks the file with the fallback
//!    chunker.
//! 2. Walk the tree in pre-order with a [`tree_sitter::TreeCursor`], keeping a
//!    stack of enclosing definitions.
//! 3. Emit one [`RawChunk`] per definition. Ranges may nest: a class chunk
//!    covers its methods, and each method still yields its own chunk.
//!
//! A function whose nearest enclosing definition is a class is reported as a
//! method. Anonymous definitions are named `<anonymous#n>` qualified by their
//! enclosing scope, with `n` counted per scope, which keeps names unique
//! within a file.

mod c;
mod go;
mod java;
mod javascript;
mod python;
mod rust;

use std::collections::HashMap;

use tree_sitter::{Node, Parser, Tree};

use crate::chunk::LineIndex;
use crate::error::ParseFailure;
use crate::language::Language;
use crate::models::{ChunkKind, RawChunk};

/// A definition recognized by a language's rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Definition {
    pub kind: ChunkKind,
    /// Declared identifier; `None` for anonymous constructs.
    pub name: Option<String>,
    /// Row where the chunk starts when it begins before the node itself
    /// (decorators, for instance).
    pub start_row: Option<usize>,
}

impl Definition {
    pub fn named(kind: ChunkKind, name: Option<String>) -> Self {
        Self {
            kind,
            name,
            start_row: None,
        }
    }

    pub fn anonymous(kind: ChunkKind) -> Self {
        Self::named(kind, None)
    }
}

/// Extract structural chunks from `text`.
///
/// `Ok(vec![])` means the file parsed cleanly but holds no definitions; it
/// is not escalated to the fallback chunker. C source carrying C++ markers
/// is parsed with the C++ grammar but keeps its C label.
pub fn extract(
    language: Language,
    file_path: &str,
    text: &str,
) -> Result<Vec<RawChunk>, ParseFailure> {
    let grammar = match language {
        Language::C => c::header_dialect(text),
        other => other,
    };
    let tree = parse(grammar, text).map_err(|failure| ParseFailure { language, ..failure })?;
    let rules: fn(Node<'_>, &str) -> Option<Definition> = match language {
        Language::Python => python::definition,
        Language::JavaScript | Language::TypeScript | Language::Tsx => javascript::definition,
        Language::Go => go::definition,
        Language::Java => java::definition,
        Language::Rust => rust::definition,
        Language::C | Language::Cpp => c::definition,
        Language::Unknown => {
            return Err(ParseFailure::new(language, "no structural extractor"));
        }
    };
    Ok(collect(&tree, text, language, file_path, rules))
}

fn parse(language: Language, text: &str) -> Result<Tree, ParseFailure> {
    let grammar = language
        .grammar()
        .ok_or_else(|| ParseFailure::new(language, "no structural extractor"))?;
    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| ParseFailure::new(language, e.to_string()))?;
    let tree = parser
        .parse(text, None)
        .ok_or_else(|| ParseFailure::new(language, "parser returned no tree"))?;

    let root = tree.root_node();
    if root.has_error() {
        let failure = ParseFailure::new(language, "syntax error");
        return Err(match first_error_row(root) {
            Some(row) => failure.at_line(row + 1),
            None => failure,
        });
    }
    Ok(tree)
}

/// Row of the first `ERROR` or `MISSING` node in pre-order.
fn first_error_row(root: Node<'_>) -> Option<usize> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row);
        }
        // Only descend into subtrees that contain the error.
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

struct Scope {
    qualified: String,
    kind: ChunkKind,
    depth: usize,
}

fn collect(
    tree: &Tree,
    text: &str,
    language: Language,
    file_path: &str,
    rules: fn(Node<'_>, &str) -> Option<Definition>,
) -> Vec<RawChunk> {
    let lines = LineIndex::new(text);
    let mut chunks = Vec::new();
    let mut scopes: Vec<Scope> = Vec::new();
    let mut anonymous: HashMap<String, usize> = HashMap::new();

    let mut cursor = tree.walk();
    let mut depth = 0usize;
    loop {
        let node = cursor.node();
        while scopes.last().is_some_and(|s| s.depth >= depth) {
            scopes.pop();
        }

        if let Some(def) = rules(node, text) {
            let parent = scopes.last();
            let kind = match (def.kind, parent.map(|p| p.kind)) {
                (ChunkKind::Function, Some(ChunkKind::Class)) => ChunkKind::Method,
                (kind, _) => kind,
            };
            let scope = parent.map(|p| p.qualified.clone());
            let (name, qualified) = match def.name {
                Some(name) => {
                    let qualified = match &scope {
                        Some(s) => format!("{s}.{name}"),
                        None => name.clone(),
                    };
                    (name, qualified)
                }
                None => {
                    let key = scope.clone().unwrap_or_default();
                    let n = anonymous.entry(key).or_insert(0);
                    *n += 1;
                    let name = match &scope {
                        Some(s) => format!("{s}.<anonymous#{n}>"),
                        None => format!("<anonymous#{n}>"),
                    };
                    (name.clone(), name)
                }
            };

            let (start_line, end_line) = line_span(node, def.start_row);
            if let Some(body) = lines.slice(start_line, end_line) {
                chunks.push(RawChunk {
                    kind,
                    name,
                    scope,
                    text: body.to_string(),
                    start_line,
                    end_line,
                    language,
                    file_path: file_path.to_string(),
                });
            }
            scopes.push(Scope {
                qualified,
                kind,
                depth,
            });
        }

        if cursor.goto_first_child() {
            depth += 1;
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return chunks;
            }
            depth -= 1;
        }
    }
}

/// 1-based inclusive line range of a node.
///
/// A node ending at column 0 stops at the end of the previous line.
fn line_span(node: Node<'_>, start_row: Option<usize>) -> (usize, usize) {
    let start = start_row.unwrap_or(node.start_position().row);
    let end = node.end_position();
    let end_row = if end.column == 0 && end.row > start {
        end.row - 1
    } else {
        end.row
    };
    (start + 1, end_row + 1)
}

/// Source text of a named field of `node`.
pub(crate) fn field_text(node: Node<'_>, field: &str, src: &str) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(src.as_bytes()).ok())
        .map(str::to_string)
}

/// Source text of `node`.
pub(crate) fn node_text(node: Node<'_>, src: &str) -> Option<String> {
    node.utf8_text(src.as_bytes()).ok().map(str::to_string)
}
