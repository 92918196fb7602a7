//! Line-window fallback chunker and line-range helpers.
//!
//! Files with no structural extractor, or whose parse failed, are split into
//! non-overlapping windows of a fixed number of lines. The final window is
//! truncated to whatever lines remain.
//!
//! All chunk text in the crate is cut through [`LineIndex::slice`], so a
//! chunk's text is always exactly lines `start_line..=end_line` of its file.

use crate::language::Language;
use crate::models::{ChunkKind, RawChunk};

/// Window size used when the configuration does not choose one.
pub const DEFAULT_WINDOW_LINES: usize = 50;

/// Byte offsets of line starts within a text.
///
/// A trailing `\n` terminates the last line; it does not open a new one.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut starts = Vec::new();
        if !text.is_empty() {
            starts.push(0);
        }
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' && i + 1 < text.len() {
                starts.push(i + 1);
            }
        }
        Self { text, starts }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Lines `start..=end` (1-based), without the final line terminator.
    ///
    /// Returns `None` when the range is empty or out of bounds.
    pub fn slice(&self, start: usize, end: usize) -> Option<&'a str> {
        if start == 0 || start > end || end > self.starts.len() {
            return None;
        }
        let from = self.starts[start - 1];
        let to = match self.starts.get(end) {
            Some(&next) => next - 1,
            None if self.text.ends_with('\n') => self.text.len() - 1,
            None => self.text.len(),
        };
        let line = &self.text[from..to];
        Some(line.strip_suffix('\r').unwrap_or(line))
    }
}

/// One-off form of [`LineIndex::slice`].
pub fn line_slice(text: &str, start: usize, end: usize) -> Option<&str> {
    LineIndex::new(text).slice(start, end)
}

/// Split `text` into `module-fallback` chunks of at most `window` lines.
///
/// Whitespace-only windows are dropped, so a whitespace-only file yields no
/// chunks. Window numbering is 1-based and follows the window's position in
/// the file, whether or not earlier windows were dropped.
pub fn fallback_chunks(
    file_path: &str,
    text: &str,
    language: Language,
    window: usize,
) -> Vec<RawChunk> {
    let window = window.max(1);
    let index = LineIndex::new(text);
    let total = index.line_count();

    let mut chunks = Vec::new();
    let mut start = 1;
    let mut n = 1;
    while start <= total {
        let end = (start + window - 1).min(total);
        if let Some(body) = index.slice(start, end) {
            if !body.trim().is_empty() {
                chunks.push(RawChunk {
                    kind: ChunkKind::ModuleFallback,
                    name: format!("{file_path}:chunk_{n}"),
                    scope: None,
                    text: body.to_string(),
                    start_line: start,
                    end_line: end,
                    language,
                    file_path: file_path.to_string(),
                });
            }
        }
        start = end + 1;
        n += 1;
    }
    chunks
}
