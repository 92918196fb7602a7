//! Language classification and tree-sitter grammar registry.
//!
//! Classification is a pure function of the file extension. Every
//! [`Language`] except [`Language::Unknown`] has a structural extractor.

use std::path::Path;

use serde::Serialize;

/// Language tag assigned to a candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Java,
    Rust,
    C,
    Cpp,
    Unknown,
}

impl Language {
    /// Every language with a structural extractor.
    pub const SUPPORTED: [Language; 9] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Tsx,
        Language::Go,
        Language::Java,
        Language::Rust,
        Language::C,
        Language::Cpp,
    ];

    /// Identifier used in reports and sink records.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Java => "java",
            Self::Rust => "rust",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Unknown => "unknown",
        }
    }

    /// Extensions (lowercase, no dot) that classify as this language.
    #[must_use]
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py", "pyi"],
            Self::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Self::TypeScript => &["ts", "mts", "cts"],
            Self::Tsx => &["tsx"],
            Self::Go => &["go"],
            Self::Java => &["java"],
            Self::Rust => &["rs"],
            Self::C => &["c", "h"],
            Self::Cpp => &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
            Self::Unknown => &[],
        }
    }

    /// The tree-sitter grammar, or `None` for [`Language::Unknown`].
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Self::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Self::C => Some(tree_sitter_c::LANGUAGE.into()),
            Self::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Self::Unknown => None,
        }
    }

    #[must_use]
    pub fn has_extractor(self) -> bool {
        self != Self::Unknown
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Normalize an extension for comparison: lowercase, leading dot removed.
#[must_use]
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Classify a bare extension. Case-insensitive; a leading dot is ignored.
#[must_use]
pub fn classify_extension(ext: &str) -> Language {
    let ext = normalize_extension(ext);
    Language::SUPPORTED
        .into_iter()
        .find(|lang| lang.extensions().contains(&ext.as_str()))
        .unwrap_or(Language::Unknown)
}

/// Classify a file by its extension.
#[must_use]
pub fn classify(path: &Path) -> Language {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(Language::Unknown, classify_extension)
}
