//! Line-comment token resolution for the cell delimiter grammar.
//!
//! The host editor knows how to tokenize a document; we only ask it one
//! question: "is this line a line comment?". The first candidate token that
//! the grammar answers yes for becomes the document's comment token.

use std::path::Path;

/// Candidate tokens, in probe order.
pub const COMMENT_CANDIDATES: [&str; 6] = ["#", "//", "--", "%", ";", "\""];

/// Token used for Python-flavoured views of `.ipynb` sources, where `#` would
/// collide with Markdown headings carried in the source.
pub const NOTEBOOK_SOURCE_TOKEN: &str = "%%";

/// The grammar boundary: a tokenizer able to classify a single line.
pub trait LineCommentGrammar {
    /// Language identifier, e.g. `python` or `rust`.
    fn language(&self) -> &str;

    /// Whether the grammar tokenizes `line` as a line comment.
    fn is_line_comment(&self, line: &str) -> bool;
}

/// Built-in grammar backed by a static language table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageGrammar {
    language: String,
    tokens: &'static [&'static str],
}

const LANGUAGE_TABLE: &[(&[&str], &[&str])] = &[
    (
        &[
            "python", "py", "r", "ruby", "julia", "shell", "bash", "sh", "zsh", "fish",
            "perl", "yaml", "toml", "make", "makefile", "powershell", "nim", "elixir",
            "coffeescript", "dockerfile",
        ],
        &["#"],
    ),
    (
        &[
            "rust", "c", "cpp", "c++", "javascript", "js", "typescript", "ts", "go", "java",
            "kotlin", "swift", "scala", "csharp", "c#", "dart", "zig", "fsharp", "deno",
            "groovy", "php",
        ],
        &["//"],
    ),
    (&["lua", "sql", "haskell", "ada", "elm", "purescript"], &["--"]),
    (
        &["matlab", "octave", "tex", "latex", "erlang", "prolog", "postscript"],
        &["%"],
    ),
    (
        &["lisp", "clojure", "scheme", "racket", "hy", "asm", "nasm", "ini"],
        &[";"],
    ),
    (&["vim", "viml"], &["\""]),
];

impl LanguageGrammar {
    /// Look up a language id (case-insensitive). Unknown languages get a
    /// grammar that recognises no comments.
    pub fn for_language(language: &str) -> Self {
        let key = language.to_ascii_lowercase();
        let tokens = LANGUAGE_TABLE
            .iter()
            .find(|(names, _)| names.contains(&key.as_str()))
            .map(|(_, tokens)| *tokens)
            .unwrap_or(&[]);
        Self {
            language: key,
            tokens,
        }
    }

    pub fn is_known(&self) -> bool {
        !self.tokens.is_empty()
    }
}

impl LineCommentGrammar for LanguageGrammar {
    fn language(&self) -> &str {
        &self.language
    }

    fn is_line_comment(&self, line: &str) -> bool {
        let line = line.trim_start();
        self.tokens.iter().any(|token| line.starts_with(token))
    }
}

/// Resolve the line-comment token for a document.
///
/// `path` is only consulted for the notebook-source special case.
pub fn resolve_comment_token(
    grammar: &dyn LineCommentGrammar,
    path: Option<&Path>,
) -> Option<String> {
    if is_notebook_source_view(grammar.language(), path) {
        return Some(NOTEBOOK_SOURCE_TOKEN.to_string());
    }
    let token = COMMENT_CANDIDATES
        .iter()
        .find(|token| grammar.is_line_comment(&format!("{} probe", token)))
        .map(|token| token.to_string());
    if token.is_none() {
        log::debug!(
            "[comment] No line comment token for language {}",
            grammar.language()
        );
    }
    token
}

/// Convenience for the language-id boundary: `line_comment_token("python")`.
pub fn line_comment_token(language: &str) -> Option<String> {
    resolve_comment_token(&LanguageGrammar::for_language(language), None)
}

/// A Python-flavoured view of notebook source: `foo.ipynb` opened as Python,
/// or an exported `foo.ipynb.py`.
fn is_notebook_source_view(language: &str, path: Option<&Path>) -> bool {
    let Some(path) = path else {
        return false;
    };
    let language = language.to_ascii_lowercase();
    if language != "python" && language != "py" {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    name.ends_with(".ipynb") || name.ends_with(".ipynb.py")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct AlwaysComment;

    impl LineCommentGrammar for AlwaysComment {
        fn language(&self) -> &str {
            "anything"
        }
        fn is_line_comment(&self, _line: &str) -> bool {
            true
        }
    }

    #[test]
    fn test_known_languages() {
        assert_eq!(line_comment_token("python").as_deref(), Some("#"));
        assert_eq!(line_comment_token("Rust").as_deref(), Some("//"));
        assert_eq!(line_comment_token("lua").as_deref(), Some("--"));
        assert_eq!(line_comment_token("matlab").as_deref(), Some("%"));
        assert_eq!(line_comment_token("clojure").as_deref(), Some(";"));
        assert_eq!(line_comment_token("vim").as_deref(), Some("\""));
    }

    #[test]
    fn test_unknown_language_has_no_token() {
        assert!(line_comment_token("brainfuck").is_none());
        assert!(!LanguageGrammar::for_language("brainfuck").is_known());
    }

    #[test]
    fn test_candidate_order_wins() {
        assert_eq!(
            resolve_comment_token(&AlwaysComment, None).as_deref(),
            Some("#")
        );
    }

    #[test]
    fn test_notebook_source_view_uses_double_percent() {
        let grammar = LanguageGrammar::for_language("python");
        let path = PathBuf::from("/work/analysis.ipynb");
        assert_eq!(
            resolve_comment_token(&grammar, Some(&path)).as_deref(),
            Some("%%")
        );

        let exported = PathBuf::from("/work/analysis.ipynb.py");
        assert_eq!(
            resolve_comment_token(&grammar, Some(&exported)).as_deref(),
            Some("%%")
        );

        let plain = PathBuf::from("/work/analysis.py");
        assert_eq!(
            resolve_comment_token(&grammar, Some(&plain)).as_deref(),
            Some("#")
        );
    }

    #[test]
    fn test_notebook_view_requires_python() {
        let grammar = LanguageGrammar::for_language("julia");
        let path = PathBuf::from("/work/analysis.ipynb");
        assert_eq!(
            resolve_comment_token(&grammar, Some(&path)).as_deref(),
            Some("#")
        );
    }
}
