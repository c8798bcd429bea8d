//! chunk-text - Code chunk detection and range algebra for plain-text buffers.
//!
//! A document is split into "chunks" by delimiters: blank lines for
//! [`ChunkType::Paragraph`], comment markers preceded by a blank line for
//! [`ChunkType::Cell`]. The scanner walks delimiters in either direction, the
//! partitioner turns them into a gap-free sequence of chunk ranges, and the
//! trimmer strips blank lines from the edges of a range before its text is sent
//! to a kernel.

pub mod comment;
pub mod partition;
pub mod scanner;
pub mod text;
pub mod trim;

pub use comment::{line_comment_token, resolve_comment_token, LanguageGrammar, LineCommentGrammar};
pub use partition::{ChunkPartitioner, SelectionMode};
pub use scanner::{ChunkScanner, ChunkType, Delimiter, DelimiterGrammar, Direction};
pub use text::{Position, Range, TextAddress, TextBuffer};
pub use trim::trim_range;

/// Errors raised while building chunk grammars.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("No line comment token resolvable for this document")]
    NoCommentToken,

    #[error("Invalid delimiter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
