//! Paragraph-and-window text chunker.
//!
//! Splits source text into paragraphs, then cuts each paragraph into
//! windows of `chunk_size` words where consecutive windows share `overlap`
//! words, so no sentence is lost at a chunk edge.
//!
//! # Algorithm
//!
//! 1. Split text on blank lines (`\n\n`), trim, drop empty paragraphs.
//! 2. Split each paragraph on whitespace into words.
//! 3. Emit a window starting at word `0`, `step`, `2 × step`, … where
//!    `step = chunk_size - overlap` (at least 1), until the start passes
//!    the last word.
//! 4. Windows never span two paragraphs.
//!
//! # Example
//!
//! ```rust
//! use shardrag_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("one two three four five", 3, 1);
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, vec!["one two three", "three four five", "five"]);
//! ```

use uuid::Uuid;

use crate::models::Chunk;

/// Default number of words per window.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default number of words shared by consecutive windows.
pub const DEFAULT_OVERLAP: usize = 100;

/// Split text into trimmed, non-empty paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Cut one paragraph into overlapping word windows.
///
/// Returns no windows for an empty paragraph or a zero `chunk_size`.
/// An `overlap` of `chunk_size` or more degrades to a step of one word.
pub fn window_words(paragraph: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 {
        return Vec::new();
    }
    let words: Vec<&str> = paragraph.split_whitespace().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);

    (0..words.len())
        .step_by(step)
        .map(|start| {
            let end = (start + chunk_size).min(words.len());
            words[start..end].join(" ")
        })
        .collect()
}

/// Chunk a whole document.
///
/// Each chunk gets a fresh UUID (used later as the record id on every
/// node) and a contiguous index starting at 0.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    split_paragraphs(text)
        .into_iter()
        .flat_map(|para| window_words(para, chunk_size, overlap))
        .enumerate()
        .map(|(index, text)| Chunk {
            id: Uuid::new_v4(),
            index,
            text,
        })
        .collect()
}
