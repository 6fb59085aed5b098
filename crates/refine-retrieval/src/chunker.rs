//! Recursive character splitter.
//!
//! Text is split on the first separator that occurs in it. Pieces shorter
//! than the chunk size are merged back (joined by that separator) into chunks
//! of at most `chunk_size` characters that overlap by up to `chunk_overlap`
//! characters; longer pieces recurse with the remaining separators. The final
//! separator `""` splits into single characters, so no chunk exceeds the size.

use std::collections::VecDeque;

use crate::errors::{Result, RetrievalError};

pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Clone, Debug)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl RecursiveChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(RetrievalError::InvalidConfig(format!(
                "chunk overlap {chunk_overlap} must be below chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let idx = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s.as_str()))
            .unwrap_or(separators.len().saturating_sub(1));
        let sep = separators.get(idx).map_or("", String::as_str);
        let rest = separators.get(idx + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if sep.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(sep).filter(|p| !p.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut short: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge(&short, sep));
                short.clear();
            }
            if rest.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, rest));
            }
        }
        if !short.is_empty() {
            chunks.extend(self.merge(&short, sep));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str], sep: &str) -> Vec<String> {
        let sep_len = char_len(sep);
        let mut out = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joined = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { sep_len };

            if !window.is_empty() && total + joined(&window) + len > self.chunk_size {
                push_trimmed(&mut out, &window, sep);
                // Shrink the window to the overlap, and until the new piece fits.
                while total > self.chunk_overlap
                    || (total > 0 && total + joined(&window) + len > self.chunk_size)
                {
                    let Some(first) = window.pop_front() else { break };
                    total -= char_len(first) + if window.is_empty() { 0 } else { sep_len };
                }
            }

            total += len + joined(&window);
            window.push_back(piece);
        }
        push_trimmed(&mut out, &window, sep);
        out
    }
}

fn push_trimmed(out: &mut Vec<String>, window: &VecDeque<&str>, sep: &str) {
    let text = window.iter().copied().collect::<Vec<_>>().join(sep);
    let text = text.trim();
    if !text.is_empty() {
        out.push(text.to_string());
    }
}
