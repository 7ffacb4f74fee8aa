//! Token-aware chunking.
//!
//! [`TextChunker`] slices a text into embedding-sized windows in the
//! `o200k_base` token space (the tokenizer used by the embedding models we
//! target). Windows advance by `chunk_size` tokens and reach back
//! `overlap_tokens` into the previous window, so every chunk except the
//! first carries leading context. A text at or under the ceiling is a
//! single chunk identical to its input.
//!
//! [`RollingBuffer`] sits upstream: it accumulates extractor fragments by
//! character count and emits fixed-size windows with a character-level
//! overlap, so chunking never has to hold an entire large document.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tiktoken_rs::{o200k_base, CoreBPE};

pub struct TextChunker {
    bpe: CoreBPE,
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        anyhow::ensure!(chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            overlap < chunk_size,
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap,
            chunk_size
        );
        let bpe = o200k_base().context("failed to load o200k_base tokenizer")?;
        Ok(Self {
            bpe,
            chunk_size,
            overlap,
        })
    }

    pub fn token_count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Splits `text` into decoded token windows. Empty input yields no
    /// chunks.
    pub fn chunk(&self, text: &str) -> Result<Vec<String>> {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        if tokens.len() <= self.chunk_size {
            return Ok(vec![text.to_string()]);
        }

        let mut chunks = Vec::new();
        let mut pos = 0usize;
        while pos < tokens.len() {
            let start = pos.saturating_sub(self.overlap);
            let end = (pos + self.chunk_size).min(tokens.len());
            let piece = self
                .bpe
                .decode(tokens[start..end].to_vec())
                .context("failed to decode token window")?;
            chunks.push(piece);
            pos += self.chunk_size;
        }
        Ok(chunks)
    }
}

/// Content hash stored alongside each chunk, for dedup and audit.
pub fn chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Streaming character-window accumulator.
///
/// Fragments are appended; whenever the buffer exceeds `size + overlap`
/// characters, the first `size + overlap` characters are emitted as a
/// window and the buffer keeps the tail from character `size` onward, so
/// consecutive windows share `overlap` characters.
///
/// In line-aligned mode (spreadsheet content) windows instead cut at the
/// last newline within the first `size` characters, with no overlap, so a
/// row is never split across windows.
pub struct RollingBuffer {
    buffer: String,
    size: usize,
    overlap: usize,
    line_aligned: bool,
}

impl RollingBuffer {
    pub fn new(size: usize, overlap: usize, line_aligned: bool) -> Self {
        Self {
            buffer: String::new(),
            size,
            overlap,
            line_aligned,
        }
    }

    /// Appends a fragment and returns every full window it completed.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut windows = Vec::new();
        loop {
            let window = if self.line_aligned {
                self.pop_line_aligned()
            } else {
                self.pop_char_window()
            };
            match window {
                Some(w) => windows.push(w),
                None => break,
            }
        }
        windows
    }

    /// Flushes the remainder. Whitespace-only leftovers are dropped.
    pub fn finish(self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }

    fn pop_char_window(&mut self) -> Option<String> {
        let threshold = self.size + self.overlap;
        let char_len = self.buffer.chars().count();
        if char_len <= threshold {
            return None;
        }
        let emit_end = byte_offset_of_char(&self.buffer, threshold);
        let keep_from = byte_offset_of_char(&self.buffer, self.size);
        let window = self.buffer[..emit_end].to_string();
        self.buffer.drain(..keep_from);
        Some(window)
    }

    fn pop_line_aligned(&mut self) -> Option<String> {
        let char_len = self.buffer.chars().count();
        if char_len <= self.size {
            return None;
        }
        let limit = byte_offset_of_char(&self.buffer, self.size);
        match self.buffer[..limit].rfind('\n') {
            Some(cut) => {
                let window = self.buffer[..cut].to_string();
                self.buffer.drain(..cut + 1);
                Some(window)
            }
            None => {
                // single oversized line, hard cut at the size boundary
                let window = self.buffer[..limit].to_string();
                self.buffer.drain(..limit);
                Some(window)
            }
        }
    }
}

/// Byte offset of the `n`-th character, or the string's length if shorter.
fn byte_offset_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}
