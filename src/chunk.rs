//! Paragraph-boundary text chunker.
//!
//! Splits document text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! to preserve semantic coherence within each chunk.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Accumulate `\n\n`-separated paragraphs until the next one would
//!    exceed `max_chars`, then flush.
//! 3. Hard-split any single paragraph above `max_chars` at the nearest
//!    newline or space, never inside a UTF-8 code point.
//! 4. Prefix every chunk after the first with the word-aligned tail
//!    (`overlap_tokens × 4` chars) of the previous chunk.
//!
//! Output is a pure function of its inputs: chunk IDs are UUIDv5 of
//! `"{document_id}:{index}"`, so re-ingesting the same text yields the
//! same chunks.

use uuid::Uuid;

use crate::hash::text_hash;
use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks, returning contiguous indices starting at 0.
///
/// At least one chunk is always returned, even for empty input.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let bases = split_paragraphs(text, max_chars);

    bases
        .iter()
        .enumerate()
        .map(|(i, base)| {
            let body = if i > 0 && overlap_chars > 0 {
                let tail = overlap_tail(&bases[i - 1], overlap_chars);
                if tail.is_empty() {
                    base.clone()
                } else {
                    format!("{} {}", tail, base)
                }
            } else {
                base.clone()
            };
            make_chunk(document_id, i as i64, &body)
        })
        .collect()
}

fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let actual_split = split_point(remaining, max_chars);
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
}

/// Byte offset at which to cut `s` so the head fits in `max_chars`,
/// preferring a newline, then a space.
fn split_point(s: &str, max_chars: usize) -> usize {
    if s.len() <= max_chars {
        return s.len();
    }
    let mut limit = floor_char_boundary(s, max_chars);
    if limit == 0 {
        limit = s.chars().next().map(char::len_utf8).unwrap_or(s.len());
    }
    s[..limit]
        .rfind('\n')
        .or_else(|| s[..limit].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// The last `max_chars` of `text`, starting at a word boundary.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text.trim();
    }
    let mut start = text.len() - max_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim(),
        None => tail.trim(),
    }
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let key = format!("{}:{}", document_id, index);
    Chunk {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: text_hash(text),
    }
}
