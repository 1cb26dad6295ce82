//! Smart chunker: one dispatcher, two strategies.
//!
//! The structured path emits one chunk per extracted control segment
//! (oversized segments are window-split but keep their control ID). The
//! generic path splits on paragraph boundaries (`\n\n`) under a `max_tokens`
//! budget with configurable overlap.
//!
//! Empty or blank content yields an empty sequence; the pipeline turns that
//! into a validation failure rather than a crash.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::extractor::ControlSegment;
use crate::models::{DocumentType, KnowledgeChunk};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Control-aligned chunks from the structured extractor.
    Structured,
    /// Paragraph-boundary windowing, no control extraction.
    Generic,
}

/// Single decision point for strategy selection.
pub fn select_strategy(
    doc_type: DocumentType,
    confidence: f64,
    structured_confidence_threshold: f64,
) -> ChunkStrategy {
    if doc_type.is_structured() && confidence >= structured_confidence_threshold {
        ChunkStrategy::Structured
    } else {
        ChunkStrategy::Generic
    }
}

/// Produce the ordered chunk sequence for one document.
///
/// `segments` is consulted only on the structured path; a structured
/// document whose extractor found nothing degrades to generic windowing.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    segments: &[ControlSegment],
    strategy: ChunkStrategy,
    config: &ChunkingConfig,
) -> Vec<KnowledgeChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    match strategy {
        ChunkStrategy::Structured if !segments.is_empty() => {
            chunk_structured(document_id, segments, config)
        }
        _ => chunk_generic(document_id, text, config),
    }
}

fn chunk_structured(
    document_id: &str,
    segments: &[ControlSegment],
    config: &ChunkingConfig,
) -> Vec<KnowledgeChunk> {
    let max_chars = config.max_tokens * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for seg in segments {
        if seg.text.len() <= max_chars {
            chunks.push(make_chunk(
                document_id,
                index,
                &seg.text,
                Some(&seg.control_id),
            ));
            index += 1;
            continue;
        }

        for window in split_hard(&seg.text, max_chars) {
            chunks.push(make_chunk(document_id, index, &window, Some(&seg.control_id)));
            index += 1;
        }
    }

    chunks
}

fn chunk_generic(document_id: &str, text: &str, config: &ChunkingConfig) -> Vec<KnowledgeChunk> {
    let max_chars = config.max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = config.overlap_tokens * CHARS_PER_TOKEN;

    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut index: i64 = 0;
    // Whether the buffer holds anything beyond a seeded overlap tail.
    let mut has_fresh_content = false;

    let flush = |buf: &mut String, index: &mut i64, chunks: &mut Vec<KnowledgeChunk>| {
        if buf.is_empty() {
            return;
        }
        chunks.push(make_chunk(document_id, *index, buf, None));
        *index += 1;

        // Seed the next window with the tail of this one.
        let tail = overlap_tail(buf, overlap_chars);
        buf.clear();
        buf.push_str(&tail);
    };

    for para in paragraphs {
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
            flush(&mut current_buf, &mut index, &mut chunks);
            has_fresh_content = false;
        }

        if trimmed.len() > max_chars {
            if has_fresh_content {
                flush(&mut current_buf, &mut index, &mut chunks);
            }
            current_buf.clear();
            has_fresh_content = false;
            for piece in split_hard(trimmed, max_chars) {
                chunks.push(make_chunk(document_id, index, &piece, None));
                index += 1;
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
            has_fresh_content = true;
        }
    }

    if has_fresh_content && !current_buf.trim().is_empty() {
        chunks.push(make_chunk(document_id, index, current_buf.trim(), None));
    }

    chunks
}

/// Hard-split oversized text at char-boundary windows, preferring newline or
/// space break points.
fn split_hard(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            pieces.push(remaining.to_string());
            break;
        }

        let mut split_at = max_chars;
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        let actual_split = remaining[..split_at]
            .rfind('\n')
            .or_else(|| remaining[..split_at].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(split_at);

        pieces.push(remaining[..actual_split].trim().to_string());
        remaining = remaining[actual_split..].trim_start();
    }

    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Last `overlap_chars` of `buf`, snapped forward to a word boundary.
fn overlap_tail(buf: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 || buf.len() <= overlap_chars {
        return String::new();
    }
    let mut start = buf.len() - overlap_chars;
    while !buf.is_char_boundary(start) {
        start += 1;
    }
    match buf[start..].find(' ') {
        Some(pos) => buf[start + pos..].trim().to_string(),
        None => String::new(),
    }
}

fn make_chunk(
    document_id: &str,
    index: i64,
    text: &str,
    control_id: Option<&str>,
) -> KnowledgeChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    KnowledgeChunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
        control_id: control_id.map(|s| s.to_string()),
    }
}
