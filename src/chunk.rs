//! Overlapping window chunker for policy text.
//!
//! Splits each section into retrieval units of roughly `target_size`
//! characters, extending a window to the next sentence boundary when one
//! falls within reach, and discarding trailing fragments too small to be
//! meaningful. Chunk indices run monotonically across the whole document,
//! not per section.
//!
//! Pure and deterministic: identical inputs always yield identical chunk
//! boundaries and indices.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ChunkMetadata, SectionSpan};

/// Fragments shorter than this are dropped as noise.
pub const MIN_CHUNK_CHARS: usize = 100;

/// How far past the window end to look for a sentence boundary.
const SENTENCE_LOOKAHEAD: usize = 100;

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s").unwrap());

/// Split `text` into overlapping chunks, one section at a time, in input
/// order. The cursor advances by `target_size - overlap` regardless of any
/// sentence-boundary extension, so consecutive windows overlap by
/// approximately `overlap` characters of the un-extended grid.
pub fn chunk_text(
    text: &str,
    sections: &[SectionSpan],
    target_size: usize,
    overlap: usize,
) -> Vec<(String, ChunkMetadata)> {
    let mut chunks: Vec<(String, ChunkMetadata)> = Vec::new();
    let step = target_size.saturating_sub(overlap).max(1);
    let mut chunk_index = 0usize;

    for section in sections {
        let section_text = text
            .get(section.start..section.end)
            .unwrap_or_default()
            .trim();
        if section_text.is_empty() {
            continue;
        }

        // All positions below are char offsets; map to byte offsets once.
        let byte_at: Vec<usize> = section_text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(section_text.len()))
            .collect();
        let total_chars = byte_at.len() - 1;

        let mut position = 0usize;
        while position < total_chars {
            let mut window_end = (position + target_size).min(total_chars);

            // Avoid mid-sentence cuts: extend to the next sentence boundary
            // found within the lookahead, at a small cost in overshoot.
            if window_end < total_chars {
                let lookahead_end = (window_end + SENTENCE_LOOKAHEAD).min(total_chars);
                let lookahead = &section_text[byte_at[window_end]..byte_at[lookahead_end]];
                if let Some(m) = SENTENCE_END.find(lookahead) {
                    let extension = lookahead[..m.end()].chars().count();
                    window_end += extension;
                }
            }

            let chunk = section_text[byte_at[position]..byte_at[window_end]].trim();

            // A trailing fragment this small is noise, not a retrieval unit.
            if chunk.chars().count() < MIN_CHUNK_CHARS {
                break;
            }

            let metadata = ChunkMetadata {
                section_name: Some(section.name.clone()),
                chunk_index,
                word_count: chunk.split_whitespace().count(),
                char_count: chunk.chars().count(),
            };
            chunks.push((chunk.to_string(), metadata));
            chunk_index += 1;

            position += step;
        }
    }

    tracing::debug!(count = chunks.len(), "chunked document");
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whole_text_section(text: &str) -> Vec<SectionSpan> {
        vec![SectionSpan {
            name: "Document".to_string(),
            start: 0,
            end: text.len(),
        }]
    }

    fn sentence_filler(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("This is sentence number {} in the policy body text. ", i))
            .collect()
    }

    #[test]
    fn short_text_single_chunk() {
        let text = sentence_filler(4);
        let chunks = chunk_text(&text, &whole_text_section(&text), 800, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].1.chunk_index, 0);
        assert_eq!(chunks[0].0, text.trim());
    }

    #[test]
    fn text_below_minimum_yields_no_chunks() {
        let text = "Too short to matter.";
        let chunks = chunk_text(text, &whole_text_section(text), 800, 100);
        assert!(chunks.is_empty());
    }

    #[test]
    fn empty_section_is_skipped() {
        let text = sentence_filler(20);
        let sections = vec![
            SectionSpan {
                name: "Empty".to_string(),
                start: 0,
                end: 0,
            },
            SectionSpan {
                name: "Body".to_string(),
                start: 0,
                end: text.len(),
            },
        ];
        let chunks = chunk_text(&text, &sections, 800, 100);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|(_, m)| m.section_name.as_deref() == Some("Body")));
    }

    #[test]
    fn indices_contiguous_across_sections() {
        let text = format!("{}{}", sentence_filler(40), sentence_filler(40));
        let half = text.len() / 2;
        // Snap the split to a char boundary (ASCII here, so it already is).
        let sections = vec![
            SectionSpan {
                name: "First".to_string(),
                start: 0,
                end: half,
            },
            SectionSpan {
                name: "Second".to_string(),
                start: half,
                end: text.len(),
            },
        ];
        let chunks = chunk_text(&text, &sections, 400, 50);
        assert!(chunks.len() > 2);
        for (i, (_, meta)) in chunks.iter().enumerate() {
            assert_eq!(meta.chunk_index, i);
        }
    }

    #[test]
    fn no_chunk_shorter_than_minimum() {
        let text = sentence_filler(60);
        let chunks = chunk_text(&text, &whole_text_section(&text), 300, 50);
        for (chunk, _) in &chunks {
            assert!(chunk.chars().count() >= MIN_CHUNK_CHARS);
        }
    }

    #[test]
    fn windows_extend_to_sentence_boundaries() {
        let text = sentence_filler(60);
        let chunks = chunk_text(&text, &whole_text_section(&text), 300, 50);
        assert!(chunks.len() > 1);
        // Every non-final window that got extended ends at a sentence end.
        for (chunk, _) in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.ends_with('.'),
                "chunk should end on a sentence boundary: {:?}",
                &chunk[chunk.len().saturating_sub(20)..]
            );
        }
    }

    #[test]
    fn metadata_counts_match_text() {
        let text = sentence_filler(30);
        let chunks = chunk_text(&text, &whole_text_section(&text), 800, 100);
        for (chunk, meta) in &chunks {
            assert_eq!(meta.char_count, chunk.chars().count());
            assert_eq!(meta.word_count, chunk.split_whitespace().count());
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = sentence_filler(60);
        let chunks = chunk_text(&text, &whole_text_section(&text), 400, 100);
        assert!(chunks.len() >= 2);
        // The tail of chunk k re-appears at the head of chunk k+1.
        let first = &chunks[0].0;
        let overlap_tail: String = first.chars().skip(400 - 100).take(40).collect();
        assert!(chunks[1].0.starts_with(overlap_tail.trim_start()));
    }

    #[test]
    fn deterministic() {
        let text = sentence_filler(50);
        let sections = whole_text_section(&text);
        let a = chunk_text(&text, &sections, 800, 100);
        let b = chunk_text(&text, &sections, 800, 100);
        assert_eq!(a.len(), b.len());
        for ((ta, ma), (tb, mb)) in a.iter().zip(b.iter()) {
            assert_eq!(ta, tb);
            assert_eq!(ma, mb);
        }
    }
}
