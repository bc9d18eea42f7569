//! Heuristic section detection over normalized policy text.
//!
//! Recognizes four heading shapes, line by line:
//! decimal-numbered ("1.2 Purpose"), "Section N: Title", markdown
//! (1-3 leading `#`), and ALL-CAPS lines of at least ~10 characters.
//! Headings are ordered by position of first occurrence; each span ends
//! where the next begins, and the last span ends at end-of-text.
//!
//! The patterns are deliberately approximate. Downstream chunk metadata
//! depends on these exact semantics, so they must not be "improved".

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::SectionSpan;

// One alternation, matched in position order. Alternative order mirrors
// the precedence of the four heading shapes.
static HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^(?:\d+(?:\.\d+)*\.?\s+[A-Z][^\n]{0,100}|Section\s+\d+:\s+[A-Z][^\n]{0,100}|#{1,3}\s+[A-Z][^\n]{0,100}|[A-Z][A-Z\s]{10,100})$",
    )
    .unwrap()
});

static MARKDOWN_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,3}\s+").unwrap());

/// Fallback span name when no heading is detected.
pub const DEFAULT_SECTION: &str = "Document";

/// Partition `text` into named half-open spans, one per detected heading.
///
/// Returns a single synthetic span covering the whole text when no
/// heading matches. Deterministic: identical input yields identical
/// boundaries.
pub fn detect_sections(text: &str) -> Vec<SectionSpan> {
    let mut sections: Vec<SectionSpan> = Vec::new();

    for m in HEADING.find_iter(text) {
        let name = MARKDOWN_MARKER.replace(m.as_str().trim(), "").trim().to_string();
        sections.push(SectionSpan {
            name,
            start: m.start(),
            end: text.len(), // fixed up below
        });
    }

    // End of each span is the start of the next; the last runs to EOF.
    for i in 0..sections.len() {
        if i + 1 < sections.len() {
            sections[i].end = sections[i + 1].start;
        }
    }

    if sections.is_empty() {
        return vec![SectionSpan {
            name: DEFAULT_SECTION.to_string(),
            start: 0,
            end: text.len(),
        }];
    }

    tracing::debug!(count = sections.len(), "detected sections");
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_numbered_headings() {
        let text = "1. Introduction\nSome intro text.\n1.1 Purpose\nPurpose text here.";
        let sections = detect_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name, "1. Introduction");
        assert_eq!(sections[1].name, "1.1 Purpose");
    }

    #[test]
    fn detects_section_colon_headings() {
        let text = "Section 1: Overview\nBody of the overview.";
        let sections = detect_sections(text);
        assert_eq!(sections[0].name, "Section 1: Overview");
    }

    #[test]
    fn strips_markdown_markers_from_name() {
        let text = "## Reporting Procedures\nWhat to report and when.";
        let sections = detect_sections(text);
        assert_eq!(sections[0].name, "Reporting Procedures");
    }

    #[test]
    fn detects_all_caps_headings() {
        let text = "EMERGENCY PROCEDURES\nCall for help immediately.";
        let sections = detect_sections(text);
        assert_eq!(sections[0].name, "EMERGENCY PROCEDURES");
    }

    #[test]
    fn short_caps_line_is_not_a_heading() {
        // Under the ~10 character floor.
        let text = "NOTE\nJust a remark, not a section.";
        let sections = detect_sections(text);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name, DEFAULT_SECTION);
    }

    #[test]
    fn no_headings_yields_synthetic_document_span() {
        let text = "plain prose with no structure at all.";
        let sections = detect_sections(text);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name, DEFAULT_SECTION);
        assert_eq!(sections[0].start, 0);
        assert_eq!(sections[0].end, text.len());
    }

    #[test]
    fn spans_are_contiguous_and_cover_to_eof() {
        let text = "1. First\naaa bbb ccc.\n2. Second\nddd eee fff.\n3. Third\nggg.";
        let sections = detect_sections(text);
        assert!(sections.len() >= 2);
        for pair in sections.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(sections.last().unwrap().end, text.len());
    }

    #[test]
    fn deterministic_across_runs() {
        let text = "1. Alpha\ntext one.\nSAFEGUARDING DUTIES\ntext two.\n## Beta\ntext three.";
        let a = detect_sections(text);
        let b = detect_sections(text);
        assert_eq!(a, b);
    }
}
