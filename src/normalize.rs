//! Text normalizer for raw extracted policy text.
//!
//! Strips the repeating furniture PDF extraction leaves behind (headers,
//! footers, stray page numbers) and normalizes whitespace. Side-effect-free
//! and total: always returns a string, possibly empty.

use once_cell::sync::Lazy;
use regex::Regex;

// Header/footer lines look like "Acme Care | Safeguarding Policy | Page 5".
static HEADER_FOOTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^.*?\|.*?\|.*?Page\s+\d+.*?$").unwrap());

// Lines that are nothing but a number (stray page numbers).
static BARE_PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*\d+[ \t]*$").unwrap());

static PAGE_X_OF_Y: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Page\s+\d+\s+of\s+\d+").unwrap());

static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").unwrap());

static NEWLINE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Clean raw extracted text: remove header/footer signatures, page-number
/// noise, and excess whitespace.
pub fn normalize(raw: &str) -> String {
    let text = HEADER_FOOTER.replace_all(raw, "");
    let text = BARE_PAGE_NUMBER.replace_all(&text, "");
    let text = PAGE_X_OF_Y.replace_all(&text, "");
    let text = SPACE_RUNS.replace_all(&text, " ");
    let text = NEWLINE_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_header_footer_lines() {
        let raw = "Acme Care | Safeguarding Policy | Page 5\nActual policy content here.";
        let cleaned = normalize(raw);
        assert!(!cleaned.contains("Safeguarding Policy | Page"));
        assert!(cleaned.contains("Actual policy content here."));
    }

    #[test]
    fn removes_standalone_page_numbers() {
        let raw = "First line.\n12\nSecond line.";
        let cleaned = normalize(raw);
        assert!(!cleaned.contains("12"));
        assert!(cleaned.contains("First line."));
        assert!(cleaned.contains("Second line."));
    }

    #[test]
    fn removes_page_x_of_y_case_insensitive() {
        let cleaned = normalize("Intro text page 3 OF 10 continues here.");
        assert!(!cleaned.to_lowercase().contains("page 3 of 10"));
        assert!(cleaned.contains("Intro text"));
    }

    #[test]
    fn collapses_space_runs() {
        assert_eq!(normalize("too    many   spaces"), "too many spaces");
    }

    #[test]
    fn collapses_newline_runs_to_two() {
        assert_eq!(normalize("para one\n\n\n\n\npara two"), "para one\n\npara two");
    }

    #[test]
    fn trims_and_handles_empty() {
        assert_eq!(normalize("   \n\n  "), "");
        assert_eq!(normalize(""), "");
    }
}
