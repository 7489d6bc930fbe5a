//! Bounded text segmentation for downstream text-to-speech stages.
//!
//! Long narration scripts must reach the TTS stage in chunks that stay under
//! the model's safe input length. [`segment`] splits at sentence-ending
//! punctuation where possible, hard-splits where not, and prefixes each
//! segment with a configurable overlap from its predecessor so synthesis can
//! keep prosodic context across boundaries.
//!
//! The function is pure: identical inputs always produce the identical
//! segment sequence, and stripping each segment's recorded overlap prefix and
//! concatenating the remainders reconstructs the input text exactly.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::errors::{ErrorKind, StructuredError, ToStructured};

/// Default sentence-boundary characters. A newline acts as a fallback
/// boundary when none of these occur within the window.
pub const DEFAULT_BOUNDARY_CHARS: [char; 5] = ['.', '!', '?', ';', ':'];

/// Options controlling [`segment`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmenterOptions {
    /// Maximum length of any segment's content, in characters.
    pub max_chars: usize,
    /// Number of trailing characters from the previous segment prefixed onto
    /// the next one. Must be strictly less than `max_chars`.
    pub overlap_chars: usize,
    /// When false, boundaries are ignored and every split is a hard split.
    pub split_on_punctuation: bool,
    /// Characters treated as sentence boundaries.
    pub boundary_chars: Vec<char>,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            max_chars: 500,
            overlap_chars: 50,
            split_on_punctuation: true,
            boundary_chars: DEFAULT_BOUNDARY_CHARS.to_vec(),
        }
    }
}

/// One bounded chunk of the input text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSegment {
    /// Zero-based position in emission order.
    pub index: usize,
    /// Segment text, including any overlap prefix.
    pub content: String,
    /// Number of leading characters copied from the previous segment.
    /// Always zero for the first segment.
    pub overlap_with_previous_chars: usize,
}

impl TextSegment {
    /// Content with the overlap prefix removed, i.e. the characters this
    /// segment contributes to the reconstructed original.
    pub fn fresh_content(&self) -> String {
        self.content
            .chars()
            .skip(self.overlap_with_previous_chars)
            .collect()
    }
}

/// Rejected segmentation parameters. Surfaced immediately, never retried.
#[derive(Debug, Error, Diagnostic)]
pub enum SegmentError {
    #[error("max_chars must be greater than zero")]
    #[diagnostic(
        code(voiceloom::segmenter::max_chars),
        help("Pick a positive segment length; 500 is a safe default for TTS input.")
    )]
    ZeroMaxChars,

    #[error("overlap_chars ({overlap_chars}) must be smaller than max_chars ({max_chars})")]
    #[diagnostic(
        code(voiceloom::segmenter::overlap),
        help("Shrink the overlap or grow the segment length; overlap must leave room for fresh text.")
    )]
    OverlapTooLarge {
        overlap_chars: usize,
        max_chars: usize,
    },
}

impl ToStructured for SegmentError {
    fn to_structured(&self) -> StructuredError {
        let err = StructuredError::new(ErrorKind::Segmentation, self.to_string());
        match self {
            SegmentError::ZeroMaxChars => err
                .with_context("max_chars", json!(0))
                .with_remediation("set max_chars to a positive value (e.g. 500)"),
            SegmentError::OverlapTooLarge {
                overlap_chars,
                max_chars,
            } => err
                .with_context("overlap_chars", json!(overlap_chars))
                .with_context("max_chars", json!(max_chars))
                .with_remediation("reduce overlap_chars below max_chars"),
        }
    }
}

/// Split `text` into bounded segments.
///
/// Boundary selection per segment: the scan window is `max_chars` characters
/// for the first segment and `max_chars - overlap_chars` thereafter (so the
/// overlap prefix never pushes content past the limit). Within the window the
/// split lands just after the last boundary character, falling back to the
/// last newline, falling back to a hard split at the window edge. Hard splits
/// operate on characters, never bytes, so multibyte codepoints stay intact.
///
/// ```
/// use voiceloom::segmenter::{segment, SegmenterOptions};
///
/// let opts = SegmenterOptions { max_chars: 12, overlap_chars: 0, ..Default::default() };
/// let segments = segment("One. Two. Three.", &opts).unwrap();
/// assert_eq!(segments[0].content, "One. Two.");
/// ```
pub fn segment(text: &str, opts: &SegmenterOptions) -> Result<Vec<TextSegment>, SegmentError> {
    if opts.max_chars == 0 {
        return Err(SegmentError::ZeroMaxChars);
    }
    if opts.overlap_chars >= opts.max_chars {
        return Err(SegmentError::OverlapTooLarge {
            overlap_chars: opts.overlap_chars,
            max_chars: opts.max_chars,
        });
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= opts.max_chars {
        return Ok(vec![TextSegment {
            index: 0,
            content: text.to_string(),
            overlap_with_previous_chars: 0,
        }]);
    }

    let mut segments = Vec::new();
    let mut cursor = 0usize; // start of unconsumed text, in chars

    while cursor < chars.len() {
        let first = segments.is_empty();
        let budget = if first {
            opts.max_chars
        } else {
            opts.max_chars - opts.overlap_chars
        };
        let remaining = chars.len() - cursor;

        let take = if remaining <= budget {
            remaining
        } else {
            find_boundary(&chars[cursor..cursor + budget], opts).unwrap_or(budget)
        };

        let overlap = if first {
            0
        } else {
            opts.overlap_chars.min(cursor)
        };
        let mut content = String::with_capacity(overlap + take);
        content.extend(&chars[cursor - overlap..cursor]);
        content.extend(&chars[cursor..cursor + take]);

        segments.push(TextSegment {
            index: segments.len(),
            content,
            overlap_with_previous_chars: overlap,
        });
        cursor += take;
    }

    Ok(segments)
}

/// Returns the split length (chars consumed) for a full window, or `None`
/// when no acceptable boundary exists and the caller must hard-split.
fn find_boundary(window: &[char], opts: &SegmenterOptions) -> Option<usize> {
    if !opts.split_on_punctuation {
        return None;
    }
    // Split just after the last boundary char; newline is the fallback.
    let punct = window
        .iter()
        .rposition(|c| opts.boundary_chars.contains(c));
    let cut = punct.or_else(|| window.iter().rposition(|c| *c == '\n'))?;
    Some(cut + 1)
}

/// Reassemble the original text from segments by stripping overlap prefixes.
/// Inverse of [`segment`]; mainly used by tests and by the orchestrator when
/// checking concatenation order.
pub fn reconstruct(segments: &[TextSegment]) -> String {
    segments.iter().map(|s| s.fresh_content()).collect()
}
