//! Locale-aware segmentation into highlightable units
//!
//! CJK-dominant text is split into one unit per grapheme cluster and rendered
//! without separators. Everything else is split on whitespace into words and
//! rendered with a single space between units. Unit positions key both the
//! highlight set and the timing table, so segmentation must stay deterministic.

use std::ops::Range;
use unicode_segmentation::UnicodeSegmentation;

use crate::types::TextUnit;

/// Characters per line for CJK text
pub const CJK_UNITS_PER_LINE: usize = 12;

/// Approximate line width, in character columns, for space-delimited scripts
pub const LINE_WIDTH_COLUMNS: usize = 28;

/// How a piece of text is split into units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptMode {
    /// One unit per grapheme cluster, no separator
    Cjk,
    /// One unit per whitespace-delimited word, single-space separator
    Spaced,
}

impl ScriptMode {
    pub fn separator(&self) -> &'static str {
        match self {
            Self::Cjk => "",
            Self::Spaced => " ",
        }
    }
}

/// Whether a character belongs to a CJK block (ideographs, kana, hangul,
/// CJK punctuation and full-width forms)
pub fn is_cjk_char(c: char) -> bool {
    matches!(c as u32,
        0x1100..=0x11FF     // Hangul Jamo
        | 0x2E80..=0x2FDF   // CJK radicals
        | 0x3000..=0x303F   // CJK symbols and punctuation
        | 0x3040..=0x309F   // Hiragana
        | 0x30A0..=0x30FF   // Katakana
        | 0x3130..=0x318F   // Hangul compatibility Jamo
        | 0x31F0..=0x31FF   // Katakana phonetic extensions
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified ideographs
        | 0xAC00..=0xD7AF   // Hangul syllables
        | 0xF900..=0xFAFF   // CJK compatibility ideographs
        | 0xFF00..=0xFFEF   // Half/full-width forms
        | 0x20000..=0x2FA1F // CJK extensions B+
    )
}

/// Whether any character of the text is CJK
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_char)
}

/// Whether a majority of the non-whitespace scalar values are CJK
pub fn is_cjk_dominant(text: &str) -> bool {
    let mut total = 0usize;
    let mut cjk = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        if is_cjk_char(c) {
            cjk += 1;
        }
    }
    total > 0 && cjk * 2 > total
}

/// Script mode for a piece of text
pub fn script_mode(text: &str) -> ScriptMode {
    if is_cjk_dominant(text) {
        ScriptMode::Cjk
    } else {
        ScriptMode::Spaced
    }
}

/// Normalized form used for matching: alphanumerics only, case-folded.
/// Returns an empty string for punctuation-only units.
pub fn normalize_unit(unit: &str) -> String {
    unit.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Splits text into highlightable units
#[derive(Debug, Clone)]
pub struct TextSegmenter {
    cjk_units_per_line: usize,
    line_width_columns: usize,
}

impl Default for TextSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl TextSegmenter {
    pub fn new() -> Self {
        Self {
            cjk_units_per_line: CJK_UNITS_PER_LINE,
            line_width_columns: LINE_WIDTH_COLUMNS,
        }
    }

    /// Override the display line width (columns for spaced scripts)
    pub fn with_line_width(mut self, columns: usize) -> Self {
        self.line_width_columns = columns.max(1);
        self
    }

    /// Segment text using the mode its own script implies
    pub fn segment(&self, text: &str) -> Vec<TextUnit> {
        self.segment_as(text, script_mode(text))
    }

    /// Segment text in an explicit mode.
    ///
    /// Recognized transcripts are segmented in the expected text's mode so
    /// that both sides of an alignment use the same unit granularity.
    pub fn segment_as(&self, text: &str, mode: ScriptMode) -> Vec<TextUnit> {
        let pieces: Vec<&str> = match mode {
            ScriptMode::Cjk => text
                .graphemes(true)
                .filter(|g| !g.chars().all(char::is_whitespace))
                .collect(),
            ScriptMode::Spaced => text.split_whitespace().collect(),
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(position, piece)| TextUnit {
                normalized: normalize_unit(piece),
                original: piece.to_string(),
                position,
            })
            .collect()
    }

    /// Render units back to display text
    pub fn join(units: &[TextUnit], mode: ScriptMode) -> String {
        units
            .iter()
            .map(|u| u.original.as_str())
            .collect::<Vec<_>>()
            .join(mode.separator())
    }

    /// Heuristic number of units per display line; no effect on matching
    pub fn recommended_units_per_line(&self, text: &str) -> usize {
        match script_mode(text) {
            ScriptMode::Cjk => self.cjk_units_per_line,
            ScriptMode::Spaced => {
                let words: Vec<&str> = text.split_whitespace().collect();
                if words.is_empty() {
                    return 1;
                }
                let chars: usize = words.iter().map(|w| w.chars().count()).sum();
                let average = chars.div_ceil(words.len());
                (self.line_width_columns / (average + 1)).max(1)
            }
        }
    }

    /// Group unit positions into display lines
    pub fn wrap_lines(&self, units: &[TextUnit], mode: ScriptMode) -> Vec<Range<usize>> {
        let mut lines = Vec::new();
        match mode {
            ScriptMode::Cjk => {
                let mut start = 0;
                while start < units.len() {
                    let end = (start + self.cjk_units_per_line).min(units.len());
                    lines.push(start..end);
                    start = end;
                }
            }
            ScriptMode::Spaced => {
                let mut start = 0;
                let mut width = 0;
                for (i, unit) in units.iter().enumerate() {
                    let len = unit.original.chars().count();
                    let needed = if i == start { len } else { width + 1 + len };
                    if i > start && needed > self.line_width_columns {
                        lines.push(start..i);
                        start = i;
                        width = len;
                    } else {
                        width = needed;
                    }
                }
                if start < units.len() {
                    lines.push(start..units.len());
                }
            }
        }
        lines
    }
}
