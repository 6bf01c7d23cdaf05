//! Fault-tolerant alignment of a recognized transcript against expected text
//!
//! Greedy left-to-right alignment with a bounded lookahead. Speech recognizers
//! drop, insert and mis-transcribe short words and never emit punctuation, so
//! a strict positional comparison fails on the first deviation. Instead:
//!
//! - punctuation in the expected text matches for free
//! - each recognized unit may match one of the next three expected positions,
//!   skipping at most one unspoken word
//! - a recognized unit with no match in the window is discarded without
//!   moving the cursor

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::segmenter::{TextSegmenter, script_mode};
use crate::types::TextUnit;

/// Number of expected positions searched for each recognized unit
pub const LOOKAHEAD_WINDOW: usize = 3;

/// Unspoken expected words that may be stepped over by one match
pub const MAX_SKIPPED_WORDS: usize = 1;

/// Result of aligning recognized units against expected units
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alignment {
    /// Indices into the expected units considered spoken
    pub matched: BTreeSet<usize>,
    /// Expected index -> recognized index for units matched by speech
    /// (punctuation matched for free has no source)
    pub sources: BTreeMap<usize, usize>,
}

impl Alignment {
    fn all(len: usize) -> Self {
        Self {
            matched: (0..len).collect(),
            sources: BTreeMap::new(),
        }
    }

    /// Fraction of expected units matched
    pub fn coverage(&self, expected_len: usize) -> f64 {
        if expected_len == 0 {
            return 0.0;
        }
        self.matched.len() as f64 / expected_len as f64
    }
}

/// Set of expected indices matched by the recognized units
pub fn align(expected: &[TextUnit], recognized: &[TextUnit]) -> BTreeSet<usize> {
    align_with_sources(expected, recognized).matched
}

/// Full alignment, including which recognized unit produced each match
pub fn align_with_sources(expected: &[TextUnit], recognized: &[TextUnit]) -> Alignment {
    if expected.is_empty() {
        return Alignment::default();
    }
    // nothing to say, so everything counts as said
    if expected.iter().all(TextUnit::is_punctuation) {
        return Alignment::all(expected.len());
    }
    if recognized.iter().all(TextUnit::is_punctuation) {
        return Alignment::default();
    }

    let n = expected.len();
    let mut result = Alignment::default();
    let mut cursor = 0;

    for (recognized_index, unit) in recognized.iter().enumerate() {
        if unit.is_punctuation() {
            continue;
        }

        cursor = skip_punctuation(expected, cursor, &mut result.matched);
        if cursor >= n {
            break;
        }

        let window_end = (cursor + LOOKAHEAD_WINDOW).min(n);
        let Some(found) = (cursor..window_end).find(|&j| {
            !expected[j].is_punctuation() && expected[j].normalized == unit.normalized
        }) else {
            continue;
        };

        let skipped_words = (cursor..found)
            .filter(|&j| !expected[j].is_punctuation())
            .count();
        if skipped_words > MAX_SKIPPED_WORDS {
            continue;
        }

        for j in cursor..found {
            if expected[j].is_punctuation() {
                result.matched.insert(j);
            }
        }
        result.matched.insert(found);
        result.sources.insert(found, recognized_index);
        cursor = found + 1;
    }

    skip_punctuation(expected, cursor, &mut result.matched);
    result
}

/// Mark the run of punctuation starting at `cursor` and return the next word position
fn skip_punctuation(expected: &[TextUnit], mut cursor: usize, matched: &mut BTreeSet<usize>) -> usize {
    while cursor < expected.len() && expected[cursor].is_punctuation() {
        matched.insert(cursor);
        cursor += 1;
    }
    cursor
}

/// Segment both texts (recognized text in the expected text's script mode) and align
pub fn align_text(
    segmenter: &TextSegmenter,
    expected_text: &str,
    recognized_text: &str,
) -> BTreeSet<usize> {
    let mode = script_mode(expected_text);
    let expected = segmenter.segment_as(expected_text, mode);
    let recognized = segmenter.segment_as(recognized_text, mode);
    align(&expected, &recognized)
}
