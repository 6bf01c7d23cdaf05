//! Core types used throughout Affirm

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for affirmations
pub type AffirmationId = Uuid;

/// Default number of repetitions a new affirmation aims for
pub const DEFAULT_TARGET_COUNT: u32 = 1000;

/// A user's persisted affirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Affirmation {
    pub id: AffirmationId,
    pub text: String,
    /// Reference recording played back at the start of every practice
    pub audio_path: PathBuf,
    pub repeat_count: u32,
    /// Fixed at creation
    pub target_count: u32,
    pub word_timings: Vec<WordTiming>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Affirmation {
    pub fn new(text: impl Into<String>, audio_path: impl Into<PathBuf>, target_count: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            audio_path: audio_path.into(),
            repeat_count: 0,
            target_count: target_count.max(1),
            word_timings: Vec::new(),
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the repetition goal has been reached
    pub fn is_complete(&self) -> bool {
        self.repeat_count >= self.target_count
    }

    /// Fraction of the goal reached, capped at 1.0
    pub fn progress(&self) -> f32 {
        (self.repeat_count as f32 / self.target_count.max(1) as f32).min(1.0)
    }
}

/// Playback timing of one highlightable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub text: String,
    /// Seconds from the start of the recording
    pub start: f64,
    /// Seconds
    pub duration: f64,
    pub confidence: f32,
}

impl WordTiming {
    pub fn new(text: impl Into<String>, start: f64, duration: f64, confidence: f32) -> Self {
        Self {
            text: text.into(),
            start,
            duration: duration.max(0.0),
            confidence,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end()
    }
}

/// Find the unit that should be highlighted at `elapsed` seconds of playback.
///
/// Returns the unit whose span contains the time, the previous unit when the
/// time falls in a gap, and `None` before the first unit starts.
pub fn unit_at_time(timings: &[WordTiming], elapsed: f64) -> Option<usize> {
    let after = timings.partition_point(|t| t.start <= elapsed);
    after.checked_sub(1)
}

/// One segmentation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    /// Case-folded, punctuation-trimmed text used for matching
    pub normalized: String,
    /// Text as displayed
    pub original: String,
    /// Index in the unit sequence
    pub position: usize,
}

impl TextUnit {
    /// Punctuation units match for free during alignment
    pub fn is_punctuation(&self) -> bool {
        self.normalized.is_empty()
    }
}

/// Output of similarity scoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Combined confidence in [0, 1]
    pub score: f64,
    pub overlap: f64,
    pub edit: f64,
    pub order: f64,
    /// Absent when no embedding resource exists for the language
    pub semantic: Option<f64>,
}

impl SimilarityResult {
    pub fn zero() -> Self {
        Self {
            score: 0.0,
            overlap: 0.0,
            edit: 0.0,
            order: 0.0,
            semantic: None,
        }
    }
}

/// Platform permissions the practice loop depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Microphone,
    SpeechRecognition,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Microphone => f.write_str("microphone"),
            Self::SpeechRecognition => f.write_str("speech recognition"),
        }
    }
}
