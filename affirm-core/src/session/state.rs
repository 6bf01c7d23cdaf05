//! Session states and the observable snapshot

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::types::{SimilarityResult, TextUnit};

/// Why an attempt did not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Nothing was recognized
    NoSpeech,
    /// Recognized text scored below the threshold
    LowSimilarity,
}

/// Practice session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PracticeState {
    /// Waiting for `start`
    Idle,
    Playback,
    Recording,
    Analyzing,
    Success,
    Failure { reason: FailureReason },
    /// Device or permission error; waits for a manual retry
    Error { permission: bool },
    /// Torn down; accepts no further commands
    Closed,
}

impl PracticeState {
    /// Stage index shown by the progress indicator, starting at 1
    pub fn step(&self, step_count: u32) -> u32 {
        let stage = match self {
            Self::Idle | Self::Playback | Self::Error { .. } => 1,
            Self::Recording => 2,
            Self::Analyzing | Self::Success | Self::Failure { .. } | Self::Closed => 3,
        };
        stage.min(step_count.max(1))
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }
}

impl fmt::Display for PracticeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Playback => write!(f, "playback"),
            Self::Recording => write!(f, "recording"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Success => write!(f, "success"),
            Self::Failure { reason } => write!(f, "failure ({reason:?})"),
            Self::Error { .. } => write!(f, "error"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// What forced recording to end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopTrigger {
    Manual,
    MaxDuration,
    Silence,
}

/// Cause of a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionTrigger {
    Start,
    PlaybackFinished,
    Stop(StopTrigger),
    Scored,
    Retry,
    Replay,
    CantSpeakNow,
    Fault,
    Close,
}

/// One state change, broadcast to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: PracticeState,
    pub to: PracticeState,
    pub trigger: TransitionTrigger,
}

/// Read-only view of a session for the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: PracticeState,
    /// Units of the affirmation text, in display order
    pub units: Vec<TextUnit>,
    /// Units marked as spoken or played
    pub highlighted: BTreeSet<usize>,
    /// Unit under the playback cursor
    pub current_unit: Option<usize>,
    /// Score of the latest partial transcript
    pub live_similarity: Option<f64>,
    pub final_similarity: Option<SimilarityResult>,
    pub recognized_text: String,
    /// User-facing copy for the current state
    pub message: Option<String>,
    pub error: Option<String>,
    pub repeat_count: u32,
    pub target_count: u32,
    pub goal_reached: bool,
    /// The last repetition was counted without verification
    pub bypassed: bool,
    pub step: u32,
    pub step_count: u32,
}

impl SessionSnapshot {
    pub fn new(units: Vec<TextUnit>, repeat_count: u32, target_count: u32, step_count: u32) -> Self {
        Self {
            state: PracticeState::Idle,
            units,
            highlighted: BTreeSet::new(),
            current_unit: None,
            live_similarity: None,
            final_similarity: None,
            recognized_text: String::new(),
            message: None,
            error: None,
            repeat_count,
            target_count,
            goal_reached: repeat_count >= target_count,
            bypassed: false,
            step: PracticeState::Idle.step(step_count),
            step_count,
        }
    }
}
