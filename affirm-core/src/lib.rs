//! Affirm Core - listen, repeat and verify spoken affirmations
//!
//! The practice loop plays a reference recording, records the user repeating
//! it while live speech recognition highlights the spoken units, scores the
//! transcript against the affirmation text, and counts passing repetitions
//! toward a target. Works with any script, including CJK.

pub mod audio;
pub mod error;
pub mod language;
pub mod library;
pub mod matcher;
pub mod permissions;
pub mod providers;
pub mod recognition;
pub mod segmenter;
pub mod session;
pub mod similarity;
pub mod storage;
pub mod types;
pub mod vad;

pub use error::{Error, Result};
pub use types::*;

/// Re-export the main engine components for convenience
pub use audio::{AudioEngine, AudioRoute, CpalAudioEngine, PlaybackOutcome, PlaybackProgress};
pub use language::LanguageDetector;
pub use library::AudioLibrary;
pub use matcher::{Alignment, align, align_text};
pub use permissions::{DesktopPermissions, PermissionProvider};
pub use providers::{EnergyAligner, ForcedAligner, RecognizerEvent, SpeechRecognizer};
pub use recognition::{RecognitionConfig, RecognitionEvent, SpeechRecognitionEngine};
pub use segmenter::{ScriptMode, TextSegmenter, contains_cjk};
pub use session::{
    GoalListener, PracticeConfig, PracticeFlow, PracticeSessionController, PracticeState,
    SessionDeps, SessionSnapshot,
};
pub use similarity::{EmbeddingProvider, SimilarityScorer};
pub use storage::{AffirmationStore, Storage};
