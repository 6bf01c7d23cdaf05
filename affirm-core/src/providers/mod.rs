//! Platform collaborator abstraction for speech recognition and word timing
//!
//! Live recognizers are platform services; the forced aligner has a built-in
//! energy-based implementation that needs no model.
mod aligner;
mod speech;

pub use aligner::{EnergyAligner, ForcedAligner, TimedSegment};
pub use speech::{RecognizerEvent, SpeechRecognizer};
