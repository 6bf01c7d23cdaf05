//! Voice activity tracking for silence-triggered auto-stop
//!
//! Energy-based: an input level at or above the threshold counts as speech.
//! Silence is reported once no speech has been seen for the configured
//! interval, and cleared again on the next speech level.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default RMS level treated as speech
pub const DEFAULT_SPEECH_THRESHOLD: f32 = 0.02;

/// Default quiet time before silence is reported
pub const DEFAULT_SILENCE_INTERVAL: Duration = Duration::from_millis(1500);

/// Voice activity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceActivity {
    /// No speech for at least the silence interval
    Silence,
    /// Speech seen within the silence interval
    Speech,
}

/// Calculate RMS energy of audio samples
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Tracks time since the last speech-level input
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    interval: Duration,
    last_speech: Instant,
    state: VoiceActivity,
}

impl SilenceDetector {
    /// Create a detector; the silence clock starts at `now`
    pub fn new(threshold: f32, interval: Duration, now: Instant) -> Self {
        Self {
            threshold: threshold.clamp(0.001, 0.5),
            interval,
            last_speech: now,
            state: VoiceActivity::Speech,
        }
    }

    /// Reset the clock (call when starting a new recording)
    pub fn reset(&mut self, now: Instant) {
        self.last_speech = now;
        self.state = VoiceActivity::Speech;
        debug!("Silence detector reset");
    }

    /// Feed an input level. Returns the new state if it changed.
    pub fn observe_level(&mut self, level: f32, now: Instant) -> Option<VoiceActivity> {
        if level >= self.threshold {
            self.last_speech = now;
            if self.state == VoiceActivity::Silence {
                self.state = VoiceActivity::Speech;
                debug!("Speech resumed (level: {:.4})", level);
                return Some(VoiceActivity::Speech);
            }
            return None;
        }
        self.poll(now)
    }

    /// Record speech seen by other means (e.g. a recognizer update)
    pub fn mark_speech(&mut self, now: Instant) -> Option<VoiceActivity> {
        self.observe_level(f32::INFINITY, now)
    }

    /// Check the clock. Returns `Silence` once, when the interval elapses.
    pub fn poll(&mut self, now: Instant) -> Option<VoiceActivity> {
        if self.state == VoiceActivity::Speech
            && now.saturating_duration_since(self.last_speech) >= self.interval
        {
            self.state = VoiceActivity::Silence;
            debug!("Silence detected after {:?}", self.interval);
            return Some(VoiceActivity::Silence);
        }
        None
    }

    pub fn state(&self) -> VoiceActivity {
        self.state
    }

    pub fn is_silent(&self) -> bool {
        self.state == VoiceActivity::Silence
    }
}
