//! Practice flow configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::{
    SETTING_MAX_RECORDING_MS, SETTING_SIMILARITY_THRESHOLD_ONBOARDING,
    SETTING_SIMILARITY_THRESHOLD_STANDARD, Storage,
};

/// Which practice flow a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PracticeFlow {
    /// First practice right after recording a new affirmation
    Onboarding,
    /// Everyday practice
    Standard,
}

/// When to recompute word timings after a passing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingRefresh {
    Never,
    WhenMissing,
    Always,
}

/// Knobs that differ between practice flows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeConfig {
    pub flow: PracticeFlow,
    /// Score needed to pass, also arms silence auto-stop
    pub similarity_threshold: f64,
    /// Recording is stopped when this elapses
    pub max_recording: Duration,
    /// Stages shown by the flow's progress indicator
    pub step_count: u32,
    pub success_message: String,
    pub retry_message: String,
    pub silent_message: String,
    pub refresh_timings: TimingRefresh,
    /// Keep the passing attempt as the new reference recording
    pub adopt_recording_as_reference: bool,
}

impl PracticeConfig {
    pub fn onboarding() -> Self {
        Self {
            flow: PracticeFlow::Onboarding,
            similarity_threshold: 0.7,
            max_recording: Duration::from_secs(10),
            step_count: 3,
            success_message: "Beautiful. Your first repetition counts.".to_string(),
            retry_message: "Almost there. Listen once more and try again.".to_string(),
            silent_message: "We couldn't hear you. Try speaking a little louder.".to_string(),
            refresh_timings: TimingRefresh::Always,
            adopt_recording_as_reference: true,
        }
    }

    pub fn standard() -> Self {
        Self {
            flow: PracticeFlow::Standard,
            similarity_threshold: 0.8,
            max_recording: Duration::from_secs(10),
            step_count: 2,
            success_message: "Great job!".to_string(),
            retry_message: "Not quite. Try again.".to_string(),
            silent_message: "We couldn't hear you. Try speaking a little louder.".to_string(),
            refresh_timings: TimingRefresh::WhenMissing,
            adopt_recording_as_reference: false,
        }
    }

    pub fn for_flow(flow: PracticeFlow) -> Self {
        match flow {
            PracticeFlow::Onboarding => Self::onboarding(),
            PracticeFlow::Standard => Self::standard(),
        }
    }

    /// Flow defaults with overrides from the settings table
    pub fn from_storage(flow: PracticeFlow, storage: &Storage) -> Result<Self> {
        let mut config = Self::for_flow(flow);

        if let Some(ms) = storage.get_setting(SETTING_MAX_RECORDING_MS)? {
            let ms: u64 = ms
                .parse()
                .map_err(|_| Error::Config(format!("Invalid max recording: {ms}")))?;
            config.max_recording = Duration::from_millis(ms);
        }

        let key = match flow {
            PracticeFlow::Onboarding => SETTING_SIMILARITY_THRESHOLD_ONBOARDING,
            PracticeFlow::Standard => SETTING_SIMILARITY_THRESHOLD_STANDARD,
        };
        if let Some(value) = storage.get_setting(key)? {
            config.similarity_threshold = value
                .parse()
                .map_err(|_| Error::Config(format!("Invalid similarity threshold: {value}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::Config(format!(
                "Similarity threshold {} outside [0, 1]",
                self.similarity_threshold
            )));
        }
        if self.max_recording.is_zero() {
            return Err(Error::Config("Max recording duration is zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_thresholds() {
        assert_eq!(PracticeConfig::onboarding().similarity_threshold, 0.7);
        assert_eq!(PracticeConfig::standard().similarity_threshold, 0.8);
        assert!(PracticeConfig::onboarding().adopt_recording_as_reference);
        assert!(!PracticeConfig::standard().adopt_recording_as_reference);
        assert_eq!(PracticeConfig::standard().max_recording, Duration::from_secs(10));
    }

    #[test]
    fn test_storage_overrides() {
        let storage = Storage::in_memory().unwrap();
        storage.set_setting(SETTING_MAX_RECORDING_MS, "8000").unwrap();
        storage
            .set_setting(SETTING_SIMILARITY_THRESHOLD_STANDARD, "0.85")
            .unwrap();

        let standard = PracticeConfig::from_storage(PracticeFlow::Standard, &storage).unwrap();
        assert_eq!(standard.max_recording, Duration::from_secs(8));
        assert_eq!(standard.similarity_threshold, 0.85);

        let onboarding = PracticeConfig::from_storage(PracticeFlow::Onboarding, &storage).unwrap();
        assert_eq!(onboarding.similarity_threshold, 0.7);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let storage = Storage::in_memory().unwrap();
        storage
            .set_setting(SETTING_SIMILARITY_THRESHOLD_ONBOARDING, "1.5")
            .unwrap();
        assert!(matches!(
            PracticeConfig::from_storage(PracticeFlow::Onboarding, &storage),
            Err(Error::Config(_))
        ));
    }
}
