//! Offline forced alignment of a finished recording against its text

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::audio::read_wav_mono;
use crate::error::{Error, Result};
use crate::segmenter::TextSegmenter;
use crate::vad::calculate_rms;

/// A recognized span of audio with its text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedSegment {
    pub text: String,
    /// Seconds from the start of the recording
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
}

/// Trait for forced-alignment providers
#[async_trait]
pub trait ForcedAligner: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Align `transcript` against the audio at `audio`, in recording order
    async fn align(&self, audio: &Path, transcript: &str, locale: &str)
    -> Result<Vec<TimedSegment>>;
}

/// Analysis frame length in seconds
const FRAME_SECS: f64 = 0.02;

/// Aligner that finds voiced regions by energy and spreads the transcript's
/// units across them in proportion to their length
#[derive(Debug, Clone)]
pub struct EnergyAligner {
    segmenter: TextSegmenter,
    /// Frame RMS treated as voiced
    pub threshold: f32,
    /// Quiet gaps shorter than this are bridged
    pub min_gap_secs: f64,
}

impl Default for EnergyAligner {
    fn default() -> Self {
        Self {
            segmenter: TextSegmenter::new(),
            threshold: 0.02,
            min_gap_secs: 0.15,
        }
    }
}

impl EnergyAligner {
    /// Voiced `(start, end)` regions in seconds
    pub fn voiced_regions(&self, samples: &[f32], sample_rate: u32) -> Vec<(f64, f64)> {
        let frame_len = ((sample_rate as f64 * FRAME_SECS) as usize).max(1);
        let mut regions: Vec<(f64, f64)> = Vec::new();

        for (i, frame) in samples.chunks(frame_len).enumerate() {
            if calculate_rms(frame) < self.threshold {
                continue;
            }
            let start = (i * frame_len) as f64 / sample_rate as f64;
            let end = (i * frame_len + frame.len()) as f64 / sample_rate as f64;
            match regions.last_mut() {
                Some(last) if start - last.1 <= self.min_gap_secs => last.1 = end,
                _ => regions.push((start, end)),
            }
        }
        regions
    }

    /// Lay units over the voiced regions as if they were one continuous span
    fn distribute(&self, transcript: &str, regions: &[(f64, f64)]) -> Vec<TimedSegment> {
        let units: Vec<_> = self
            .segmenter
            .segment(transcript)
            .into_iter()
            .filter(|u| !u.is_punctuation())
            .collect();
        let voiced: f64 = regions.iter().map(|(s, e)| e - s).sum();
        let weight: usize = units.iter().map(|u| u.normalized.chars().count()).sum();
        if units.is_empty() || voiced <= 0.0 || weight == 0 {
            return Vec::new();
        }

        // map a point on the concatenated voiced timeline back to real time
        let to_real = |offset: f64| {
            let mut remaining = offset;
            for (s, e) in regions {
                let len = e - s;
                if remaining <= len {
                    return s + remaining;
                }
                remaining -= len;
            }
            regions.last().map(|(_, e)| *e).unwrap_or(0.0)
        };

        let mut offset = 0.0;
        units
            .iter()
            .map(|unit| {
                let share = voiced * unit.normalized.chars().count() as f64 / weight as f64;
                let start = to_real(offset);
                offset += share;
                TimedSegment {
                    text: unit.original.clone(),
                    start,
                    end: to_real(offset).max(start),
                    confidence: 0.5,
                }
            })
            .collect()
    }
}

#[async_trait]
impl ForcedAligner for EnergyAligner {
    fn name(&self) -> &'static str {
        "energy"
    }

    async fn align(
        &self,
        audio: &Path,
        transcript: &str,
        _locale: &str,
    ) -> Result<Vec<TimedSegment>> {
        let (samples, sample_rate) = read_wav_mono(audio)?;
        let regions = self.voiced_regions(&samples, sample_rate);
        if regions.is_empty() {
            return Err(Error::Recognition("No speech found in recording".to_string()));
        }
        debug!("Found {} voiced regions", regions.len());
        Ok(self.distribute(transcript, &regions))
    }
}
