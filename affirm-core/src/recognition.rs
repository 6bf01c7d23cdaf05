//! Speech recognition engine: live transcripts with matched indices, silence
//! events, and offline word timing for finished recordings

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::wav_duration;
use crate::error::{Error, Result};
use crate::language::{LanguageDetector, resolve_locale};
use crate::matcher::{align_text, align_with_sources};
use crate::providers::{ForcedAligner, RecognizerEvent, SpeechRecognizer, TimedSegment};
use crate::segmenter::{TextSegmenter, script_mode};
use crate::storage::{SETTING_PREFERRED_LANGUAGE, SETTING_SILENCE_INTERVAL_MS, Storage};
use crate::types::{PermissionKind, TextUnit, WordTiming};
use crate::vad::{DEFAULT_SILENCE_INTERVAL, DEFAULT_SPEECH_THRESHOLD, SilenceDetector, VoiceActivity};

/// Recognition tuning
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Input RMS counted as speech
    pub speech_threshold: f32,
    /// Quiet time before silence is reported
    pub silence_interval: Duration,
    /// How often silence is checked when no input levels arrive
    pub poll_interval: Duration,
    /// Language assumed for Latin-script text
    pub latin_default: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            speech_threshold: DEFAULT_SPEECH_THRESHOLD,
            silence_interval: DEFAULT_SILENCE_INTERVAL,
            poll_interval: Duration::from_millis(100),
            latin_default: "en".to_string(),
        }
    }
}

impl RecognitionConfig {
    /// Defaults with overrides from the settings table
    pub fn from_storage(storage: &Storage) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = storage.get_setting(SETTING_SILENCE_INTERVAL_MS)? {
            let ms: u64 = ms
                .parse()
                .map_err(|_| Error::Config(format!("Invalid silence interval: {ms}")))?;
            config.silence_interval = Duration::from_millis(ms);
        }
        if let Some(language) = storage.get_setting(SETTING_PREFERRED_LANGUAGE)? {
            config.latin_default = language;
        }
        Ok(config)
    }
}

/// Update delivered to the practice session while recognition runs
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// New transcript and the expected units it covers
    Partial {
        text: String,
        matched: BTreeSet<usize>,
        is_final: bool,
    },
    /// Silence started (`true`) or speech resumed (`false`)
    Silence(bool),
    /// The recognizer failed
    Failed(String),
}

struct ActiveRecognition {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// Owns one live recognition task at a time
pub struct SpeechRecognitionEngine {
    recognizer: Arc<dyn SpeechRecognizer>,
    aligner: Option<Arc<dyn ForcedAligner>>,
    segmenter: TextSegmenter,
    detector: LanguageDetector,
    config: RecognitionConfig,
    active: Mutex<Option<ActiveRecognition>>,
    last_transcript: Arc<Mutex<String>>,
}

impl SpeechRecognitionEngine {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, config: RecognitionConfig) -> Self {
        let detector = LanguageDetector::new(
            config.latin_default.clone(),
            crate::language::DEFAULT_CACHE_CAPACITY,
        );
        Self {
            recognizer,
            aligner: None,
            segmenter: TextSegmenter::new(),
            detector,
            config,
            active: Mutex::new(None),
            last_transcript: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn with_aligner(mut self, aligner: Arc<dyn ForcedAligner>) -> Self {
        self.aligner = Some(aligner);
        self
    }

    pub async fn request_speech_permission(&self) -> bool {
        let granted = self.recognizer.request_permission().await;
        if !granted {
            warn!("{} permission denied", PermissionKind::SpeechRecognition);
        }
        granted
    }

    /// Recognizer locale for `text`, falling back only within the same language
    pub fn locale_for(&self, text: &str) -> Result<String> {
        let language = self.detector.detect(text);
        resolve_locale(&language, &self.recognizer.supported_locales())
            .ok_or(Error::RecognizerUnavailable { language })
    }

    /// Start a recognition task for `expected_text`.
    ///
    /// Any running task is aborted first, so two tasks never overlap. `levels`
    /// feeds microphone RMS levels into silence detection alongside whatever
    /// levels the recognizer reports itself. Must be called from within a
    /// tokio runtime.
    pub fn start_recognition(
        &self,
        expected_text: &str,
        levels: Option<broadcast::Receiver<f32>>,
    ) -> Result<UnboundedReceiver<RecognitionEvent>> {
        self.abort_recognition();
        let locale = self.locale_for(expected_text)?;

        self.last_transcript.lock().clear();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        self.recognizer.start(&locale, raw_tx)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_events(
            raw_rx,
            levels,
            tx,
            cancel.clone(),
            expected_text.to_string(),
            self.segmenter.clone(),
            self.config.clone(),
            Arc::clone(&self.last_transcript),
        ));

        *self.active.lock() = Some(ActiveRecognition { cancel, pump });
        info!(
            "Recognition started with {} ({})",
            self.recognizer.name(),
            locale
        );
        Ok(rx)
    }

    /// Stop the running task. Idempotent.
    ///
    /// Transcripts the recognizer delivered before the stop are still applied,
    /// so `last_transcript` reflects everything heard once this returns.
    pub async fn stop_recognition(&self) {
        let Some(active) = self.active.lock().take() else {
            return;
        };
        self.recognizer.stop();
        active.cancel.cancel();
        if let Err(e) = active.pump.await {
            warn!("Recognition task ended abnormally: {}", e);
        }
        info!("Recognition stopped");
    }

    /// Stop the running task without waiting for pending transcripts
    pub fn abort_recognition(&self) {
        let Some(active) = self.active.lock().take() else {
            return;
        };
        active.cancel.cancel();
        active.pump.abort();
        self.recognizer.stop();
        info!("Recognition aborted");
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Most recent non-empty transcript of the current or last task
    pub fn last_transcript(&self) -> String {
        self.last_transcript.lock().clone()
    }

    /// Per-unit timing of `expected_text` in a finished recording.
    ///
    /// Never fails: without a usable alignment the audio duration is split
    /// evenly across the units. Returns no timings when the audio cannot be read.
    pub async fn analyze_audio_file(&self, path: &Path, expected_text: &str) -> Vec<WordTiming> {
        let units = self.segmenter.segment(expected_text);
        if units.is_empty() {
            return Vec::new();
        }
        let duration = match wav_duration(path) {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Cannot read {} for timing: {}", path.display(), e);
                return Vec::new();
            }
        };

        if let Some(aligner) = &self.aligner {
            let locale = self
                .locale_for(expected_text)
                .unwrap_or_else(|_| self.detector.detect(expected_text));
            match aligner.align(path, expected_text, &locale).await {
                Ok(segments) => {
                    if let Some(timings) =
                        timings_from_segments(&self.segmenter, &units, &segments, duration)
                    {
                        debug!("{} aligned {} units", aligner.name(), timings.len());
                        return timings;
                    }
                    warn!("{} matched no units, using uniform timing", aligner.name());
                }
                Err(e) => warn!("Forced alignment failed, using uniform timing: {}", e),
            }
        }
        uniform_timings(&units, duration)
    }
}

impl Drop for SpeechRecognitionEngine {
    fn drop(&mut self) {
        self.abort_recognition();
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump_events(
    mut raw: UnboundedReceiver<RecognizerEvent>,
    mut levels: Option<broadcast::Receiver<f32>>,
    events: UnboundedSender<RecognitionEvent>,
    cancel: CancellationToken,
    expected: String,
    segmenter: TextSegmenter,
    config: RecognitionConfig,
    last_transcript: Arc<Mutex<String>>,
) {
    let mut silence = SilenceDetector::new(
        config.speech_threshold,
        config.silence_interval,
        Instant::now(),
    );
    let mut poll = tokio::time::interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let report = |change: Option<VoiceActivity>| {
        if let Some(activity) = change {
            let _ = events.send(RecognitionEvent::Silence(activity == VoiceActivity::Silence));
        }
    };
    let forward = |text: String, is_final: bool| -> bool {
        let matched = align_text(&segmenter, &expected, &text);
        let heard = !text.trim().is_empty();
        if heard {
            *last_transcript.lock() = text.clone();
        }
        debug!("Partial transcript: {:?} ({} matched)", text, matched.len());
        let _ = events.send(RecognitionEvent::Partial { text, matched, is_final });
        heard
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // transcripts already delivered still count
                while let Ok(event) = raw.try_recv() {
                    if let RecognizerEvent::Transcript { text, is_final } = event {
                        forward(text, is_final);
                    }
                }
                break;
            }
            event = raw.recv() => match event {
                Some(RecognizerEvent::Transcript { text, is_final }) => {
                    if forward(text, is_final) {
                        report(silence.mark_speech(Instant::now()));
                    }
                }
                Some(RecognizerEvent::InputLevel(level)) => {
                    report(silence.observe_level(level, Instant::now()));
                }
                Some(RecognizerEvent::Error(message)) => {
                    warn!("Recognizer error: {}", message);
                    let _ = events.send(RecognitionEvent::Failed(message));
                    break;
                }
                None => break,
            },
            level = next_level(&mut levels) => {
                report(silence.observe_level(level, Instant::now()));
            }
            _ = poll.tick() => report(silence.poll(Instant::now())),
        }
    }
}

/// Next microphone level, or pending forever once the feed is gone
async fn next_level(levels: &mut Option<broadcast::Receiver<f32>>) -> f32 {
    loop {
        let Some(rx) = levels.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(level) => return level,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Skipped {} input levels", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => *levels = None,
        }
    }
}

/// Map aligner segments onto expected units.
///
/// Segments are segmented like the expected text and matched with the same
/// fault-tolerant alignment used for live highlighting; units the aligner did
/// not cover are spread evenly over the gaps between matched ones. Returns
/// `None` when nothing matched.
pub fn timings_from_segments(
    segmenter: &TextSegmenter,
    expected: &[TextUnit],
    segments: &[TimedSegment],
    duration: f64,
) -> Option<Vec<WordTiming>> {
    let mode = script_mode(
        &expected
            .iter()
            .map(|u| u.original.as_str())
            .collect::<String>(),
    );

    // flatten segments into recognized units, splitting each segment's span
    let mut recognized: Vec<TextUnit> = Vec::new();
    let mut spans: Vec<(f64, f64, f32)> = Vec::new();
    for segment in segments {
        let units = segmenter.segment_as(&segment.text, mode);
        let n = units.len().max(1) as f64;
        let step = (segment.end - segment.start).max(0.0) / n;
        for (k, mut unit) in units.into_iter().enumerate() {
            let start = segment.start + step * k as f64;
            unit.position = recognized.len();
            recognized.push(unit);
            spans.push((start, start + step, segment.confidence));
        }
    }

    let alignment = align_with_sources(expected, &recognized);
    if alignment.sources.is_empty() {
        return None;
    }

    let mut anchors: Vec<Option<(f64, f64, f32)>> = vec![None; expected.len()];
    for (&index, &source) in &alignment.sources {
        anchors[index] = spans.get(source).copied();
    }

    let mut timings = Vec::with_capacity(expected.len());
    let mut i = 0;
    let mut previous_end = 0.0f64;
    while i < expected.len() {
        if let Some((start, end, confidence)) = anchors[i] {
            let start = start.max(previous_end);
            let end = end.max(start);
            timings.push(WordTiming::new(
                expected[i].original.clone(),
                start,
                end - start,
                confidence,
            ));
            previous_end = end;
            i += 1;
            continue;
        }

        // run of unanchored units up to the next anchor
        let run_end = (i..expected.len())
            .find(|&j| anchors[j].is_some())
            .unwrap_or(expected.len());
        let gap_end = anchors
            .get(run_end)
            .copied()
            .flatten()
            .map(|(start, _, _)| start)
            .unwrap_or(duration)
            .max(previous_end);
        let step = (gap_end - previous_end) / (run_end - i) as f64;
        for (k, unit) in expected[i..run_end].iter().enumerate() {
            timings.push(WordTiming::new(
                unit.original.clone(),
                previous_end + step * k as f64,
                step,
                0.0,
            ));
        }
        previous_end = gap_end;
        i = run_end;
    }

    Some(timings)
}

/// Split `duration` evenly across the units
pub fn uniform_timings(units: &[TextUnit], duration: f64) -> Vec<WordTiming> {
    if units.is_empty() {
        return Vec::new();
    }
    let step = duration.max(0.0) / units.len() as f64;
    units
        .iter()
        .enumerate()
        .map(|(i, unit)| WordTiming::new(unit.original.clone(), step * i as f64, step, 0.0))
        .collect()
}
