//! Integration tests for the practice session state machine
//!
//! Audio and the speech recognizer are replaced with in-memory fakes; the
//! rest of the stack (storage, audio library, scorer, recognition pump) is
//! real. Timer scenarios run on tokio's paused clock.

use affirm::audio::{
    AudioEngine, AudioRoute, PlaybackOutcome, PlaybackProgress, RecordingSummary,
    write_wav_atomic,
};
use affirm::error::{Error, Result};
use affirm::library::AudioLibrary;
use affirm::providers::{RecognizerEvent, SpeechRecognizer};
use affirm::recognition::{RecognitionConfig, SpeechRecognitionEngine};
use affirm::session::{
    FailureReason, GoalListener, PracticeConfig, PracticeSessionController, PracticeState,
    SessionDeps, StopTrigger, Transition, TransitionTrigger,
};
use affirm::similarity::SimilarityScorer;
use affirm::storage::{AffirmationStore, Storage};
use affirm::types::{Affirmation, WordTiming};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

const TEXT: &str = "I am calm and confident";

// ============ Fakes ============

struct FakeAudio {
    mic_granted: bool,
    playback: Duration,
    playback_outcome: PlaybackOutcome,
    recording: Mutex<Option<PathBuf>>,
    recorded: Mutex<Vec<PathBuf>>,
    levels: broadcast::Sender<f32>,
}

impl FakeAudio {
    fn new(mic_granted: bool, playback_outcome: PlaybackOutcome) -> Self {
        let (levels, _) = broadcast::channel(16);
        Self {
            mic_granted,
            playback: Duration::from_secs(1),
            playback_outcome,
            recording: Mutex::new(None),
            recorded: Mutex::new(Vec::new()),
            levels,
        }
    }

    /// Publish a microphone level; false when nobody listens
    fn level(&self, level: f32) -> bool {
        self.levels.send(level).is_ok()
    }

    fn is_recording(&self) -> bool {
        self.recording.lock().is_some()
    }

    fn recorded(&self) -> Vec<PathBuf> {
        self.recorded.lock().clone()
    }
}

#[async_trait]
impl AudioEngine for FakeAudio {
    async fn request_microphone_permission(&self) -> bool {
        self.mic_granted
    }

    async fn play(
        &self,
        _path: &Path,
        progress: UnboundedSender<PlaybackProgress>,
    ) -> Result<PlaybackOutcome> {
        let duration = self.playback.as_secs_f64();
        for step in 1..=4 {
            tokio::time::sleep(self.playback / 4).await;
            let _ = progress.send(PlaybackProgress {
                current: duration * step as f64 / 4.0,
                duration,
            });
        }
        Ok(self.playback_outcome)
    }

    fn stop_playback(&self) {}

    async fn start_recording(&self, path: &Path) -> Result<()> {
        let mut recording = self.recording.lock();
        if recording.is_some() {
            return Err(Error::Audio("Audio input already in use".to_string()));
        }
        *recording = Some(path.to_path_buf());
        self.recorded.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn stop_recording(&self) -> Result<Option<RecordingSummary>> {
        let Some(path) = self.recording.lock().take() else {
            return Ok(None);
        };
        let samples: Vec<f32> = (0..16000).map(|i| 0.3 * (i as f32 * 0.05).sin()).collect();
        write_wav_atomic(&path, &samples, 16000)?;
        Ok(Some(RecordingSummary {
            path,
            duration_secs: 1.0,
            sample_rate: 16000,
        }))
    }

    fn input_levels(&self) -> Option<broadcast::Receiver<f32>> {
        Some(self.levels.subscribe())
    }

    fn current_route(&self) -> AudioRoute {
        AudioRoute::Speaker
    }
}

struct FakeRecognizer {
    granted: bool,
    sender: Mutex<Option<UnboundedSender<RecognizerEvent>>>,
    starts: AtomicUsize,
}

impl FakeRecognizer {
    fn new(granted: bool) -> Self {
        Self {
            granted,
            sender: Mutex::new(None),
            starts: AtomicUsize::new(0),
        }
    }

    fn send(&self, event: RecognizerEvent) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    fn say(&self, text: &str) -> bool {
        self.send(RecognizerEvent::Transcript {
            text: text.to_string(),
            is_final: false,
        })
    }

    fn level(&self, level: f32) -> bool {
        self.send(RecognizerEvent::InputLevel(level))
    }

    fn fail(&self, message: &str) -> bool {
        self.send(RecognizerEvent::Error(message.to_string()))
    }

    fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn request_permission(&self) -> bool {
        self.granted
    }

    fn supported_locales(&self) -> Vec<String> {
        vec!["en-US".to_string(), "zh-CN".to_string()]
    }

    fn start(&self, _locale: &str, events: UnboundedSender<RecognizerEvent>) -> Result<()> {
        *self.sender.lock() = Some(events);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.sender.lock().take();
    }
}

#[derive(Default)]
struct GoalCounter {
    calls: AtomicUsize,
}

impl GoalListener for GoalCounter {
    fn goal_reached(&self, _affirmation: &Affirmation) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ============ Harness ============

struct Harness {
    controller: PracticeSessionController,
    transitions: broadcast::Receiver<Transition>,
    audio: Arc<FakeAudio>,
    recognizer: Arc<FakeRecognizer>,
    storage: Arc<Storage>,
    library: AudioLibrary,
    goals: Arc<GoalCounter>,
    affirmation: Affirmation,
    _dir: tempfile::TempDir,
}

struct Setup {
    text: &'static str,
    config: PracticeConfig,
    target_count: u32,
    mic_granted: bool,
    silence_interval: Duration,
    word_timings: Vec<WordTiming>,
    playback_outcome: PlaybackOutcome,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            text: TEXT,
            config: PracticeConfig::standard(),
            target_count: 10,
            mic_granted: true,
            silence_interval: Duration::from_millis(1500),
            word_timings: Vec::new(),
            playback_outcome: PlaybackOutcome::Finished,
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness(setup: Setup) -> Harness {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let library = AudioLibrary::new(dir.path()).unwrap();
    let storage = Arc::new(Storage::in_memory().unwrap());

    let mut affirmation = Affirmation::new(setup.text, "", setup.target_count);
    affirmation.audio_path = library.reference_path(&affirmation.id);
    affirmation.word_timings = setup.word_timings;
    write_wav_atomic(&affirmation.audio_path, &[0.0; 1600], 16000).unwrap();
    storage.save(&affirmation).unwrap();

    let audio = Arc::new(FakeAudio::new(setup.mic_granted, setup.playback_outcome));
    let recognizer = Arc::new(FakeRecognizer::new(true));
    let recognition = SpeechRecognitionEngine::new(
        recognizer.clone(),
        RecognitionConfig {
            silence_interval: setup.silence_interval,
            ..RecognitionConfig::default()
        },
    );
    let goals = Arc::new(GoalCounter::default());

    let deps = SessionDeps {
        audio: audio.clone(),
        recognition: Arc::new(recognition),
        store: storage.clone(),
        library: library.clone(),
        scorer: Arc::new(SimilarityScorer::default()),
        goal_listener: Some(goals.clone()),
    };
    let controller = PracticeSessionController::spawn(affirmation.id, setup.config, deps).unwrap();
    let transitions = controller.transitions();

    Harness {
        controller,
        transitions,
        audio,
        recognizer,
        storage,
        library,
        goals,
        affirmation,
        _dir: dir,
    }
}

async fn next(rx: &mut broadcast::Receiver<Transition>) -> Transition {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("no transition within 60s")
        .expect("transition channel closed")
}

/// Start the session and wait until it is recording
async fn start_recording(h: &mut Harness) {
    h.controller.start().unwrap();
    assert_eq!(next(&mut h.transitions).await.to, PracticeState::Playback);
    let recording = next(&mut h.transitions).await;
    assert_eq!(recording.to, PracticeState::Recording);
    assert!(h.audio.is_recording());
    assert!(h.recognizer.is_running());
}

/// Feed a transcript and wait until the session has scored it
async fn say(h: &Harness, text: &str) {
    let mut snapshots = h.controller.subscribe();
    assert!(h.recognizer.say(text));
    tokio::time::timeout(
        Duration::from_secs(5),
        snapshots.wait_for(|s| s.recognized_text == text),
    )
    .await
    .expect("transcript not delivered")
    .unwrap();
}

fn repeat_count(h: &Harness) -> u32 {
    h.storage.load(&h.affirmation.id).unwrap().repeat_count
}

// ============ Timers ============

#[tokio::test(start_paused = true)]
async fn test_max_duration_without_speech_fails_as_silent() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;
    let entered = Instant::now();

    let analyzing = next(&mut h.transitions).await;
    assert_eq!(
        analyzing,
        Transition {
            from: PracticeState::Recording,
            to: PracticeState::Analyzing,
            trigger: TransitionTrigger::Stop(StopTrigger::MaxDuration),
        }
    );
    let elapsed = entered.elapsed();
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_millis(10_100));

    let failure = next(&mut h.transitions).await;
    assert_eq!(
        failure.to,
        PracticeState::Failure {
            reason: FailureReason::NoSpeech
        }
    );

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.message, Some(PracticeConfig::standard().silent_message));
    assert!(snapshot.final_similarity.is_none());
    assert!(!h.audio.is_recording());
    assert!(!h.recognizer.is_running());
    assert_eq!(repeat_count(&h), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silence_and_timer_firing_together_leave_recording_once() {
    let mut config = PracticeConfig::standard();
    config.max_recording = Duration::from_secs(2);
    let mut h = harness(Setup {
        config,
        silence_interval: Duration::from_secs(2),
        ..Setup::default()
    });
    start_recording(&mut h).await;
    say(&h, TEXT).await;

    let mut seen = Vec::new();
    loop {
        let transition = next(&mut h.transitions).await;
        let done = transition.to == PracticeState::Success;
        seen.push(transition);
        if done {
            break;
        }
    }

    let exits: Vec<_> = seen
        .iter()
        .filter(|t| t.from == PracticeState::Recording)
        .collect();
    assert_eq!(exits.len(), 1);
    assert!(matches!(
        exits[0].trigger,
        TransitionTrigger::Stop(StopTrigger::Silence | StopTrigger::MaxDuration)
    ));

    // the losing trigger must not produce anything later
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(matches!(h.transitions.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(repeat_count(&h), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silence_after_good_match_stops_early() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;
    let entered = Instant::now();
    say(&h, TEXT).await;

    let analyzing = next(&mut h.transitions).await;
    assert_eq!(
        analyzing.trigger,
        TransitionTrigger::Stop(StopTrigger::Silence)
    );
    assert!(entered.elapsed() < Duration::from_secs(2));
    assert_eq!(next(&mut h.transitions).await.to, PracticeState::Success);

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.highlighted.len(), 5);
    assert!(snapshot.final_similarity.unwrap().score >= 0.95);
    assert_eq!(snapshot.repeat_count, 1);
    assert!(!snapshot.bypassed);
}

#[tokio::test(start_paused = true)]
async fn test_silence_before_good_match_does_not_stop() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;
    say(&h, "the weather").await;

    let analyzing = next(&mut h.transitions).await;
    assert_eq!(
        analyzing.trigger,
        TransitionTrigger::Stop(StopTrigger::MaxDuration)
    );
    let failure = next(&mut h.transitions).await;
    assert_eq!(
        failure.to,
        PracticeState::Failure {
            reason: FailureReason::LowSimilarity
        }
    );
    assert_eq!(
        h.controller.snapshot().message,
        Some(PracticeConfig::standard().retry_message)
    );
}

#[tokio::test(start_paused = true)]
async fn test_input_levels_keep_speech_alive_until_they_stop() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;
    let spoke = Instant::now();
    say(&h, TEXT).await;

    // recognizer levels first, then microphone levels; each gap is under
    // the 1.5s silence interval
    for _ in 0..3 {
        assert!(h.recognizer.level(0.5));
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    for _ in 0..3 {
        assert!(h.audio.level(0.5));
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    assert!(matches!(h.transitions.try_recv(), Err(TryRecvError::Empty)));

    let analyzing = next(&mut h.transitions).await;
    assert_eq!(
        analyzing.trigger,
        TransitionTrigger::Stop(StopTrigger::Silence)
    );
    assert!(spoke.elapsed() >= Duration::from_millis(3900));
    assert_eq!(next(&mut h.transitions).await.to, PracticeState::Success);
}

// ============ Commands ============

#[tokio::test(start_paused = true)]
async fn test_manual_stop_passes_and_reaches_goal() {
    let mut h = harness(Setup {
        target_count: 1,
        ..Setup::default()
    });
    start_recording(&mut h).await;
    say(&h, TEXT).await;
    h.controller.stop_recording_manually().unwrap();

    let analyzing = next(&mut h.transitions).await;
    assert_eq!(analyzing.trigger, TransitionTrigger::Stop(StopTrigger::Manual));
    assert_eq!(next(&mut h.transitions).await.to, PracticeState::Success);

    let snapshot = h.controller.snapshot();
    assert!(snapshot.goal_reached);
    assert_eq!(h.goals.calls.load(Ordering::SeqCst), 1);
    assert_eq!(repeat_count(&h), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_uses_fresh_attempt_file() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;
    say(&h, "something else entirely").await;
    h.controller.stop_recording_manually().unwrap();
    next(&mut h.transitions).await;
    assert!(matches!(
        next(&mut h.transitions).await.to,
        PracticeState::Failure { .. }
    ));

    h.controller.retry().unwrap();
    let retry = next(&mut h.transitions).await;
    assert_eq!(retry.to, PracticeState::Recording);
    assert_eq!(retry.trigger, TransitionTrigger::Retry);

    let recorded = h.audio.recorded();
    assert_eq!(recorded.len(), 2);
    assert_ne!(recorded[0], recorded[1]);
    assert!(!recorded[0].exists());
    assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
    assert!(h.controller.snapshot().highlighted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_replay_after_failure_keeps_counters() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;
    h.controller.stop_recording_manually().unwrap();
    next(&mut h.transitions).await;
    next(&mut h.transitions).await;

    h.controller.replay().unwrap();
    let replay = next(&mut h.transitions).await;
    assert_eq!(replay.to, PracticeState::Playback);
    assert_eq!(replay.trigger, TransitionTrigger::Replay);
    assert_eq!(next(&mut h.transitions).await.to, PracticeState::Recording);
    assert_eq!(repeat_count(&h), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cant_speak_now_during_recording() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;

    h.controller.accept_cant_speak_now().unwrap();
    let success = next(&mut h.transitions).await;
    assert_eq!(success.from, PracticeState::Recording);
    assert_eq!(success.to, PracticeState::Success);
    assert_eq!(success.trigger, TransitionTrigger::CantSpeakNow);

    assert!(!h.audio.is_recording());
    assert!(!h.recognizer.is_running());
    assert!(h.controller.snapshot().bypassed);
    assert_eq!(repeat_count(&h), 1);

    // the bypassed attempt is not kept
    assert!(!h.audio.recorded()[0].exists());
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_is_terminal_error() {
    let mut h = harness(Setup {
        mic_granted: false,
        ..Setup::default()
    });
    h.controller.start().unwrap();

    let error = next(&mut h.transitions).await;
    assert_eq!(error.from, PracticeState::Idle);
    assert_eq!(error.to, PracticeState::Error { permission: true });
    assert_eq!(error.trigger, TransitionTrigger::Fault);
    assert!(h.controller.snapshot().error.unwrap().contains("microphone"));
    assert!(h.audio.recorded().is_empty());

    // no automatic transition; retry asks again
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(matches!(h.transitions.try_recv(), Err(TryRecvError::Empty)));
    h.controller.retry().unwrap();
    assert_eq!(
        next(&mut h.transitions).await.to,
        PracticeState::Error { permission: true }
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_releases_everything() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;

    h.controller.close().await;
    assert!(!h.audio.is_recording());
    assert!(!h.recognizer.is_running());

    let closed = next(&mut h.transitions).await;
    assert_eq!(closed.from, PracticeState::Recording);
    assert_eq!(closed.to, PracticeState::Closed);

    // pending timer never fires after teardown
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!matches!(h.transitions.try_recv(), Ok(_)));
    assert!(matches!(h.controller.start(), Err(Error::SessionClosed)));
    assert!(!h.audio.recorded()[0].exists());
}

#[tokio::test(start_paused = true)]
async fn test_manual_stop_scores_transcript_delivered_just_before() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;
    say(&h, "I am").await;

    // no yield between the last transcript and the stop
    assert!(h.recognizer.say(TEXT));
    h.controller.stop_recording_manually().unwrap();

    let analyzing = next(&mut h.transitions).await;
    assert_eq!(analyzing.trigger, TransitionTrigger::Stop(StopTrigger::Manual));
    assert_eq!(next(&mut h.transitions).await.to, PracticeState::Success);

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.recognized_text, TEXT);
    assert!(snapshot.final_similarity.unwrap().score >= 0.95);
    assert_eq!(repeat_count(&h), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blank_partial_keeps_highlighting() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;
    say(&h, "I am").await;
    let before = h.controller.snapshot();
    assert_eq!(before.highlighted, [0, 1].into_iter().collect());

    assert!(h.recognizer.say("   "));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after = h.controller.snapshot();
    assert_eq!(after.state, PracticeState::Recording);
    assert_eq!(after.highlighted, before.highlighted);
    assert_eq!(after.recognized_text, "I am");
    assert_eq!(after.live_similarity, before.live_similarity);
}

// ============ Failures ============

#[tokio::test(start_paused = true)]
async fn test_recognizer_error_while_recording_releases_capture() {
    let mut h = harness(Setup::default());
    start_recording(&mut h).await;
    say(&h, "I am").await;

    assert!(h.recognizer.fail("network lost"));
    let error = next(&mut h.transitions).await;
    assert_eq!(error.from, PracticeState::Recording);
    assert_eq!(error.to, PracticeState::Error { permission: false });
    assert_eq!(error.trigger, TransitionTrigger::Fault);

    assert!(!h.audio.is_recording());
    assert!(!h.recognizer.is_running());
    assert!(!h.audio.recorded()[0].exists());
    assert!(h.controller.snapshot().error.unwrap().contains("network lost"));
    assert_eq!(repeat_count(&h), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_language_is_an_error_state() {
    let mut h = harness(Setup {
        text: "나는 충분하다",
        ..Setup::default()
    });
    h.controller.start().unwrap();
    assert_eq!(next(&mut h.transitions).await.to, PracticeState::Playback);

    let error = next(&mut h.transitions).await;
    assert_eq!(error.from, PracticeState::Playback);
    assert_eq!(error.to, PracticeState::Error { permission: false });
    assert!(h.controller.snapshot().error.unwrap().contains("'ko'"));

    assert!(!h.audio.is_recording());
    assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 0);
    let recorded = h.audio.recorded();
    assert_eq!(recorded.len(), 1);
    assert!(!recorded[0].exists());
}

#[tokio::test(start_paused = true)]
async fn test_playback_stopped_by_the_system_is_an_error() {
    let mut h = harness(Setup {
        playback_outcome: PlaybackOutcome::Stopped,
        ..Setup::default()
    });
    h.controller.start().unwrap();
    assert_eq!(next(&mut h.transitions).await.to, PracticeState::Playback);

    let error = next(&mut h.transitions).await;
    assert_eq!(error.from, PracticeState::Playback);
    assert_eq!(error.to, PracticeState::Error { permission: false });
    assert!(h.audio.recorded().is_empty());

    // nothing else happens until the user acts
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(matches!(h.transitions.try_recv(), Err(TryRecvError::Empty)));
}

// ============ Playback ============

#[tokio::test(start_paused = true)]
async fn test_playback_progress_highlights_current_unit() {
    let timings = ["I", "am", "calm", "and", "confident"]
        .iter()
        .enumerate()
        .map(|(i, word)| WordTiming::new(*word, i as f64 * 0.2, 0.2, 0.9))
        .collect();
    let h = harness(Setup {
        word_timings: timings,
        ..Setup::default()
    });
    let mut snapshots = h.controller.subscribe();
    h.controller.start().unwrap();

    let mut seen = Vec::new();
    loop {
        snapshots.changed().await.unwrap();
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.state == PracticeState::Recording {
            break;
        }
        if let Some(current) = snapshot.current_unit {
            assert_eq!(snapshot.highlighted, (0..=current).collect());
            seen.push(current);
        }
    }
    // the last update may coalesce with the switch to recording
    assert!(seen.starts_with(&[1, 2, 3]), "{seen:?}");
}

// ============ Onboarding ============

#[tokio::test(start_paused = true)]
async fn test_onboarding_adopts_recording_and_refreshes_timings() {
    let mut h = harness(Setup {
        config: PracticeConfig::onboarding(),
        ..Setup::default()
    });
    start_recording(&mut h).await;
    say(&h, "I am calm and confident").await;
    h.controller.stop_recording_manually().unwrap();
    next(&mut h.transitions).await;
    assert_eq!(next(&mut h.transitions).await.to, PracticeState::Success);

    let reference = h.library.reference_path(&h.affirmation.id);
    assert!(reference.exists());
    assert!(!h.audio.recorded()[0].exists());

    // timing refresh runs in the background
    let mut timings = Vec::new();
    for _ in 0..100 {
        timings = h.storage.load(&h.affirmation.id).unwrap().word_timings;
        if !timings.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(timings.len(), 5);
    assert!((timings[4].end() - 1.0).abs() < 1e-6);
}
