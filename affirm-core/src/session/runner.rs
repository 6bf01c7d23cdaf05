//! Single-owner event loop behind [`PracticeSessionController`](super::PracticeSessionController)
//!
//! All session state lives in [`SessionRunner`] and is only touched by its
//! task. Audio, recognition and timers report back through one channel; every
//! event carries the phase generation it was started under, and events from
//! an earlier generation are dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{PracticeConfig, TimingRefresh};
use super::state::{
    FailureReason, PracticeState, SessionSnapshot, StopTrigger, Transition, TransitionTrigger,
};
use super::SessionDeps;
use crate::audio::{AudioEngine, PlaybackOutcome, PlaybackProgress, RecordingSummary};
use crate::error::{Error, Result};
use crate::recognition::{RecognitionEvent, SpeechRecognitionEngine};
use crate::types::{Affirmation, PermissionKind, unit_at_time};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    StopRecording,
    Retry,
    Replay,
    CantSpeakNow,
    Close,
}

#[derive(Debug)]
enum SessionEvent {
    PlaybackProgress(PlaybackProgress),
    PlaybackEnded(Result<PlaybackOutcome>),
    Recognition(RecognitionEvent),
    MaxDuration,
}

#[derive(Debug)]
struct Tagged {
    generation: u64,
    event: SessionEvent,
}

/// Recording and recognition running against the microphone together.
/// Both are stopped on release or drop, whichever comes first.
struct ActiveCapture {
    audio: Arc<dyn AudioEngine>,
    recognition: Arc<SpeechRecognitionEngine>,
    released: bool,
}

impl ActiveCapture {
    async fn open(
        audio: Arc<dyn AudioEngine>,
        recognition: Arc<SpeechRecognitionEngine>,
        path: &Path,
        expected_text: &str,
    ) -> Result<(Self, UnboundedReceiver<RecognitionEvent>)> {
        audio.start_recording(path).await?;
        let mut capture = Self {
            audio,
            recognition,
            released: false,
        };
        let levels = capture.audio.input_levels();
        match capture.recognition.start_recognition(expected_text, levels) {
            Ok(events) => Ok((capture, events)),
            Err(e) => {
                if let Err(stop) = capture.release().await {
                    warn!("Failed to stop recording: {}", stop);
                }
                Err(e)
            }
        }
    }

    /// Stop recognition, then the recorder. Recognition goes first so every
    /// transcript heard before the stop is applied.
    async fn release(&mut self) -> Result<Option<RecordingSummary>> {
        if self.released {
            return Ok(None);
        }
        self.released = true;
        self.recognition.stop_recognition().await;
        self.audio.stop_recording().await
    }
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.recognition.abort_recognition();
        let audio = Arc::clone(&self.audio);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = audio.stop_recording().await {
                        warn!("Failed to stop recording: {}", e);
                    }
                });
            }
            Err(_) => warn!("Capture dropped outside the runtime, recorder left running"),
        }
    }
}

pub(crate) struct SessionRunner {
    affirmation: Affirmation,
    config: PracticeConfig,
    deps: SessionDeps,
    snapshot: SessionSnapshot,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    transitions: broadcast::Sender<Transition>,
    generation: u64,
    events_tx: UnboundedSender<Tagged>,
    events_rx: UnboundedReceiver<Tagged>,
    capture: Option<ActiveCapture>,
    playback: Option<JoinHandle<()>>,
    /// Timers and forwarders of the current phase
    tasks: Vec<JoinHandle<()>>,
    /// Recording of the latest attempt, kept until retry, replay or close
    attempt: Option<PathBuf>,
    captured_transcript: String,
    /// Similarity crossed the threshold during this recording
    armed: bool,
    goal_notified: bool,
}

impl SessionRunner {
    pub(crate) fn new(
        affirmation: Affirmation,
        config: PracticeConfig,
        deps: SessionDeps,
        snapshot: SessionSnapshot,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        transitions: broadcast::Sender<Transition>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let goal_notified = affirmation.is_complete();
        Self {
            affirmation,
            config,
            deps,
            snapshot,
            snapshot_tx,
            transitions,
            generation: 0,
            events_tx,
            events_rx,
            capture: None,
            playback: None,
            tasks: Vec::new(),
            attempt: None,
            captured_transcript: String::new(),
            armed: false,
            goal_notified,
        }
    }

    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Close) | None => {
                        self.close().await;
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                Some(tagged) = self.events_rx.recv() => {
                    if tagged.generation != self.generation {
                        debug!("Dropping stale session event: {:?}", tagged.event);
                        continue;
                    }
                    self.handle_event(tagged.event).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        let state = self.snapshot.state.clone();
        match (command, &state) {
            (Command::Start, PracticeState::Idle | PracticeState::Error { .. }) => {
                self.begin(TransitionTrigger::Start).await
            }
            (Command::Retry, PracticeState::Error { .. }) => {
                self.begin(TransitionTrigger::Retry).await
            }
            (Command::Retry, PracticeState::Failure { .. }) => {
                self.enter_recording(TransitionTrigger::Retry).await
            }
            (Command::Replay, PracticeState::Failure { .. }) => {
                self.enter_playback(TransitionTrigger::Replay).await
            }
            (Command::StopRecording, PracticeState::Recording) => {
                self.finish_recording(StopTrigger::Manual).await
            }
            (
                Command::CantSpeakNow,
                PracticeState::Idle
                | PracticeState::Playback
                | PracticeState::Recording
                | PracticeState::Failure { .. }
                | PracticeState::Error { .. },
            ) => {
                self.release_phase().await;
                self.discard_attempt();
                self.succeed(true).await;
            }
            _ => debug!("Ignoring {:?} in {}", command, state),
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match (event, self.snapshot.state.clone()) {
            (SessionEvent::PlaybackProgress(progress), PracticeState::Playback) => {
                let current = unit_at_time(&self.affirmation.word_timings, progress.current)
                    .filter(|&i| i < self.snapshot.units.len());
                self.snapshot.current_unit = current;
                self.snapshot.highlighted = current.map(|i| (0..=i).collect()).unwrap_or_default();
                self.publish();
            }
            (SessionEvent::PlaybackEnded(Ok(PlaybackOutcome::Finished)), PracticeState::Playback) => {
                self.playback = None;
                self.enter_recording(TransitionTrigger::PlaybackFinished).await;
            }
            // only the session stops its own playback, and that bumps the generation
            (SessionEvent::PlaybackEnded(Ok(PlaybackOutcome::Stopped)), PracticeState::Playback) => {
                self.fail(Error::Audio("Playback stopped unexpectedly".to_string()))
                    .await
            }
            (SessionEvent::PlaybackEnded(Err(e)), PracticeState::Playback) => self.fail(e).await,
            (SessionEvent::Recognition(event), PracticeState::Recording) => {
                self.on_recognition(event).await
            }
            (SessionEvent::MaxDuration, PracticeState::Recording) => {
                self.finish_recording(StopTrigger::MaxDuration).await
            }
            (event, state) => debug!("Ignoring {:?} in {}", event, state),
        }
    }

    /// Ask for permissions, then play the reference recording
    async fn begin(&mut self, trigger: TransitionTrigger) {
        if !self.deps.audio.request_microphone_permission().await {
            self.fail(Error::PermissionDenied(PermissionKind::Microphone)).await;
            return;
        }
        if !self.deps.recognition.request_speech_permission().await {
            self.fail(Error::PermissionDenied(PermissionKind::SpeechRecognition))
                .await;
            return;
        }
        self.enter_playback(trigger).await;
    }

    async fn enter_playback(&mut self, trigger: TransitionTrigger) {
        self.release_phase().await;
        self.discard_attempt();
        self.reset_view();
        self.transition(PracticeState::Playback, trigger);

        let audio = Arc::clone(&self.deps.audio);
        let path = self.affirmation.audio_path.clone();
        let events = self.events_tx.clone();
        let generation = self.generation;

        self.playback = Some(tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let forward_events = events.clone();
            let forward = tokio::spawn(async move {
                while let Some(progress) = progress_rx.recv().await {
                    let event = SessionEvent::PlaybackProgress(progress);
                    if forward_events.send(Tagged { generation, event }).is_err() {
                        break;
                    }
                }
            });

            let outcome = audio.play(&path, progress_tx).await;
            // progress sender is gone once play returns
            let _ = forward.await;
            let _ = events.send(Tagged {
                generation,
                event: SessionEvent::PlaybackEnded(outcome),
            });
        }));
    }

    async fn enter_recording(&mut self, trigger: TransitionTrigger) {
        self.release_phase().await;
        self.discard_attempt();
        self.reset_view();
        self.armed = false;
        self.captured_transcript.clear();

        let path = self.deps.library.new_attempt_path();
        let opened = ActiveCapture::open(
            Arc::clone(&self.deps.audio),
            Arc::clone(&self.deps.recognition),
            &path,
            &self.affirmation.text,
        )
        .await;
        let (capture, mut recognition_events) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                if let Err(discard) = self.deps.library.discard(&path) {
                    warn!("Failed to discard {}: {}", path.display(), discard);
                }
                self.fail(e).await;
                return;
            }
        };
        self.capture = Some(capture);
        self.attempt = Some(path);

        let generation = self.generation;
        let events = self.events_tx.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = recognition_events.recv().await {
                let event = SessionEvent::Recognition(event);
                if events.send(Tagged { generation, event }).is_err() {
                    break;
                }
            }
        }));

        let events = self.events_tx.clone();
        let max_recording = self.config.max_recording;
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(max_recording).await;
            let _ = events.send(Tagged {
                generation,
                event: SessionEvent::MaxDuration,
            });
        }));

        self.transition(PracticeState::Recording, trigger);
    }

    async fn on_recognition(&mut self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Partial { text, matched, .. } => {
                // a blank partial keeps what was already heard
                if text.trim().is_empty() {
                    return;
                }
                self.captured_transcript = text.clone();
                let score = self.deps.scorer.score(&self.affirmation.text, &text);
                self.snapshot.highlighted = matched;
                self.snapshot.recognized_text = text;
                self.snapshot.live_similarity = Some(score);
                if !self.armed && score >= self.config.similarity_threshold {
                    self.armed = true;
                    info!("Similarity {:.2} reached, silence auto-stop armed", score);
                }
                self.publish();
            }
            RecognitionEvent::Silence(true) if self.armed => {
                self.finish_recording(StopTrigger::Silence).await
            }
            RecognitionEvent::Silence(silent) => {
                debug!("Silence {} while not armed", silent);
            }
            RecognitionEvent::Failed(message) => self.fail(Error::Recognition(message)).await,
        }
    }

    /// Leave `Recording` exactly once, whichever trigger got here first
    async fn finish_recording(&mut self, trigger: StopTrigger) {
        if !self.snapshot.state.is_recording() {
            return;
        }
        let capture = self.capture.take();
        self.release_phase().await;
        self.transition(PracticeState::Analyzing, TransitionTrigger::Stop(trigger));

        if let Some(mut capture) = capture {
            if let Err(e) = capture.release().await {
                self.fail(e).await;
                return;
            }
        }

        // the engine has applied every transcript delivered before the stop;
        // partials still queued for this loop were dropped with the generation
        let latest = self.deps.recognition.last_transcript();
        let transcript = if latest.trim().is_empty() {
            self.captured_transcript.clone()
        } else {
            latest
        };
        if transcript.trim().is_empty() {
            info!("No speech captured");
            self.snapshot.message = Some(self.config.silent_message.clone());
            self.transition(
                PracticeState::Failure {
                    reason: FailureReason::NoSpeech,
                },
                TransitionTrigger::Scored,
            );
            return;
        }

        let result = self.deps.scorer.evaluate(&self.affirmation.text, &transcript);
        self.snapshot.final_similarity = Some(result);
        self.snapshot.recognized_text = transcript;
        if result.score >= self.config.similarity_threshold {
            self.succeed(false).await;
        } else {
            info!(
                "Score {:.2} below threshold {:.2}",
                result.score, self.config.similarity_threshold
            );
            self.snapshot.message = Some(self.config.retry_message.clone());
            self.transition(
                PracticeState::Failure {
                    reason: FailureReason::LowSimilarity,
                },
                TransitionTrigger::Scored,
            );
        }
    }

    /// Count the repetition and finish the session
    async fn succeed(&mut self, bypassed: bool) {
        let updated = match self.deps.store.record_repetition(&self.affirmation.id) {
            Ok(updated) => updated,
            Err(e) => {
                self.fail(e).await;
                return;
            }
        };
        self.affirmation.repeat_count = updated.repeat_count;
        self.snapshot.repeat_count = updated.repeat_count;
        self.snapshot.goal_reached = updated.is_complete();

        if !bypassed {
            self.keep_passing_attempt();
        }

        if updated.is_complete() && !self.goal_notified {
            self.goal_notified = true;
            info!(
                "Goal reached for {}: {} repetitions",
                updated.id, updated.repeat_count
            );
            if let Some(listener) = &self.deps.goal_listener {
                listener.goal_reached(&updated);
            }
        }

        self.snapshot.bypassed = bypassed;
        self.snapshot.message = Some(self.config.success_message.clone());
        let trigger = if bypassed {
            TransitionTrigger::CantSpeakNow
        } else {
            TransitionTrigger::Scored
        };
        self.transition(PracticeState::Success, trigger);
    }

    /// Adopt or discard the passing recording and refresh word timings
    fn keep_passing_attempt(&mut self) {
        let Some(attempt) = self.attempt.take() else {
            return;
        };
        let id = self.affirmation.id;

        if self.config.adopt_recording_as_reference {
            let adopted = self
                .deps
                .library
                .adopt_as_reference(&attempt, &id)
                .and_then(|path| {
                    self.deps.store.replace_audio(&id, &path)?;
                    Ok(path)
                });
            match adopted {
                Ok(path) => self.affirmation.audio_path = path,
                Err(e) => {
                    warn!("Failed to adopt recording as reference: {}", e);
                    self.discard(&attempt);
                }
            }
        } else {
            self.discard(&attempt);
        }

        let refresh = match self.config.refresh_timings {
            TimingRefresh::Never => false,
            TimingRefresh::WhenMissing => self.affirmation.word_timings.is_empty(),
            TimingRefresh::Always => true,
        };
        if refresh {
            self.spawn_timing_refresh();
        }
    }

    /// Best-effort: runs detached and only writes through the store
    fn spawn_timing_refresh(&self) {
        let recognition = Arc::clone(&self.deps.recognition);
        let store = Arc::clone(&self.deps.store);
        let id = self.affirmation.id;
        let text = self.affirmation.text.clone();
        let path = self.affirmation.audio_path.clone();

        tokio::spawn(async move {
            let timings = recognition.analyze_audio_file(&path, &text).await;
            if timings.is_empty() {
                return;
            }
            match store.update_word_timings(&id, &timings) {
                Ok(()) => info!("Refreshed {} word timings for {}", timings.len(), id),
                Err(e) => warn!("Failed to save word timings: {}", e),
            }
        });
    }

    async fn fail(&mut self, e: Error) {
        error!("Practice session error: {}", e);
        self.release_phase().await;
        self.discard_attempt();
        self.snapshot.error = Some(e.to_string());
        self.snapshot.message = None;
        self.transition(
            PracticeState::Error {
                permission: e.is_permission(),
            },
            TransitionTrigger::Fault,
        );
    }

    async fn close(&mut self) {
        self.release_phase().await;
        self.discard_attempt();
        self.transition(PracticeState::Closed, TransitionTrigger::Close);
        info!("Practice session closed");
    }

    /// Stop whatever the current phase runs and invalidate its pending events
    async fn release_phase(&mut self) {
        self.generation += 1;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(playback) = self.playback.take() {
            self.deps.audio.stop_playback();
            playback.abort();
        }
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release().await {
                warn!("Failed to stop capture: {}", e);
            }
        }
    }

    fn discard_attempt(&mut self) {
        if let Some(path) = self.attempt.take() {
            self.discard(&path);
        }
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = self.deps.library.discard(path) {
            warn!("Failed to discard {}: {}", path.display(), e);
        }
    }

    fn reset_view(&mut self) {
        let view = &mut self.snapshot;
        view.highlighted.clear();
        view.current_unit = None;
        view.live_similarity = None;
        view.final_similarity = None;
        view.recognized_text.clear();
        view.message = None;
        view.error = None;
        view.bypassed = false;
    }

    fn transition(&mut self, to: PracticeState, trigger: TransitionTrigger) {
        let from = std::mem::replace(&mut self.snapshot.state, to.clone());
        self.snapshot.step = to.step(self.config.step_count);
        info!("Practice state: {} -> {} ({:?})", from, to, trigger);
        self.publish();
        let _ = self.transitions.send(Transition { from, to, trigger });
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot.clone());
    }
}
