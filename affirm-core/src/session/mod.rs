//! Practice session controller
//!
//! One session walks an affirmation through Playback, Recording and Analyzing
//! to Success or Failure. The controller is a handle: commands go to a task
//! that exclusively owns the session state, and the UI reads that state from a
//! watch channel.
mod config;
mod runner;
mod state;

pub use config::{PracticeConfig, PracticeFlow, TimingRefresh};
pub use state::{
    FailureReason, PracticeState, SessionSnapshot, StopTrigger, Transition, TransitionTrigger,
};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audio::AudioEngine;
use crate::error::{Error, Result};
use crate::library::AudioLibrary;
use crate::recognition::SpeechRecognitionEngine;
use crate::segmenter::TextSegmenter;
use crate::similarity::SimilarityScorer;
use crate::storage::AffirmationStore;
use crate::types::{Affirmation, AffirmationId};
use runner::{Command, SessionRunner};

const TRANSITION_CAPACITY: usize = 64;

/// Notified once when an affirmation reaches its repetition target
pub trait GoalListener: Send + Sync {
    fn goal_reached(&self, affirmation: &Affirmation);
}

/// Collaborators a session drives
#[derive(Clone)]
pub struct SessionDeps {
    pub audio: Arc<dyn AudioEngine>,
    pub recognition: Arc<SpeechRecognitionEngine>,
    pub store: Arc<dyn AffirmationStore>,
    pub library: AudioLibrary,
    pub scorer: Arc<SimilarityScorer>,
    pub goal_listener: Option<Arc<dyn GoalListener>>,
}

/// Handle to one running practice session
pub struct PracticeSessionController {
    affirmation_id: AffirmationId,
    commands: UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    transitions: broadcast::Sender<Transition>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl PracticeSessionController {
    /// Load the affirmation and spawn the session task in `Idle`.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        affirmation_id: AffirmationId,
        config: PracticeConfig,
        deps: SessionDeps,
    ) -> Result<Self> {
        config.validate()?;
        let affirmation = deps.store.load(&affirmation_id)?;
        let units = TextSegmenter::new().segment(&affirmation.text);
        let initial = SessionSnapshot::new(
            units,
            affirmation.repeat_count,
            affirmation.target_count,
            config.step_count,
        );

        let (snapshot_tx, snapshot) = watch::channel(initial.clone());
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();

        info!(
            "Practice session for {} ({:?} flow, threshold {:.2})",
            affirmation_id, config.flow, config.similarity_threshold
        );
        let runner = SessionRunner::new(
            affirmation,
            config,
            deps,
            initial,
            snapshot_tx,
            transitions.clone(),
        );
        let handle = tokio::spawn(runner.run(command_rx));

        Ok(Self {
            affirmation_id,
            commands,
            snapshot,
            transitions,
            runner: Mutex::new(Some(handle)),
        })
    }

    pub fn affirmation_id(&self) -> AffirmationId {
        self.affirmation_id
    }

    /// Request permissions and play the reference recording
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn stop_recording_manually(&self) -> Result<()> {
        self.send(Command::StopRecording)
    }

    /// Record again after a failure, or start over after an error
    pub fn retry(&self) -> Result<()> {
        self.send(Command::Retry)
    }

    /// Listen to the reference recording again after a failure
    pub fn replay(&self) -> Result<()> {
        self.send(Command::Replay)
    }

    /// Count the repetition without verification
    pub fn accept_cant_speak_now(&self) -> Result<()> {
        self.send(Command::CantSpeakNow)
    }

    /// Stop playback, recording, recognition and timers, then end the task.
    /// Idempotent.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close);
        let handle = self.runner.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Practice session task failed: {}", e);
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Every state change from now on, including transient ones
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }
}

impl Drop for PracticeSessionController {
    fn drop(&mut self) {
        // the task tears down on its own once it sees this
        let _ = self.commands.send(Command::Close);
    }
}
