//! Live speech recognizer trait and event types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;

/// Update from a running recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecognizerEvent {
    /// Best transcript so far; replaces any previous one
    Transcript { text: String, is_final: bool },
    /// RMS level of the latest input buffer, 0.0 - 1.0
    InputLevel(f32),
    /// The recognition task failed and will produce no further events
    Error(String),
}

/// Trait for live speech-to-text providers
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Ask for speech recognition permission
    async fn request_permission(&self) -> bool;

    /// Locales a recognizer can be created for on this device
    fn supported_locales(&self) -> Vec<String>;

    /// Start streaming recognition for `locale`, sending updates to `events`
    /// until stopped
    fn start(&self, locale: &str, events: UnboundedSender<RecognizerEvent>) -> Result<()>;

    /// Stop the current task. Idempotent.
    fn stop(&self);
}
