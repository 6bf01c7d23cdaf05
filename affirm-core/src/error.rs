//! Error types for Affirm

use thiserror::Error;

use crate::types::PermissionKind;

/// Result type alias using Affirm's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in the practice core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Permission denied: {0}")]
    PermissionDenied(PermissionKind),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Speech recognition failed: {0}")]
    Recognition(String),

    #[error("No speech recognizer available for language '{language}'")]
    RecognizerUnavailable { language: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Practice session is closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the user has to grant something outside the app to recover
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}
