//! On-disk store for reference recordings and practice attempts

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::AffirmationId;

const ATTEMPTS_DIR: &str = "attempts";

/// Recording files rooted at one directory.
///
/// Reference recordings have a stable path per affirmation; every practice
/// attempt gets a fresh path so a discarded attempt never races a retry.
#[derive(Debug, Clone)]
pub struct AudioLibrary {
    root: PathBuf,
}

impl AudioLibrary {
    /// Open a library at `root`, creating directories as needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(ATTEMPTS_DIR))?;
        Ok(Self { root })
    }

    /// Library under the platform's local data directory
    pub fn open_default() -> Result<Self> {
        let root = dirs::data_local_dir()
            .map(|dir| dir.join("Affirm").join("recordings"))
            .ok_or_else(|| Error::Config("No local data directory".to_string()))?;
        info!("Audio library at {}", root.display());
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stable location of an affirmation's reference recording
    pub fn reference_path(&self, id: &AffirmationId) -> PathBuf {
        self.root.join(format!("{id}.wav"))
    }

    /// Unique location for a new practice attempt
    pub fn new_attempt_path(&self) -> PathBuf {
        self.root
            .join(ATTEMPTS_DIR)
            .join(format!("{}.wav", Uuid::new_v4()))
    }

    /// Delete a recording. Missing files are not an error.
    pub fn discard(&self, path: &Path) -> Result<()> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");
        for target in [path, Path::new(&partial)] {
            match fs::remove_file(target) {
                Ok(()) => debug!("Discarded {}", target.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Move an accepted attempt into the affirmation's reference slot
    pub fn adopt_as_reference(&self, attempt: &Path, id: &AffirmationId) -> Result<PathBuf> {
        let reference = self.reference_path(id);
        fs::rename(attempt, &reference)?;
        info!("Adopted {} as reference for {}", attempt.display(), id);
        Ok(reference)
    }
}
