//! Platform permission prompts

use async_trait::async_trait;
use cpal::traits::HostTrait;
use tracing::{debug, warn};

use crate::types::PermissionKind;

/// Platform-level permission prompts, modeled as async yes/no requests
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Suspends until the user answers or the system auto-denies
    async fn request(&self, kind: PermissionKind) -> bool;
}

/// Desktop hosts have no prompt API: access is granted when the device opens.
/// The microphone counts as granted when an input device exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopPermissions;

#[async_trait]
impl PermissionProvider for DesktopPermissions {
    async fn request(&self, kind: PermissionKind) -> bool {
        match kind {
            PermissionKind::Microphone => {
                let available = cpal::default_host().default_input_device().is_some();
                if !available {
                    warn!("No input device available, treating microphone as denied");
                }
                available
            }
            PermissionKind::SpeechRecognition => {
                debug!("Speech permission is implicit on desktop");
                true
            }
        }
    }
}
