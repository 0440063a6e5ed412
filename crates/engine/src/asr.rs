//! ASR image-restore collaborator.
//!
//! ASR validates the filesystem payload (requesting chunk samples from
//! arbitrary offsets) and then streams the whole image to the device. The
//! engine only decides *when* and hands over a path plus a progress hook.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Validation failed: {0}")]
    Validate(String),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait Asr {
    /// Connects (with its own timeout), validates, then streams the full
    /// payload. `progress` receives percentages in `0.0..=100.0`.
    async fn send_payload(
        &mut self,
        filesystem: &Path,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<(), AsrError>;
}
