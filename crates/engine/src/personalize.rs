//! Component personalization collaborator.

use plist::Dictionary;

#[derive(Debug, thiserror::Error)]
pub enum PersonalizeError {
    #[error("No ticket blob for component {0}")]
    MissingBlob(String),

    #[error("Container error: {0}")]
    Container(String),
}

pub trait Personalize {
    /// Wraps a payload and its ticket into the container the device
    /// accepts (IMG4 on image4 devices, the legacy container otherwise).
    fn personalize_component(
        &self,
        component: &str,
        data: &[u8],
        ticket: &Dictionary,
    ) -> Result<Vec<u8>, PersonalizeError>;
}
