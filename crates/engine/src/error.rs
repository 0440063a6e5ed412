use restore_protocol::message::StatusCode;
use restore_protocol::{fls::FlsError, ftab::FtabError, mbn::MbnError};

/// Top-level session error. Every handler failure folds into this; the
/// dispatcher records the first one and raises the quit flag unless
/// `ignore_errors` masks it.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Ticket server error: {0}")]
    Tss(#[from] crate::tss::TssError),

    #[error("IPSW error: {0}")]
    Ipsw(#[from] crate::ipsw::IpswError),

    #[error("ASR error: {0}")]
    Asr(#[from] crate::asr::AsrError),

    #[error("Personalization error: {0}")]
    Personalize(#[from] crate::personalize::PersonalizeError),

    #[error("Archive error: {0}")]
    Archive(#[from] crate::zipedit::ZipEditError),

    #[error("Baseband error: {0}")]
    Baseband(#[from] crate::baseband::BasebandError),

    #[error("MBN error: {0}")]
    Mbn(#[from] MbnError),

    #[error("FLS error: {0}")]
    Fls(#[from] FlsError),

    #[error("FTAB error: {0}")]
    Ftab(#[from] FtabError),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error("Component {0} not found in build identity")]
    MissingComponent(String),

    #[error("No {0} ticket available")]
    MissingTicket(&'static str),

    #[error("Malformed {msg_type} message: {reason}")]
    MalformedMessage {
        msg_type: &'static str,
        reason: &'static str,
    },

    #[error("Device reported status {code:?}: {}", .code.describe())]
    Status { code: StatusCode },

    #[error("Device did not come back within {0} seconds of reboot")]
    RebootTimeout(u64),
}
