//! Transport to the on-device restore daemon.
//!
//! Discovery, pairing and the plist-framed RPC live outside this crate;
//! the engine only needs the operations below. `receive` distinguishes a
//! benign timeout from a broken connection so the main loop can keep
//! polling.

use plist::{Dictionary, Value};
use tokio::io::{AsyncRead, AsyncWrite};

/// Service type the daemon must report before a restore is started.
pub const RESTORE_SERVICE_TYPE: &str = "com.apple.mobile.restored";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Receive timed out")]
    Timeout,

    #[error("Device not found")]
    NoDevice,

    #[error("Unexpected service type \"{0}\"")]
    WrongService(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// A single receive timeout does not break the session.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

pub trait RestoreTransport {
    /// Secondary per-request connection (baseband updater output,
    /// bootability bundle streaming).
    type DataPort: AsyncRead + AsyncWrite + Unpin + Send;

    /// (Re)discovers the device and connects to the restore daemon.
    async fn open(&mut self, udid: &str) -> Result<(), TransportError>;

    /// Reports the daemon's service type and protocol version.
    async fn query_type(&mut self) -> Result<(String, u64), TransportError>;

    async fn query_value(&mut self, key: &str) -> Result<Option<Value>, TransportError>;

    async fn get_value(&mut self, key: &str) -> Result<Option<Value>, TransportError>;

    async fn send(&mut self, msg: Dictionary) -> Result<(), TransportError>;

    async fn receive(&mut self) -> Result<Value, TransportError>;

    async fn start_restore(
        &mut self,
        options: Dictionary,
        protocol_version: u64,
    ) -> Result<(), TransportError>;

    async fn reboot(&mut self) -> Result<(), TransportError>;

    async fn open_data_port(&mut self, port: u16) -> Result<Self::DataPort, TransportError>;
}
