//! Host-side restore session engine.
//!
//! Drives the on-device restore daemon through a full firmware restore:
//! opens the session, announces the supported data and message types,
//! then answers the daemon's stream of data requests (personalized boot
//! objects, NOR flash images, co-processor firmware, re-signed baseband
//! archives, the filesystem payload) until a terminal status arrives.
//!
//! Transport, IPSW access, the ticket server, ASR streaming and component
//! personalization are collaborators behind traits; the engine owns the
//! conversation and the firmware plumbing.

pub mod asr;
pub mod baseband;
pub mod component;
pub mod context;
pub mod error;
pub mod fwup;
pub mod handlers;
pub mod ipsw;
pub mod personalize;
pub mod session;
pub mod transport;
pub mod tss;
pub mod zipedit;

pub use context::{DeviceInfo, RestoreFlags, SessionContext};
pub use error::RestoreError;
pub use session::{Session, SessionOptions};
