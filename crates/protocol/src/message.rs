//! Messages received from the on-device restore daemon.

use plist::{Dictionary, Value};

use crate::value::DictExt;

/// Inbound message discriminator, the `MsgType` entry of every envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgType {
    DataRequestMsg,
    ProgressMsg,
    StatusMsg,
    CheckpointMsg,
    PreviousRestoreLogMsg,
    BbUpdateStatusMsg,
    BasebandUpdaterOutputData,
    Unknown(String),
}

impl From<&str> for MsgType {
    fn from(s: &str) -> Self {
        match s {
            "DataRequestMsg" => Self::DataRequestMsg,
            "ProgressMsg" => Self::ProgressMsg,
            "StatusMsg" => Self::StatusMsg,
            "CheckpointMsg" => Self::CheckpointMsg,
            "PreviousRestoreLogMsg" => Self::PreviousRestoreLogMsg,
            "BBUpdateStatusMsg" => Self::BbUpdateStatusMsg,
            "BasebandUpdaterOutputData" => Self::BasebandUpdaterOutputData,
            other => Self::Unknown(other.into()),
        }
    }
}

/// One received envelope: the discriminator plus the raw arguments dict.
#[derive(Debug, Clone)]
pub struct Message {
    pub msg_type: MsgType,
    pub body: Dictionary,
}

impl Message {
    /// Splits a received property list into discriminator and body.
    ///
    /// Returns `None` when the value is not a dictionary or carries no
    /// `MsgType` string; the caller logs and skips those.
    pub fn from_value(value: Value) -> Option<Self> {
        let body = match value {
            Value::Dictionary(dict) => dict,
            _ => return None,
        };
        let msg_type = MsgType::from(body.str_item("MsgType")?);

        Some(Self { msg_type, body })
    }

    /// The secondary connection port some messages carry.
    pub fn data_port(&self) -> Option<u16> {
        self.body.uint_item("DataPort").map(|p| p as u16)
    }
}

/// Terminal / error codes carried by `StatusMsg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Finished,
    DiskFailure,
    Fail,
    MountFailed,
    SepLoadFailed,
    FdrRecoverFailed,
    BasebandFailed,
    VerificationError,
    Unknown(u64),
}

impl From<u64> for StatusCode {
    fn from(code: u64) -> Self {
        match code {
            0 => Self::Finished,
            6 => Self::DiskFailure,
            14 => Self::Fail,
            27 => Self::MountFailed,
            51 => Self::SepLoadFailed,
            53 => Self::FdrRecoverFailed,
            1015 => Self::BasebandFailed,
            u64::MAX => Self::VerificationError,
            other => Self::Unknown(other),
        }
    }
}

impl StatusCode {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Finished => "restore finished",
            Self::DiskFailure => "disk failure",
            Self::Fail => "restore failed",
            Self::MountFailed => "failed to mount filesystems",
            Self::SepLoadFailed => "failed to load SEP firmware",
            Self::FdrRecoverFailed => "FDR failed to recover",
            Self::BasebandFailed => "baseband update failed",
            Self::VerificationError => "failed to verify restore",
            Self::Unknown(_) => "unknown status",
        }
    }
}

/// Operation codes reported by `ProgressMsg`.
///
/// Only the operations the host reacts to are named; everything else is
/// logged by number.
pub mod operation {
    pub const CREATE_PARTITION_MAP: u64 = 11;
    pub const CREATE_FILESYSTEM: u64 = 12;
    pub const RESTORE_IMAGE: u64 = 13;
    pub const VERIFY_RESTORE: u64 = 14;
    pub const CHECK_FILESYSTEMS: u64 = 15;
    pub const MOUNT_FILESYSTEMS: u64 = 16;
    pub const FLASH_FIRMWARE: u64 = 18;
    pub const UPDATE_BASEBAND: u64 = 19;
    pub const SET_BOOT_STAGE: u64 = 20;
    pub const REBOOT_DEVICE: u64 = 21;
    pub const REQUESTING_FUD_DATA: u64 = 44;
    pub const UPDATE_IR_MCU_FIRMWARE: u64 = 55;
}

/// Host-side progress buckets the daemon operations collapse into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressBucket {
    VerifyFs,
    FlashFirmware,
    FlashBaseband,
    Fud,
}

/// Compensates for the operation-code renumbering that happened at
/// protocol version 14: older daemons report codes above 35 one short.
pub fn adjust_operation(code: u64, protocol_version: u64) -> u64 {
    if protocol_version < 14 && code > 35 {
        code + 1
    } else {
        code
    }
}

pub fn progress_bucket(op: u64) -> Option<ProgressBucket> {
    match op {
        operation::VERIFY_RESTORE => Some(ProgressBucket::VerifyFs),
        operation::FLASH_FIRMWARE => Some(ProgressBucket::FlashFirmware),
        operation::UPDATE_BASEBAND | operation::UPDATE_IR_MCU_FIRMWARE => {
            Some(ProgressBucket::FlashBaseband)
        }
        operation::REQUESTING_FUD_DATA => Some(ProgressBucket::Fud),
        _ => None,
    }
}

pub fn operation_name(op: u64) -> Option<&'static str> {
    let name = match op {
        operation::CREATE_PARTITION_MAP => "CREATE_PARTITION_MAP",
        operation::CREATE_FILESYSTEM => "CREATE_FILESYSTEM",
        operation::RESTORE_IMAGE => "RESTORE_IMAGE",
        operation::VERIFY_RESTORE => "VERIFY_RESTORE",
        operation::CHECK_FILESYSTEMS => "CHECK_FILESYSTEMS",
        operation::MOUNT_FILESYSTEMS => "MOUNT_FILESYSTEMS",
        operation::FLASH_FIRMWARE => "FLASH_FIRMWARE",
        operation::UPDATE_BASEBAND => "UPDATE_BASEBAND",
        operation::SET_BOOT_STAGE => "SET_BOOT_STAGE",
        operation::REBOOT_DEVICE => "REBOOT_DEVICE",
        operation::REQUESTING_FUD_DATA => "REQUESTING_FUD_DATA",
        operation::UPDATE_IR_MCU_FIRMWARE => "UPDATE_IR_MCU_FIRMWARE",
        _ => return None,
    };

    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{string, uint};

    #[test]
    fn envelope_split() {
        let mut dict = Dictionary::new();
        dict.insert("MsgType".into(), string("StatusMsg"));
        dict.insert("Status".into(), uint(0));

        let msg = Message::from_value(Value::Dictionary(dict)).unwrap();
        assert_eq!(msg.msg_type, MsgType::StatusMsg);
        assert_eq!(msg.body.uint_item("Status"), Some(0));
    }

    #[test]
    fn envelope_requires_msg_type() {
        let dict = Dictionary::new();
        assert!(Message::from_value(Value::Dictionary(dict)).is_none());
        assert!(Message::from_value(Value::Boolean(true)).is_none());
    }

    #[test]
    fn status_codes() {
        assert_eq!(StatusCode::from(0), StatusCode::Finished);
        assert_eq!(StatusCode::from(1015), StatusCode::BasebandFailed);
        assert_eq!(StatusCode::from(u64::MAX), StatusCode::VerificationError);
        assert_eq!(StatusCode::from(99), StatusCode::Unknown(99));
    }

    #[test]
    fn operation_renumbering() {
        // Pre-14 daemons report codes above 35 one short
        assert_eq!(adjust_operation(36, 13), 37);
        assert_eq!(adjust_operation(55, 13), 56);
        assert_eq!(adjust_operation(36, 14), 36);
        // Codes at or below 35 never shift
        assert_eq!(adjust_operation(35, 13), 35);
        assert_eq!(adjust_operation(14, 13), 14);
    }

    #[test]
    fn buckets() {
        assert_eq!(
            progress_bucket(operation::VERIFY_RESTORE),
            Some(ProgressBucket::VerifyFs)
        );
        assert_eq!(
            progress_bucket(operation::UPDATE_BASEBAND),
            Some(ProgressBucket::FlashBaseband)
        );
        assert_eq!(
            progress_bucket(operation::UPDATE_IR_MCU_FIRMWARE),
            Some(ProgressBucket::FlashBaseband)
        );
        assert_eq!(progress_bucket(operation::SET_BOOT_STAGE), None);
    }
}
