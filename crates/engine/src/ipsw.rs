//! Firmware archive access.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum IpswError {
    #[error("No such member: {0}")]
    NotFound(String),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Regular,
    Symlink,
    Directory,
    Other,
}

/// Stat-like metadata reported while walking the archive.
#[derive(Debug, Clone, Copy)]
pub struct MemberInfo {
    pub kind: MemberKind,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u64,
}

pub trait Ipsw {
    fn file_exists(&self, path: &str) -> bool;

    fn extract_to_memory(&self, path: &str) -> Result<Vec<u8>, IpswError>;

    fn extract_to_file(&self, path: &str, out: &Path) -> Result<(), IpswError>;

    /// Walks every member, in archive order.
    fn list_contents(
        &self,
        callback: &mut dyn FnMut(&str, &MemberInfo),
    ) -> Result<(), IpswError>;
}
