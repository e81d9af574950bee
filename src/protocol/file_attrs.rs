use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::utils;

/// Attribute groups present in a record, as numbered by SFTP v3
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttrFlags(u32);

/// Unix file-type bits of a mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileType(u32);

bitflags! {
    impl FileAttrFlags: u32 {
        const SIZE = 0x00000001;
        const UIDGID = 0x00000002;
        const PERMISSIONS = 0x00000004;
        const ACMODTIME = 0x00000008;
        const EXTENDED = 0x80000000;
    }

    impl FileType: u32 {
        const FIFO = 0o010000;
        const CHR = 0o020000;
        const DIR = 0o040000;
        const BLK = 0o060000;
        const REG = 0o100000;
        const LNK = 0o120000;
        const SOCK = 0o140000;
    }
}

impl FileType {
    /// Mask selecting the file-type bits of a mode
    pub const MASK: u32 = 0o170000;

    /// Extracts the type bits of `mode`. Type values are not single bits,
    /// so compare the result with `==` rather than `contains`.
    #[must_use]
    pub const fn of(mode: u32) -> Self {
        Self::from_bits_retain(mode & Self::MASK)
    }
}

/// Metadata record as delivered by the file-transfer subsystem.
///
/// Every field is optional because the server decides which attributes it
/// reports; `flags` records which groups were present on the wire and
/// `extended` carries vendor pairs. Neither is meant for consumers, see
/// [`FileAttributes`](crate::client::fs::FileAttributes) for the normalized form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAttributes {
    pub flags: FileAttrFlags,
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub extended: Vec<(String, String)>,
}

impl RawAttributes {
    /// Builds a full record, setting `flags` from the supplied fields
    #[must_use]
    pub fn new(permissions: u32, size: u64, uid: u32, gid: u32, time: SystemTime) -> Self {
        let time = utils::unix(time);
        Self {
            flags: FileAttrFlags::SIZE
                | FileAttrFlags::UIDGID
                | FileAttrFlags::PERMISSIONS
                | FileAttrFlags::ACMODTIME,
            size: Some(size),
            uid: Some(uid),
            gid: Some(gid),
            permissions: Some(permissions),
            atime: Some(time),
            mtime: Some(time),
            extended: Vec::new(),
        }
    }

    /// Returns the type bits of the permissions, if reported
    #[must_use]
    pub fn file_type(&self) -> Option<FileType> {
        self.permissions.map(FileType::of)
    }

    /// Returns the last modification time
    pub fn modified(&self) -> std::io::Result<SystemTime> {
        match self.mtime {
            Some(time) => Ok(UNIX_EPOCH + Duration::from_secs(u64::from(time))),
            None => Err(std::io::ErrorKind::InvalidData.into()),
        }
    }
}
