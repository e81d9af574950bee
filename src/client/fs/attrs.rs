use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    protocol::{FileType, RawAttributes},
    utils,
};

/// Canonical metadata of a remote entry.
///
/// Built fresh from every stat or listing, never cached. `is_dir` and
/// `is_link` are derived from the type bits of `mode`; fields the server
/// did not report are zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttributes {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub mtime: u32,
    pub atime: u32,
    pub uid: u32,
    pub gid: u32,
    pub is_dir: bool,
    pub is_link: bool,
}

impl FileAttributes {
    /// Normalizes a raw subsystem record for the entry at `path`. The
    /// attribute flags and extended pairs are dropped.
    #[must_use]
    pub fn normalize(path: &str, raw: &RawAttributes) -> Self {
        let mode = raw.permissions.unwrap_or(0);
        let file_type = FileType::of(mode);
        let (_, name) = utils::split(path);

        Self {
            name: name.to_owned(),
            path: path.to_owned(),
            size: raw.size.unwrap_or(0),
            mode,
            mtime: raw.mtime.unwrap_or(0),
            atime: raw.atime.unwrap_or(0),
            uid: raw.uid.unwrap_or(0),
            gid: raw.gid.unwrap_or(0),
            is_dir: file_type == FileType::DIR,
            is_link: file_type == FileType::LNK,
        }
    }

    #[must_use]
    pub const fn file_type(&self) -> FileType {
        FileType::of(self.mode)
    }

    /// Permission bits without the type
    #[must_use]
    pub const fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.file_type() == FileType::REG
    }

    #[must_use]
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.mtime), 0)
    }

    #[must_use]
    pub fn accessed(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.atime), 0)
    }
}
