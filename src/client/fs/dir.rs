use serde::Serialize;

use super::FileAttributes;

/// Entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    /// Present when the listing was asked to include stats
    pub attributes: Option<FileAttributes>,
}

impl DirectoryEntry {
    /// Returns `true` if stats were included and describe a directory
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.attributes.as_ref().is_some_and(|attrs| attrs.is_dir)
    }
}

/// The self and parent entries every listing skips
pub(crate) fn is_pseudo(name: &str) -> bool {
    name == "." || name == ".."
}
