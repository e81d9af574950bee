use serde::{Deserialize, Serialize};

/// Open flags, as numbered by SFTP v3
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags(u32);

bitflags! {
    impl OpenFlags: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const APPEND = 0x0000_0004;
        const CREATE = 0x0000_0008;
        const TRUNCATE = 0x0000_0010;
        const EXCLUDE = 0x0000_0020;
    }
}

impl OpenFlags {
    /// Read and write, creating the file or truncating an existing one
    pub const CREATE_OR_TRUNCATE: Self = Self::READ
        .union(Self::WRITE)
        .union(Self::CREATE)
        .union(Self::TRUNCATE);

    /// Returns `true` if the flags allow writing
    #[must_use]
    pub const fn is_write(self) -> bool {
        self.intersects(Self::WRITE.union(Self::APPEND))
    }
}
