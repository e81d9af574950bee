//! Client side: the session and everything it exposes.

pub mod fs;
pub mod path;
mod session;
mod shell;

pub use fs::{DirectoryEntry, FileAttributes, RemoteFilesystem, TreeRemover};
pub use session::SessionClient;
pub use shell::{Shell, ShellRead, ShellReader, ShellWriter, DEFAULT_READ_LEN};
