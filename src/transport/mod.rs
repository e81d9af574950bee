//! Capabilities the client expects from the underlying SSH implementation.
//!
//! The transport owns the network connection, the cryptographic handshake
//! and the byte framing of both the connection and the file-transfer
//! subsystem. The client never looks below these traits.

pub mod memory;
#[cfg(feature = "russh")]
pub mod russh;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::{fmt, path::PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    config::TerminalConfig,
    error::ClientResult,
    protocol::{OpenFlags, RawAttributes},
};

/// A bidirectional byte stream such as an exec or shell channel.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Establishes transports. Separate from [`Transport`] so that a session can
/// exist only once a connection succeeded.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn connect(&self, host: &str, port: u16) -> ClientResult<Self::Transport>;
}

/// A connected SSH transport. This is `async_trait`
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Channel: ByteStream + 'static;
    type Subsystem: FileSubsystem;

    /// Checks credentials. `Ok(false)` means the server rejected them.
    async fn authenticate(&mut self, credentials: &Credentials) -> ClientResult<bool>;

    /// Raw host key blob of the server
    fn host_key(&self) -> Option<Vec<u8>>;

    /// Runs `command` on a new channel; the channel reaches end-of-stream
    /// when the command finishes.
    async fn open_exec(
        &self,
        command: &str,
        terminal: &TerminalConfig,
    ) -> ClientResult<Self::Channel>;

    async fn open_shell(&self, terminal: &TerminalConfig) -> ClientResult<Self::Channel>;

    async fn open_file_subsystem(&self) -> ClientResult<Self::Subsystem>;

    async fn disconnect(&mut self) -> ClientResult<()>;
}

/// Primitives of the file-transfer subsystem. Paths are passed through
/// unchanged, resolution is done by the client.
#[async_trait]
pub trait FileSubsystem: Send + Sync {
    type File: ByteStream;
    type Dir: DirectoryStream;

    async fn realpath(&self, path: &str) -> ClientResult<String>;

    /// Follows a final symlink
    async fn stat(&self, path: &str) -> ClientResult<RawAttributes>;

    /// Does not follow a final symlink
    async fn lstat(&self, path: &str) -> ClientResult<RawAttributes>;

    async fn unlink(&self, path: &str) -> ClientResult<()>;

    async fn rename(&self, old_path: &str, new_path: &str) -> ClientResult<()>;

    async fn chmod(&self, path: &str, mode: u32) -> ClientResult<()>;

    /// Creates `link` pointing at `target`
    async fn symlink(&self, target: &str, link: &str) -> ClientResult<()>;

    async fn readlink(&self, path: &str) -> ClientResult<String>;

    async fn mkdir(&self, path: &str, mode: u32) -> ClientResult<()>;

    async fn rmdir(&self, path: &str) -> ClientResult<()>;

    async fn opendir(&self, path: &str) -> ClientResult<Self::Dir>;

    async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> ClientResult<Self::File>;
}

/// Entries of an open remote directory, including `.` and `..` if the
/// server reports them.
#[async_trait]
pub trait DirectoryStream: Send {
    async fn next_entry(&mut self) -> ClientResult<Option<String>>;
}

/// Credentials for one authentication attempt
#[derive(Clone)]
pub enum Credentials {
    Password {
        username: String,
        password: String,
    },
    /// Keypair stored in local files
    KeyFile {
        username: String,
        public_key_file: PathBuf,
        private_key_file: PathBuf,
        passphrase: Option<String>,
    },
    /// Keypair held in memory
    Key {
        username: String,
        public_key: Vec<u8>,
        private_key: Vec<u8>,
        passphrase: Option<String>,
    },
    /// Host-based authentication using the keypair of a trusted host
    HostBased {
        username: String,
        hostname: String,
        public_key_file: PathBuf,
        private_key_file: PathBuf,
        passphrase: Option<String>,
        local_username: Option<String>,
    },
}

impl Credentials {
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::Password { username, .. }
            | Self::KeyFile { username, .. }
            | Self::Key { username, .. }
            | Self::HostBased { username, .. } => username,
        }
    }

    /// Name of the authentication kind used in diagnostics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::KeyFile { .. } | Self::Key { .. } => "public key",
            Self::HostBased { .. } => "host based",
        }
    }

    /// Trusted host name for host-based credentials
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        match self {
            Self::HostBased { hostname, .. } => Some(hostname),
            _ => None,
        }
    }

    /// User on the trusted host, which defaults to the remote user
    #[must_use]
    pub fn local_username(&self) -> Option<&str> {
        match self {
            Self::HostBased {
                username,
                local_username,
                ..
            } => Some(local_username.as_deref().unwrap_or(username)),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("kind", &self.kind())
            .field("username", &self.username())
            .field("hostname", &self.hostname())
            .finish_non_exhaustive()
    }
}

/// Digest used for host key fingerprints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashAlg {
    #[default]
    Md5,
    Sha1,
    Sha256,
}

impl HashAlg {
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Md5 => Md5::digest(data).to_vec(),
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Output form of a fingerprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FingerprintEncoding {
    /// Lowercase hexadecimal string
    #[default]
    Hex,
    /// Digest bytes
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Hex(String),
    Raw(Vec<u8>),
}

impl Fingerprint {
    #[must_use]
    pub fn compute(host_key: &[u8], alg: HashAlg, encoding: FingerprintEncoding) -> Self {
        let digest = alg.digest(host_key);
        match encoding {
            FingerprintEncoding::Hex => Self::Hex(hex::encode(digest)),
            FingerprintEncoding::Raw => Self::Raw(digest),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hex(hex) => f.write_str(hex),
            Self::Raw(bytes) => f.write_str(&hex::encode(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_fingerprint() {
        let fingerprint = Fingerprint::compute(b"", HashAlg::Md5, FingerprintEncoding::Hex);
        assert_eq!(
            fingerprint,
            Fingerprint::Hex("d41d8cd98f00b204e9800998ecf8427e".to_owned())
        );
    }

    #[test]
    fn raw_fingerprint_has_digest_length() {
        let key = b"ssh-ed25519 AAAA";
        for (alg, len) in [(HashAlg::Md5, 16), (HashAlg::Sha1, 20), (HashAlg::Sha256, 32)] {
            match Fingerprint::compute(key, alg, FingerprintEncoding::Raw) {
                Fingerprint::Raw(bytes) => assert_eq!(bytes.len(), len),
                Fingerprint::Hex(_) => panic!("expected raw digest"),
            }
        }
    }

    #[test]
    fn host_based_local_user_defaults_to_remote_user() {
        let credentials = Credentials::HostBased {
            username: "deploy".to_owned(),
            hostname: "trusted.example".to_owned(),
            public_key_file: PathBuf::from("/etc/ssh/ssh_host_ed25519_key.pub"),
            private_key_file: PathBuf::from("/etc/ssh/ssh_host_ed25519_key"),
            passphrase: None,
            local_username: None,
        };
        assert_eq!(credentials.local_username(), Some("deploy"));
        assert_eq!(credentials.kind(), "host based");
        assert_eq!(credentials.hostname(), Some("trusted.example"));
    }
}
