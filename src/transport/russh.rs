//! Transport backed by [`russh`] with the [`russh_sftp`] subsystem client.
//!
//! Enabled by the `russh` cargo feature. Server keys are accepted as
//! presented and recorded for [`Transport::host_key`]; verifying them
//! against a known-hosts list is left to the caller, e.g. by comparing
//! fingerprints.

use russh::{
    client::{self, Handle, Msg},
    Disconnect,
};
use russh_keys::{key, PublicKeyBase64};
use russh_sftp::client::{error::Error as SftpError, fs::ReadDir, SftpSession};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

use super::{ByteStream, Connector, Credentials, DirectoryStream, FileSubsystem, Transport};
use crate::{
    config::TerminalConfig,
    error::{ClientResult, Error},
    protocol::{FileAttrFlags, OpenFlags, RawAttributes, Status, StatusCode},
};

type HostKeySlot = Arc<Mutex<Option<Vec<u8>>>>;

struct ClientHandler {
    host_key: HostKeySlot,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        self,
        server_public_key: &key::PublicKey,
    ) -> Result<(Self, bool), Self::Error> {
        debug!("server key {}", server_public_key.fingerprint());
        *self.host_key.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(server_public_key.public_key_bytes());
        Ok((self, true))
    }
}

fn channel_error(err: russh::Error) -> Error {
    Error::Channel(err.to_string())
}

fn sftp_error(err: SftpError) -> Error {
    match err {
        SftpError::Status(status) => Error::Status(Status::new(
            StatusCode::from(status.status_code as u32),
            status.error_message,
        )),
        err => Error::IO(err.to_string()),
    }
}

/// Connects with a shared [`client::Config`]
#[derive(Clone, Default)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl RusshConnector {
    #[must_use]
    pub fn new(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Connector for RusshConnector {
    type Transport = RusshTransport;

    async fn connect(&self, host: &str, port: u16) -> ClientResult<Self::Transport> {
        let host_key = HostKeySlot::default();
        let handler = ClientHandler {
            host_key: host_key.clone(),
        };

        let handle = client::connect(self.config.clone(), (host, port), handler)
            .await
            .map_err(|err| Error::Connection {
                address: format!("{host}:{port}"),
                reason: err.to_string(),
            })?;

        Ok(RusshTransport {
            handle,
            host_key,
            sftp: OnceCell::new(),
        })
    }
}

/// Live russh connection
pub struct RusshTransport {
    handle: Handle<ClientHandler>,
    host_key: HostKeySlot,
    sftp: OnceCell<Arc<SftpSession>>,
}

impl RusshTransport {
    async fn session_channel(&self, terminal: &TerminalConfig) -> ClientResult<russh::Channel<Msg>> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(channel_error)?;

        channel
            .request_pty(
                false,
                &terminal.term,
                terminal.width,
                terminal.height,
                0,
                0,
                &[],
            )
            .await
            .map_err(channel_error)?;

        for (name, value) in &terminal.env {
            channel
                .set_env(false, name.as_str(), value.as_str())
                .await
                .map_err(channel_error)?;
        }

        Ok(channel)
    }
}

#[async_trait]
impl Transport for RusshTransport {
    type Channel = Box<dyn ByteStream>;
    type Subsystem = RusshSftp;

    async fn authenticate(&mut self, credentials: &Credentials) -> ClientResult<bool> {
        let keypair = match credentials {
            Credentials::Password { username, password } => {
                return self
                    .handle
                    .authenticate_password(username, password)
                    .await
                    .map_err(channel_error);
            }
            Credentials::KeyFile {
                private_key_file,
                passphrase,
                ..
            } => russh_keys::load_secret_key(private_key_file, passphrase.as_deref()),
            Credentials::Key {
                private_key,
                passphrase,
                ..
            } => {
                let private_key = std::str::from_utf8(private_key)
                    .map_err(|err| Error::IO(format!("private key is not PEM text: {err}")))?;
                russh_keys::decode_secret_key(private_key, passphrase.as_deref())
            }
            Credentials::HostBased { .. } => {
                return Err(Error::Unsupported(
                    "host-based authentication".to_owned(),
                ));
            }
        };

        let keypair = keypair.map_err(|err| Error::IO(err.to_string()))?;
        self.handle
            .authenticate_publickey(credentials.username(), Arc::new(keypair))
            .await
            .map_err(channel_error)
    }

    fn host_key(&self) -> Option<Vec<u8>> {
        self.host_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn open_exec(
        &self,
        command: &str,
        terminal: &TerminalConfig,
    ) -> ClientResult<Self::Channel> {
        let mut channel = self.session_channel(terminal).await?;
        channel.exec(true, command).await.map_err(channel_error)?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn open_shell(&self, terminal: &TerminalConfig) -> ClientResult<Self::Channel> {
        let mut channel = self.session_channel(terminal).await?;
        channel.request_shell(true).await.map_err(channel_error)?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn open_file_subsystem(&self) -> ClientResult<Self::Subsystem> {
        let session = self
            .sftp
            .get_or_try_init(|| async {
                let mut channel = self
                    .handle
                    .channel_open_session()
                    .await
                    .map_err(|err| Error::SubsystemUnavailable(err.to_string()))?;
                channel
                    .request_subsystem(true, "sftp")
                    .await
                    .map_err(|err| Error::SubsystemUnavailable(err.to_string()))?;

                let session = SftpSession::new(channel.into_stream())
                    .await
                    .map_err(|err| Error::SubsystemUnavailable(err.to_string()))?;
                Ok::<_, Error>(Arc::new(session))
            })
            .await?;

        Ok(RusshSftp {
            session: session.clone(),
        })
    }

    async fn disconnect(&mut self) -> ClientResult<()> {
        if let Some(sftp) = self.sftp.get() {
            let _ = sftp.close().await;
        }

        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(channel_error)
    }
}

/// SFTP session shared by every filesystem call on one connection
#[derive(Clone)]
pub struct RusshSftp {
    session: Arc<SftpSession>,
}

fn raw_attributes(attrs: &russh_sftp::protocol::FileAttributes) -> RawAttributes {
    let mut flags = FileAttrFlags::empty();
    flags.set(FileAttrFlags::SIZE, attrs.size.is_some());
    flags.set(FileAttrFlags::UIDGID, attrs.uid.is_some() || attrs.gid.is_some());
    flags.set(FileAttrFlags::PERMISSIONS, attrs.permissions.is_some());
    flags.set(
        FileAttrFlags::ACMODTIME,
        attrs.atime.is_some() || attrs.mtime.is_some(),
    );

    RawAttributes {
        flags,
        size: attrs.size,
        uid: attrs.uid,
        gid: attrs.gid,
        permissions: attrs.permissions,
        atime: attrs.atime,
        mtime: attrs.mtime,
        extended: Vec::new(),
    }
}

fn permissions_only(mode: u32) -> russh_sftp::protocol::FileAttributes {
    russh_sftp::protocol::FileAttributes {
        size: None,
        uid: None,
        user: None,
        gid: None,
        group: None,
        permissions: Some(mode),
        atime: None,
        mtime: None,
    }
}

#[async_trait]
impl FileSubsystem for RusshSftp {
    type File = russh_sftp::client::fs::File;
    type Dir = RusshDir;

    async fn realpath(&self, path: &str) -> ClientResult<String> {
        self.session.canonicalize(path).await.map_err(sftp_error)
    }

    async fn stat(&self, path: &str) -> ClientResult<RawAttributes> {
        let attrs = self.session.metadata(path).await.map_err(sftp_error)?;
        Ok(raw_attributes(&attrs))
    }

    async fn lstat(&self, path: &str) -> ClientResult<RawAttributes> {
        let attrs = self
            .session
            .symlink_metadata(path)
            .await
            .map_err(sftp_error)?;
        Ok(raw_attributes(&attrs))
    }

    async fn unlink(&self, path: &str) -> ClientResult<()> {
        self.session.remove_file(path).await.map_err(sftp_error)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> ClientResult<()> {
        self.session
            .rename(old_path, new_path)
            .await
            .map_err(sftp_error)
    }

    async fn chmod(&self, path: &str, mode: u32) -> ClientResult<()> {
        self.session
            .set_metadata(path, permissions_only(mode))
            .await
            .map_err(sftp_error)
    }

    async fn symlink(&self, target: &str, link: &str) -> ClientResult<()> {
        self.session.symlink(link, target).await.map_err(sftp_error)
    }

    async fn readlink(&self, path: &str) -> ClientResult<String> {
        self.session.read_link(path).await.map_err(sftp_error)
    }

    async fn mkdir(&self, path: &str, mode: u32) -> ClientResult<()> {
        self.session.create_dir(path).await.map_err(sftp_error)?;
        self.chmod(path, mode).await
    }

    async fn rmdir(&self, path: &str) -> ClientResult<()> {
        self.session.remove_dir(path).await.map_err(sftp_error)
    }

    async fn opendir(&self, path: &str) -> ClientResult<Self::Dir> {
        let entries = self.session.read_dir(path).await.map_err(sftp_error)?;
        Ok(RusshDir { entries })
    }

    /// The SFTP client picks the permissions of created files itself, so
    /// `mode` is not applied.
    async fn open(&self, path: &str, flags: OpenFlags, _mode: u32) -> ClientResult<Self::File> {
        self.session
            .open_with_flags(
                path,
                russh_sftp::protocol::OpenFlags::from_bits_truncate(flags.bits()),
            )
            .await
            .map_err(sftp_error)
    }
}

/// Directory listing, fetched in full when opened
pub struct RusshDir {
    entries: ReadDir,
}

#[async_trait]
impl DirectoryStream for RusshDir {
    async fn next_entry(&mut self) -> ClientResult<Option<String>> {
        Ok(self.entries.next().map(|entry| entry.file_name()))
    }
}

#[cfg(test)]
mod tests {
    use russh::client::Handler;

    use super::*;

    #[tokio::test]
    async fn server_key_is_accepted_and_recorded() {
        let keypair = key::KeyPair::generate_ed25519().unwrap();
        let public_key = keypair.clone_public_key().unwrap();
        let host_key = HostKeySlot::default();
        let handler = ClientHandler {
            host_key: host_key.clone(),
        };

        let (_handler, accepted) = handler.check_server_key(&public_key).await.unwrap();
        assert!(accepted);
        assert_eq!(
            *host_key.lock().unwrap(),
            Some(public_key.public_key_bytes())
        );
    }
}
