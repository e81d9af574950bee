//! Filesystem operations on the remote host.
//!
//! Every call opens the file-transfer subsystem through the session, so a
//! disconnected session fails with [`Error::NotConnected`] and a host
//! without the subsystem fails with [`Error::SubsystemUnavailable`]. Paths
//! that do not start with `/` are resolved against the remote working
//! directory first.

mod attrs;
mod dir;
mod remove;

pub use attrs::FileAttributes;
pub use dir::DirectoryEntry;
pub use remove::{RemovalFrame, TreeRemover, DEFAULT_MAX_DEPTH};

use bytes::{Bytes, BytesMut};
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWriteExt};

use super::{path, SessionClient};
use crate::{
    error::{ClientResult, Error},
    protocol::OpenFlags,
    transport::{DirectoryStream, FileSubsystem, Transport},
    utils,
};

/// Chunk size of buffered reads
pub const READ_CHUNK: usize = 4096;
/// Chunk size of streaming reads and writes
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
/// Permissions of files created by writes
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Permissions of directories created without an explicit mode
pub const DEFAULT_DIR_MODE: u32 = 0o775;

/// High-level file operations borrowed from a [`SessionClient`]
pub struct RemoteFilesystem<'a, T: Transport> {
    session: &'a SessionClient<T>,
}

impl<'a, T: Transport> RemoteFilesystem<'a, T> {
    pub(crate) const fn new(session: &'a SessionClient<T>) -> Self {
        Self { session }
    }

    /// Metadata of `path`. A final symlink is described, not followed.
    pub async fn stat(&self, path: &str) -> ClientResult<FileAttributes> {
        let sftp = self.session.subsystem("stat").await?;
        let path = path::resolve(&sftp, path).await?;
        let raw = sftp.lstat(&path).await?;
        Ok(FileAttributes::normalize(&path, &raw))
    }

    /// Returns `true` if something exists at `path`
    pub async fn try_exists(&self, path: &str) -> ClientResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Reads the whole file into memory
    pub async fn read_all(&self, path: &str) -> ClientResult<Bytes> {
        let sftp = self.session.subsystem("read").await?;
        let path = path::resolve(&sftp, path).await?;
        let mut file = self.open("read", &sftp, &path, OpenFlags::READ).await?;

        let mut buffer = BytesMut::new();
        let mut chunk = vec![0; READ_CHUNK];
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
        }

        Ok(buffer.freeze())
    }

    /// Streams the file to `sink` in chunks of up to `chunk_size` bytes and
    /// returns the number of bytes delivered. A `chunk_size` of 0 selects
    /// [`DEFAULT_CHUNK_SIZE`].
    pub async fn read_chunked<F>(
        &self,
        path: &str,
        mut sink: F,
        chunk_size: usize,
    ) -> ClientResult<u64>
    where
        F: FnMut(Bytes) + Send,
    {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };

        let sftp = self.session.subsystem("read").await?;
        let path = path::resolve(&sftp, path).await?;
        let mut file = self.open("read", &sftp, &path, OpenFlags::READ).await?;

        let mut total = 0;
        loop {
            let mut chunk = Vec::with_capacity(chunk_size.min(READ_CHUNK));
            let n = (&mut file).take(chunk_size as u64).read_to_end(&mut chunk).await?;
            if n == 0 {
                break;
            }

            total += n as u64;
            debug!("read {n} bytes from {path}");
            sink(Bytes::from(chunk));
        }

        Ok(total)
    }

    /// Writes `data` to `path`, creating or truncating it. Returns the
    /// number of bytes written.
    pub async fn write(&self, path: &str, data: &[u8]) -> ClientResult<u64> {
        self.write_with_flags(path, data, OpenFlags::CREATE_OR_TRUNCATE)
            .await
    }

    /// Writes `data` to `path` opened with `flags`, e.g. with
    /// [`OpenFlags::APPEND`] to add to the end of an existing file.
    pub async fn write_with_flags(
        &self,
        path: &str,
        data: &[u8],
        flags: OpenFlags,
    ) -> ClientResult<u64> {
        let sftp = self.session.subsystem("write").await?;
        let path = path::resolve(&sftp, path).await?;
        let mut file = self.open_for_write(&sftp, &path, flags).await?;

        file.write_all(data).await?;
        file.shutdown().await?;

        Ok(data.len() as u64)
    }

    /// Rewinds `reader` and copies it to `path` in chunks of
    /// [`DEFAULT_CHUNK_SIZE`]. Returns the number of bytes written.
    ///
    /// Chunks are written one after another, so a failure part way through
    /// leaves a partially written file behind.
    pub async fn write_from<R>(&self, path: &str, reader: &mut R) -> ClientResult<u64>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let sftp = self.session.subsystem("write").await?;
        let path = path::resolve(&sftp, path).await?;
        let mut file = self
            .open_for_write(&sftp, &path, OpenFlags::CREATE_OR_TRUNCATE)
            .await?;

        let _ = reader.seek(SeekFrom::Start(0)).await?;

        let mut total = 0;
        let mut chunk = Vec::new();
        loop {
            chunk.clear();
            let n = (&mut *reader)
                .take(DEFAULT_CHUNK_SIZE as u64)
                .read_to_end(&mut chunk)
                .await?;
            if n == 0 {
                break;
            }

            file.write_all(&chunk).await?;
            total += n as u64;
            debug!("wrote {n} bytes to {path}");
        }
        file.shutdown().await?;

        Ok(total)
    }

    pub async fn unlink(&self, path: &str) -> ClientResult<()> {
        let sftp = self.session.subsystem("unlink").await?;
        let path = path::resolve(&sftp, path).await?;
        sftp.unlink(&path).await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> ClientResult<()> {
        let sftp = self.session.subsystem("rename").await?;
        let old_path = path::resolve(&sftp, old_path).await?;
        let new_path = path::resolve(&sftp, new_path).await?;
        sftp.rename(&old_path, &new_path).await
    }

    /// Sets the permission bits of `path`
    pub async fn chmod(&self, path: &str, mode: u32) -> ClientResult<()> {
        let sftp = self.session.subsystem("chmod").await?;
        let path = path::resolve(&sftp, path).await?;
        sftp.chmod(&path, mode).await
    }

    /// Asks the remote side for the absolute form of `path`
    pub async fn realpath(&self, path: &str) -> ClientResult<String> {
        let sftp = self.session.subsystem("realpath").await?;
        sftp.realpath(path).await
    }

    /// Creates a symlink at `link` pointing at `target`. Both are resolved,
    /// so the link stores an absolute target.
    pub async fn make_link(&self, target: &str, link: &str) -> ClientResult<()> {
        let sftp = self.session.subsystem("symlink").await?;
        let target = path::resolve(&sftp, target).await?;
        let link = path::resolve(&sftp, link).await?;
        sftp.symlink(&target, &link).await
    }

    /// Returns the target stored in the symlink at `path`
    pub async fn read_link(&self, path: &str) -> ClientResult<String> {
        let sftp = self.session.subsystem("readlink").await?;
        let path = path::resolve(&sftp, path).await?;
        sftp.readlink(&path).await
    }

    /// Creates one directory; the parent must exist
    pub async fn make_dir(&self, path: &str, mode: u32) -> ClientResult<()> {
        let sftp = self.session.subsystem("mkdir").await?;
        let path = path::resolve(&sftp, path).await?;
        sftp.mkdir(&path, mode).await
    }

    /// Lists the entries of the directory at `path`, without `.` and `..`,
    /// in the order the server reports them.
    ///
    /// With `include_stats` every entry carries its metadata. Symlinks are
    /// followed, and a dangling link is described as itself.
    pub async fn list_directory(
        &self,
        path: &str,
        include_stats: bool,
    ) -> ClientResult<Vec<DirectoryEntry>> {
        let sftp = self.session.subsystem("list").await?;
        let dir_path = path::resolve(&sftp, path).await?;

        let mut stream = match sftp.opendir(&dir_path).await {
            Ok(stream) => stream,
            Err(err) => {
                self.session
                    .diagnostics()
                    .error("list", &format!("failed to open {dir_path}: {err}"));
                return Err(err);
            }
        };

        let mut entries = Vec::new();
        while let Some(name) = stream.next_entry().await? {
            if dir::is_pseudo(&name) {
                continue;
            }

            let path = utils::join(&dir_path, &name);
            let attributes = if include_stats {
                let raw = match sftp.stat(&path).await {
                    Ok(raw) => raw,
                    Err(err) if err.is_not_found() => sftp.lstat(&path).await?,
                    Err(err) => return Err(err),
                };
                Some(FileAttributes::normalize(&path, &raw))
            } else {
                None
            };

            entries.push(DirectoryEntry {
                name,
                path,
                attributes,
            });
        }

        Ok(entries)
    }

    /// Removes the directory at `root` with everything below it, see
    /// [`TreeRemover`].
    pub async fn remove_tree(&self, root: &str, max_depth: usize) -> ClientResult<()> {
        TreeRemover::new(self.session)
            .max_depth(max_depth)
            .remove(root)
            .await
    }

    async fn open(
        &self,
        operation: &str,
        sftp: &T::Subsystem,
        path: &str,
        flags: OpenFlags,
    ) -> ClientResult<<T::Subsystem as FileSubsystem>::File> {
        sftp.open(path, flags, DEFAULT_FILE_MODE)
            .await
            .map_err(|err| {
                self.session
                    .diagnostics()
                    .error(operation, &format!("failed to open file {path}: {err}"));
                err
            })
    }

    async fn open_for_write(
        &self,
        sftp: &T::Subsystem,
        path: &str,
        flags: OpenFlags,
    ) -> ClientResult<<T::Subsystem as FileSubsystem>::File> {
        if !flags.is_write() {
            return Err(Error::Unsupported(format!(
                "open flags {flags:?} do not allow writing"
            )));
        }

        sftp.open(path, flags, DEFAULT_FILE_MODE)
            .await
            .map_err(|err| {
                self.session.diagnostics().error(
                    "write",
                    &format!("failed to open file {path} in write mode: {err}"),
                );
                err
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::transport::memory::{MemoryHost, MemoryTransport};

    async fn session(host: &MemoryHost) -> SessionClient<MemoryTransport> {
        host.add_user("root", "secret");
        let mut session = SessionClient::connect(&host.connector(), "localhost", 22)
            .await
            .unwrap();
        assert!(session.auth_by_password("root", "secret").await);
        session
    }

    #[tokio::test]
    async fn relative_write_lands_in_home() {
        let host = MemoryHost::new();
        let session = session(&host).await;

        assert_eq!(session.fs().write("notes.txt", b"hello").await.unwrap(), 5);
        assert_eq!(host.contents("/root/notes.txt"), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn append_keeps_existing_contents() {
        let host = MemoryHost::new();
        let session = session(&host).await;
        let fs = session.fs();

        let _ = fs.write("/tmp/log", b"one\n").await.unwrap();
        let _ = fs
            .write_with_flags("/tmp/log", b"two\n", OpenFlags::WRITE | OpenFlags::APPEND)
            .await
            .unwrap();
        assert_eq!(&fs.read_all("/tmp/log").await.unwrap()[..], b"one\ntwo\n");
    }

    #[tokio::test]
    async fn read_only_flags_are_rejected_for_writes() {
        let host = MemoryHost::new();
        let session = session(&host).await;

        let result = session
            .fs()
            .write_with_flags("/tmp/file", b"x", OpenFlags::READ)
            .await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
        assert!(!host.exists("/tmp/file"));
    }

    #[tokio::test]
    async fn write_from_rewinds_the_reader() {
        let host = MemoryHost::new();
        let session = session(&host).await;

        let mut reader = Cursor::new(b"rewound".to_vec());
        reader.set_position(4);
        let written = session.fs().write_from("/tmp/copy", &mut reader).await.unwrap();

        assert_eq!(written, 7);
        assert_eq!(host.contents("/tmp/copy"), Some(b"rewound".to_vec()));
    }

    #[tokio::test]
    async fn read_chunked_zero_uses_default_chunk() {
        let host = MemoryHost::new();
        host.create_file("/tmp/data", &[7; 10], 0o644);
        let session = session(&host).await;

        let mut chunks = Vec::new();
        let total = session
            .fs()
            .read_chunked("/tmp/data", |chunk| chunks.push(chunk), 0)
            .await
            .unwrap();
        assert_eq!(total, 10);
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn read_chunked_splits_by_chunk_size() {
        let host = MemoryHost::new();
        host.create_file("/tmp/data", b"abcdefg", 0o644);
        let session = session(&host).await;

        let mut chunks = Vec::new();
        let total = session
            .fs()
            .read_chunked("/tmp/data", |chunk| chunks.push(chunk), 3)
            .await
            .unwrap();
        assert_eq!(total, 7);
        assert_eq!(chunks, vec![&b"abc"[..], &b"def"[..], &b"g"[..]]);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let host = MemoryHost::new();
        let session = session(&host).await;
        let fs = session.fs();

        assert!(fs.read_all("/tmp/missing").await.unwrap_err().is_not_found());
        assert!(!fs.try_exists("/tmp/missing").await.unwrap());
        assert!(fs.try_exists("/tmp").await.unwrap());
    }

    #[tokio::test]
    async fn make_dir_and_rename_resolve_relative_paths() {
        let host = MemoryHost::new();
        let session = session(&host).await;
        let fs = session.fs();

        fs.make_dir("work", DEFAULT_DIR_MODE).await.unwrap();
        fs.rename("work", "done").await.unwrap();

        let attrs = fs.stat("/root/done").await.unwrap();
        assert!(attrs.is_dir);
        assert_eq!(attrs.permissions(), DEFAULT_DIR_MODE);
        assert!(!host.exists("/root/work"));
    }

    #[tokio::test]
    async fn chmod_changes_permission_bits() {
        let host = MemoryHost::new();
        host.create_file("/tmp/script", b"#!/bin/sh\n", 0o644);
        let session = session(&host).await;
        let fs = session.fs();

        fs.chmod("/tmp/script", 0o755).await.unwrap();
        let attrs = fs.stat("/tmp/script").await.unwrap();
        assert_eq!(attrs.permissions(), 0o755);
        assert!(attrs.is_file());
    }

    #[tokio::test]
    async fn listing_follows_links() {
        let host = MemoryHost::new();
        host.create_dir("/srv/data", 0o755);
        let session = session(&host).await;
        let fs = session.fs();
        fs.make_link("/srv/data", "/srv/current").await.unwrap();
        fs.make_link("/srv/gone", "/srv/dangling").await.unwrap();

        let entries = fs.list_directory("/srv", true).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["current", "dangling", "data"]);

        assert!(entries[0].is_dir());
        let dangling = entries[1].attributes.as_ref().unwrap();
        assert!(dangling.is_link);
        assert_eq!(entries[2].path, "/srv/data");
    }
}
