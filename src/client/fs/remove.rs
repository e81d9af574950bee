use crate::{
    client::{path, SessionClient},
    error::{ClientResult, Error},
    protocol::FileType,
    transport::{DirectoryStream, FileSubsystem, Transport},
    utils,
};

/// Depth budget used unless [`TreeRemover::max_depth`] says otherwise
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// One directory waiting to be emptied and removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalFrame {
    pub path: String,
}

/// Removes a directory tree without recursion.
///
/// Pending directories live on an explicit stack. Each pass over the top
/// directory unlinks its files and pushes its subdirectories; a directory
/// is removed only once a pass finds no subdirectories left in it. Every
/// pass costs one unit of the depth budget and every removed directory
/// refunds one, so the budget bounds how deep the walk may go rather than
/// how many directories it may visit.
///
/// The first failure aborts the walk and nothing after it is attempted.
/// Symlinks are unlinked, never descended into.
pub struct TreeRemover<'a, T: Transport> {
    session: &'a SessionClient<T>,
    max_depth: usize,
}

impl<'a, T: Transport> TreeRemover<'a, T> {
    pub(crate) const fn new(session: &'a SessionClient<T>) -> Self {
        Self {
            session,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    #[must_use]
    pub const fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Removes `root` and everything below it.
    ///
    /// Fails with [`Error::DepthExceeded`] when the budget runs out before
    /// the tree is gone; whatever was removed up to then stays removed.
    pub async fn remove(&self, root: &str) -> ClientResult<()> {
        let sftp = self.session.subsystem("remove_tree").await?;
        let root = path::resolve(&sftp, root).await?;

        let mut stack = vec![RemovalFrame { path: root }];
        let mut budget = self.max_depth;

        while let Some(frame) = stack.last() {
            if budget == 0 {
                let path = frame.path.clone();
                self.fail(format!("depth limit {} reached at {path}", self.max_depth));
                return Err(Error::DepthExceeded {
                    path,
                    max_depth: self.max_depth,
                });
            }
            budget -= 1;

            let dir_path = frame.path.clone();
            let children = self.clear_files(&sftp, &dir_path).await?;

            if children.is_empty() {
                if let Err(err) = sftp.rmdir(&dir_path).await {
                    self.fail(format!("failed to remove {dir_path}: {err}"));
                    return Err(err);
                }
                debug!("removed {dir_path}");

                let _ = stack.pop();
                budget += 1;
            } else {
                stack.extend(children);
            }
        }

        Ok(())
    }

    /// Unlinks every non-directory in `dir_path` and returns frames for
    /// the subdirectories found.
    async fn clear_files(
        &self,
        sftp: &T::Subsystem,
        dir_path: &str,
    ) -> ClientResult<Vec<RemovalFrame>> {
        let mut stream = match sftp.opendir(dir_path).await {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(format!("failed to open {dir_path}: {err}"));
                return Err(err);
            }
        };

        let mut children = Vec::new();
        loop {
            let name = match stream.next_entry().await {
                Ok(Some(name)) => name,
                Ok(None) => break,
                Err(err) => {
                    self.fail(format!("failed to read {dir_path}: {err}"));
                    return Err(err);
                }
            };
            if super::dir::is_pseudo(&name) {
                continue;
            }

            let path = utils::join(dir_path, &name);
            let attrs = match sftp.lstat(&path).await {
                Ok(attrs) => attrs,
                Err(err) => {
                    self.fail(format!("failed to stat {path}: {err}"));
                    return Err(err);
                }
            };

            if attrs.file_type() == Some(FileType::DIR) {
                children.push(RemovalFrame { path });
            } else if let Err(err) = sftp.unlink(&path).await {
                self.fail(format!("failed to unlink {path}: {err}"));
                return Err(err);
            }
        }

        Ok(children)
    }

    fn fail(&self, message: String) {
        self.session.diagnostics().error("remove_tree", &message);
    }
}
