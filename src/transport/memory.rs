//! In-process transport backed by a virtual host.
//!
//! [`MemoryHost`] holds users, a host key and a small Unix-like filesystem.
//! Exec and shell channels run a handful of built-in commands (`whoami`,
//! `pwd`, `echo`, `printenv`, `cat`). Useful wherever a real SSH server is
//! not available, e.g. in tests.

use std::{
    collections::{BTreeMap, VecDeque},
    io,
    path::Path,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::SystemTime,
};
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

use super::{Connector, Credentials, DirectoryStream, FileSubsystem, Transport};
use crate::{
    config::TerminalConfig,
    error::{ClientResult, Error},
    protocol::{FileType, OpenFlags, RawAttributes, Status, StatusCode},
    utils,
};

const CHANNEL_BUFFER: usize = 64 * 1024;
const MAX_LINK_HOPS: usize = 8;
const PROMPT: &[u8] = b"$ ";

#[derive(Debug, Clone)]
enum NodeKind {
    File(Vec<u8>),
    Dir,
    Link(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: SystemTime,
}

impl Node {
    fn new(kind: NodeKind, mode: u32, uid: u32) -> Self {
        Self {
            kind,
            mode: mode & 0o7777,
            uid,
            gid: uid,
            mtime: SystemTime::now(),
        }
    }

    fn attributes(&self) -> RawAttributes {
        let (file_type, size) = match &self.kind {
            NodeKind::File(data) => (FileType::REG, data.len() as u64),
            NodeKind::Dir => (FileType::DIR, 4096),
            NodeKind::Link(target) => (FileType::LNK, target.len() as u64),
        };
        RawAttributes::new(
            file_type.bits() | self.mode,
            size,
            self.uid,
            self.gid,
            self.mtime,
        )
    }

    const fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }
}

#[derive(Debug, Clone)]
struct User {
    uid: u32,
    home: String,
    password: Option<String>,
    authorized_keys: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct TrustedHost {
    hostname: String,
    local_username: String,
    public_key: Vec<u8>,
}

#[derive(Debug)]
struct HostState {
    host_key: Vec<u8>,
    users: BTreeMap<String, User>,
    trusted_hosts: Vec<TrustedHost>,
    nodes: BTreeMap<String, Node>,
    offline: bool,
    subsystem_available: bool,
    calls: u64,
}

type FsResult<T> = Result<T, Status>;

fn status<M: Into<String>>(code: StatusCode, message: M) -> Status {
    Status::new(code, message)
}

/// Absolute form of `path` relative to `cwd`, with `.` and `..` folded
fn normalize(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_owned()
    } else {
        utils::join(cwd, path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                let _ = parts.pop();
            }
            part => parts.push(part),
        }
    }

    format!("/{}", parts.join("/"))
}

fn same_key(stored: &[u8], offered: &[u8]) -> bool {
    stored.trim_ascii() == offered.trim_ascii()
}

impl HostState {
    fn node(&self, path: &str) -> FsResult<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| status(StatusCode::NoSuchFile, path))
    }

    /// Follows symlinks on the final component
    fn follow(&self, path: &str) -> FsResult<String> {
        let mut current = path.to_owned();
        for _ in 0..MAX_LINK_HOPS {
            match &self.node(&current)?.kind {
                NodeKind::Link(target) => {
                    let (parent, _) = utils::split(&current);
                    current = normalize(parent, target);
                }
                _ => return Ok(current),
            }
        }
        Err(status(StatusCode::Failure, format!("too many links: {path}")))
    }

    fn writable_parent(&self, path: &str) -> FsResult<()> {
        let (parent, _) = utils::split(path);
        let parent = self.node(parent)?;
        if !parent.is_dir() {
            return Err(status(StatusCode::NoSuchFile, path));
        }
        if parent.mode & 0o200 == 0 {
            return Err(status(StatusCode::PermissionDenied, path));
        }
        Ok(())
    }

    /// Looking up an entry needs search permission on its directory
    fn searchable_parent(&self, path: &str) -> FsResult<()> {
        let (parent, _) = utils::split(path);
        match self.nodes.get(parent) {
            Some(parent) if parent.is_dir() && parent.mode & 0o100 == 0 => {
                Err(status(StatusCode::PermissionDenied, path))
            }
            _ => Ok(()),
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_owned()
        } else {
            format!("{dir}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let name = &key[prefix.len()..];
                (!name.is_empty() && !name.contains('/')).then(|| name.to_owned())
            })
            .collect()
    }

    fn insert(&mut self, path: &str, node: Node) -> FsResult<()> {
        if self.nodes.contains_key(path) {
            return Err(status(StatusCode::Failure, format!("{path} already exists")));
        }
        self.writable_parent(path)?;
        let _ = self.nodes.insert(path.to_owned(), node);
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> FsResult<()> {
        if self.node(path)?.is_dir() {
            return Err(status(StatusCode::Failure, format!("{path} is a directory")));
        }
        self.writable_parent(path)?;
        let _ = self.nodes.remove(path);
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> FsResult<()> {
        if !self.node(path)?.is_dir() {
            return Err(status(StatusCode::Failure, format!("{path} is not a directory")));
        }
        if path == "/" || !self.children(path).is_empty() {
            return Err(status(StatusCode::Failure, format!("{path} is not empty")));
        }
        self.writable_parent(path)?;
        let _ = self.nodes.remove(path);
        Ok(())
    }

    fn rename(&mut self, old_path: &str, new_path: &str) -> FsResult<()> {
        let _ = self.node(old_path)?;
        if self.nodes.contains_key(new_path) {
            return Err(status(StatusCode::Failure, format!("{new_path} already exists")));
        }
        self.writable_parent(old_path)?;
        self.writable_parent(new_path)?;

        let prefix = format!("{old_path}/");
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|key| *key == old_path || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = self.nodes.remove(&key) {
                let renamed = format!("{new_path}{}", &key[old_path.len()..]);
                let _ = self.nodes.insert(renamed, node);
            }
        }
        Ok(())
    }

    fn open(&mut self, path: &str, flags: OpenFlags, mode: u32, uid: u32) -> FsResult<String> {
        let target = match self.follow(path) {
            Ok(target) => target,
            Err(err) if err.status_code == StatusCode::NoSuchFile => path.to_owned(),
            Err(err) => return Err(err),
        };

        match self.nodes.get_mut(&target) {
            Some(node) => {
                if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUDE) {
                    return Err(status(StatusCode::Failure, format!("{path} already exists")));
                }
                if node.is_dir() {
                    return Err(status(StatusCode::Failure, format!("{path} is a directory")));
                }
                if (flags.is_write() && node.mode & 0o200 == 0)
                    || (flags.contains(OpenFlags::READ) && node.mode & 0o400 == 0)
                {
                    return Err(status(StatusCode::PermissionDenied, path));
                }
                if flags.contains(OpenFlags::TRUNCATE) {
                    node.kind = NodeKind::File(Vec::new());
                    node.mtime = SystemTime::now();
                }
            }
            None if flags.contains(OpenFlags::CREATE) => {
                self.insert(&target, Node::new(NodeKind::File(Vec::new()), mode, uid))?;
            }
            None => return Err(status(StatusCode::NoSuchFile, path)),
        }

        Ok(target)
    }

    fn run_command(&self, user: &str, home: &str, terminal: &TerminalConfig, line: &str) -> String {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return String::new();
        };
        let args: Vec<&str> = words.collect();

        match command {
            "whoami" => format!("{user}\n"),
            "pwd" => format!("{home}\n"),
            "echo" => format!("{}\n", args.join(" ")),
            "true" => String::new(),
            "printenv" => args
                .iter()
                .filter_map(|name| match *name {
                    "TERM" => Some(terminal.term.clone()),
                    name => terminal.env.get(name).cloned(),
                })
                .map(|value| format!("{value}\n"))
                .collect(),
            "cat" => args
                .iter()
                .map(|arg| {
                    let path = normalize(home, arg);
                    match self.follow(&path).and_then(|path| self.node(&path).cloned()) {
                        Ok(Node {
                            kind: NodeKind::File(data),
                            ..
                        }) => String::from_utf8_lossy(&data).into_owned(),
                        _ => format!("cat: {arg}: No such file or directory\n"),
                    }
                })
                .collect(),
            command => format!("sh: {command}: command not found\n"),
        }
    }
}

/// Virtual remote host shared by every connection made through its connector
#[derive(Debug, Clone)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// Creates a host with `/`, `/etc`, `/home` and a world-writable `/tmp`
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        for (path, mode) in [("/", 0o755), ("/etc", 0o755), ("/home", 0o755), ("/tmp", 0o777)] {
            let _ = nodes.insert(path.to_owned(), Node::new(NodeKind::Dir, mode, 0));
        }
        let _ = nodes.insert(
            "/etc/hostname".to_owned(),
            Node::new(NodeKind::File(b"memory\n".to_vec()), 0o644, 0),
        );

        Self {
            state: Arc::new(Mutex::new(HostState {
                host_key: b"ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIMemoryHostKey".to_vec(),
                users: BTreeMap::new(),
                trusted_hosts: Vec::new(),
                nodes,
                offline: false,
                subsystem_available: true,
                calls: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the state for one transport call and counts it
    fn call(&self) -> MutexGuard<'_, HostState> {
        let mut state = self.lock();
        state.calls += 1;
        state
    }

    #[must_use]
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { host: self.clone() }
    }

    /// Adds a user with a home directory; `root` lives in `/root`
    pub fn add_user(&self, username: &str, password: &str) {
        let mut state = self.lock();
        let (uid, home) = if username == "root" {
            (0, "/root".to_owned())
        } else {
            (
                1000 + u32::try_from(state.users.len()).unwrap_or(0),
                format!("/home/{username}"),
            )
        };
        let _ = state
            .nodes
            .insert(home.clone(), Node::new(NodeKind::Dir, 0o755, uid));
        let _ = state.users.insert(
            username.to_owned(),
            User {
                uid,
                home,
                password: Some(password.to_owned()),
                authorized_keys: Vec::new(),
            },
        );
    }

    pub fn add_authorized_key(&self, username: &str, public_key: &[u8]) {
        if let Some(user) = self.lock().users.get_mut(username) {
            user.authorized_keys.push(public_key.to_vec());
        }
    }

    /// Trusts `local_username` on `hostname` holding the host key `public_key`
    pub fn trust_host(&self, hostname: &str, local_username: &str, public_key: &[u8]) {
        self.lock().trusted_hosts.push(TrustedHost {
            hostname: hostname.to_owned(),
            local_username: local_username.to_owned(),
            public_key: public_key.to_vec(),
        });
    }

    pub fn set_host_key(&self, host_key: &[u8]) {
        self.lock().host_key = host_key.to_vec();
    }

    #[must_use]
    pub fn host_key(&self) -> Vec<u8> {
        self.lock().host_key.clone()
    }

    /// Refuses new connections while set
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Refuses file-transfer subsystem requests while unset
    pub fn set_subsystem_available(&self, available: bool) {
        self.lock().subsystem_available = available;
    }

    /// Number of transport calls served so far
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.lock().calls
    }

    /// Creates a directory and any missing parents
    pub fn create_dir(&self, path: &str, mode: u32) {
        let path = normalize("/", path);
        let mut state = self.lock();
        let mut current = String::new();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            current = format!("{current}/{part}");
            let _ = state
                .nodes
                .entry(current.clone())
                .or_insert_with(|| Node::new(NodeKind::Dir, mode, 0));
        }
    }

    /// Creates or replaces a regular file; the parent must exist
    pub fn create_file(&self, path: &str, contents: &[u8], mode: u32) {
        let path = normalize("/", path);
        let _ = self.lock().nodes.insert(
            path,
            Node::new(NodeKind::File(contents.to_vec()), mode, 0),
        );
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(&normalize("/", path))
    }

    #[must_use]
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(&normalize("/", path)) {
            Some(Node {
                kind: NodeKind::File(data),
                ..
            }) => Some(data.clone()),
            _ => None,
        }
    }
}

/// Connects to a [`MemoryHost`] whatever host and port are asked for
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    host: MemoryHost,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self, host: &str, port: u16) -> ClientResult<Self::Transport> {
        if self.host.call().offline {
            return Err(Error::Connection {
                address: format!("{host}:{port}"),
                reason: "connection refused".to_owned(),
            });
        }

        Ok(MemoryTransport {
            host: self.host.clone(),
            user: None,
            connected: true,
        })
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    host: MemoryHost,
    user: Option<(String, User)>,
    connected: bool,
}

impl MemoryTransport {
    fn check(&self) -> ClientResult<&(String, User)> {
        if !self.connected {
            return Err(Error::Connection {
                address: "memory".to_owned(),
                reason: "transport closed".to_owned(),
            });
        }
        self.user
            .as_ref()
            .ok_or_else(|| Error::Channel("not authenticated".to_owned()))
    }

    fn verify(&self, credentials: &Credentials) -> ClientResult<Option<User>> {
        let state = self.host.call();
        let Some(user) = state.users.get(credentials.username()) else {
            return Ok(None);
        };

        let accepted = match credentials {
            Credentials::Password { password, .. } => user.password.as_ref() == Some(password),
            Credentials::KeyFile {
                public_key_file, ..
            } => {
                let offered = read_key(public_key_file)?;
                user.authorized_keys.iter().any(|key| same_key(key, &offered))
            }
            Credentials::Key { public_key, .. } => user
                .authorized_keys
                .iter()
                .any(|key| same_key(key, public_key)),
            Credentials::HostBased {
                hostname,
                public_key_file,
                ..
            } => {
                let offered = read_key(public_key_file)?;
                let local_username = credentials.local_username().unwrap_or_default();
                state.trusted_hosts.iter().any(|trusted| {
                    trusted.hostname == *hostname
                        && trusted.local_username == local_username
                        && same_key(&trusted.public_key, &offered)
                })
            }
        };

        Ok(accepted.then(|| user.clone()))
    }

    fn open_channel(&self) -> ClientResult<(DuplexStream, DuplexStream, String, String)> {
        let (username, user) = self.check()?;
        drop(self.host.call());
        let (client, server) = duplex(CHANNEL_BUFFER);
        Ok((client, server, username.clone(), user.home.clone()))
    }
}

fn read_key(path: &Path) -> ClientResult<Vec<u8>> {
    std::fs::read(path).map_err(Error::from)
}

#[async_trait]
impl Transport for MemoryTransport {
    type Channel = DuplexStream;
    type Subsystem = MemorySftp;

    async fn authenticate(&mut self, credentials: &Credentials) -> ClientResult<bool> {
        if !self.connected {
            return Ok(false);
        }
        match self.verify(credentials)? {
            Some(user) => {
                self.user = Some((credentials.username().to_owned(), user));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn host_key(&self) -> Option<Vec<u8>> {
        self.connected.then(|| self.host.host_key())
    }

    async fn open_exec(
        &self,
        command: &str,
        terminal: &TerminalConfig,
    ) -> ClientResult<Self::Channel> {
        let (client, mut server, username, home) = self.open_channel()?;
        let output = self
            .host
            .lock()
            .run_command(&username, &home, terminal, command);

        let _ = tokio::spawn(async move {
            let _ = server.write_all(output.as_bytes()).await;
            let _ = server.shutdown().await;
        });

        Ok(client)
    }

    async fn open_shell(&self, terminal: &TerminalConfig) -> ClientResult<Self::Channel> {
        let (client, mut server, username, home) = self.open_channel()?;
        server.write_all(PROMPT).await?;

        let host = self.host.clone();
        let terminal = terminal.clone();
        let _ = tokio::spawn(async move {
            let mut pending = Vec::new();
            let mut buf = [0; 1024];
            loop {
                let n = match server.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                pending.extend_from_slice(&buf[..n]);

                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line).trim().to_owned();
                    if line == "exit" {
                        let _ = server.write_all(b"logout\n").await;
                        let _ = server.shutdown().await;
                        return;
                    }
                    let output = host.lock().run_command(&username, &home, &terminal, &line);
                    if server.write_all(output.as_bytes()).await.is_err()
                        || server.write_all(PROMPT).await.is_err()
                    {
                        return;
                    }
                }
            }
            debug!("memory shell for {username} ended");
        });

        Ok(client)
    }

    async fn open_file_subsystem(&self) -> ClientResult<Self::Subsystem> {
        let (_, user) = self.check()?;
        if !self.host.call().subsystem_available {
            return Err(Error::SubsystemUnavailable(
                "subsystem request failed on channel 0".to_owned(),
            ));
        }
        Ok(MemorySftp {
            host: self.host.clone(),
            home: user.home.clone(),
            uid: user.uid,
        })
    }

    async fn disconnect(&mut self) -> ClientResult<()> {
        drop(self.host.call());
        self.connected = false;
        self.user = None;
        Ok(())
    }
}

/// File-transfer subsystem of a [`MemoryHost`]; relative paths are
/// resolved against the user's home directory.
#[derive(Debug, Clone)]
pub struct MemorySftp {
    host: MemoryHost,
    home: String,
    uid: u32,
}

impl MemorySftp {
    fn path(&self, path: &str) -> String {
        normalize(&self.home, path)
    }
}

#[async_trait]
impl FileSubsystem for MemorySftp {
    type File = MemoryFile;
    type Dir = MemoryDir;

    async fn realpath(&self, path: &str) -> ClientResult<String> {
        drop(self.host.call());
        Ok(self.path(path))
    }

    async fn stat(&self, path: &str) -> ClientResult<RawAttributes> {
        let state = self.host.call();
        let target = state.follow(&self.path(path))?;
        Ok(state.node(&target)?.attributes())
    }

    async fn lstat(&self, path: &str) -> ClientResult<RawAttributes> {
        let state = self.host.call();
        let path = self.path(path);
        state.searchable_parent(&path)?;
        Ok(state.node(&path)?.attributes())
    }

    async fn unlink(&self, path: &str) -> ClientResult<()> {
        Ok(self.host.call().unlink(&self.path(path))?)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> ClientResult<()> {
        Ok(self
            .host
            .call()
            .rename(&self.path(old_path), &self.path(new_path))?)
    }

    async fn chmod(&self, path: &str, mode: u32) -> ClientResult<()> {
        let mut state = self.host.call();
        match state.nodes.get_mut(&self.path(path)) {
            Some(node) => {
                node.mode = mode & 0o7777;
                Ok(())
            }
            None => Err(status(StatusCode::NoSuchFile, path).into()),
        }
    }

    async fn symlink(&self, target: &str, link: &str) -> ClientResult<()> {
        let node = Node::new(NodeKind::Link(target.to_owned()), 0o777, self.uid);
        Ok(self.host.call().insert(&self.path(link), node)?)
    }

    async fn readlink(&self, path: &str) -> ClientResult<String> {
        match &self.host.call().node(&self.path(path))?.kind {
            NodeKind::Link(target) => Ok(target.clone()),
            _ => Err(status(StatusCode::Failure, format!("{path} is not a link")).into()),
        }
    }

    async fn mkdir(&self, path: &str, mode: u32) -> ClientResult<()> {
        let node = Node::new(NodeKind::Dir, mode, self.uid);
        Ok(self.host.call().insert(&self.path(path), node)?)
    }

    async fn rmdir(&self, path: &str) -> ClientResult<()> {
        Ok(self.host.call().rmdir(&self.path(path))?)
    }

    async fn opendir(&self, path: &str) -> ClientResult<Self::Dir> {
        let state = self.host.call();
        let target = state.follow(&self.path(path))?;
        let node = state.node(&target)?;
        if !node.is_dir() {
            return Err(status(StatusCode::Failure, format!("{path} is not a directory")).into());
        }
        if node.mode & 0o400 == 0 {
            return Err(status(StatusCode::PermissionDenied, path).into());
        }

        let mut entries: VecDeque<String> = state.children(&target).into();
        entries.push_front("..".to_owned());
        entries.push_front(".".to_owned());
        Ok(MemoryDir { entries })
    }

    async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> ClientResult<Self::File> {
        let path = self
            .host
            .call()
            .open(&self.path(path), flags, mode, self.uid)?;
        Ok(MemoryFile {
            host: self.host.clone(),
            path,
            flags,
            pos: 0,
        })
    }
}

/// Snapshot of a directory taken when it was opened
#[derive(Debug)]
pub struct MemoryDir {
    entries: VecDeque<String>,
}

#[async_trait]
impl DirectoryStream for MemoryDir {
    async fn next_entry(&mut self) -> ClientResult<Option<String>> {
        Ok(self.entries.pop_front())
    }
}

/// Open file on a [`MemoryHost`]; reads and writes complete immediately
#[derive(Debug)]
pub struct MemoryFile {
    host: MemoryHost,
    path: String,
    flags: OpenFlags,
    pos: usize,
}

impl MemoryFile {
    fn gone(&self) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, self.path.clone())
    }
}

impl AsyncRead for MemoryFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.flags.contains(OpenFlags::READ) {
            return Poll::Ready(Err(io::ErrorKind::PermissionDenied.into()));
        }

        let read = match self.host.lock().nodes.get(&self.path) {
            Some(Node {
                kind: NodeKind::File(data),
                ..
            }) => {
                let start = self.pos.min(data.len());
                let len = buf.remaining().min(data.len() - start);
                buf.put_slice(&data[start..start + len]);
                Ok(len)
            }
            _ => Err(self.gone()),
        };

        Poll::Ready(read.map(|len| self.pos += len))
    }
}

impl AsyncWrite for MemoryFile {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        if !self.flags.is_write() {
            return Poll::Ready(Err(io::ErrorKind::PermissionDenied.into()));
        }

        let append = self.flags.contains(OpenFlags::APPEND);
        let pos = self.pos;
        let written = match self.host.lock().nodes.get_mut(&self.path) {
            Some(node) => match &mut node.kind {
                NodeKind::File(data) => {
                    let start = if append { data.len() } else { pos };
                    let end = start + buf.len();
                    if data.len() < end {
                        data.resize(end, 0);
                    }
                    data[start..end].copy_from_slice(buf);
                    node.mtime = SystemTime::now();
                    Ok(end)
                }
                _ => Err(self.gone()),
            },
            None => Err(self.gone()),
        };

        Poll::Ready(written.map(|end| {
            self.pos = end;
            buf.len()
        }))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(normalize("/root", "."), "/root");
        assert_eq!(normalize("/root", "../etc/./hostname"), "/etc/hostname");
        assert_eq!(normalize("/root", "/"), "/");
        assert_eq!(normalize("/", "../.."), "/");
    }

    #[test]
    fn children_are_direct_only() {
        let host = MemoryHost::new();
        host.create_dir("/srv/a/b", 0o755);
        host.create_file("/srv/a/file", b"x", 0o644);
        host.create_file("/srvx", b"x", 0o644);

        let state = host.lock();
        assert_eq!(state.children("/srv"), vec!["a".to_owned()]);
        assert_eq!(state.children("/srv/a"), vec!["b".to_owned(), "file".to_owned()]);
        assert!(state.children("/").contains(&"srvx".to_owned()));
    }

    #[test]
    fn unlink_needs_writable_parent() {
        let host = MemoryHost::new();
        host.create_dir("/locked", 0o555);
        host.create_file("/locked/file", b"x", 0o644);

        let mut state = host.lock();
        let err = state.unlink("/locked/file").unwrap_err();
        assert_eq!(err.status_code, StatusCode::PermissionDenied);
        assert!(state.nodes.contains_key("/locked/file"));
    }

    #[test]
    fn rename_moves_subtree() {
        let host = MemoryHost::new();
        host.create_dir("/tmp/old/inner", 0o755);
        host.create_file("/tmp/old/inner/file", b"data", 0o644);

        host.lock().rename("/tmp/old", "/tmp/new").unwrap();
        assert!(!host.exists("/tmp/old"));
        assert_eq!(host.contents("/tmp/new/inner/file"), Some(b"data".to_vec()));
    }

    #[test]
    fn commands_use_session_user() {
        let host = MemoryHost::new();
        let terminal = TerminalConfig::default();
        let state = host.lock();
        assert_eq!(state.run_command("alice", "/home/alice", &terminal, "whoami"), "alice\n");
        assert_eq!(state.run_command("alice", "/home/alice", &terminal, "printenv TERM"), "bash\n");
        assert_eq!(state.run_command("alice", "/", &terminal, "cat /etc/hostname"), "memory\n");
        assert!(state
            .run_command("alice", "/", &terminal, "frobnicate")
            .contains("command not found"));
    }
}
