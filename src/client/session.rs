use std::{collections::BTreeMap, path::PathBuf};
use tokio::{io::AsyncReadExt, runtime::Handle};

use super::{
    fs::{RemoteFilesystem, TreeRemover},
    shell::{Shell, ShellReader, ShellWriter},
};
use crate::{
    config::{ClientConfig, ConfigValue, Logger, TerminalConfig, TerminalOverride},
    diagnostics::Diagnostics,
    error::{ClientResult, Error},
    transport::{
        Connector, Credentials, Fingerprint, FingerprintEncoding, HashAlg, Transport,
    },
};

/// One authenticated connection to a remote host.
///
/// Owns the transport for its whole lifetime. Exec, shell and filesystem
/// operations borrow it per call; once disconnected every one of them fails
/// with [`Error::NotConnected`] without touching the transport.
pub struct SessionClient<T: Transport> {
    transport: Option<T>,
    address: String,
    authenticated: bool,
    config: ClientConfig,
    diagnostics: Diagnostics,
}

impl<T: Transport> SessionClient<T> {
    /// Opens a connection to `host:port`
    pub async fn connect<C>(connector: &C, host: &str, port: u16) -> ClientResult<Self>
    where
        C: Connector<Transport = T>,
    {
        Self::connect_with_config(connector, host, port, ClientConfig::default()).await
    }

    /// Opens a connection to `host:port` with a logger and terminal override
    /// already in place.
    pub async fn connect_with_config<C>(
        connector: &C,
        host: &str,
        port: u16,
        config: ClientConfig,
    ) -> ClientResult<Self>
    where
        C: Connector<Transport = T>,
    {
        let address = format!("{host}:{port}");
        let diagnostics = Diagnostics::new(config.logger.clone());

        let transport = match connector.connect(host, port).await {
            Ok(transport) => transport,
            Err(err) => {
                let reason = match err {
                    Error::Connection { reason, .. } => reason,
                    err => err.to_string(),
                };
                diagnostics.error("connect", &format!("connect failed, server = {address}"));
                return Err(Error::Connection { address, reason });
            }
        };

        diagnostics.info("connect", &format!("connected to ssh2 server {address}"));

        Ok(Self {
            transport: Some(transport),
            address,
            authenticated: false,
            config,
            diagnostics,
        })
    }

    /// Closes the connection. Does nothing if already closed.
    pub async fn disconnect(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };

        self.authenticated = false;
        self.diagnostics.info(
            "disconnect",
            &format!("closing connection, server = {}", self.address),
        );

        if let Err(err) = transport.disconnect().await {
            debug!("disconnect from {}: {}", self.address, err);
        }
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Remote address as `host:port`
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn set_logger(&mut self, logger: Option<Logger>) {
        self.config.logger.clone_from(&logger);
        self.diagnostics.set_logger(logger);
    }

    pub fn set_terminal(&mut self, terminal: Option<TerminalOverride>) {
        self.config.terminal = terminal;
    }

    /// Sets a configuration option by name, see [`ClientConfig::set_option`]
    pub fn set_option(&mut self, name: &str, value: ConfigValue) -> ClientResult<()> {
        self.config.set_option(name, value)?;
        self.diagnostics.set_logger(self.config.logger.clone());
        Ok(())
    }

    /// Attempts authentication and returns whether it succeeded.
    ///
    /// A rejection is reported to the logger rather than returned as an
    /// error, so several kinds can be tried one after another. Called on a
    /// closed session it cleans up and returns `false`.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            self.diagnostics.error(
                "authenticate",
                &format!(
                    "{} authentication on a closed session, username = {}",
                    credentials.kind(),
                    credentials.username()
                ),
            );
            self.disconnect().await;
            return false;
        };

        let accepted = match transport.authenticate(credentials).await {
            Ok(accepted) => accepted,
            Err(err) => {
                debug!("{} authentication error: {}", credentials.kind(), err);
                false
            }
        };

        if accepted {
            self.authenticated = true;
        } else {
            let hostname = credentials
                .hostname()
                .map(|hostname| format!(" hostname = {hostname},"))
                .unwrap_or_default();
            self.diagnostics.error(
                "authenticate",
                &format!(
                    "{} authentication failed, username = {},{} server = {}",
                    credentials.kind(),
                    credentials.username(),
                    hostname,
                    self.address
                ),
            );
        }

        accepted
    }

    pub async fn auth_by_password<U, P>(&mut self, username: U, password: P) -> bool
    where
        U: Into<String>,
        P: Into<String>,
    {
        self.authenticate(&Credentials::Password {
            username: username.into(),
            password: password.into(),
        })
        .await
    }

    pub async fn auth_by_key_file<U, K>(
        &mut self,
        username: U,
        public_key_file: K,
        private_key_file: K,
        passphrase: Option<String>,
    ) -> bool
    where
        U: Into<String>,
        K: Into<PathBuf>,
    {
        self.authenticate(&Credentials::KeyFile {
            username: username.into(),
            public_key_file: public_key_file.into(),
            private_key_file: private_key_file.into(),
            passphrase,
        })
        .await
    }

    pub async fn auth_by_key<U: Into<String>>(
        &mut self,
        username: U,
        public_key: &[u8],
        private_key: &[u8],
        passphrase: Option<String>,
    ) -> bool {
        self.authenticate(&Credentials::Key {
            username: username.into(),
            public_key: public_key.to_vec(),
            private_key: private_key.to_vec(),
            passphrase,
        })
        .await
    }

    /// Host-based authentication as `username`, vouched for by the trusted
    /// `hostname` whose keypair is given. `local_username` defaults to
    /// `username`.
    pub async fn auth_by_host<U, H, K>(
        &mut self,
        username: U,
        hostname: H,
        public_key_file: K,
        private_key_file: K,
        passphrase: Option<String>,
        local_username: Option<String>,
    ) -> bool
    where
        U: Into<String>,
        H: Into<String>,
        K: Into<PathBuf>,
    {
        self.authenticate(&Credentials::HostBased {
            username: username.into(),
            hostname: hostname.into(),
            public_key_file: public_key_file.into(),
            private_key_file: private_key_file.into(),
            passphrase,
            local_username,
        })
        .await
    }

    /// Fingerprint of the server's host key. Available once connected,
    /// whether or not authenticated.
    pub fn fingerprint(
        &self,
        alg: HashAlg,
        encoding: FingerprintEncoding,
    ) -> ClientResult<Fingerprint> {
        let host_key = self
            .transport()?
            .host_key()
            .ok_or_else(|| Error::Unsupported("host key not available".to_owned()))?;

        Ok(Fingerprint::compute(&host_key, alg, encoding))
    }

    /// Runs `command` and returns its output with surrounding whitespace
    /// trimmed. Resolves once the remote command closes its output, there is
    /// no timeout.
    pub async fn execute(
        &self,
        command: &str,
        env: Option<BTreeMap<String, String>>,
    ) -> ClientResult<String> {
        let transport = self.transport()?;
        let terminal = self
            .config
            .terminal(TerminalConfig::default().with_env(env.unwrap_or_default()));

        let mut channel = match transport.open_exec(command, &terminal).await {
            Ok(channel) => channel,
            Err(err) => {
                self.diagnostics.error(
                    "execute",
                    &format!(
                        "exec failed, command = {command}, server = {}: {err}",
                        self.address
                    ),
                );
                return Err(err);
            }
        };

        let mut output = Vec::new();
        let _ = channel.read_to_end(&mut output).await?;

        Ok(String::from_utf8_lossy(&output).trim().to_owned())
    }

    /// Opens an interactive shell. `terminal` defaults to bash at 80x25 and
    /// is overridden field by field by the configured terminal.
    pub async fn get_shell(
        &self,
        terminal: Option<TerminalConfig>,
    ) -> ClientResult<Shell<T::Channel>> {
        let transport = self.transport()?;
        let terminal = self.config.terminal(terminal.unwrap_or_default());

        match transport.open_shell(&terminal).await {
            Ok(channel) => Ok(Shell::new(channel)),
            Err(err) => {
                self.diagnostics.error(
                    "shell",
                    &format!("shell failed, server = {}: {err}", self.address),
                );
                Err(err)
            }
        }
    }

    /// Opens an interactive shell split into a polling reader and a writer
    pub async fn use_shell(
        &self,
        terminal: Option<TerminalConfig>,
    ) -> ClientResult<(ShellReader<T::Channel>, ShellWriter<T::Channel>)> {
        Ok(self.get_shell(terminal).await?.split())
    }

    /// Filesystem operations on this session
    #[must_use]
    pub fn fs(&self) -> RemoteFilesystem<'_, T> {
        RemoteFilesystem::new(self)
    }

    /// Recursive directory removal on this session
    #[must_use]
    pub fn tree_remover(&self) -> TreeRemover<'_, T> {
        TreeRemover::new(self)
    }

    fn transport(&self) -> ClientResult<&T> {
        self.transport.as_ref().ok_or(Error::NotConnected)
    }

    /// Opens the file-transfer subsystem for one operation
    pub(crate) async fn subsystem(&self, operation: &str) -> ClientResult<T::Subsystem> {
        match self.transport()?.open_file_subsystem().await {
            Ok(subsystem) => Ok(subsystem),
            Err(err) => {
                self.diagnostics.error(
                    operation,
                    &format!(
                        "file-transfer subsystem unavailable, server = {}: {err}",
                        self.address
                    ),
                );
                Err(match err {
                    Error::SubsystemUnavailable(reason) => Error::SubsystemUnavailable(reason),
                    err => Error::SubsystemUnavailable(err.to_string()),
                })
            }
        }
    }

    pub(crate) const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

impl<T: Transport> Drop for SessionClient<T> {
    fn drop(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };

        debug!("session to {} dropped while connected", self.address);

        if let Ok(handle) = Handle::try_current() {
            let _ = handle.spawn(async move {
                let _ = transport.disconnect().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::transport::memory::{MemoryHost, MemoryTransport};

    fn host() -> MemoryHost {
        let host = MemoryHost::new();
        host.add_user("root", "secret");
        host
    }

    async fn session(host: &MemoryHost) -> SessionClient<MemoryTransport> {
        SessionClient::connect(&host.connector(), "localhost", 22)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_failure_carries_address() {
        let host = host();
        host.set_offline(true);

        let result = SessionClient::connect(&host.connector(), "example.org", 2222).await;
        match result {
            Err(Error::Connection { address, .. }) => assert_eq!(address, "example.org:2222"),
            _ => panic!("expected connection error"),
        }
    }

    #[tokio::test]
    async fn connected_but_not_authenticated() {
        let host = host();
        let session = session(&host).await;
        assert!(session.is_connected());
        assert!(!session.is_authenticated());
        assert_eq!(session.address(), "localhost:22");
    }

    #[tokio::test]
    async fn failed_auth_is_logged_not_raised() {
        let host = host();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let config = ClientConfig::default().with_logger(move |op, msg, err| {
            sink.lock().unwrap().push((op.to_owned(), msg.to_owned(), err));
        });
        let mut session =
            SessionClient::connect_with_config(&host.connector(), "localhost", 22, config)
                .await
                .unwrap();

        assert!(!session.auth_by_password("root", "wrong").await);
        assert!(!session.is_authenticated());
        assert!(session.auth_by_password("root", "secret").await);
        assert!(session.is_authenticated());

        let events = events.lock().unwrap();
        let failure = events
            .iter()
            .find(|(op, _, err)| op == "authenticate" && *err)
            .unwrap();
        assert!(failure.1.contains("password authentication failed"));
        assert!(failure.1.contains("username = root"));
        assert!(failure.1.contains("localhost:22"));
    }

    #[tokio::test]
    async fn authenticate_on_closed_session_returns_false() {
        let host = host();
        let mut session = session(&host).await;
        session.disconnect().await;

        let calls = host.calls();
        assert!(!session.auth_by_password("root", "secret").await);
        assert!(!session.is_connected());
        assert_eq!(host.calls(), calls);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let host = host();
        let mut session = session(&host).await;
        assert!(session.auth_by_password("root", "secret").await);

        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn fingerprint_before_authentication() {
        let host = host();
        host.set_host_key(b"");
        let session = session(&host).await;

        let fingerprint = session
            .fingerprint(HashAlg::Md5, FingerprintEncoding::Hex)
            .unwrap();
        assert_eq!(fingerprint.to_string(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn execute_trims_output() {
        let host = host();
        let mut session = session(&host).await;
        assert!(session.auth_by_password("root", "secret").await);

        assert_eq!(session.execute("whoami", None).await.unwrap(), "root");
        assert_eq!(session.execute("echo  padded  ", None).await.unwrap(), "padded");
    }

    #[tokio::test]
    async fn execute_passes_environment() {
        let host = host();
        let mut session = session(&host).await;
        assert!(session.auth_by_password("root", "secret").await);

        let env = BTreeMap::from([("LANG".to_owned(), "C.UTF-8".to_owned())]);
        let output = session.execute("printenv LANG", Some(env)).await.unwrap();
        assert_eq!(output, "C.UTF-8");
    }

    #[tokio::test]
    async fn terminal_override_applies_to_exec() {
        let host = host();
        let mut session = session(&host).await;
        assert!(session.auth_by_password("root", "secret").await);
        session
            .set_option(
                "terminal",
                ConfigValue::Terminal(TerminalOverride {
                    term: Some("xterm".to_owned()),
                    ..Default::default()
                }),
            )
            .unwrap();

        assert_eq!(session.execute("printenv TERM", None).await.unwrap(), "xterm");
    }

    #[tokio::test]
    async fn exec_failure_is_logged_with_command() {
        let host = host();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut session = session(&host).await;
        session.set_logger(Some(Arc::new(move |op: &str, msg: &str, err| {
            sink.lock().unwrap().push((op.to_owned(), msg.to_owned(), err));
        })));

        // channels need an authenticated user on the memory host
        let result = session.execute("uptime", None).await;
        assert!(matches!(result, Err(Error::Channel(_))));

        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|(op, msg, err)| op == "execute" && *err && msg.contains("command = uptime")));
    }

    #[tokio::test]
    async fn closed_session_makes_no_transport_calls() {
        let host = host();
        let mut session = session(&host).await;
        assert!(session.auth_by_password("root", "secret").await);
        session.disconnect().await;
        let calls = host.calls();

        assert!(matches!(session.execute("whoami", None).await, Err(Error::NotConnected)));
        assert!(matches!(session.get_shell(None).await, Err(Error::NotConnected)));
        assert!(matches!(
            session.fingerprint(HashAlg::Sha256, FingerprintEncoding::Hex),
            Err(Error::NotConnected)
        ));
        assert!(matches!(session.fs().stat("/").await, Err(Error::NotConnected)));
        assert_eq!(host.calls(), calls);
    }
}
