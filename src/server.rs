use crate::backend::LocalBackend;
use crate::error::{Error, Result};
use crate::ssh_handler::{AuthConfig, SshServer, SshSession};
use russh::server::{Config as SshConfig, Server as _};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Default SFTP listen port
pub const DEFAULT_PORT: u16 = 2022;

/// Pause after a failed `accept` before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Immutable server configuration, built once at startup
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: String,
    /// Port to bind to
    pub port: u16,
    /// SSH host keys
    pub keys: Vec<russh::keys::PrivateKey>,
    /// Password authentication
    pub auth: AuthConfig,
    /// Refuse every mutating SFTP operation
    pub read_only: bool,
    /// Directory served over SFTP
    pub root: PathBuf,
    /// Delay before answering a failed authentication
    pub auth_rejection_time: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            keys: Vec::new(),
            auth: AuthConfig::default(),
            read_only: false,
            root: PathBuf::from("."),
            auth_rejection_time: Duration::from_secs(3),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn auth_rejection_time(mut self, delay: Duration) -> Self {
        self.auth_rejection_time = delay;
        self
    }

    pub fn with_key(mut self, key: russh::keys::PrivateKey) -> Self {
        self.keys.push(key);
        self
    }

    /// Load a host key from a PEM/OpenSSH private key file
    pub fn with_key_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let key = russh::keys::load_secret_key(path, None)?;
        self.keys.push(key);
        Ok(self)
    }

    /// Load a host key from PEM/OpenSSH string data
    pub fn with_key_data(mut self, data: &str) -> Result<Self> {
        let key = russh::keys::decode_secret_key(data, None)?;
        self.keys.push(key);
        Ok(self)
    }

    /// Accept exactly these user/password pairs
    pub fn with_users(mut self, users: Vec<(String, String)>) -> Self {
        self.auth = AuthConfig::with_users(users);
        self
    }

    fn ssh_config(&self) -> Result<SshConfig> {
        if self.keys.is_empty() {
            return Err(Error::Config("no host key configured".into()));
        }

        Ok(SshConfig {
            auth_rejection_time: self.auth_rejection_time,
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            methods: russh::MethodSet::PASSWORD,
            keys: self.keys.clone(),
            ..Default::default()
        })
    }
}

/// SFTP server: accepts TCP connections and runs an SSH session on each
pub struct Server {
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn run(self) -> Result<()> {
        let addr = (self.config.bind_address.as_str(), self.config.port);
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// Accept errors are logged and skipped; handshake and session failures
    /// end only the connection they occurred on.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let ssh_config = Arc::new(self.config.ssh_config()?);

        let root = self.config.root.canonicalize()?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut factory = SshServer::new(
            Arc::new(LocalBackend::new(&root)),
            self.config.auth.clone(),
            self.config.read_only,
        );

        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            root = %root.display(),
            read_only = self.config.read_only,
            "Listening"
        );

        loop {
            let (stream, peer) = accept_with_backoff(|| listener.accept()).await;

            debug!(peer = %peer, "Accepted connection");
            let handler = factory.new_client(Some(peer));
            let ssh_config = ssh_config.clone();
            tokio::spawn(handle_connection(ssh_config, stream, peer, handler));
        }
    }
}

/// Retry `accept` until it yields a connection. Accept errors such as
/// EMFILE are transient and leave the listener usable, so each one is logged
/// and followed by a pause of [`ACCEPT_ERROR_BACKOFF`].
async fn accept_with_backoff<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

async fn handle_connection(
    ssh_config: Arc<SshConfig>,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    handler: SshSession<LocalBackend>,
) {
    match russh::server::run_stream(ssh_config, stream, handler).await {
        Ok(session) => match session.await {
            Ok(()) => debug!(peer = %peer, "Connection closed"),
            Err(e) => warn!(peer = %peer, error = %e, "Connection ended with error"),
        },
        Err(e) => warn!(peer = %peer, error = %e, "SSH handshake failed"),
    }
}
