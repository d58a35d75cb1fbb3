//! SSH transport over russh.
//!
//! One authenticated session per transport. Commands run on fresh exec
//! channels; bulk transfer runs the remote `scp` on an exec channel and
//! speaks the protocol in [`crate::scp`] over the channel stream.
//!
//! Session lifecycle:
//!
//! ```text
//!   Disconnected ──connect──► Connecting ──auth ok──► Authenticated
//!        ▲                        │                        │
//!        └──── failure ───────────┘◄── session-fatal ──────┘
//!                                                          │
//!   Closed ◄───────────────────── close() ─────────────────┘
//! ```
//!
//! A session-fatal failure drops back to `Disconnected` and the next call
//! reconnects; nothing reconnects in the middle of a call.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as StatusLock;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::constants::{
    DEFAULT_SSH_PORT, SCP_BUFFER_SIZE, SSH_INACTIVITY_TIMEOUT, SSH_KEEPALIVE_INTERVAL,
    SSH_KEEPALIVE_MAX,
};
use crate::error::{TransportError, TransportResult};
use crate::scp;
use crate::transport::{ExecOutput, FileTimes, RemoteTransport};

/// How to authenticate.
#[derive(Clone)]
pub enum Credentials {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Try every identity offered by the agent at `SSH_AUTH_SOCK`.
    Agent,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credentials::Agent => f.write_str("Agent"),
        }
    }
}

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
}

impl SshConfig {
    /// Agent-authenticated config for the current user on the default port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: whoami::username(),
            credentials: Credentials::Agent,
        }
    }

    fn validate(&self) -> TransportResult<()> {
        if self.host.trim().is_empty() {
            return Err(TransportError::Configuration("host must not be empty".into()));
        }
        if self.username.is_empty() {
            return Err(TransportError::Configuration("username must not be empty".into()));
        }
        Ok(())
    }
}

/// Client handler for russh - handles server key verification
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = TransportError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not verified against known_hosts.
        tracing::warn!(
            fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
            "accepting server key without verification"
        );
        Ok(true)
    }
}

type Session = Arc<Handle<ClientHandler>>;

enum SessionState {
    Disconnected,
    Authenticated(Session),
    Closed,
}

/// Externally visible session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Authenticated,
    Closed,
}

/// [`RemoteTransport`] over a single russh session.
pub struct SshTransport {
    config: SshConfig,
    state: Mutex<SessionState>,
    status: StatusLock<SessionStatus>,
}

impl SshTransport {
    /// Create a transport; the session is established on first use.
    pub fn new(config: SshConfig) -> TransportResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(SessionState::Disconnected),
            status: StatusLock::new(SessionStatus::Disconnected),
        })
    }

    /// Create a transport and establish the session immediately.
    pub async fn connect(config: SshConfig) -> TransportResult<Self> {
        let transport = Self::new(config)?;
        transport.session().await?;
        Ok(transport)
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// The live session, connecting first if needed.
    async fn session(&self) -> TransportResult<Session> {
        let mut state = self.state.lock().await;
        match &*state {
            SessionState::Closed => return Err(TransportError::Closed),
            SessionState::Authenticated(session) if !session.is_closed() => {
                return Ok(session.clone());
            }
            SessionState::Authenticated(_) => {
                tracing::info!(host = %self.config.host, "session dropped, reconnecting");
            }
            SessionState::Disconnected => {}
        }

        *state = SessionState::Disconnected;
        *self.status.lock() = SessionStatus::Connecting;
        match self.establish().await {
            Ok(session) => {
                let session = Arc::new(session);
                *state = SessionState::Authenticated(session.clone());
                *self.status.lock() = SessionStatus::Authenticated;
                Ok(session)
            }
            Err(e) => {
                *self.status.lock() = SessionStatus::Disconnected;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(host = %self.config.host, port = self.config.port))]
    async fn establish(&self) -> TransportResult<Handle<ClientHandler>> {
        let config = Config {
            inactivity_timeout: Some(SSH_INACTIVITY_TIMEOUT),
            keepalive_interval: Some(SSH_KEEPALIVE_INTERVAL),
            keepalive_max: SSH_KEEPALIVE_MAX,
            ..<_>::default()
        };

        let addr = (self.config.host.as_str(), self.config.port);
        let mut session = client::connect(Arc::new(config), addr, ClientHandler)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        tracing::info!(user = %self.config.username, "connected, attempting authentication");
        self.authenticate(&mut session).await?;
        tracing::info!(user = %self.config.username, "authenticated");
        Ok(session)
    }

    async fn authenticate(&self, session: &mut Handle<ClientHandler>) -> TransportResult<()> {
        let user = self.config.username.as_str();
        let accepted = match &self.config.credentials {
            Credentials::Password(password) => session
                .authenticate_password(user, password)
                .await?
                .success(),
            Credentials::KeyFile { path, passphrase } => {
                let key = russh::keys::load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                    TransportError::AuthFailed(format!("cannot load {}: {}", path.display(), e))
                })?;
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                let key = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
                session.authenticate_publickey(user, key).await?.success()
            }
            Credentials::Agent => self.authenticate_with_agent(session).await?,
        };

        if accepted {
            Ok(())
        } else {
            Err(TransportError::AuthFailed(format!(
                "server rejected {:?} for {}",
                self.config.credentials, user
            )))
        }
    }

    async fn authenticate_with_agent(
        &self,
        session: &mut Handle<ClientHandler>,
    ) -> TransportResult<bool> {
        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| TransportError::AgentFailed(e.to_string()))?;
        let keys = agent
            .request_identities()
            .await
            .map_err(|e| TransportError::AgentFailed(e.to_string()))?;
        if keys.is_empty() {
            return Err(TransportError::AgentFailed("no identities in agent".into()));
        }
        tracing::debug!(count = keys.len(), "agent identities");

        let user = self.config.username.as_str();
        for key in &keys {
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            match session
                .authenticate_publickey_with(user, key.clone(), hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => return Ok(true),
                Ok(_) => tracing::debug!(key = %key.fingerprint(HashAlg::Sha256), "key rejected"),
                Err(e) => tracing::warn!(error = %e, "agent signing failed"),
            }
        }
        Ok(false)
    }

    /// Mark the session stale after a session-fatal failure.
    async fn invalidate(&self, error: &TransportError) {
        if !error.is_session_fatal() {
            return;
        }
        let mut state = self.state.lock().await;
        if matches!(*state, SessionState::Authenticated(_)) {
            tracing::warn!(error = %error, "session marked stale");
            *state = SessionState::Disconnected;
            *self.status.lock() = SessionStatus::Disconnected;
        }
    }

    async fn open_exec(&self, command: &str) -> TransportResult<Channel<Msg>> {
        let session = self.session().await?;
        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| TransportError::channel(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| TransportError::channel(e.to_string()))?;
        Ok(channel)
    }

    async fn run_exec(&self, command: &str) -> TransportResult<ExecOutput> {
        let mut channel = self.open_exec(command).await?;
        let mut output = ExecOutput::default();
        let mut eof = false;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    output.stderr.extend_from_slice(&data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                ChannelMsg::Eof => eof = true,
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        // The channel ended without EOF or exit status: the session went away.
        if !eof && output.exit_status.is_none() {
            return Err(TransportError::Disconnected);
        }
        Ok(output)
    }

    async fn scp_stream(
        &self,
        command: &str,
    ) -> TransportResult<BufReader<russh::ChannelStream<Msg>>> {
        let channel = self.open_exec(command).await?;
        Ok(BufReader::with_capacity(SCP_BUFFER_SIZE, channel.into_stream()))
    }

    async fn run_download(
        &self,
        remote: &str,
        local: &Path,
        recursive: bool,
    ) -> TransportResult<()> {
        let mut stream = self.scp_stream(&scp::source_command(remote, recursive)).await?;
        scp::receive_to(&mut stream, local).await
    }

    async fn run_download_to_vec(&self, remote: &str) -> TransportResult<Vec<u8>> {
        let mut stream = self.scp_stream(&scp::source_command(remote, false)).await?;
        scp::receive_to_vec(&mut stream, remote).await
    }

    async fn run_upload(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        remote: &str,
        permissions: u32,
        times: FileTimes,
    ) -> TransportResult<()> {
        let mut stream = self
            .scp_stream(&scp::sink_command(remote, false, false, true))
            .await?;
        let name = remote.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or(remote);
        scp::send_file(&mut stream, source, size, name, permissions, Some(times)).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn run_upload_path(
        &self,
        local: &Path,
        remote: &str,
        recursive: bool,
        target_is_directory: bool,
    ) -> TransportResult<()> {
        let mut stream = self
            .scp_stream(&scp::sink_command(remote, recursive, target_is_directory, false))
            .await?;
        scp::send_path(&mut stream, local, recursive).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn settle<T>(&self, result: TransportResult<T>) -> TransportResult<T> {
        if let Err(e) = &result {
            self.invalidate(e).await;
        }
        result
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    #[instrument(skip(self), level = "debug")]
    async fn exec(&self, command: &str) -> TransportResult<ExecOutput> {
        let result = self.run_exec(command).await;
        self.settle(result).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn download(&self, remote: &str, local: &Path, recursive: bool) -> TransportResult<()> {
        let result = self.run_download(remote, local, recursive).await;
        self.settle(result).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn download_to_vec(&self, remote: &str) -> TransportResult<Vec<u8>> {
        let result = self.run_download_to_vec(remote).await;
        self.settle(result).await
    }

    #[instrument(skip(self, source, times), level = "debug")]
    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        remote: &str,
        permissions: u32,
        times: FileTimes,
    ) -> TransportResult<()> {
        let result = self.run_upload(source, size, remote, permissions, times).await;
        self.settle(result).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn upload_path(
        &self,
        local: &Path,
        remote: &str,
        recursive: bool,
        target_is_directory: bool,
    ) -> TransportResult<()> {
        let result = self
            .run_upload_path(local, remote, recursive, target_is_directory)
            .await;
        self.settle(result).await
    }

    fn is_open(&self) -> bool {
        *self.status.lock() == SessionStatus::Authenticated
    }

    async fn close(&self) -> TransportResult<()> {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, SessionState::Closed);
        *self.status.lock() = SessionStatus::Closed;
        if let SessionState::Authenticated(session) = previous {
            session
                .disconnect(Disconnect::ByApplication, "client closing", "en")
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            tracing::info!(host = %self.config.host, "session closed");
        }
        Ok(())
    }
}
