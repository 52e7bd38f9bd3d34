use crate::backend::Backend;
use crate::delegate::{Grant, SftpDelegate};
use crate::dispatch::{self, Verdict, UNKNOWN_CHANNEL_TYPE};
use async_trait::async_trait;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Password authentication callback type
pub type PasswordAuthCallback = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Authentication configuration
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub password_callback: Option<PasswordAuthCallback>,
}

impl AuthConfig {
    /// Accept exactly the given user/password pairs
    pub fn with_users(users: Vec<(String, String)>) -> Self {
        let users = Arc::new(users);
        Self {
            password_callback: Some(Arc::new(move |user, pass| {
                users.iter().any(|(u, p)| u == user && p == pass)
            })),
        }
    }

    pub fn check_password(&self, user: &str, password: &str) -> bool {
        self.password_callback
            .as_ref()
            .is_some_and(|callback| callback(user, password))
    }
}

/// Creates one [`SshSession`] per accepted connection
pub struct SshServer<B: Backend> {
    backend: Arc<B>,
    auth_config: AuthConfig,
    read_only: bool,
}

impl<B: Backend> SshServer<B> {
    pub fn new(backend: Arc<B>, auth_config: AuthConfig, read_only: bool) -> Self {
        Self {
            backend,
            auth_config,
            read_only,
        }
    }
}

impl<B: Backend> Clone for SshServer<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            auth_config: self.auth_config.clone(),
            read_only: self.read_only,
        }
    }
}

impl<B: Backend> russh::server::Server for SshServer<B> {
    type Handler = SshSession<B>;

    fn new_client(&mut self, addr: Option<SocketAddr>) -> Self::Handler {
        SshSession::new(
            addr,
            self.backend.clone(),
            self.auth_config.clone(),
            self.read_only,
        )
    }
}

/// Per-connection handler: authentication, channel filtering and subsystem gating
pub struct SshSession<B: Backend> {
    peer: Option<SocketAddr>,
    backend: Arc<B>,
    auth_config: AuthConfig,
    read_only: bool,
    /// Session channels whose delegate is still waiting for the sftp grant
    pending: HashMap<ChannelId, Grant>,
    /// Channels with a running SFTP engine
    serving: HashSet<ChannelId>,
}

impl<B: Backend> SshSession<B> {
    pub fn new(
        peer: Option<SocketAddr>,
        backend: Arc<B>,
        auth_config: AuthConfig,
        read_only: bool,
    ) -> Self {
        Self {
            peer,
            backend,
            auth_config,
            read_only,
            pending: HashMap::new(),
            serving: HashSet::new(),
        }
    }

    /// Apply the channel-type filter. Accepted session channels get a delegate
    /// that waits for the sftp grant.
    fn admit_channel(&mut self, channel_type: &str, channel: Channel<Msg>) -> bool {
        let channel_id = channel.id();
        debug!(peer = ?self.peer, channel_id = ?channel_id, channel_type, "Incoming channel");

        match dispatch::channel_verdict(channel_type) {
            Verdict::Reject => {
                info!(peer = ?self.peer, channel_type, reason = UNKNOWN_CHANNEL_TYPE, "Rejecting channel");
                false
            }
            Verdict::Accept => {
                let delegate = SftpDelegate::new(self.backend.clone(), self.read_only);
                let (grant, _task) = delegate.spawn(channel);
                self.pending.insert(channel_id, grant);
                debug!(peer = ?self.peer, channel_id = ?channel_id, "Channel accepted");
                true
            }
        }
    }

    /// Answer a channel request, logging instead of failing when the reply cannot be sent
    fn reply(&self, channel_id: ChannelId, verdict: Verdict, session: &mut Session) {
        let result = match verdict {
            Verdict::Accept => session.channel_success(channel_id),
            Verdict::Reject => session.channel_failure(channel_id),
        };
        if let Err(e) = result {
            warn!(peer = ?self.peer, channel_id = ?channel_id, error = %e, "Failed to send channel reply");
        }
    }

    fn reject_request(&self, channel_id: ChannelId, request: &str, session: &mut Session) {
        debug!(peer = ?self.peer, channel_id = ?channel_id, request, "Rejecting channel request");
        self.reply(channel_id, Verdict::Reject, session);
    }
}

#[async_trait]
impl<B: Backend> russh::server::Handler for SshSession<B> {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        debug!(peer = ?self.peer, user, "Login");

        if self.auth_config.check_password(user, password) {
            info!(peer = ?self.peer, user, "Password authentication successful");
            return Ok(Auth::Accept);
        }

        info!(peer = ?self.peer, user, "Password rejected");
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.admit_channel(dispatch::SESSION_CHANNEL, channel))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(host_to_connect, port_to_connect, "direct-tcpip requested");
        Ok(self.admit_channel("direct-tcpip", channel))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.admit_channel("forwarded-tcpip", channel))
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.admit_channel("x11", channel))
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let verdict = dispatch::subsystem_verdict(name);
        debug!(peer = ?self.peer, channel_id = ?channel_id, name, accepted = verdict.is_accept(), "Subsystem request");

        if !verdict.is_accept() {
            self.reply(channel_id, Verdict::Reject, session);
            return Ok(());
        }

        let Some(grant) = self.pending.remove(&channel_id) else {
            // Engine already attached, or not a channel we opened
            self.reply(channel_id, Verdict::Reject, session);
            return Ok(());
        };

        // Success must be queued before the engine can write to the channel
        self.reply(channel_id, Verdict::Accept, session);
        if grant.send(()).is_err() {
            warn!(peer = ?self.peer, channel_id = ?channel_id, "SFTP delegate exited before grant");
            return Ok(());
        }
        self.serving.insert(channel_id);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.reject_request(channel_id, "shell", session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.reject_request(channel_id, "exec", session);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel_id: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.reject_request(channel_id, "pty-req", session);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel_id: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.reject_request(channel_id, "env", session);
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(peer = ?self.peer, address, port = *port, "Discarding global request");
        Ok(false)
    }

    async fn channel_eof(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer = ?self.peer, channel_id = ?channel_id, "Channel EOF");
        session.close(channel_id)?;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping a pending grant releases its waiting delegate
        self.pending.remove(&channel_id);
        if self.serving.remove(&channel_id) {
            info!(peer = ?self.peer, channel_id = ?channel_id, "SFTP client exited session");
        } else {
            debug!(peer = ?self.peer, channel_id = ?channel_id, "Channel closed");
        }
        Ok(())
    }
}
