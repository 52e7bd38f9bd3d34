//! Per-channel SFTP delegate.
//!
//! A delegate is spawned for every accepted session channel but holds the
//! channel idle until the dispatcher fires its grant, which happens only after
//! an "sftp" subsystem request on that channel was answered with success.
//! If the grant sender is dropped instead, the channel is released without
//! ever reaching the engine.

use crate::backend::Backend;
use crate::sftp_handler::SftpHandler;
use russh::server::Msg;
use russh::Channel;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

/// Fired by the dispatcher to start the engine on a channel
pub type Grant = oneshot::Sender<()>;

/// How a delegate finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegateOutcome {
    /// The SFTP engine was attached to the channel
    Started,
    /// The grant was dropped before it fired
    Abandoned,
}

/// Starts the SFTP engine on one channel once granted
pub struct SftpDelegate<B: Backend> {
    backend: Arc<B>,
    read_only: bool,
}

impl<B: Backend> SftpDelegate<B> {
    pub fn new(backend: Arc<B>, read_only: bool) -> Self {
        Self { backend, read_only }
    }

    /// Spawn a delegate owning `channel`. The returned grant must be fired
    /// (or dropped) by the dispatcher.
    pub fn spawn(self, channel: Channel<Msg>) -> (Grant, JoinHandle<DelegateOutcome>) {
        let (grant, granted) = oneshot::channel();
        let span = info_span!("sftp", channel_id = ?channel.id());
        let task = tokio::spawn(
            self.run_when_granted(granted, move || channel.into_stream())
                .instrument(span),
        );
        (grant, task)
    }

    /// Wait for the grant, then hand the stream produced by `open_stream` to
    /// the `russh-sftp` engine.
    pub async fn run_when_granted<S, F>(
        self,
        granted: oneshot::Receiver<()>,
        open_stream: F,
    ) -> DelegateOutcome
    where
        F: FnOnce() -> S,
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if granted.await.is_err() {
            debug!("Channel released without sftp grant");
            return DelegateOutcome::Abandoned;
        }

        let mode = if self.read_only {
            "read-only"
        } else {
            "read-write"
        };
        info!(mode, "Starting SFTP session");

        let handler = SftpHandler::new(self.backend, self.read_only);
        russh_sftp::server::run(open_stream(), handler).await;
        DelegateOutcome::Started
    }
}
