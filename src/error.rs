use thiserror::Error;

/// Startup and serving errors.
///
/// Per-connection failures never surface here; they are logged and end only
/// the connection they belong to.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Host key error: {0}")]
    Key(#[from] russh_keys::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
