//! # sftp-server
//!
//! A minimal SFTP-over-SSH server. Every TCP connection gets its own SSH
//! session; only "session" channels are accepted, and only the "sftp"
//! subsystem is attached to them. The attached engine serves one directory
//! of the host filesystem, optionally read-only.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sftp_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig::new()
//!         .port(2022)
//!         .root("/srv/files")
//!         .read_only(true)
//!         .with_key_file("id_rsa")?
//!         .with_users(vec![("user".into(), "pass".into())]);
//!
//!     Server::new(config).run().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod delegate;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod server;
pub mod sftp_handler;
pub mod ssh_handler;

// Re-exports for convenience
pub use backend::{Backend, BackendError, BackendResult, DirEntry, FileInfo, LocalBackend};
pub use dispatch::Verdict;
pub use error::Error;
pub use server::{Server, ServerConfig, DEFAULT_PORT};
pub use ssh_handler::{AuthConfig, PasswordAuthCallback};
