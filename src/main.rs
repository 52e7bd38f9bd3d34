//! SFTP-over-SSH server serving a local directory

use clap::Parser;
use sftp_server::{Server, ServerConfig, DEFAULT_PORT};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sftp-server")]
#[command(about = "Minimal SFTP-over-SSH server", long_about = None)]
struct Cli {
    /// Read-only server: refuse every mutating operation
    #[arg(short = 'R', long, env = "SFTP_READ_ONLY")]
    read_only: bool,

    /// Write the debug trace to stderr
    #[arg(short = 'e', long, env = "SFTP_DEBUG")]
    debug_stderr: bool,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to listen on
    #[arg(long = "bind", env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    bind_address: String,

    /// Path to the host private key (PEM or OpenSSH format)
    #[arg(long, env = "HOST_KEY_FILE", default_value = "id_rsa")]
    host_key_file: PathBuf,

    /// User credentials (user:password format, can be repeated)
    #[arg(short, long = "user", env = "SFTP_USERS", value_delimiter = ',')]
    users: Vec<String>,

    /// Directory to serve
    #[arg(default_value = ".")]
    root: PathBuf,
}

/// Parse user:password credentials
fn parse_users(users: &[String]) -> Vec<(String, String)> {
    users
        .iter()
        .filter_map(|s| {
            let (user, pass) = s.split_once(':')?;
            (!user.is_empty()).then(|| (user.to_string(), pass.to_string()))
        })
        .collect()
}

fn init_tracing(debug: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("sftp_server={level}").parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    init_tracing(cli.debug_stderr)?;

    let config = ServerConfig::new()
        .bind_address(cli.bind_address)
        .port(cli.port)
        .read_only(cli.read_only)
        .root(cli.root)
        .with_key_file(&cli.host_key_file)
        .map_err(|e| format!("failed to load host key {}: {e}", cli.host_key_file.display()))?;
    eprintln!("Loaded host key from {}", cli.host_key_file.display());

    let users = parse_users(&cli.users);
    if users.is_empty() {
        eprintln!("Warning: No users configured, every login will be rejected");
        eprintln!("         Use --user user:pass or SFTP_USERS");
    }
    let config = config.with_users(users);

    eprintln!(
        "Starting {} SFTP server on {}:{}",
        if cli.read_only { "read-only" } else { "read-write" },
        config.bind_address,
        config.port
    );

    Server::new(config).run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_users() {
        let users = parse_users(&[
            "alice:s3cret".into(),
            "bob:pa:ss".into(),
            "nopassword".into(),
            ":empty-user".into(),
        ]);
        assert_eq!(
            users,
            vec![
                ("alice".to_string(), "s3cret".to_string()),
                ("bob".to_string(), "pa:ss".to_string()),
            ]
        );
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::parse_from(["sftp-server", "-R", "-e", "/srv"]);
        assert!(cli.read_only);
        assert!(cli.debug_stderr);
        assert_eq!(cli.root, PathBuf::from("/srv"));
        assert_eq!(cli.port, 2022);
        assert_eq!(cli.host_key_file, PathBuf::from("id_rsa"));
    }

    #[test]
    fn test_defaults_are_read_write_without_debug() {
        let cli = Cli::parse_from(["sftp-server"]);
        assert!(!cli.read_only);
        assert!(!cli.debug_stderr);
        assert_eq!(cli.root, PathBuf::from("."));
    }
}
