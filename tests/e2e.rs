//! End-to-end tests: a russh client talking to a live server on localhost.

use async_trait::async_trait;
use russh::client;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::ChannelMsg;
use russh_sftp::client::SftpSession;
use sftp_server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const USER: &str = "tester";
const PASSWORD: &str = "correct horse";
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

struct Client;

#[async_trait]
impl client::Handler for Client {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

struct TestServer {
    addr: SocketAddr,
    root: TempDir,
}

async fn start_server(read_only: bool) -> TestServer {
    let root = TempDir::new().unwrap();
    std::fs::write(root.path().join("hello.txt"), b"hello").unwrap();

    let key =
        russh::keys::PrivateKey::random(&mut OsRng, russh::keys::Algorithm::Ed25519).unwrap();
    let config = ServerConfig::new()
        .with_key(key)
        .root(root.path())
        .read_only(read_only)
        .auth_rejection_time(Duration::from_millis(10))
        .with_users(vec![(USER.into(), PASSWORD.into())]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Server::new(config).serve(listener));

    TestServer { addr, root }
}

async fn connect(addr: SocketAddr) -> client::Handle<Client> {
    let config = Arc::new(client::Config::default());
    client::connect(config, addr, Client).await.unwrap()
}

async fn login(addr: SocketAddr) -> client::Handle<Client> {
    let mut handle = connect(addr).await;
    let authenticated = handle.authenticate_password(USER, PASSWORD).await.unwrap();
    assert!(authenticated, "valid credentials were rejected");
    handle
}

/// Wait for the success/failure reply to a channel request
async fn reply(channel: &mut russh::Channel<client::Msg>) -> bool {
    loop {
        match timeout(REPLY_TIMEOUT, channel.wait())
            .await
            .expect("timed out waiting for channel reply")
        {
            Some(ChannelMsg::Success) => return true,
            Some(ChannelMsg::Failure) => return false,
            Some(_) => continue,
            None => panic!("channel closed before reply"),
        }
    }
}

async fn open_sftp(handle: &client::Handle<Client>) -> SftpSession {
    let mut channel = handle.channel_open_session().await.unwrap();
    channel.request_subsystem(true, "sftp").await.unwrap();
    assert!(reply(&mut channel).await, "sftp subsystem was rejected");
    SftpSession::new(channel.into_stream()).await.unwrap()
}

async fn list(sftp: &SftpSession, path: &str) -> Vec<String> {
    sftp.read_dir(path)
        .await
        .unwrap()
        .map(|entry| entry.file_name())
        .collect()
}

#[tokio::test]
async fn test_sftp_subsystem_serves_listing() {
    let server = start_server(false).await;
    let handle = login(server.addr).await;

    let sftp = open_sftp(&handle).await;
    assert!(list(&sftp, "/").await.contains(&"hello.txt".to_string()));
    assert_eq!(sftp.read("hello.txt").await.unwrap(), b"hello");

    sftp.create_dir("uploads").await.unwrap();
    assert!(server.root.path().join("uploads").is_dir());
}

#[tokio::test]
async fn test_shell_is_rejected_and_channel_stays_usable() {
    let server = start_server(false).await;
    let handle = login(server.addr).await;

    let mut channel = handle.channel_open_session().await.unwrap();
    channel.request_shell(true).await.unwrap();
    assert!(!reply(&mut channel).await);

    channel.exec(true, "ls -la").await.unwrap();
    assert!(!reply(&mut channel).await);

    channel.request_subsystem(true, "shell").await.unwrap();
    assert!(!reply(&mut channel).await);

    channel.request_subsystem(true, "sftp").await.unwrap();
    assert!(reply(&mut channel).await);

    let sftp = SftpSession::new(channel.into_stream()).await.unwrap();
    assert!(list(&sftp, ".").await.contains(&"hello.txt".to_string()));
}

#[tokio::test]
async fn test_second_sftp_request_on_same_channel_is_rejected() {
    let server = start_server(false).await;
    let handle = login(server.addr).await;

    let mut channel = handle.channel_open_session().await.unwrap();
    channel.request_subsystem(true, "sftp").await.unwrap();
    channel.request_subsystem(true, "sftp").await.unwrap();
    assert!(reply(&mut channel).await);
    assert!(!reply(&mut channel).await);
}

#[tokio::test]
async fn test_wrong_credentials_are_rejected() {
    let server = start_server(false).await;

    for (user, password) in [(USER, "wrong"), ("intruder", PASSWORD), ("", "")] {
        let mut handle = connect(server.addr).await;
        let authenticated = handle.authenticate_password(user, password).await.unwrap();
        assert!(!authenticated, "{user:?}/{password:?} was accepted");
    }
}

#[tokio::test]
async fn test_direct_tcpip_is_rejected_and_session_still_works() {
    let server = start_server(false).await;
    let handle = login(server.addr).await;

    let forwarded = handle
        .channel_open_direct_tcpip("127.0.0.1", 22, "127.0.0.1", 40000)
        .await;
    // russh answers handler-refused opens of known channel types itself
    assert!(matches!(
        forwarded,
        Err(russh::Error::ChannelOpenFailure(
            russh::ChannelOpenFailure::AdministrativelyProhibited
        ))
    ));

    let sftp = open_sftp(&handle).await;
    assert!(list(&sftp, "/").await.contains(&"hello.txt".to_string()));
}

#[tokio::test]
async fn test_read_only_flag_reaches_every_connection() {
    let server = start_server(true).await;

    for _ in 0..2 {
        let handle = login(server.addr).await;
        let sftp = open_sftp(&handle).await;

        assert_eq!(sftp.read("hello.txt").await.unwrap(), b"hello");
        assert!(sftp.create_dir("blocked").await.is_err());
        assert!(sftp.remove_file("hello.txt").await.is_err());
        assert!(sftp.create("new.txt").await.is_err());
    }

    assert!(server.root.path().join("hello.txt").exists());
    assert!(!server.root.path().join("blocked").exists());
    assert!(!server.root.path().join("new.txt").exists());
}

#[tokio::test]
async fn test_broken_client_does_not_stop_server() {
    let server = start_server(false).await;

    let mut garbage = TcpStream::connect(server.addr).await.unwrap();
    garbage
        .write_all(b"definitely not an ssh banner\r\n\x00\x01\x02")
        .await
        .unwrap();
    drop(garbage);

    let handle = login(server.addr).await;
    let sftp = open_sftp(&handle).await;
    assert!(list(&sftp, "/").await.contains(&"hello.txt".to_string()));
}

#[tokio::test]
async fn test_concurrent_connections() {
    let server = start_server(false).await;
    let addr = server.addr;

    let clients: Vec<_> = (0..4)
        .map(|_| {
            tokio::spawn(async move {
                let handle = login(addr).await;
                let sftp = open_sftp(&handle).await;
                list(&sftp, "/").await
            })
        })
        .collect();

    for client in clients {
        let names = client.await.unwrap();
        assert!(names.contains(&"hello.txt".to_string()));
    }
}
