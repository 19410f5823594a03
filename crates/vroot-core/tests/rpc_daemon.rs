//! Client and daemon talking over a real Unix socket.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vroot_core::error::RpcError;
use vroot_core::rpc::protocol::{HEADER_SIZE, REPLY_FRAME_SIZE};
use vroot_core::rpc::{Command, CommandFrame, Reply, ReplyFrame};
use vroot_core::{DaemonState, InodeSimu, RpcClient, RpcServer, SessionConfig, VpermFields};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

struct RunningDaemon {
    socket: PathBuf,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), RpcError>>,
}

impl RunningDaemon {
    fn start(dir: &TempDir) -> Self {
        let server = RpcServer::bind(DaemonState::new(SessionConfig::new(dir.path()))).unwrap();
        let socket = server.socket_path().to_path_buf();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));
        Self {
            socket,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
        assert!(!self.socket.exists());
    }
}

/// Run blocking client code off the runtime threads
async fn with_client<T, F>(socket: &PathBuf, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce(&mut RpcClient) -> T + Send + 'static,
{
    let socket = socket.clone();
    tokio::task::spawn_blocking(move || {
        let mut client = RpcClient::connect(&socket, TIMEOUT).unwrap();
        f(&mut client)
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping_init_and_file_info() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("rules.toml"),
        "[[rules]]\ndir = \"/\"\nuse_orig_path = true\n",
    )
    .unwrap();
    let daemon = RunningDaemon::start(&dir);

    let (status, info, after_release) = with_client(&daemon.socket, |client| {
        client.ping().unwrap();
        let status = client.init().unwrap();

        client.vperm_set_ids(10, 20, Some(0), Some(0)).unwrap();
        client.vperm_set_mode(10, 20, 0o100644, 0o104755, 0o4000).unwrap();
        let info = client.get_file_info(10, 20).unwrap();

        client.vperm_release_ids(10, 20).unwrap();
        client.vperm_release_mode(10, 20).unwrap();
        let after_release = client.get_file_info(10, 20).unwrap();
        (status, info, after_release)
    })
    .await;

    assert!(status.starts_with("rule tree ready"));
    assert!(dir.path().join("RuleTree.bin").exists());

    let info = info.unwrap();
    assert_eq!(info.active, VpermFields::UID | VpermFields::GID | VpermFields::MODE);
    assert_eq!(info.virt_mode, 0o104755);
    assert_eq!(after_release, None);

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_set_file_info_last_writer_wins() {
    let dir = TempDir::new().unwrap();
    let daemon = RunningDaemon::start(&dir);

    let writers: Vec<_> = [1000u32, 2000u32]
        .into_iter()
        .map(|uid| {
            let socket = daemon.socket.clone();
            tokio::spawn(async move {
                with_client(&socket, move |client| {
                    for _ in 0..100 {
                        client.vperm_set_ids(7, 42, Some(uid), Some(uid)).unwrap();
                    }
                })
                .await
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let info = with_client(&daemon.socket, |client| client.get_file_info(7, 42).unwrap())
        .await
        .unwrap();
    assert!(info.uid == 1000 || info.uid == 2000);
    assert_eq!(info.uid, info.gid);

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dev_node_and_clear() {
    let dir = TempDir::new().unwrap();
    let daemon = RunningDaemon::start(&dir);

    let (before, after) = with_client(&daemon.socket, |client| {
        client.vperm_set_dev_node(1, 2, 0o020000, 0x0103).unwrap();
        let before = client.get_file_info(1, 2).unwrap();
        client.vperm_clear(1, 2).unwrap();
        (before, client.get_file_info(1, 2).unwrap())
    })
    .await;

    let before = before.unwrap();
    assert_eq!(before.active, VpermFields::DEV_NODE);
    assert_eq!(before.rdev, 0x0103);
    assert_eq!(after, None);

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raw_protocol_errors() {
    let dir = TempDir::new().unwrap();
    let daemon = RunningDaemon::start(&dir);

    let replies = {
        let socket = daemon.socket.clone();
        tokio::task::spawn_blocking(move || {
            let mut stream = UnixStream::connect(&socket).unwrap();
            stream.set_read_timeout(TIMEOUT).unwrap();
            let mut replies = Vec::new();

            let mut old = CommandFrame::new(11, Command::Ping);
            old.version = 2;
            let frames = [old, CommandFrame::new(12, Command::Unknown(40))];
            for frame in frames {
                stream.write_all(&frame.encode()).unwrap();
                let mut buf = [0u8; REPLY_FRAME_SIZE];
                stream.read_exact(&mut buf).unwrap();
                replies.push(ReplyFrame::decode(&buf).unwrap());
            }
            replies
        })
        .await
        .unwrap()
    };

    assert_eq!(replies[0].serial, 11);
    assert_eq!(replies[0].reply, Reply::ProtocolVersionError);
    assert_eq!(replies[1].serial, 12);
    assert_eq!(replies[1].reply, Reply::UnknownCommand);

    // the connection and the daemon survive both
    with_client(&daemon.socket, |client| client.ping().unwrap()).await;
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undecodable_command_gets_failed_reply() {
    let dir = TempDir::new().unwrap();
    let daemon = RunningDaemon::start(&dir);

    let reply = {
        let socket = daemon.socket.clone();
        tokio::task::spawn_blocking(move || {
            let info = InodeSimu::new(1, 2).with_ids(Some(0), None);
            let mut raw = CommandFrame::new(7, Command::SetFileInfo(info)).encode();
            // active field bits no daemon knows about
            raw[HEADER_SIZE + 16..HEADER_SIZE + 20].copy_from_slice(&0x100u32.to_le_bytes());

            let mut stream = UnixStream::connect(&socket).unwrap();
            stream.set_read_timeout(TIMEOUT).unwrap();
            stream.write_all(&raw).unwrap();
            let mut buf = [0u8; REPLY_FRAME_SIZE];
            stream.read_exact(&mut buf).unwrap();
            ReplyFrame::decode(&buf).unwrap()
        })
        .await
        .unwrap()
    };

    assert_eq!(reply.serial, 7);
    let Reply::Failed(message) = reply.reply else {
        panic!("expected a failed reply, got {:?}", reply.reply);
    };
    assert!(message.contains("0x100"));

    let stored = with_client(&daemon.socket, |client| client.get_file_info(1, 2).unwrap()).await;
    assert_eq!(stored, None);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_daemon_survives_abandoned_connections() {
    let dir = TempDir::new().unwrap();
    let daemon = RunningDaemon::start(&dir);

    let socket = daemon.socket.clone();
    tokio::task::spawn_blocking(move || {
        for _ in 0..50 {
            let stream = UnixStream::connect(&socket).unwrap();
            drop(stream);
        }
    })
    .await
    .unwrap();

    with_client(&daemon.socket, |client| client.ping().unwrap()).await;
    daemon.stop().await;
}

#[test]
fn test_connect_without_daemon_fails() {
    let dir = TempDir::new().unwrap();
    let err = RpcClient::connect(dir.path().join("vrootd.sock"), TIMEOUT).unwrap_err();
    assert!(matches!(err, RpcError::Io(_)));
}
