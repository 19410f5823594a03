//! Session daemon: the single writer for vperm records and the rule tree
//!
//! One tokio task serves each connection and handles its commands strictly
//! in order. Command handling itself is synchronous; every mutation happens
//! under the store lock, so no command is ever half applied.

use super::protocol::{
    Command, CommandFrame, Reply, ReplyFrame, COMMAND_FRAME_SIZE, PROTOCOL_VERSION,
};
use crate::config::SessionConfig;
use crate::error::{RpcError, VrootResult};
use crate::ruletree::compile_rules_file;
use crate::vperm::VpermStore;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State shared by all connections of one daemon
#[derive(Debug)]
pub struct DaemonState {
    config: SessionConfig,
    rules_path: PathBuf,
    store: VpermStore,
    init_status: Mutex<Option<String>>,
}

impl DaemonState {
    pub fn new(config: SessionConfig) -> Self {
        let rules_path = config.rules_path();
        Self::with_rules_path(config, rules_path)
    }

    pub fn with_rules_path(config: SessionConfig, rules_path: PathBuf) -> Self {
        Self {
            config,
            rules_path,
            store: VpermStore::new(),
            init_status: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &VpermStore {
        &self.store
    }

    /// Bootstrap the session once; later calls return the first status
    fn init_session(&self) -> VrootResult<String> {
        let mut status = self.init_status.lock();
        if let Some(done) = status.as_ref() {
            return Ok(done.clone());
        }

        let tree_path = self.config.rule_tree_path();
        let line = if self.rules_path.exists() {
            let count = compile_rules_file(&self.rules_path, &tree_path)?;
            format!(
                "rule tree ready: {} rules from {}",
                count,
                self.rules_path.display()
            )
        } else if tree_path.exists() {
            format!("using existing rule tree {}", tree_path.display())
        } else {
            warn!(
                "No rules at {} and no rule tree at {}",
                self.rules_path.display(),
                tree_path.display()
            );
            format!("no rules file at {}", self.rules_path.display())
        };
        info!("Session initialized: {}", line);
        *status = Some(line.clone());
        Ok(line)
    }
}

/// Apply one command and build its reply
pub fn handle_command(state: &DaemonState, frame: &CommandFrame) -> ReplyFrame {
    if frame.version != PROTOCOL_VERSION {
        warn!(
            "Rejecting command with protocol version {} (ours is {})",
            frame.version, PROTOCOL_VERSION
        );
        return ReplyFrame::new(frame.serial, Reply::ProtocolVersionError);
    }
    debug!("rpc <- {} serial={}", frame.command.name(), frame.serial);

    let reply = match &frame.command {
        Command::Ping => Reply::Ok,
        Command::Init(_) => match state.init_session() {
            Ok(line) => Reply::Message(line),
            Err(e) => {
                error!("Session init failed: {}", e);
                Reply::Failed(e.to_string())
            }
        },
        Command::SetFileInfo(info) => {
            state.store.set(info);
            Reply::Ok
        }
        Command::ReleaseFileInfo(info) => {
            state.store.release(info);
            Reply::Ok
        }
        Command::ClearFileInfo(info) => {
            state.store.clear(info.dev, info.ino);
            Reply::Ok
        }
        Command::GetFileInfo(info) => Reply::FileInfo(state.store.get(info.dev, info.ino)),
        Command::Unknown(tag) => {
            warn!("Unknown command type {}", tag);
            Reply::UnknownCommand
        }
    };
    ReplyFrame::new(frame.serial, reply)
}

/// Listening daemon
#[derive(Debug)]
pub struct RpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    state: Arc<DaemonState>,
}

impl RpcServer {
    /// Bind the session socket, replacing a stale one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(state: DaemonState) -> Result<Self, RpcError> {
        let socket_path = state.config.socket_path();
        Self::bind_at(&socket_path, state)
    }

    pub fn bind_at(socket_path: &Path, state: DaemonState) -> Result<Self, RpcError> {
        match std::fs::remove_file(socket_path) {
            Ok(()) => debug!("Removed stale socket {}", socket_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(socket_path)?;
        info!("vperm daemon listening on {}", socket_path.display());
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            state: Arc::new(state),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn state(&self) -> &Arc<DaemonState> {
        &self.state
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RpcError> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            if let Some(pause) = accept_backoff(&e) {
                                tokio::time::sleep(pause).await;
                            }
                            continue;
                        }
                    };
                    let state = Arc::clone(&self.state);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, state, shutdown).await {
                            warn!("Connection ended with error: {}", e);
                        }
                    });
                }
            }
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!("Could not remove {}: {}", self.socket_path.display(), e);
        }
        info!("vperm daemon stopped");
        Ok(())
    }
}

/// Pause before the next accept after `error`; out of descriptors or memory
/// the listener would otherwise spin on the same failure
fn accept_backoff(error: &std::io::Error) -> Option<Duration> {
    match error.raw_os_error() {
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) => {
            Some(ACCEPT_BACKOFF)
        }
        _ => None,
    }
}

async fn serve_connection(
    mut stream: UnixStream,
    state: Arc<DaemonState>,
    shutdown: CancellationToken,
) -> Result<(), RpcError> {
    let mut buf = [0u8; COMMAND_FRAME_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = stream.read_exact(&mut buf) => {
                match read {
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                        debug!("Client disconnected");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        let reply = match CommandFrame::decode(&buf) {
            Ok(frame) => handle_command(&state, &frame),
            Err(e) => {
                let serial = CommandFrame::peek_serial(&buf);
                warn!("Malformed command serial={}: {}", serial, e);
                ReplyFrame::new(serial, Reply::Failed(e.to_string()))
            }
        };
        stream.write_all(&reply.encode()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vperm::InodeSimu;
    use tempfile::TempDir;

    fn state(dir: &TempDir) -> DaemonState {
        DaemonState::new(SessionConfig::new(dir.path()))
    }

    #[test]
    fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut frame = CommandFrame::new(4, Command::Ping);
        frame.version = 1;
        let reply = handle_command(&state(&dir), &frame);
        assert_eq!(reply.reply, Reply::ProtocolVersionError);
        assert_eq!(reply.serial, 4);
        assert_eq!(reply.version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_unknown_and_ping() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let reply = handle_command(&state, &CommandFrame::new(1, Command::Unknown(99)));
        assert_eq!(reply.reply, Reply::UnknownCommand);
        let reply = handle_command(&state, &CommandFrame::new(2, Command::Ping));
        assert_eq!(reply.reply, Reply::Ok);
    }

    #[test]
    fn test_file_info_commands() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let info = InodeSimu::new(1, 2).with_ids(Some(0), Some(0));
        handle_command(&state, &CommandFrame::new(1, Command::SetFileInfo(info)));

        let reply = handle_command(
            &state,
            &CommandFrame::new(2, Command::GetFileInfo(InodeSimu::new(1, 2))),
        );
        assert_eq!(reply.reply, Reply::FileInfo(info));

        handle_command(&state, &CommandFrame::new(3, Command::ClearFileInfo(info)));
        assert!(state.store().is_empty());
    }

    #[test]
    fn test_init_compiles_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("rules.toml"),
            "[[rules]]\ndir = \"/\"\nuse_orig_path = true\n",
        )
        .unwrap();
        let state = state(&dir);

        let first = handle_command(&state, &CommandFrame::new(1, Command::Init(0)));
        let Reply::Message(line) = first.reply else {
            panic!("expected a status message");
        };
        assert!(line.contains("1 rules"));
        assert!(dir.path().join("RuleTree.bin").exists());

        std::fs::remove_file(dir.path().join("rules.toml")).unwrap();
        let again = handle_command(&state, &CommandFrame::new(2, Command::Init(0)));
        assert_eq!(again.reply, Reply::Message(line));
    }

    #[test]
    fn test_accept_backoff_only_on_exhaustion() {
        let exhausted = std::io::Error::from_raw_os_error(libc::EMFILE);
        assert_eq!(accept_backoff(&exhausted), Some(ACCEPT_BACKOFF));
        let aborted = std::io::Error::from_raw_os_error(libc::ECONNABORTED);
        assert_eq!(accept_backoff(&aborted), None);
    }

    #[test]
    fn test_init_reports_bad_rules() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rules.toml"), "[[rules]]\ndir = \"/\"\n").unwrap();
        let reply = handle_command(&state(&dir), &CommandFrame::new(1, Command::Init(0)));
        assert!(matches!(reply.reply, Reply::Failed(_)));
    }
}
