//! Blocking vperm RPC client
//!
//! Used from inside sandboxed processes, which may not run an async
//! runtime, so this side is plain `std` socket I/O.

use super::protocol::{
    Command, CommandFrame, Reply, ReplyFrame, PROTOCOL_VERSION, REPLY_FRAME_SIZE,
};
use crate::error::RpcError;
use crate::vperm::{InodeSimu, VpermFields};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// Connection to the session daemon
#[derive(Debug)]
pub struct RpcClient {
    stream: UnixStream,
    socket_path: PathBuf,
    serial: u16,
    timeout: Option<Duration>,
}

impl RpcClient {
    /// Connect to the daemon socket.
    ///
    /// `timeout` bounds each read and write; `None` blocks indefinitely.
    pub fn connect(
        socket_path: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> Result<Self, RpcError> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path)?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        debug!("Connected to vperm daemon at {}", socket_path.display());
        Ok(Self {
            stream,
            socket_path,
            serial: 0,
            timeout,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn transport_error(&self, error: std::io::Error) -> RpcError {
        match (error.kind(), self.timeout) {
            (ErrorKind::WouldBlock | ErrorKind::TimedOut, Some(timeout)) => {
                RpcError::Timeout(timeout)
            }
            _ => RpcError::Io(error),
        }
    }

    /// Send one command and wait for the reply carrying its serial
    pub fn call(&mut self, command: Command) -> Result<Reply, RpcError> {
        self.serial = self.serial.wrapping_add(1);
        let serial = self.serial;
        let frame = CommandFrame::new(serial, command);
        trace!("rpc -> {} serial={}", command.name(), serial);
        self.stream
            .write_all(&frame.encode())
            .map_err(|e| self.transport_error(e))?;

        loop {
            let mut buf = [0u8; REPLY_FRAME_SIZE];
            self.stream
                .read_exact(&mut buf)
                .map_err(|e| self.transport_error(e))?;
            let reply = ReplyFrame::decode(&buf)?;
            if reply.serial != serial {
                debug!(
                    "Discarding reply with serial {} while waiting for {}",
                    reply.serial, serial
                );
                continue;
            }
            if reply.reply == Reply::ProtocolVersionError || reply.version != PROTOCOL_VERSION {
                return Err(RpcError::ProtocolVersion {
                    local: PROTOCOL_VERSION,
                    remote: reply.version,
                });
            }
            return Ok(reply.reply);
        }
    }

    fn call_expect_ok(&mut self, command: Command) -> Result<(), RpcError> {
        match self.call(command)? {
            Reply::Ok => Ok(()),
            other => Err(unexpected(other, command)),
        }
    }

    /// Liveness check
    pub fn ping(&mut self) -> Result<(), RpcError> {
        self.call_expect_ok(Command::Ping)
    }

    /// Bootstrap session state on the daemon; returns its status line
    pub fn init(&mut self) -> Result<String, RpcError> {
        let command = Command::Init(0);
        match self.call(command)? {
            Reply::Message(status) => Ok(status),
            other => Err(unexpected(other, command)),
        }
    }

    pub fn vperm_set_ids(
        &mut self,
        dev: u64,
        ino: u64,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), RpcError> {
        let info = InodeSimu::new(dev, ino).with_ids(uid, gid);
        self.call_expect_ok(Command::SetFileInfo(info))
    }

    pub fn vperm_release_ids(&mut self, dev: u64, ino: u64) -> Result<(), RpcError> {
        self.release(dev, ino, VpermFields::UID | VpermFields::GID)
    }

    pub fn vperm_set_mode(
        &mut self,
        dev: u64,
        ino: u64,
        real_mode: u32,
        virt_mode: u32,
        suid_sgid: u32,
    ) -> Result<(), RpcError> {
        let info = InodeSimu::new(dev, ino).with_mode(real_mode, virt_mode, suid_sgid);
        self.call_expect_ok(Command::SetFileInfo(info))
    }

    pub fn vperm_release_mode(&mut self, dev: u64, ino: u64) -> Result<(), RpcError> {
        self.release(dev, ino, VpermFields::MODE)
    }

    pub fn vperm_set_dev_node(
        &mut self,
        dev: u64,
        ino: u64,
        devnode_type: u32,
        rdev: u64,
    ) -> Result<(), RpcError> {
        let info = InodeSimu::new(dev, ino).with_dev_node(devnode_type, rdev);
        self.call_expect_ok(Command::SetFileInfo(info))
    }

    /// Drop every override of an inode
    pub fn vperm_clear(&mut self, dev: u64, ino: u64) -> Result<(), RpcError> {
        self.call_expect_ok(Command::ClearFileInfo(InodeSimu::new(dev, ino)))
    }

    /// Current override of an inode, `None` if nothing is overridden
    pub fn get_file_info(&mut self, dev: u64, ino: u64) -> Result<Option<InodeSimu>, RpcError> {
        let command = Command::GetFileInfo(InodeSimu::new(dev, ino));
        match self.call(command)? {
            Reply::FileInfo(info) if info.is_empty() => Ok(None),
            Reply::FileInfo(info) => Ok(Some(info)),
            other => Err(unexpected(other, command)),
        }
    }

    fn release(&mut self, dev: u64, ino: u64, fields: VpermFields) -> Result<(), RpcError> {
        let mut info = InodeSimu::new(dev, ino);
        info.active = fields;
        self.call_expect_ok(Command::ReleaseFileInfo(info))
    }
}

fn unexpected(reply: Reply, command: Command) -> RpcError {
    match reply {
        Reply::Failed(message) => RpcError::Failed(format!("{}: {}", command.name(), message)),
        Reply::UnknownCommand => RpcError::UnknownCommand(command.type_tag()),
        other => RpcError::UnexpectedReply(other.type_tag()),
    }
}
