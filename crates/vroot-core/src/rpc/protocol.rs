//! Fixed-size vperm RPC frames
//!
//! Both frames start with the same 8-byte header (version, serial, type)
//! followed by a payload union. Everything is little-endian.

use crate::error::RpcError;
use crate::vperm::{InodeSimu, INODE_SIMU_SIZE};

pub const PROTOCOL_VERSION: u16 = 3;

pub const HEADER_SIZE: usize = 8;
pub const COMMAND_FRAME_SIZE: usize = HEADER_SIZE + INODE_SIMU_SIZE;
pub const MAX_MESSAGE_LEN: usize = 1000;
pub const REPLY_FRAME_SIZE: usize = HEADER_SIZE + MAX_MESSAGE_LEN;

pub const CMD_PING: u32 = 1;
pub const CMD_SET_FILE_INFO: u32 = 2;
pub const CMD_RELEASE_FILE_INFO: u32 = 3;
pub const CMD_CLEAR_FILE_INFO: u32 = 4;
pub const CMD_INIT: u32 = 5;
pub const CMD_GET_FILE_INFO: u32 = 6;

pub const REPLY_OK: u32 = 1;
pub const REPLY_FAILED: u32 = 2;
pub const REPLY_UNKNOWN_COMMAND: u32 = 3;
pub const REPLY_PROTOCOL_VERSION_ERROR: u32 = 4;
pub const REPLY_MESSAGE: u32 = 5;
pub const REPLY_FILEINFO: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    SetFileInfo(InodeSimu),
    ReleaseFileInfo(InodeSimu),
    ClearFileInfo(InodeSimu),
    /// Bootstrap session state; the status word is reserved
    Init(u32),
    GetFileInfo(InodeSimu),
    /// A type tag this side does not know
    Unknown(u32),
}

impl Command {
    pub fn type_tag(&self) -> u32 {
        match self {
            Command::Ping => CMD_PING,
            Command::SetFileInfo(_) => CMD_SET_FILE_INFO,
            Command::ReleaseFileInfo(_) => CMD_RELEASE_FILE_INFO,
            Command::ClearFileInfo(_) => CMD_CLEAR_FILE_INFO,
            Command::Init(_) => CMD_INIT,
            Command::GetFileInfo(_) => CMD_GET_FILE_INFO,
            Command::Unknown(tag) => *tag,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::SetFileInfo(_) => "SET_FILE_INFO",
            Command::ReleaseFileInfo(_) => "RELEASE_FILE_INFO",
            Command::ClearFileInfo(_) => "CLEAR_FILE_INFO",
            Command::Init(_) => "INIT",
            Command::GetFileInfo(_) => "GET_FILE_INFO",
            Command::Unknown(_) => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Failed(String),
    UnknownCommand,
    ProtocolVersionError,
    Message(String),
    FileInfo(InodeSimu),
    Unknown(u32),
}

impl Reply {
    pub fn type_tag(&self) -> u32 {
        match self {
            Reply::Ok => REPLY_OK,
            Reply::Failed(_) => REPLY_FAILED,
            Reply::UnknownCommand => REPLY_UNKNOWN_COMMAND,
            Reply::ProtocolVersionError => REPLY_PROTOCOL_VERSION_ERROR,
            Reply::Message(_) => REPLY_MESSAGE,
            Reply::FileInfo(_) => REPLY_FILEINFO,
            Reply::Unknown(tag) => *tag,
        }
    }
}

/// Frame header shared by commands and replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub serial: u16,
    pub type_tag: u32,
}

impl Header {
    fn write(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.version.to_le_bytes());
        buf[2..4].copy_from_slice(&self.serial.to_le_bytes());
        buf[4..8].copy_from_slice(&self.type_tag.to_le_bytes());
    }

    fn read(buf: &[u8]) -> Self {
        Self {
            version: u16::from_le_bytes([buf[0], buf[1]]),
            serial: u16::from_le_bytes([buf[2], buf[3]]),
            type_tag: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub version: u16,
    pub serial: u16,
    pub command: Command,
}

impl CommandFrame {
    pub fn new(serial: u16, command: Command) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            serial,
            command,
        }
    }

    pub fn encode(&self) -> [u8; COMMAND_FRAME_SIZE] {
        let mut buf = [0u8; COMMAND_FRAME_SIZE];
        Header {
            version: self.version,
            serial: self.serial,
            type_tag: self.command.type_tag(),
        }
        .write(&mut buf);
        match &self.command {
            Command::SetFileInfo(info)
            | Command::ReleaseFileInfo(info)
            | Command::ClearFileInfo(info)
            | Command::GetFileInfo(info) => buf[HEADER_SIZE..].copy_from_slice(&info.encode()),
            Command::Init(status) => {
                buf[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&status.to_le_bytes())
            }
            Command::Ping | Command::Unknown(_) => {}
        }
        buf
    }

    /// Serial of a raw command frame; the header is readable even when the
    /// payload is not
    pub fn peek_serial(buf: &[u8; COMMAND_FRAME_SIZE]) -> u16 {
        Header::read(buf).serial
    }

    /// Decode a command frame.
    ///
    /// The payload is only interpreted when the version matches; a frame
    /// from another protocol version decodes as [`Command::Unknown`] so the
    /// receiver can still answer with its serial.
    pub fn decode(buf: &[u8]) -> Result<Self, RpcError> {
        if buf.len() != COMMAND_FRAME_SIZE {
            return Err(RpcError::Malformed(format!(
                "command frame is {} bytes, expected {}",
                buf.len(),
                COMMAND_FRAME_SIZE
            )));
        }
        let header = Header::read(buf);
        let payload = &buf[HEADER_SIZE..];
        let command = if header.version != PROTOCOL_VERSION {
            Command::Unknown(header.type_tag)
        } else {
            match header.type_tag {
                CMD_PING => Command::Ping,
                CMD_SET_FILE_INFO => Command::SetFileInfo(InodeSimu::decode(payload)?),
                CMD_RELEASE_FILE_INFO => Command::ReleaseFileInfo(InodeSimu::decode(payload)?),
                CMD_CLEAR_FILE_INFO => Command::ClearFileInfo(InodeSimu::decode(payload)?),
                CMD_INIT => Command::Init(u32::from_le_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ])),
                CMD_GET_FILE_INFO => Command::GetFileInfo(InodeSimu::decode(payload)?),
                other => Command::Unknown(other),
            }
        };
        Ok(Self {
            version: header.version,
            serial: header.serial,
            command,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    pub version: u16,
    pub serial: u16,
    pub reply: Reply,
}

impl ReplyFrame {
    pub fn new(serial: u16, reply: Reply) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            serial,
            reply,
        }
    }

    pub fn encode(&self) -> [u8; REPLY_FRAME_SIZE] {
        let mut buf = [0u8; REPLY_FRAME_SIZE];
        Header {
            version: self.version,
            serial: self.serial,
            type_tag: self.reply.type_tag(),
        }
        .write(&mut buf);
        match &self.reply {
            Reply::Message(text) | Reply::Failed(text) => {
                let text = truncate_message(text);
                buf[HEADER_SIZE..HEADER_SIZE + text.len()].copy_from_slice(text.as_bytes());
            }
            Reply::FileInfo(info) => {
                buf[HEADER_SIZE..HEADER_SIZE + INODE_SIMU_SIZE].copy_from_slice(&info.encode())
            }
            Reply::Ok
            | Reply::UnknownCommand
            | Reply::ProtocolVersionError
            | Reply::Unknown(_) => {}
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RpcError> {
        if buf.len() != REPLY_FRAME_SIZE {
            return Err(RpcError::Malformed(format!(
                "reply frame is {} bytes, expected {}",
                buf.len(),
                REPLY_FRAME_SIZE
            )));
        }
        let header = Header::read(buf);
        let payload = &buf[HEADER_SIZE..];
        let reply = match header.type_tag {
            REPLY_OK => Reply::Ok,
            REPLY_FAILED => Reply::Failed(read_message(payload)?),
            REPLY_UNKNOWN_COMMAND => Reply::UnknownCommand,
            REPLY_PROTOCOL_VERSION_ERROR => Reply::ProtocolVersionError,
            REPLY_MESSAGE => Reply::Message(read_message(payload)?),
            REPLY_FILEINFO => Reply::FileInfo(InodeSimu::decode(payload)?),
            other => Reply::Unknown(other),
        };
        Ok(Self {
            version: header.version,
            serial: header.serial,
            reply,
        })
    }
}

/// Longest prefix of `text` that fits the message payload with its NUL
fn truncate_message(text: &str) -> &str {
    if text.len() < MAX_MESSAGE_LEN {
        return text;
    }
    let mut end = MAX_MESSAGE_LEN - 1;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn read_message(payload: &[u8]) -> Result<String, RpcError> {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| RpcError::Malformed("message payload is not NUL-terminated".into()))?;
    String::from_utf8(payload[..end].to_vec())
        .map_err(|e| RpcError::Malformed(format!("message payload is not UTF-8: {}", e)))
}
