//! SFTP protocol messages.
//!
//! Typed request and response values with their bit-exact version 3 wire
//! forms. Every packet travels as
//!
//! ```text
//! uint32    length
//! byte      type
//! byte[n]   payload      (n = length - 1)
//! ```
//!
//! where `length` excludes itself but counts the type byte.
//! [`Request::encode`]/[`Response::encode`] produce the whole framed packet;
//! [`Request::decode`]/[`Response::decode`] consume the unframed body
//! (type byte plus payload) as handed out by the
//! [`Framer`](super::framer::Framer).

use super::error::{Error, Result};
use super::types::{
    get_bytes, get_u32, get_u64, get_u8, get_utf8, put_bytes, DirEntry, FileAttributes, Status,
};
use bytes::BufMut;
use std::fmt;

/// SFTP protocol version implemented by this client.
pub const SFTP_VERSION: u32 = 3;

/// SFTP packet type codes (SSH_FXP_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// SSH_FXP_INIT - Initialize SFTP session
    Init = 1,
    /// SSH_FXP_VERSION - Version response
    Version = 2,
    /// SSH_FXP_OPEN - Open file
    Open = 3,
    /// SSH_FXP_CLOSE - Close file/directory handle
    Close = 4,
    /// SSH_FXP_READ - Read from file
    Read = 5,
    /// SSH_FXP_WRITE - Write to file
    Write = 6,
    /// SSH_FXP_LSTAT - Get attributes without following symlinks
    LStat = 7,
    /// SSH_FXP_FSTAT - Get attributes by handle
    FStat = 8,
    /// SSH_FXP_SETSTAT - Set attributes by path
    SetStat = 9,
    /// SSH_FXP_FSETSTAT - Set attributes by handle
    FSetStat = 10,
    /// SSH_FXP_OPENDIR - Open directory
    OpenDir = 11,
    /// SSH_FXP_READDIR - Read directory batch
    ReadDir = 12,
    /// SSH_FXP_REMOVE - Remove file
    Remove = 13,
    /// SSH_FXP_MKDIR - Create directory
    MkDir = 14,
    /// SSH_FXP_RMDIR - Remove directory
    RmDir = 15,
    /// SSH_FXP_REALPATH - Canonicalize path
    RealPath = 16,
    /// SSH_FXP_STAT - Get attributes, following symlinks
    Stat = 17,
    /// SSH_FXP_RENAME - Rename file or directory
    Rename = 18,
    /// SSH_FXP_READLINK - Read symbolic link target
    ReadLink = 19,
    /// SSH_FXP_SYMLINK - Create symbolic link
    Symlink = 20,

    /// SSH_FXP_STATUS - Status reply
    Status = 101,
    /// SSH_FXP_HANDLE - Handle reply
    Handle = 102,
    /// SSH_FXP_DATA - Data reply
    Data = 103,
    /// SSH_FXP_NAME - Name reply
    Name = 104,
    /// SSH_FXP_ATTRS - Attributes reply
    Attrs = 105,

    /// SSH_FXP_EXTENDED - Vendor extension request
    Extended = 200,
    /// SSH_FXP_EXTENDED_REPLY - Vendor extension reply
    ExtendedReply = 201,
}

impl MessageType {
    /// Convert from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Init),
            2 => Some(Self::Version),
            3 => Some(Self::Open),
            4 => Some(Self::Close),
            5 => Some(Self::Read),
            6 => Some(Self::Write),
            7 => Some(Self::LStat),
            8 => Some(Self::FStat),
            9 => Some(Self::SetStat),
            10 => Some(Self::FSetStat),
            11 => Some(Self::OpenDir),
            12 => Some(Self::ReadDir),
            13 => Some(Self::Remove),
            14 => Some(Self::MkDir),
            15 => Some(Self::RmDir),
            16 => Some(Self::RealPath),
            17 => Some(Self::Stat),
            18 => Some(Self::Rename),
            19 => Some(Self::ReadLink),
            20 => Some(Self::Symlink),
            101 => Some(Self::Status),
            102 => Some(Self::Handle),
            103 => Some(Self::Data),
            104 => Some(Self::Name),
            105 => Some(Self::Attrs),
            200 => Some(Self::Extended),
            201 => Some(Self::ExtendedReply),
            _ => None,
        }
    }
}

/// A client-to-server SFTP packet.
///
/// Apart from `Init`, every variant carries the request ID allocated by the
/// multiplexer; the server echoes it in its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// SSH_FXP_INIT, sent once by the session lifecycle
    Init {
        /// Protocol version proposed by the client
        version: u32,
        /// Extension pairs announced by the client
        extensions: Vec<(String, String)>,
    },
    /// SSH_FXP_OPEN
    Open {
        /// Request ID
        id: u32,
        /// Path of the file to open
        path: String,
        /// SSH_FXF_* open flags
        pflags: u32,
        /// Initial attributes for created files
        attrs: FileAttributes,
    },
    /// SSH_FXP_CLOSE
    Close {
        /// Request ID
        id: u32,
        /// Server-issued handle being surrendered
        handle: Vec<u8>,
    },
    /// SSH_FXP_READ
    Read {
        /// Request ID
        id: u32,
        /// Server-issued file handle
        handle: Vec<u8>,
        /// Byte offset to read from
        offset: u64,
        /// Maximum number of bytes to read
        len: u32,
    },
    /// SSH_FXP_WRITE
    Write {
        /// Request ID
        id: u32,
        /// Server-issued file handle
        handle: Vec<u8>,
        /// Byte offset to write at
        offset: u64,
        /// Bytes to write
        data: Vec<u8>,
    },
    /// SSH_FXP_LSTAT
    LStat {
        /// Request ID
        id: u32,
        /// Path to stat, symlinks not followed
        path: String,
    },
    /// SSH_FXP_FSTAT
    FStat {
        /// Request ID
        id: u32,
        /// Server-issued file handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_SETSTAT
    SetStat {
        /// Request ID
        id: u32,
        /// Path whose attributes change
        path: String,
        /// Attributes to apply
        attrs: FileAttributes,
    },
    /// SSH_FXP_FSETSTAT
    FSetStat {
        /// Request ID
        id: u32,
        /// Server-issued file handle
        handle: Vec<u8>,
        /// Attributes to apply
        attrs: FileAttributes,
    },
    /// SSH_FXP_OPENDIR
    OpenDir {
        /// Request ID
        id: u32,
        /// Path of the directory to open
        path: String,
    },
    /// SSH_FXP_READDIR
    ReadDir {
        /// Request ID
        id: u32,
        /// Server-issued directory handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_REMOVE
    Remove {
        /// Request ID
        id: u32,
        /// Path of the file to delete
        filename: String,
    },
    /// SSH_FXP_MKDIR
    MkDir {
        /// Request ID
        id: u32,
        /// Path of the directory to create
        path: String,
        /// Attributes for the new directory
        attrs: FileAttributes,
    },
    /// SSH_FXP_RMDIR
    RmDir {
        /// Request ID
        id: u32,
        /// Path of the directory to delete
        path: String,
    },
    /// SSH_FXP_REALPATH
    RealPath {
        /// Request ID
        id: u32,
        /// Path to canonicalize
        path: String,
    },
    /// SSH_FXP_STAT
    Stat {
        /// Request ID
        id: u32,
        /// Path to stat, symlinks followed
        path: String,
    },
    /// SSH_FXP_RENAME
    Rename {
        /// Request ID
        id: u32,
        /// Current path
        oldpath: String,
        /// New path
        newpath: String,
    },
    /// SSH_FXP_READLINK
    ReadLink {
        /// Request ID
        id: u32,
        /// Path of the symlink to read
        path: String,
    },
    /// SSH_FXP_SYMLINK
    Symlink {
        /// Request ID
        id: u32,
        /// Path of the link to create
        linkpath: String,
        /// Path the link points at
        targetpath: String,
    },
    /// SSH_FXP_EXTENDED
    Extended {
        /// Request ID
        id: u32,
        /// Extension name, e.g. `posix-rename@openssh.com`
        request: String,
        /// Opaque extension payload
        data: Vec<u8>,
    },
}

impl Request {
    /// The packet type code of this request.
    pub fn message_type(&self) -> MessageType {
        match self {
            Request::Init { .. } => MessageType::Init,
            Request::Open { .. } => MessageType::Open,
            Request::Close { .. } => MessageType::Close,
            Request::Read { .. } => MessageType::Read,
            Request::Write { .. } => MessageType::Write,
            Request::LStat { .. } => MessageType::LStat,
            Request::FStat { .. } => MessageType::FStat,
            Request::SetStat { .. } => MessageType::SetStat,
            Request::FSetStat { .. } => MessageType::FSetStat,
            Request::OpenDir { .. } => MessageType::OpenDir,
            Request::ReadDir { .. } => MessageType::ReadDir,
            Request::Remove { .. } => MessageType::Remove,
            Request::MkDir { .. } => MessageType::MkDir,
            Request::RmDir { .. } => MessageType::RmDir,
            Request::RealPath { .. } => MessageType::RealPath,
            Request::Stat { .. } => MessageType::Stat,
            Request::Rename { .. } => MessageType::Rename,
            Request::ReadLink { .. } => MessageType::ReadLink,
            Request::Symlink { .. } => MessageType::Symlink,
            Request::Extended { .. } => MessageType::Extended,
        }
    }

    /// The request ID, or `None` for `Init` which has none.
    pub fn id(&self) -> Option<u32> {
        match self {
            Request::Init { .. } => None,
            Request::Open { id, .. }
            | Request::Close { id, .. }
            | Request::Read { id, .. }
            | Request::Write { id, .. }
            | Request::LStat { id, .. }
            | Request::FStat { id, .. }
            | Request::SetStat { id, .. }
            | Request::FSetStat { id, .. }
            | Request::OpenDir { id, .. }
            | Request::ReadDir { id, .. }
            | Request::Remove { id, .. }
            | Request::MkDir { id, .. }
            | Request::RmDir { id, .. }
            | Request::RealPath { id, .. }
            | Request::Stat { id, .. }
            | Request::Rename { id, .. }
            | Request::ReadLink { id, .. }
            | Request::Symlink { id, .. }
            | Request::Extended { id, .. } => Some(*id),
        }
    }

    /// Serializes the whole framed packet, length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_payload(&mut payload);
        frame(self.message_type(), payload)
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        match self {
            Request::Init {
                version,
                extensions,
            } => {
                buf.put_u32(*version);
                for (name, data) in extensions {
                    put_bytes(buf, name.as_bytes());
                    put_bytes(buf, data.as_bytes());
                }
            }
            Request::Open {
                id,
                path,
                pflags,
                attrs,
            } => {
                buf.put_u32(*id);
                put_bytes(buf, path.as_bytes());
                buf.put_u32(*pflags);
                attrs.encode(buf);
            }
            Request::Close { id, handle }
            | Request::FStat { id, handle }
            | Request::ReadDir { id, handle } => {
                buf.put_u32(*id);
                put_bytes(buf, handle);
            }
            Request::Read {
                id,
                handle,
                offset,
                len,
            } => {
                buf.put_u32(*id);
                put_bytes(buf, handle);
                buf.put_u64(*offset);
                buf.put_u32(*len);
            }
            Request::Write {
                id,
                handle,
                offset,
                data,
            } => {
                buf.put_u32(*id);
                put_bytes(buf, handle);
                buf.put_u64(*offset);
                put_bytes(buf, data);
            }
            Request::LStat { id, path }
            | Request::OpenDir { id, path }
            | Request::RmDir { id, path }
            | Request::RealPath { id, path }
            | Request::Stat { id, path }
            | Request::ReadLink { id, path } => {
                buf.put_u32(*id);
                put_bytes(buf, path.as_bytes());
            }
            Request::Remove { id, filename } => {
                buf.put_u32(*id);
                put_bytes(buf, filename.as_bytes());
            }
            Request::SetStat { id, path, attrs } | Request::MkDir { id, path, attrs } => {
                buf.put_u32(*id);
                put_bytes(buf, path.as_bytes());
                attrs.encode(buf);
            }
            Request::FSetStat { id, handle, attrs } => {
                buf.put_u32(*id);
                put_bytes(buf, handle);
                attrs.encode(buf);
            }
            Request::Rename {
                id,
                oldpath,
                newpath,
            } => {
                buf.put_u32(*id);
                put_bytes(buf, oldpath.as_bytes());
                put_bytes(buf, newpath.as_bytes());
            }
            Request::Symlink {
                id,
                linkpath,
                targetpath,
            } => {
                buf.put_u32(*id);
                put_bytes(buf, linkpath.as_bytes());
                put_bytes(buf, targetpath.as_bytes());
            }
            Request::Extended { id, request, data } => {
                buf.put_u32(*id);
                put_bytes(buf, request.as_bytes());
                buf.put_slice(data);
            }
        }
    }

    /// Parses an unframed packet body (type byte plus payload).
    ///
    /// The client itself never decodes requests; this direction exists for
    /// protocol tooling and for test servers that must understand client
    /// traffic.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut buf = body;
        let type_byte = get_u8(&mut buf, "packet type")?;
        let msg_type = MessageType::from_u8(type_byte)
            .ok_or_else(|| Error::Malformed(format!("unknown packet type {}", type_byte)))?;

        let request = match msg_type {
            MessageType::Init => {
                let version = get_u32(&mut buf, "INIT version")?;
                let mut extensions = Vec::new();
                while !buf.is_empty() {
                    let name = get_utf8(&mut buf, "INIT extension name")?;
                    let data = get_utf8(&mut buf, "INIT extension data")?;
                    extensions.push((name, data));
                }
                Request::Init {
                    version,
                    extensions,
                }
            }
            MessageType::Open => {
                let id = get_u32(&mut buf, "OPEN id")?;
                let path = get_utf8(&mut buf, "OPEN path")?;
                let pflags = get_u32(&mut buf, "OPEN pflags")?;
                let attrs = FileAttributes::decode(&mut buf)?;
                Request::Open {
                    id,
                    path,
                    pflags,
                    attrs,
                }
            }
            MessageType::Close => {
                let id = get_u32(&mut buf, "CLOSE id")?;
                let handle = get_bytes(&mut buf, "CLOSE handle")?;
                Request::Close { id, handle }
            }
            MessageType::Read => {
                let id = get_u32(&mut buf, "READ id")?;
                let handle = get_bytes(&mut buf, "READ handle")?;
                let offset = get_u64(&mut buf, "READ offset")?;
                let len = get_u32(&mut buf, "READ length")?;
                Request::Read {
                    id,
                    handle,
                    offset,
                    len,
                }
            }
            MessageType::Write => {
                let id = get_u32(&mut buf, "WRITE id")?;
                let handle = get_bytes(&mut buf, "WRITE handle")?;
                let offset = get_u64(&mut buf, "WRITE offset")?;
                let data = get_bytes(&mut buf, "WRITE data")?;
                Request::Write {
                    id,
                    handle,
                    offset,
                    data,
                }
            }
            MessageType::LStat => {
                let id = get_u32(&mut buf, "LSTAT id")?;
                let path = get_utf8(&mut buf, "LSTAT path")?;
                Request::LStat { id, path }
            }
            MessageType::FStat => {
                let id = get_u32(&mut buf, "FSTAT id")?;
                let handle = get_bytes(&mut buf, "FSTAT handle")?;
                Request::FStat { id, handle }
            }
            MessageType::SetStat => {
                let id = get_u32(&mut buf, "SETSTAT id")?;
                let path = get_utf8(&mut buf, "SETSTAT path")?;
                let attrs = FileAttributes::decode(&mut buf)?;
                Request::SetStat { id, path, attrs }
            }
            MessageType::FSetStat => {
                let id = get_u32(&mut buf, "FSETSTAT id")?;
                let handle = get_bytes(&mut buf, "FSETSTAT handle")?;
                let attrs = FileAttributes::decode(&mut buf)?;
                Request::FSetStat { id, handle, attrs }
            }
            MessageType::OpenDir => {
                let id = get_u32(&mut buf, "OPENDIR id")?;
                let path = get_utf8(&mut buf, "OPENDIR path")?;
                Request::OpenDir { id, path }
            }
            MessageType::ReadDir => {
                let id = get_u32(&mut buf, "READDIR id")?;
                let handle = get_bytes(&mut buf, "READDIR handle")?;
                Request::ReadDir { id, handle }
            }
            MessageType::Remove => {
                let id = get_u32(&mut buf, "REMOVE id")?;
                let filename = get_utf8(&mut buf, "REMOVE filename")?;
                Request::Remove { id, filename }
            }
            MessageType::MkDir => {
                let id = get_u32(&mut buf, "MKDIR id")?;
                let path = get_utf8(&mut buf, "MKDIR path")?;
                let attrs = FileAttributes::decode(&mut buf)?;
                Request::MkDir { id, path, attrs }
            }
            MessageType::RmDir => {
                let id = get_u32(&mut buf, "RMDIR id")?;
                let path = get_utf8(&mut buf, "RMDIR path")?;
                Request::RmDir { id, path }
            }
            MessageType::RealPath => {
                let id = get_u32(&mut buf, "REALPATH id")?;
                let path = get_utf8(&mut buf, "REALPATH path")?;
                Request::RealPath { id, path }
            }
            MessageType::Stat => {
                let id = get_u32(&mut buf, "STAT id")?;
                let path = get_utf8(&mut buf, "STAT path")?;
                Request::Stat { id, path }
            }
            MessageType::Rename => {
                let id = get_u32(&mut buf, "RENAME id")?;
                let oldpath = get_utf8(&mut buf, "RENAME oldpath")?;
                let newpath = get_utf8(&mut buf, "RENAME newpath")?;
                Request::Rename {
                    id,
                    oldpath,
                    newpath,
                }
            }
            MessageType::ReadLink => {
                let id = get_u32(&mut buf, "READLINK id")?;
                let path = get_utf8(&mut buf, "READLINK path")?;
                Request::ReadLink { id, path }
            }
            MessageType::Symlink => {
                let id = get_u32(&mut buf, "SYMLINK id")?;
                let linkpath = get_utf8(&mut buf, "SYMLINK linkpath")?;
                let targetpath = get_utf8(&mut buf, "SYMLINK targetpath")?;
                Request::Symlink {
                    id,
                    linkpath,
                    targetpath,
                }
            }
            MessageType::Extended => {
                let id = get_u32(&mut buf, "EXTENDED id")?;
                let request = get_utf8(&mut buf, "EXTENDED request name")?;
                let data = buf.to_vec();
                buf = &[];
                Request::Extended { id, request, data }
            }
            other => {
                return Err(Error::Malformed(format!(
                    "unexpected reply type {:?} on the request side",
                    other
                )))
            }
        };

        if !buf.is_empty() {
            return Err(Error::Malformed(format!(
                "{} bytes trailing after {:?} payload",
                buf.len(),
                msg_type
            )));
        }

        Ok(request)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Init {
                version,
                extensions,
            } => write!(f, "INIT version={} extensions={}", version, extensions.len()),
            Request::Open {
                id, path, pflags, ..
            } => write!(f, "OPEN id={} path={} pflags={:#x}", id, path, pflags),
            Request::Close { id, handle } => {
                write!(f, "CLOSE id={} handle={}B", id, handle.len())
            }
            Request::Read {
                id,
                handle,
                offset,
                len,
            } => write!(
                f,
                "READ id={} handle={}B offset={} len={}",
                id,
                handle.len(),
                offset,
                len
            ),
            Request::Write {
                id,
                handle,
                offset,
                data,
            } => write!(
                f,
                "WRITE id={} handle={}B offset={} data={}B",
                id,
                handle.len(),
                offset,
                data.len()
            ),
            Request::LStat { id, path } => write!(f, "LSTAT id={} path={}", id, path),
            Request::FStat { id, handle } => {
                write!(f, "FSTAT id={} handle={}B", id, handle.len())
            }
            Request::SetStat { id, path, .. } => write!(f, "SETSTAT id={} path={}", id, path),
            Request::FSetStat { id, handle, .. } => {
                write!(f, "FSETSTAT id={} handle={}B", id, handle.len())
            }
            Request::OpenDir { id, path } => write!(f, "OPENDIR id={} path={}", id, path),
            Request::ReadDir { id, handle } => {
                write!(f, "READDIR id={} handle={}B", id, handle.len())
            }
            Request::Remove { id, filename } => write!(f, "REMOVE id={} path={}", id, filename),
            Request::MkDir { id, path, .. } => write!(f, "MKDIR id={} path={}", id, path),
            Request::RmDir { id, path } => write!(f, "RMDIR id={} path={}", id, path),
            Request::RealPath { id, path } => write!(f, "REALPATH id={} path={}", id, path),
            Request::Stat { id, path } => write!(f, "STAT id={} path={}", id, path),
            Request::Rename {
                id,
                oldpath,
                newpath,
            } => write!(f, "RENAME id={} old={} new={}", id, oldpath, newpath),
            Request::ReadLink { id, path } => write!(f, "READLINK id={} path={}", id, path),
            Request::Symlink {
                id,
                linkpath,
                targetpath,
            } => write!(f, "SYMLINK id={} link={} target={}", id, linkpath, targetpath),
            Request::Extended { id, request, data } => {
                write!(f, "EXTENDED id={} request={} data={}B", id, request, data.len())
            }
        }
    }
}

/// A server-to-client SFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// SSH_FXP_VERSION, the handshake reply; carries no request ID
    Version {
        /// Protocol version selected by the server
        version: u32,
        /// Extension pairs announced by the server
        extensions: Vec<(String, String)>,
    },
    /// SSH_FXP_STATUS
    Status {
        /// Request ID being answered
        id: u32,
        /// Outcome of the request
        status: Status,
    },
    /// SSH_FXP_HANDLE
    Handle {
        /// Request ID being answered
        id: u32,
        /// Opaque server-issued handle, 1-256 bytes per the protocol
        handle: Vec<u8>,
    },
    /// SSH_FXP_DATA
    Data {
        /// Request ID being answered
        id: u32,
        /// Bytes read, possibly fewer than requested
        data: Vec<u8>,
    },
    /// SSH_FXP_NAME
    Name {
        /// Request ID being answered
        id: u32,
        /// Directory entries in server-chosen order
        entries: Vec<DirEntry>,
    },
    /// SSH_FXP_ATTRS
    Attrs {
        /// Request ID being answered
        id: u32,
        /// Attributes of the file or handle
        attrs: FileAttributes,
    },
    /// SSH_FXP_EXTENDED_REPLY
    ExtendedReply {
        /// Request ID being answered
        id: u32,
        /// Opaque extension payload
        data: Vec<u8>,
    },
}

impl Response {
    /// The packet type code of this response.
    pub fn message_type(&self) -> MessageType {
        match self {
            Response::Version { .. } => MessageType::Version,
            Response::Status { .. } => MessageType::Status,
            Response::Handle { .. } => MessageType::Handle,
            Response::Data { .. } => MessageType::Data,
            Response::Name { .. } => MessageType::Name,
            Response::Attrs { .. } => MessageType::Attrs,
            Response::ExtendedReply { .. } => MessageType::ExtendedReply,
        }
    }

    /// The request ID this response answers, or `None` for `Version`.
    pub fn id(&self) -> Option<u32> {
        match self {
            Response::Version { .. } => None,
            Response::Status { id, .. }
            | Response::Handle { id, .. }
            | Response::Data { id, .. }
            | Response::Name { id, .. }
            | Response::Attrs { id, .. }
            | Response::ExtendedReply { id, .. } => Some(*id),
        }
    }

    /// Serializes the whole framed packet, length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Response::Version {
                version,
                extensions,
            } => {
                payload.put_u32(*version);
                for (name, data) in extensions {
                    put_bytes(&mut payload, name.as_bytes());
                    put_bytes(&mut payload, data.as_bytes());
                }
            }
            Response::Status { id, status } => {
                payload.put_u32(*id);
                payload.put_u32(status.code);
                put_bytes(&mut payload, status.message.as_bytes());
                put_bytes(&mut payload, status.language_tag.as_bytes());
            }
            Response::Handle { id, handle } => {
                payload.put_u32(*id);
                put_bytes(&mut payload, handle);
            }
            Response::Data { id, data } => {
                payload.put_u32(*id);
                put_bytes(&mut payload, data);
            }
            Response::Name { id, entries } => {
                payload.put_u32(*id);
                payload.put_u32(entries.len() as u32);
                for entry in entries {
                    put_bytes(&mut payload, entry.filename.as_bytes());
                    put_bytes(&mut payload, entry.longname.as_bytes());
                    entry.attrs.encode(&mut payload);
                }
            }
            Response::Attrs { id, attrs } => {
                payload.put_u32(*id);
                attrs.encode(&mut payload);
            }
            Response::ExtendedReply { id, data } => {
                payload.put_u32(*id);
                payload.put_slice(data);
            }
        }
        frame(self.message_type(), payload)
    }

    /// Parses an unframed packet body (type byte plus payload).
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut buf = body;
        let type_byte = get_u8(&mut buf, "packet type")?;
        let msg_type = MessageType::from_u8(type_byte)
            .ok_or_else(|| Error::Malformed(format!("unknown packet type {}", type_byte)))?;

        let response = match msg_type {
            MessageType::Version => {
                let version = get_u32(&mut buf, "VERSION number")?;
                let mut extensions = Vec::new();
                while !buf.is_empty() {
                    let name = get_utf8(&mut buf, "VERSION extension name")?;
                    let data = get_utf8(&mut buf, "VERSION extension data")?;
                    extensions.push((name, data));
                }
                Response::Version {
                    version,
                    extensions,
                }
            }
            MessageType::Status => {
                let id = get_u32(&mut buf, "STATUS id")?;
                let code = get_u32(&mut buf, "STATUS code")?;
                let message = get_utf8(&mut buf, "STATUS message")?;
                let language_tag = get_utf8(&mut buf, "STATUS language tag")?;
                Response::Status {
                    id,
                    status: Status {
                        code,
                        message,
                        language_tag,
                    },
                }
            }
            MessageType::Handle => {
                let id = get_u32(&mut buf, "HANDLE id")?;
                let handle = get_bytes(&mut buf, "HANDLE handle")?;
                Response::Handle { id, handle }
            }
            MessageType::Data => {
                let id = get_u32(&mut buf, "DATA id")?;
                let data = get_bytes(&mut buf, "DATA data")?;
                Response::Data { id, data }
            }
            MessageType::Name => {
                let id = get_u32(&mut buf, "NAME id")?;
                let count = get_u32(&mut buf, "NAME count")?;
                let mut entries = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    let filename = get_utf8(&mut buf, "NAME filename")?;
                    let longname = get_utf8(&mut buf, "NAME longname")?;
                    let attrs = FileAttributes::decode(&mut buf)?;
                    entries.push(DirEntry {
                        filename,
                        longname,
                        attrs,
                    });
                }
                Response::Name { id, entries }
            }
            MessageType::Attrs => {
                let id = get_u32(&mut buf, "ATTRS id")?;
                let attrs = FileAttributes::decode(&mut buf)?;
                Response::Attrs { id, attrs }
            }
            MessageType::ExtendedReply => {
                let id = get_u32(&mut buf, "EXTENDED_REPLY id")?;
                let data = buf.to_vec();
                buf = &[];
                Response::ExtendedReply { id, data }
            }
            other => {
                return Err(Error::Malformed(format!(
                    "unexpected request type {:?} on the reply side",
                    other
                )))
            }
        };

        if !buf.is_empty() {
            return Err(Error::Malformed(format!(
                "{} bytes trailing after {:?} payload",
                buf.len(),
                msg_type
            )));
        }

        Ok(response)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Version {
                version,
                extensions,
            } => write!(
                f,
                "VERSION version={} extensions={}",
                version,
                extensions.len()
            ),
            Response::Status { id, status } => {
                write!(f, "STATUS id={} code={}", id, status.code)
            }
            Response::Handle { id, handle } => {
                write!(f, "HANDLE id={} handle={}B", id, handle.len())
            }
            Response::Data { id, data } => write!(f, "DATA id={} data={}B", id, data.len()),
            Response::Name { id, entries } => {
                write!(f, "NAME id={} count={}", id, entries.len())
            }
            Response::Attrs { id, .. } => write!(f, "ATTRS id={}", id),
            Response::ExtendedReply { id, data } => {
                write!(f, "EXTENDED_REPLY id={} data={}B", id, data.len())
            }
        }
    }
}

/// Wraps an encoded payload in the packet envelope.
fn frame(msg_type: MessageType, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.put_u32(payload.len() as u32 + 1);
    out.put_u8(msg_type as u8);
    out.extend_from_slice(&payload);
    out
}
