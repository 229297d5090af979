//! SFTP data types and structures.
//!
//! Everything here has a fixed wire form defined by SFTP version 3: all
//! multi-byte integers are big-endian, and a `string` is a `u32` length
//! followed by that many raw bytes (no trailing NUL).

use super::error::{Error, Result};
use bytes::{Buf, BufMut};
use std::fmt;

/// SFTP status codes (SSH_FX_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    /// SSH_FX_OK - Success
    Ok = 0,
    /// SSH_FX_EOF - End of file
    Eof = 1,
    /// SSH_FX_NO_SUCH_FILE - No such file
    NoSuchFile = 2,
    /// SSH_FX_PERMISSION_DENIED - Permission denied
    PermissionDenied = 3,
    /// SSH_FX_FAILURE - General failure
    Failure = 4,
    /// SSH_FX_BAD_MESSAGE - Bad message
    BadMessage = 5,
    /// SSH_FX_NO_CONNECTION - No connection
    NoConnection = 6,
    /// SSH_FX_CONNECTION_LOST - Connection lost
    ConnectionLost = 7,
    /// SSH_FX_OP_UNSUPPORTED - Operation not supported
    OpUnsupported = 8,
}

impl StatusCode {
    /// Convert from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Eof),
            2 => Some(Self::NoSuchFile),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::Failure),
            5 => Some(Self::BadMessage),
            6 => Some(Self::NoConnection),
            7 => Some(Self::ConnectionLost),
            8 => Some(Self::OpUnsupported),
            _ => None,
        }
    }

    /// Returns the standard description for the code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::Eof => "End of file",
            Self::NoSuchFile => "No such file or directory",
            Self::PermissionDenied => "Permission denied",
            Self::Failure => "Failure",
            Self::BadMessage => "Bad message",
            Self::NoConnection => "No connection",
            Self::ConnectionLost => "Connection lost",
            Self::OpUnsupported => "Operation not supported",
        }
    }
}

/// A decoded SSH_FXP_STATUS reply.
///
/// The raw `code` is preserved verbatim so that packets with codes outside
/// the version 3 range survive a re-encode unchanged; [`Status::status_code`]
/// interprets the known values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Raw status code (SSH_FX_*)
    pub code: u32,
    /// Human-readable message supplied by the server
    pub message: String,
    /// RFC 3066 language tag for the message
    pub language_tag: String,
}

impl Status {
    /// Interprets the raw code, if it is one of the version 3 values.
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u32(self.code)
    }

    /// Whether this status reports success.
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok as u32
    }

    /// Whether this status reports end-of-file / end-of-directory.
    pub fn is_eof(&self) -> bool {
        self.code == StatusCode::Eof as u32
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code() {
            Some(code) => write!(f, "{}", code.message())?,
            None => write!(f, "status {}", self.code)?,
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// File open flags (SSH_FXF_*).
///
/// The flags are plain `u32` bit values combined with `|`, matching the
/// `pflags` field of SSH_FXP_OPEN. `TRUNC` and `EXCL` are only meaningful
/// together with `CREAT`; the server enforces that, not the client.
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// SSH_FXF_READ - Open for reading
    pub const READ: u32 = 0x00000001;
    /// SSH_FXF_WRITE - Open for writing
    pub const WRITE: u32 = 0x00000002;
    /// SSH_FXF_APPEND - Force writes to append
    pub const APPEND: u32 = 0x00000004;
    /// SSH_FXF_CREAT - Create if it doesn't exist
    pub const CREAT: u32 = 0x00000008;
    /// SSH_FXF_TRUNC - Truncate to 0 length
    pub const TRUNC: u32 = 0x00000010;
    /// SSH_FXF_EXCL - Fail if the file exists
    pub const EXCL: u32 = 0x00000020;
}

/// File type, decoded from the high nibble of a POSIX mode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Socket
    Socket,
    /// Symbolic link
    Symlink,
    /// Regular file
    Regular,
    /// Block device
    BlockDevice,
    /// Directory
    Directory,
    /// Character device
    CharDevice,
    /// FIFO
    Fifo,
    /// A type nibble this client does not recognize
    Unknown,
}

/// POSIX file mode word: a 4-bit type plus 12 permission bits.
///
/// Unknown type values are preserved verbatim; only interpretation via
/// [`FileMode::file_type`] collapses them to [`FileType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl FileMode {
    /// Mask selecting the file type nibble (S_IFMT)
    pub const TYPE_MASK: u32 = 0xF000;
    /// Mask selecting the permission bits
    pub const PERM_MASK: u32 = 0x0FFF;

    /// Socket (S_IFSOCK)
    pub const SOCKET: u32 = 0xC000;
    /// Symbolic link (S_IFLNK)
    pub const SYMLINK: u32 = 0xA000;
    /// Regular file (S_IFREG)
    pub const REGULAR: u32 = 0x8000;
    /// Block device (S_IFBLK)
    pub const BLOCK_DEVICE: u32 = 0x6000;
    /// Directory (S_IFDIR)
    pub const DIRECTORY: u32 = 0x4000;
    /// Character device (S_IFCHR)
    pub const CHAR_DEVICE: u32 = 0x2000;
    /// FIFO (S_IFIFO)
    pub const FIFO: u32 = 0x1000;

    /// Set-user-ID bit
    pub const SETUID: u32 = 0o4000;
    /// Set-group-ID bit
    pub const SETGID: u32 = 0o2000;
    /// Sticky bit
    pub const STICKY: u32 = 0o1000;

    /// Owner read
    pub const USER_READ: u32 = 0o400;
    /// Owner write
    pub const USER_WRITE: u32 = 0o200;
    /// Owner execute
    pub const USER_EXEC: u32 = 0o100;
    /// Group read
    pub const GROUP_READ: u32 = 0o040;
    /// Group write
    pub const GROUP_WRITE: u32 = 0o020;
    /// Group execute
    pub const GROUP_EXEC: u32 = 0o010;
    /// Others read
    pub const OTHER_READ: u32 = 0o004;
    /// Others write
    pub const OTHER_WRITE: u32 = 0o002;
    /// Others execute
    pub const OTHER_EXEC: u32 = 0o001;

    /// Default file permissions (0644 = rw-r--r--)
    pub const DEFAULT_FILE: u32 = 0o644;
    /// Default directory permissions (0755 = rwxr-xr-x)
    pub const DEFAULT_DIR: u32 = 0o755;

    /// Decodes the type nibble.
    pub fn file_type(self) -> FileType {
        match self.0 & Self::TYPE_MASK {
            Self::SOCKET => FileType::Socket,
            Self::SYMLINK => FileType::Symlink,
            Self::REGULAR => FileType::Regular,
            Self::BLOCK_DEVICE => FileType::BlockDevice,
            Self::DIRECTORY => FileType::Directory,
            Self::CHAR_DEVICE => FileType::CharDevice,
            Self::FIFO => FileType::Fifo,
            _ => FileType::Unknown,
        }
    }

    /// Returns the 12 permission bits.
    pub fn permissions(self) -> u32 {
        self.0 & Self::PERM_MASK
    }

    /// Whether the mode describes a directory.
    pub fn is_dir(self) -> bool {
        self.file_type() == FileType::Directory
    }

    /// Whether the mode describes a regular file.
    pub fn is_regular(self) -> bool {
        self.file_type() == FileType::Regular
    }

    /// Whether the mode describes a symbolic link.
    pub fn is_symlink(self) -> bool {
        self.file_type() == FileType::Symlink
    }
}

/// File attribute presence flags (SSH_FILEXFER_ATTR_*).
#[derive(Debug, Clone, Copy)]
pub struct AttrFlags(pub u32);

impl AttrFlags {
    /// SSH_FILEXFER_ATTR_SIZE
    pub const SIZE: u32 = 0x00000001;
    /// SSH_FILEXFER_ATTR_UIDGID
    pub const UIDGID: u32 = 0x00000002;
    /// SSH_FILEXFER_ATTR_PERMISSIONS
    pub const PERMISSIONS: u32 = 0x00000004;
    /// SSH_FILEXFER_ATTR_ACMODTIME
    pub const ACMODTIME: u32 = 0x00000008;
    /// SSH_FILEXFER_ATTR_EXTENDED
    pub const EXTENDED: u32 = 0x80000000;
}

/// File attributes.
///
/// Encoded as a `u32` presence bitmap followed, in fixed order, by only the
/// fields whose bit is set: `size`, `uid`/`gid`, `permissions`,
/// `atime`/`mtime`, then the extended pairs. `uid`/`gid` and
/// `atime`/`mtime` are only ever present together, so they are modeled as
/// pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes
    pub size: Option<u64>,
    /// Owner and group IDs
    pub uid_gid: Option<(u32, u32)>,
    /// POSIX mode word
    pub permissions: Option<FileMode>,
    /// Access and modification times, seconds since the Unix epoch
    pub ac_mod_time: Option<(u32, u32)>,
    /// Vendor extension pairs of (type, data)
    pub extended: Vec<(String, Vec<u8>)>,
}

impl FileAttributes {
    /// Creates empty attributes (all fields absent).
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner user ID, if present.
    pub fn uid(&self) -> Option<u32> {
        self.uid_gid.map(|(uid, _)| uid)
    }

    /// Owner group ID, if present.
    pub fn gid(&self) -> Option<u32> {
        self.uid_gid.map(|(_, gid)| gid)
    }

    /// Access time, if present.
    pub fn atime(&self) -> Option<u32> {
        self.ac_mod_time.map(|(atime, _)| atime)
    }

    /// Modification time, if present.
    pub fn mtime(&self) -> Option<u32> {
        self.ac_mod_time.map(|(_, mtime)| mtime)
    }

    /// Computes the presence bitmap.
    fn flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= AttrFlags::SIZE;
        }
        if self.uid_gid.is_some() {
            flags |= AttrFlags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= AttrFlags::PERMISSIONS;
        }
        if self.ac_mod_time.is_some() {
            flags |= AttrFlags::ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= AttrFlags::EXTENDED;
        }
        flags
    }

    /// Appends the wire encoding to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32(self.flags());
        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let Some((uid, gid)) = self.uid_gid {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(mode) = self.permissions {
            buf.put_u32(mode.0);
        }
        if let Some((atime, mtime)) = self.ac_mod_time {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
        if !self.extended.is_empty() {
            buf.put_u32(self.extended.len() as u32);
            for (typ, data) in &self.extended {
                put_bytes(buf, typ.as_bytes());
                put_bytes(buf, data);
            }
        }
    }

    /// Parses attributes from the front of `buf`, advancing it.
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let flags = get_u32(buf, "attribute flags")?;
        let mut attrs = Self::new();

        if flags & AttrFlags::SIZE != 0 {
            attrs.size = Some(get_u64(buf, "size attribute")?);
        }
        if flags & AttrFlags::UIDGID != 0 {
            let uid = get_u32(buf, "uid attribute")?;
            let gid = get_u32(buf, "gid attribute")?;
            attrs.uid_gid = Some((uid, gid));
        }
        if flags & AttrFlags::PERMISSIONS != 0 {
            attrs.permissions = Some(FileMode(get_u32(buf, "permissions attribute")?));
        }
        if flags & AttrFlags::ACMODTIME != 0 {
            let atime = get_u32(buf, "atime attribute")?;
            let mtime = get_u32(buf, "mtime attribute")?;
            attrs.ac_mod_time = Some((atime, mtime));
        }
        if flags & AttrFlags::EXTENDED != 0 {
            let count = get_u32(buf, "extended attribute count")?;
            for _ in 0..count {
                let typ = get_utf8(buf, "extended attribute type")?;
                let data = get_bytes(buf, "extended attribute data")?;
                attrs.extended.push((typ, data));
            }
        }

        Ok(attrs)
    }
}

/// One entry of an SSH_FXP_NAME reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Short file name, relative to the directory being listed
    pub filename: String,
    /// Human-readable `ls -l`-style rendering supplied by the server
    pub longname: String,
    /// Attributes of the entry
    pub attrs: FileAttributes,
}

impl DirEntry {
    /// Decoded file type, if the server sent a mode word.
    pub fn file_type(&self) -> Option<FileType> {
        self.attrs.permissions.map(FileMode::file_type)
    }
}

// ==== wire primitives shared by the attribute and message codecs ====

pub(crate) fn get_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(Error::Malformed(format!("truncated {}", what)));
    }
    Ok(buf.get_u8())
}

pub(crate) fn get_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::Malformed(format!("truncated {}", what)));
    }
    Ok(buf.get_u32())
}

pub(crate) fn get_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(Error::Malformed(format!("truncated {}", what)));
    }
    Ok(buf.get_u64())
}

pub(crate) fn get_bytes(buf: &mut &[u8], what: &str) -> Result<Vec<u8>> {
    let len = get_u32(buf, what)? as usize;
    if buf.remaining() < len {
        return Err(Error::Malformed(format!("truncated {}", what)));
    }
    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}

pub(crate) fn get_utf8(buf: &mut &[u8], what: &str) -> Result<String> {
    let bytes = get_bytes(buf, what)?;
    String::from_utf8(bytes).map_err(|_| Error::Malformed(format!("{} is not UTF-8", what)))
}

pub(crate) fn put_bytes(buf: &mut Vec<u8>, s: &[u8]) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_conversion() {
        assert_eq!(StatusCode::from_u32(0), Some(StatusCode::Ok));
        assert_eq!(StatusCode::from_u32(2), Some(StatusCode::NoSuchFile));
        assert_eq!(StatusCode::from_u32(999), None);
    }

    #[test]
    fn test_status_predicates() {
        let eof = Status {
            code: 1,
            message: String::new(),
            language_tag: String::new(),
        };
        assert!(eof.is_eof());
        assert!(!eof.is_ok());
        assert_eq!(eof.status_code(), Some(StatusCode::Eof));

        let vendor = Status {
            code: 42,
            message: "quota exceeded".to_string(),
            language_tag: String::new(),
        };
        assert_eq!(vendor.status_code(), None);
        assert!(vendor.to_string().contains("42"));
    }

    #[test]
    fn test_file_mode_partition() {
        let mode = FileMode(FileMode::DIRECTORY | 0o755);
        assert_eq!(mode.file_type(), FileType::Directory);
        assert_eq!(mode.permissions(), 0o755);
        assert!(mode.is_dir());

        let mode = FileMode(FileMode::SYMLINK | 0o777);
        assert!(mode.is_symlink());

        // Unknown type nibble survives verbatim, only interpretation collapses it.
        let mode = FileMode(0xE000 | 0o644);
        assert_eq!(mode.file_type(), FileType::Unknown);
        assert_eq!(mode.0 & FileMode::TYPE_MASK, 0xE000);
    }

    #[test]
    fn test_setid_bits() {
        let mode = FileMode(FileMode::REGULAR | FileMode::SETUID | 0o755);
        assert_eq!(mode.permissions() & FileMode::SETUID, FileMode::SETUID);
        assert!(mode.is_regular());
    }

    #[test]
    fn test_attributes_roundtrip_every_subset() {
        // Exercise every subset of the four scalar fields, with and without
        // extended pairs.
        for bits in 0u32..32 {
            let mut attrs = FileAttributes::new();
            if bits & 0x1 != 0 {
                attrs.size = Some(0xDEAD_BEEF_u64 + u64::from(bits));
            }
            if bits & 0x2 != 0 {
                attrs.uid_gid = Some((1000, 1000 + bits));
            }
            if bits & 0x4 != 0 {
                attrs.permissions = Some(FileMode(FileMode::REGULAR | 0o640));
            }
            if bits & 0x8 != 0 {
                attrs.ac_mod_time = Some((1_600_000_000, 1_600_000_001));
            }
            if bits & 0x10 != 0 {
                attrs
                    .extended
                    .push(("vendor@example".to_string(), vec![1, 2, 3]));
            }

            let mut buf = Vec::new();
            attrs.encode(&mut buf);
            let mut slice = buf.as_slice();
            let decoded = FileAttributes::decode(&mut slice).unwrap();
            assert_eq!(decoded, attrs, "subset {:#x}", bits);
            assert!(slice.is_empty(), "subset {:#x} left trailing bytes", bits);
        }
    }

    #[test]
    fn test_attributes_truncated() {
        let mut attrs = FileAttributes::new();
        attrs.size = Some(4096);
        let mut buf = Vec::new();
        attrs.encode(&mut buf);
        buf.truncate(buf.len() - 1);

        let mut slice = buf.as_slice();
        let err = FileAttributes::decode(&mut slice).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_attribute_accessors() {
        let mut attrs = FileAttributes::new();
        attrs.uid_gid = Some((501, 20));
        attrs.ac_mod_time = Some((100, 200));
        assert_eq!(attrs.uid(), Some(501));
        assert_eq!(attrs.gid(), Some(20));
        assert_eq!(attrs.atime(), Some(100));
        assert_eq!(attrs.mtime(), Some(200));
    }

    #[test]
    fn test_string_primitives() {
        let mut buf = Vec::new();
        put_bytes(&mut buf, b"hello");
        assert_eq!(buf, vec![0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);

        let mut slice = buf.as_slice();
        assert_eq!(get_utf8(&mut slice, "greeting").unwrap(), "hello");
        assert!(slice.is_empty());

        let bad = [0u8, 0, 0, 2, 0xFF, 0xFE];
        let mut slice = &bad[..];
        assert!(matches!(
            get_utf8(&mut slice, "name"),
            Err(Error::Malformed(_))
        ));
    }
}
