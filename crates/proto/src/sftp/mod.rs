//! SFTP (SSH File Transfer Protocol) client, version 3.
//!
//! # Architecture
//!
//! The client sits on a duplex byte channel that the SSH layer has already
//! bound to the remote `sftp` subsystem. Five pieces cooperate:
//!
//! 1. **Codec** ([`message`], [`types`]) - bit-exact encode/decode of every
//!    version 3 packet
//! 2. **Framer** ([`framer`]) - length-prefix framing of the byte stream
//! 3. **Multiplexer** (`mux`) - request-ID allocation and reply
//!    correlation, so many operations can be in flight at once
//! 4. **Session** ([`session`]) - the INIT/VERSION handshake, the reader
//!    and writer tasks, and the path-addressed operations
//! 5. **Facades** ([`file`]) - [`RemoteFile`]/[`RemoteDir`] objects owning
//!    server handles with a strict close discipline
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |-- SSH_FXP_INIT -------------->|
//!   |<- SSH_FXP_VERSION ------------|
//!   |                               |
//!   |-- SSH_FXP_OPEN (id=1) ------->|
//!   |-- SSH_FXP_STAT (id=2) ------->|   requests may overlap;
//!   |<- SSH_FXP_ATTRS (id=2) -------|   replies come in any order
//!   |<- SSH_FXP_HANDLE (id=1) ------|
//!   |                               |
//!   |-- SSH_FXP_READ (id=3) ------->|
//!   |<- SSH_FXP_DATA (id=3) --------|
//!   |                               |
//!   |-- SSH_FXP_CLOSE (id=4) ------>|
//!   |<- SSH_FXP_STATUS (id=4) ------|
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use skiff_proto::sftp::{OpenFlags, SftpConfig, SftpSession};
//! use tokio::io::{AsyncRead, AsyncWrite};
//!
//! # async fn example(
//! #     channel_rx: impl AsyncRead + Unpin + Send + 'static,
//! #     channel_tx: impl AsyncWrite + Unpin + Send + 'static,
//! # ) -> skiff_proto::sftp::Result<()> {
//! // `channel_rx`/`channel_tx` come from an SSH channel on which the
//! // "sftp" subsystem has been requested.
//! let session = SftpSession::start(channel_rx, channel_tx, SftpConfig::default()).await?;
//!
//! let home = session.realpath(".").await?;
//! for entry in session.read_dir(&home).await? {
//!     println!("{}", entry.longname);
//! }
//!
//! let file = session
//!     .open_file("notes.txt", OpenFlags::READ, Default::default())
//!     .await?;
//! while let Some(chunk) = file.read(0, 32768).await? {
//!     // ...
//! #   let _ = chunk;
//!     break;
//! }
//! file.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02) - the wire format implemented here
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol (the subsystem underneath)

pub mod error;
pub mod file;
pub mod framer;
pub mod message;
mod mux;
pub mod session;
pub mod types;

pub use error::{Error, Result};
pub use file::{RemoteDir, RemoteFile};
pub use framer::{Framer, DEFAULT_MAX_FRAME_LEN};
pub use message::{MessageType, Request, Response, SFTP_VERSION};
pub use session::{SessionState, SftpConfig, SftpSession, HANDSHAKE_TIMEOUT};
pub use types::{
    AttrFlags, DirEntry, FileAttributes, FileMode, FileType, OpenFlags, Status, StatusCode,
};
