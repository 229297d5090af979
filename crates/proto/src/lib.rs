//! Protocol implementations for the Skiff file-transfer ecosystem.
//!
//! This crate provides a Rust implementation of the SFTP protocol:
//!
//! - **SFTP** (SSH File Transfer Protocol) - client side of version 3, the
//!   most widely deployed revision of the protocol
//!
//! # Features
//!
//! - `sftp` (default) - SFTP client support
//!
//! # Example
//!
//! ```rust
//! use skiff_proto::sftp::{MessageType, Request};
//!
//! // Build and serialize an SFTP request
//! let request = Request::RealPath {
//!     id: 1,
//!     path: ".".to_string(),
//! };
//! let wire_format = request.encode();
//!
//! // The envelope is `u32 length || u8 type || payload`
//! assert_eq!(wire_format[4], MessageType::RealPath as u8);
//! ```
//!
//! # Scope
//!
//! This crate sits *above* an established SSH session: the caller opens an
//! SSH channel, requests the `sftp` subsystem and hands the resulting duplex
//! byte stream to [`sftp::SftpSession::start`]. Key exchange, encryption and
//! authentication belong to the SSH layer and are not implemented here.
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02)
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "sftp")]
pub mod sftp;
