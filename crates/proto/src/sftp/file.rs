//! File and directory facades.
//!
//! A facade exclusively owns one server-issued handle and must surrender it
//! with exactly one CLOSE. Closing twice is allowed and cheap: the second
//! call answers success without touching the wire. Dropping an unclosed
//! facade cannot send the CLOSE (there is no async in `Drop`), so it logs a
//! warning instead; the server-side handle then lives until the session
//! ends.
//!
//! Facades reference their session weakly: an abandoned session is torn
//! down even while file handles are still lying around, and any later use
//! of those handles fails with [`Error::ConnectionClosed`].

use super::error::{Error, Result};
use super::message::Request;
use super::session::Shared;
use super::types::{DirEntry, FileAttributes};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// An open remote file.
///
/// Obtained from [`SftpSession::open_file`](super::SftpSession::open_file).
/// All offsets are absolute; the facade keeps no cursor.
#[derive(Debug)]
pub struct RemoteFile {
    session: Weak<Shared>,
    handle: Vec<u8>,
    path: String,
    closed: AtomicBool,
}

impl RemoteFile {
    pub(crate) fn new(session: Weak<Shared>, handle: Vec<u8>, path: String) -> Self {
        Self {
            session,
            handle,
            path,
            closed: AtomicBool::new(false),
        }
    }

    /// The path this file was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        if self.is_closed() {
            return Err(Error::FileHandleInvalid);
        }
        self.session.upgrade().ok_or(Error::ConnectionClosed)
    }

    /// Reads up to `len` bytes at `offset`.
    ///
    /// Returns `Ok(None)` at end of file; a shorter-than-requested read is
    /// not end of file.
    pub async fn read(&self, offset: u64, len: u32) -> Result<Option<Vec<u8>>> {
        let shared = self.shared()?;
        let id = shared.mux.allocate_id();
        shared
            .expect_data(
                id,
                Request::Read {
                    id,
                    handle: self.handle.clone(),
                    offset,
                    len,
                },
            )
            .await
    }

    /// Writes `data` at `offset`.
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let shared = self.shared()?;
        let id = shared.mux.allocate_id();
        shared
            .expect_status_ok(
                id,
                Request::Write {
                    id,
                    handle: self.handle.clone(),
                    offset,
                    data: data.to_vec(),
                },
            )
            .await
    }

    /// Retrieves the attributes of the open file.
    pub async fn fstat(&self) -> Result<FileAttributes> {
        let shared = self.shared()?;
        let id = shared.mux.allocate_id();
        shared
            .expect_attrs(
                id,
                Request::FStat {
                    id,
                    handle: self.handle.clone(),
                },
            )
            .await
    }

    /// Applies attributes to the open file.
    pub async fn fsetstat(&self, attrs: FileAttributes) -> Result<()> {
        let shared = self.shared()?;
        let id = shared.mux.allocate_id();
        shared
            .expect_status_ok(
                id,
                Request::FSetStat {
                    id,
                    handle: self.handle.clone(),
                    attrs,
                },
            )
            .await
    }

    /// Surrenders the handle.
    ///
    /// The first call sends CLOSE and reports the server's verdict; every
    /// later call succeeds without sending anything.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shared = self.session.upgrade().ok_or(Error::ConnectionClosed)?;
        let id = shared.mux.allocate_id();
        shared
            .expect_status_ok(
                id,
                Request::Close {
                    id,
                    handle: self.handle.clone(),
                },
            )
            .await?;
        debug!("closed file {}", self.path);
        Ok(())
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if !self.is_closed() && self.session.strong_count() > 0 {
            warn!(
                "file handle for {} dropped without close; the remote handle stays open until the session ends",
                self.path
            );
        }
    }
}

/// An open remote directory.
///
/// Obtained from [`SftpSession::open_dir`](super::SftpSession::open_dir).
/// The server pages the listing: each [`read_batch`](Self::read_batch)
/// yields one server-sized batch until the end-of-directory sentinel.
#[derive(Debug)]
pub struct RemoteDir {
    session: Weak<Shared>,
    handle: Vec<u8>,
    path: String,
    closed: AtomicBool,
}

impl RemoteDir {
    pub(crate) fn new(session: Weak<Shared>, handle: Vec<u8>, path: String) -> Self {
        Self {
            session,
            handle,
            path,
            closed: AtomicBool::new(false),
        }
    }

    /// The path this directory was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        if self.is_closed() {
            return Err(Error::FileHandleInvalid);
        }
        self.session.upgrade().ok_or(Error::ConnectionClosed)
    }

    /// Reads the next batch of entries, in server-chosen order.
    ///
    /// Returns `Ok(None)` once the directory is exhausted.
    pub async fn read_batch(&self) -> Result<Option<Vec<DirEntry>>> {
        let shared = self.shared()?;
        let id = shared.mux.allocate_id();
        shared
            .expect_name_batch(
                id,
                Request::ReadDir {
                    id,
                    handle: self.handle.clone(),
                },
            )
            .await
    }

    /// Drains the directory into one vector, preserving server order.
    pub async fn read_all(&self) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        while let Some(batch) = self.read_batch().await? {
            // A server that answers READDIR with an empty NAME instead of
            // the EOF status would loop us forever.
            if batch.is_empty() {
                break;
            }
            debug!("read {} entries from {}", batch.len(), self.path);
            entries.extend(batch);
        }
        Ok(entries)
    }

    /// Surrenders the handle; same discipline as
    /// [`RemoteFile::close`](RemoteFile::close).
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shared = self.session.upgrade().ok_or(Error::ConnectionClosed)?;
        let id = shared.mux.allocate_id();
        shared
            .expect_status_ok(
                id,
                Request::Close {
                    id,
                    handle: self.handle.clone(),
                },
            )
            .await?;
        debug!("closed directory {}", self.path);
        Ok(())
    }
}

impl Drop for RemoteDir {
    fn drop(&mut self) {
        if !self.is_closed() && self.session.strong_count() > 0 {
            warn!(
                "directory handle for {} dropped without close; the remote handle stays open until the session ends",
                self.path
            );
        }
    }
}
