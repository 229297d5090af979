//! SFTP session lifecycle and operation surface.
//!
//! A session is started on a duplex byte channel that is already bound to
//! the remote `sftp` subsystem. Startup sends SSH_FXP_INIT, waits for the
//! server's SSH_FXP_VERSION under a hard deadline and only then hands the
//! caller a usable session:
//!
//! ```text
//! Handshaking --send INIT--> (awaiting VERSION) --VERSION >= 3--> Ready
//!     |                                                             |
//!     +-- deadline / channel closed / VERSION < 3 --> Closed <------+
//! ```
//!
//! Once ready, any number of operations may be in flight at once; a reader
//! task and a writer task shuttle packets between the channel and the
//! request multiplexer.

use super::error::{Error, Result};
use super::file::{RemoteDir, RemoteFile};
use super::framer::{Framer, DEFAULT_MAX_FRAME_LEN};
use super::message::{Request, Response, SFTP_VERSION};
use super::mux::Multiplexer;
use super::types::{DirEntry, FileAttributes, Status};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Hard deadline for the INIT/VERSION exchange, measured from session start.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SftpConfig {
    /// Extension pairs announced in SSH_FXP_INIT
    pub extensions: Vec<(String, String)>,
    /// Ceiling for one inbound frame; larger frames are a protocol fault
    pub max_frame_len: usize,
    /// Deadline for the INIT/VERSION exchange
    pub handshake_timeout: Duration,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Session state, advancing in one direction only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// INIT sent, VERSION not yet received
    Handshaking,
    /// Handshake complete, user operations permitted
    Ready,
    /// Torn down; terminal
    Closed,
}

/// State shared between the session, its facades and its I/O tasks.
///
/// Facades hold this through a `Weak`, so an abandoned session is not kept
/// alive by stray file handles.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) mux: Multiplexer,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    ready: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    /// Current lifecycle state.
    fn state(&self) -> SessionState {
        if self.mux.is_closed() {
            SessionState::Closed
        } else if self.ready.load(Ordering::SeqCst) {
            SessionState::Ready
        } else {
            SessionState::Handshaking
        }
    }

    /// Tears the session down with `cause`. Idempotent; only the first call
    /// sweeps the pending table and announces the close.
    pub(crate) fn shutdown(&self, cause: Error) {
        if self.mux.close(cause) {
            let _ = self.closed_tx.send(true);
            info!("SFTP session closed");
        }
    }

    fn close_cause(&self) -> Error {
        self.mux.close_cause().unwrap_or(Error::ConnectionClosed)
    }

    /// Sends one request and waits for its reply.
    ///
    /// The completion slot is registered before the bytes are handed to the
    /// writer, so a reply can never race past its waiter.
    async fn roundtrip(&self, id: u32, request: Request) -> Result<Response> {
        let slot = self.mux.register(id)?;
        trace!("sending packet: {}", request);
        if self.outbound.send(request.encode()).is_err() {
            return Err(self.close_cause());
        }
        match slot.await {
            Ok(result) => result,
            // Slot dropped without completion: the sweep ran concurrently.
            Err(_) => Err(self.close_cause()),
        }
    }

    fn status_error(&self, status: Status) -> Error {
        warn!("server returned {}", status);
        Error::Status(status)
    }

    fn invalid_response(&self, response: &Response) -> Error {
        warn!("reply {} does not match the request's expected shape", response);
        Error::InvalidResponse
    }

    pub(crate) async fn expect_status_ok(&self, id: u32, request: Request) -> Result<()> {
        match self.roundtrip(id, request).await? {
            Response::Status { status, .. } if status.is_ok() => Ok(()),
            Response::Status { status, .. } => Err(self.status_error(status)),
            other => Err(self.invalid_response(&other)),
        }
    }

    pub(crate) async fn expect_handle(&self, id: u32, request: Request) -> Result<Vec<u8>> {
        match self.roundtrip(id, request).await? {
            Response::Handle { handle, .. } => Ok(handle),
            Response::Status { status, .. } => Err(self.status_error(status)),
            other => Err(self.invalid_response(&other)),
        }
    }

    pub(crate) async fn expect_attrs(&self, id: u32, request: Request) -> Result<FileAttributes> {
        match self.roundtrip(id, request).await? {
            Response::Attrs { attrs, .. } => Ok(attrs),
            Response::Status { status, .. } => Err(self.status_error(status)),
            other => Err(self.invalid_response(&other)),
        }
    }

    /// Expects DATA; a STATUS of EOF is the end-of-file sentinel, not an
    /// error.
    pub(crate) async fn expect_data(&self, id: u32, request: Request) -> Result<Option<Vec<u8>>> {
        match self.roundtrip(id, request).await? {
            Response::Data { data, .. } => Ok(Some(data)),
            Response::Status { status, .. } if status.is_eof() => Ok(None),
            Response::Status { status, .. } => Err(self.status_error(status)),
            other => Err(self.invalid_response(&other)),
        }
    }

    pub(crate) async fn expect_name(&self, id: u32, request: Request) -> Result<Vec<DirEntry>> {
        match self.roundtrip(id, request).await? {
            Response::Name { entries, .. } => Ok(entries),
            Response::Status { status, .. } => Err(self.status_error(status)),
            other => Err(self.invalid_response(&other)),
        }
    }

    /// Expects NAME; a STATUS of EOF is the end-of-directory sentinel, not
    /// an error.
    pub(crate) async fn expect_name_batch(
        &self,
        id: u32,
        request: Request,
    ) -> Result<Option<Vec<DirEntry>>> {
        match self.roundtrip(id, request).await? {
            Response::Name { entries, .. } => Ok(Some(entries)),
            Response::Status { status, .. } if status.is_eof() => Ok(None),
            Response::Status { status, .. } => Err(self.status_error(status)),
            other => Err(self.invalid_response(&other)),
        }
    }

    pub(crate) async fn expect_extended_reply(
        &self,
        id: u32,
        request: Request,
    ) -> Result<Vec<u8>> {
        match self.roundtrip(id, request).await? {
            Response::ExtendedReply { data, .. } => Ok(data),
            Response::Status { status, .. } => Err(self.status_error(status)),
            other => Err(self.invalid_response(&other)),
        }
    }
}

/// An SFTP version 3 client session.
///
/// Created by [`SftpSession::start`] on a channel already bound to the
/// remote `sftp` subsystem. Operations may be issued concurrently; replies
/// are correlated by request ID, so the server is free to answer out of
/// order.
#[derive(Debug)]
pub struct SftpSession {
    shared: Arc<Shared>,
    server_version: u32,
    server_extensions: Vec<(String, String)>,
    closed_rx: watch::Receiver<bool>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl SftpSession {
    /// Starts a session: spawns the I/O tasks, performs the INIT/VERSION
    /// handshake and returns once the session is ready.
    ///
    /// The caller must already have requested the `sftp` subsystem on the
    /// underlying SSH channel; the handshake deadline runs from here.
    ///
    /// # Errors
    ///
    /// [`Error::MissingResponse`] if the server does not answer within the
    /// deadline, [`Error::UnsupportedVersion`] if it negotiates a version
    /// below 3, [`Error::ConnectionClosed`] or [`Error::Malformed`] if the
    /// channel fails during the exchange.
    pub async fn start<R, W>(reader: R, writer: W, config: SftpConfig) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let (init_tx, init_rx) = oneshot::channel();

        let shared = Arc::new(Shared {
            mux: Multiplexer::new(),
            outbound: outbound_tx,
            ready: AtomicBool::new(false),
            closed_tx,
        });

        let writer_task = tokio::spawn(write_loop(writer, Arc::clone(&shared), outbound_rx));
        let reader_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&shared),
            Framer::new(config.max_frame_len),
            init_tx,
        ));

        debug!("initializing SFTP session");
        let init = Request::Init {
            version: SFTP_VERSION,
            extensions: config.extensions,
        };
        trace!("sending packet: {}", init);
        let _ = shared.outbound.send(init.encode());

        let handshake = match timeout(config.handshake_timeout, init_rx).await {
            Ok(Ok(outcome)) => outcome,
            // The reader fails the promise before it exits, so a bare recv
            // error means the task was torn down; report the recorded cause.
            Ok(Err(_)) => Err(shared.close_cause()),
            Err(_) => {
                warn!(
                    "server did not answer INIT within {:?}",
                    config.handshake_timeout
                );
                shared.shutdown(Error::MissingResponse);
                Err(Error::MissingResponse)
            }
        };

        let (server_version, server_extensions) = match handshake {
            Ok(negotiated) => negotiated,
            Err(err) => {
                reader_task.abort();
                writer_task.abort();
                return Err(err);
            }
        };

        if server_version < SFTP_VERSION {
            warn!("server negotiated SFTP version {}", server_version);
            shared.shutdown(Error::ConnectionClosed);
            reader_task.abort();
            writer_task.abort();
            return Err(Error::UnsupportedVersion(server_version));
        }

        shared.ready.store(true, Ordering::SeqCst);
        info!("SFTP session ready (server version {})", server_version);

        Ok(Self {
            shared,
            server_version,
            server_extensions,
            closed_rx,
            reader_task,
            writer_task,
        })
    }

    /// The version the server answered with (always ≥ 3; the session still
    /// speaks version 3 on the wire).
    pub fn server_version(&self) -> u32 {
        self.server_version
    }

    /// Extension pairs announced by the server during the handshake.
    pub fn server_extensions(&self) -> &[(String, String)] {
        &self.server_extensions
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Whether the handshake has completed and the session is usable.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Tears the session down. Idempotent; every pending operation fails
    /// with [`Error::ConnectionClosed`].
    pub fn close(&self) {
        self.shared.shutdown(Error::ConnectionClosed);
        self.reader_task.abort();
        self.writer_task.abort();
    }

    /// Resolves once the session has closed, whatever the trigger.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Canonicalizes a path.
    pub async fn realpath(&self, path: &str) -> Result<String> {
        let id = self.shared.mux.allocate_id();
        let request = Request::RealPath {
            id,
            path: path.to_string(),
        };
        let entry = self.first_name(id, request).await?;
        debug!("canonicalized {} -> {}", path, entry);
        Ok(entry)
    }

    /// Reads the target of a symbolic link.
    pub async fn readlink(&self, path: &str) -> Result<String> {
        let id = self.shared.mux.allocate_id();
        let request = Request::ReadLink {
            id,
            path: path.to_string(),
        };
        self.first_name(id, request).await
    }

    /// REALPATH and READLINK answer with a NAME whose first entry carries
    /// the resolved path.
    async fn first_name(&self, id: u32, request: Request) -> Result<String> {
        let mut entries = self.shared.expect_name(id, request).await?;
        if entries.is_empty() {
            warn!("NAME reply with no entries for a path resolution request");
            return Err(Error::InvalidResponse);
        }
        Ok(entries.remove(0).filename)
    }

    /// Retrieves attributes for a path, following symbolic links.
    pub async fn stat(&self, path: &str) -> Result<FileAttributes> {
        let id = self.shared.mux.allocate_id();
        self.shared
            .expect_attrs(
                id,
                Request::Stat {
                    id,
                    path: path.to_string(),
                },
            )
            .await
    }

    /// Retrieves attributes for a path without following symbolic links.
    pub async fn lstat(&self, path: &str) -> Result<FileAttributes> {
        let id = self.shared.mux.allocate_id();
        self.shared
            .expect_attrs(
                id,
                Request::LStat {
                    id,
                    path: path.to_string(),
                },
            )
            .await
    }

    /// Applies attributes to a path.
    pub async fn setstat(&self, path: &str, attrs: FileAttributes) -> Result<()> {
        let id = self.shared.mux.allocate_id();
        self.shared
            .expect_status_ok(
                id,
                Request::SetStat {
                    id,
                    path: path.to_string(),
                    attrs,
                },
            )
            .await
    }

    /// Opens a file and returns the facade owning its handle.
    ///
    /// `pflags` is a combination of [`OpenFlags`](super::types::OpenFlags)
    /// bits; `attrs` sets the initial attributes when the open creates the
    /// file and is encoded on the wire even when empty.
    pub async fn open_file(
        &self,
        path: &str,
        pflags: u32,
        attrs: FileAttributes,
    ) -> Result<RemoteFile> {
        let id = self.shared.mux.allocate_id();
        let handle = self
            .shared
            .expect_handle(
                id,
                Request::Open {
                    id,
                    path: path.to_string(),
                    pflags,
                    attrs,
                },
            )
            .await?;
        debug!("opened file {}", path);
        Ok(RemoteFile::new(
            Arc::downgrade(&self.shared),
            handle,
            path.to_string(),
        ))
    }

    /// Opens a directory for listing and returns the facade owning its
    /// handle.
    pub async fn open_dir(&self, path: &str) -> Result<RemoteDir> {
        let id = self.shared.mux.allocate_id();
        let handle = self
            .shared
            .expect_handle(
                id,
                Request::OpenDir {
                    id,
                    path: path.to_string(),
                },
            )
            .await?;
        debug!("opened directory {}", path);
        Ok(RemoteDir::new(
            Arc::downgrade(&self.shared),
            handle,
            path.to_string(),
        ))
    }

    /// Creates a directory.
    pub async fn mkdir(&self, path: &str, attrs: FileAttributes) -> Result<()> {
        let id = self.shared.mux.allocate_id();
        self.shared
            .expect_status_ok(
                id,
                Request::MkDir {
                    id,
                    path: path.to_string(),
                    attrs,
                },
            )
            .await
    }

    /// Removes an empty directory.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let id = self.shared.mux.allocate_id();
        self.shared
            .expect_status_ok(
                id,
                Request::RmDir {
                    id,
                    path: path.to_string(),
                },
            )
            .await
    }

    /// Removes a file.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let id = self.shared.mux.allocate_id();
        self.shared
            .expect_status_ok(
                id,
                Request::Remove {
                    id,
                    filename: path.to_string(),
                },
            )
            .await
    }

    /// Renames a file or directory.
    pub async fn rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        let id = self.shared.mux.allocate_id();
        self.shared
            .expect_status_ok(
                id,
                Request::Rename {
                    id,
                    oldpath: oldpath.to_string(),
                    newpath: newpath.to_string(),
                },
            )
            .await
    }

    /// Creates a symbolic link at `linkpath` pointing at `targetpath`.
    pub async fn symlink(&self, linkpath: &str, targetpath: &str) -> Result<()> {
        let id = self.shared.mux.allocate_id();
        self.shared
            .expect_status_ok(
                id,
                Request::Symlink {
                    id,
                    linkpath: linkpath.to_string(),
                    targetpath: targetpath.to_string(),
                },
            )
            .await
    }

    /// Issues a vendor extension request and returns the opaque reply.
    pub async fn extended(&self, request: &str, data: &[u8]) -> Result<Vec<u8>> {
        let id = self.shared.mux.allocate_id();
        self.shared
            .expect_extended_reply(
                id,
                Request::Extended {
                    id,
                    request: request.to_string(),
                    data: data.to_vec(),
                },
            )
            .await
    }

    /// Lists a whole directory: open, drain every batch, close.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let dir = self.open_dir(path).await?;
        match dir.read_all().await {
            Ok(entries) => {
                dir.close().await?;
                debug!("listed {} entries in {}", entries.len(), path);
                Ok(entries)
            }
            Err(err) => {
                if let Err(close_err) = dir.close().await {
                    warn!(
                        "closing directory {} after failed listing also failed: {}",
                        path, close_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Opens a file, runs `scope` on it and closes it on every exit path.
    ///
    /// The borrow handed to `scope` keeps the facade from escaping the
    /// call. If the scope succeeds, a close failure is returned; if the
    /// scope fails, its error wins and the close failure is only logged.
    pub async fn with_file<T, F>(
        &self,
        path: &str,
        pflags: u32,
        attrs: FileAttributes,
        scope: F,
    ) -> Result<T>
    where
        F: for<'a> FnOnce(&'a RemoteFile) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        let file = self.open_file(path, pflags, attrs).await?;
        match scope(&file).await {
            Ok(value) => {
                file.close().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(close_err) = file.close().await {
                    warn!(
                        "closing {} after failed scope also failed: {}",
                        path, close_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Opens a directory, runs `scope` on it and closes it on every exit
    /// path, with the same error precedence as [`with_file`](Self::with_file).
    pub async fn with_dir<T, F>(&self, path: &str, scope: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a RemoteDir) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        let dir = self.open_dir(path).await?;
        match scope(&dir).await {
            Ok(value) => {
                dir.close().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(close_err) = dir.close().await {
                    warn!(
                        "closing {} after failed scope also failed: {}",
                        path, close_err
                    );
                }
                Err(err)
            }
        }
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Serializes outbound packets onto the channel, one whole packet per
/// write, in submission order.
async fn write_loop<W>(
    mut writer: W,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(packet) = outbound.recv().await {
        if let Err(err) = writer.write_all(&packet).await {
            warn!("channel write failed: {}", err);
            shared.shutdown(Error::ConnectionClosed);
            break;
        }
        if let Err(err) = writer.flush().await {
            warn!("channel flush failed: {}", err);
            shared.shutdown(Error::ConnectionClosed);
            break;
        }
    }
}

/// Deframes and decodes inbound packets, resolves the handshake promise
/// with the first one and routes the rest by request ID.
async fn read_loop<R>(
    mut reader: R,
    shared: Arc<Shared>,
    mut framer: Framer,
    init_tx: oneshot::Sender<Result<(u32, Vec<(String, String)>)>>,
) where
    R: AsyncRead + Unpin,
{
    let mut init_tx = Some(init_tx);

    let fault = 'channel: loop {
        match reader.read_buf(framer.buffer_mut()).await {
            Ok(0) => break 'channel Error::ConnectionClosed,
            Ok(_) => {}
            Err(err) => {
                warn!("channel read failed: {}", err);
                break 'channel Error::ConnectionClosed;
            }
        }

        loop {
            let frame = match framer.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    warn!("{}", err);
                    break 'channel err;
                }
            };

            let response = match Response::decode(&frame) {
                Ok(response) => response,
                Err(err) => {
                    warn!("{}", err);
                    break 'channel err;
                }
            };
            trace!("received packet: {}", response);

            match response {
                Response::Version {
                    version,
                    extensions,
                } => match init_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(Ok((version, extensions)));
                    }
                    None => {
                        break 'channel Error::Malformed(
                            "unexpected VERSION after handshake".to_string(),
                        )
                    }
                },
                other => {
                    if init_tx.is_some() {
                        break 'channel Error::Malformed(format!(
                            "expected VERSION, got {}",
                            other
                        ));
                    }
                    if let Some(id) = other.id() {
                        shared.mux.route(id, other);
                    }
                }
            }
        }
    };

    if let Some(tx) = init_tx.take() {
        let _ = tx.send(Err(fault.clone()));
    }
    shared.shutdown(fault);
}
