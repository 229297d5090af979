//! Integration tests for the SFTP client session.
//!
//! Each test drives a real `SftpSession` over an in-process duplex pipe
//! against a scripted server. The server side parses client traffic with
//! the same codec (`Request::decode`), so every scenario also exercises
//! both directions of the wire format.

use skiff_proto::sftp::{
    DirEntry, Error, FileAttributes, OpenFlags, RemoteFile, Request, Response, SessionState,
    SftpConfig, SftpSession, Status, StatusCode,
};
use std::future::Future;
use std::pin::Pin;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, DuplexStream};

async fn read_packet(io: &mut DuplexStream) -> Request {
    let mut len = [0u8; 4];
    io.read_exact(&mut len).await.expect("client closed early");
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    io.read_exact(&mut body).await.expect("truncated packet");
    Request::decode(&body).expect("client sent a malformed packet")
}

async fn send(io: &mut DuplexStream, response: Response) {
    io.write_all(&response.encode())
        .await
        .expect("server write failed");
}

/// Answers the INIT with a plain version 3 VERSION.
async fn handshake(io: &mut DuplexStream) {
    match read_packet(io).await {
        Request::Init { version, .. } => assert_eq!(version, 3),
        other => panic!("expected INIT, got {}", other),
    }
    send(
        io,
        Response::Version {
            version: 3,
            extensions: Vec::new(),
        },
    )
    .await;
}

fn status(id: u32, code: StatusCode) -> Response {
    Response::Status {
        id,
        status: Status {
            code: code as u32,
            message: code.message().to_string(),
            language_tag: String::new(),
        },
    }
}

fn entry(name: &str) -> DirEntry {
    DirEntry {
        filename: name.to_string(),
        longname: format!("-rw-r--r--   1 user user     0 Jan  1 00:00 {}", name),
        attrs: FileAttributes::new(),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start_client(io: DuplexStream) -> skiff_proto::sftp::Result<SftpSession> {
    init_tracing();
    let (rx, tx) = split(io);
    SftpSession::start(rx, tx, SftpConfig::default()).await
}

/// S1: the 9-byte INIT literal goes out, the VERSION literal comes back,
/// and the session reaches `Ready`.
#[tokio::test]
async fn handshake_reaches_ready() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let mut init = [0u8; 9];
        server_io.read_exact(&mut init).await.unwrap();
        assert_eq!(init, [0, 0, 0, 5, 1, 0, 0, 0, 3]);
        server_io
            .write_all(&[0, 0, 0, 5, 2, 0, 0, 0, 3])
            .await
            .unwrap();
        server_io
    });

    let session = start_client(client_io).await.unwrap();
    assert!(session.is_ready());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.server_version(), 3);
    assert!(session.server_extensions().is_empty());

    let _server_io = server.await.unwrap();
}

/// S2: a VERSION below 3 closes the session with `UnsupportedVersion`.
#[tokio::test]
async fn handshake_version_mismatch() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let _ = read_packet(&mut server_io).await;
        send(
            &mut server_io,
            Response::Version {
                version: 2,
                extensions: Vec::new(),
            },
        )
        .await;
        server_io
    });

    let err = start_client(client_io).await.unwrap_err();
    assert_eq!(err, Error::UnsupportedVersion(2));

    let _server_io = server.await.unwrap();
}

/// S5: no reply to INIT; the deadline expires and startup fails with
/// `MissingResponse`. The paused clock jumps straight over the 15 seconds.
#[tokio::test(start_paused = true)]
async fn handshake_timeout() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    // Keep the server end alive but silent; dropping it would surface
    // `ConnectionClosed` instead of the deadline.
    let _server_io = server_io;

    let err = start_client(client_io).await.unwrap_err();
    assert_eq!(err, Error::MissingResponse);
}

/// S3: open, read, close, with the request IDs 1, 2, 3 visible on the wire.
#[tokio::test]
async fn open_read_close() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        match read_packet(&mut server_io).await {
            Request::Open {
                id, path, pflags, ..
            } => {
                assert_eq!(id, 1);
                assert_eq!(path, "/x");
                assert_eq!(pflags, OpenFlags::READ);
                send(
                    &mut server_io,
                    Response::Handle {
                        id,
                        handle: b"h".to_vec(),
                    },
                )
                .await;
            }
            other => panic!("expected OPEN, got {}", other),
        }

        match read_packet(&mut server_io).await {
            Request::Read {
                id,
                handle,
                offset,
                len,
            } => {
                assert_eq!(id, 2);
                assert_eq!(handle, b"h");
                assert_eq!(offset, 0);
                assert_eq!(len, 4);
                send(
                    &mut server_io,
                    Response::Data {
                        id,
                        data: b"abcd".to_vec(),
                    },
                )
                .await;
            }
            other => panic!("expected READ, got {}", other),
        }

        match read_packet(&mut server_io).await {
            Request::Close { id, handle } => {
                assert_eq!(id, 3);
                assert_eq!(handle, b"h");
                send(&mut server_io, status(id, StatusCode::Ok)).await;
            }
            other => panic!("expected CLOSE, got {}", other),
        }

        server_io
    });

    let session = start_client(client_io).await.unwrap();

    let file = session
        .open_file("/x", OpenFlags::READ, FileAttributes::new())
        .await
        .unwrap();
    let data = file.read(0, 4).await.unwrap().unwrap();
    assert_eq!(data, b"abcd");

    file.close().await.unwrap();
    assert!(file.is_closed());

    let _server_io = server.await.unwrap();
}

/// Property 6: the second close answers success without emitting a CLOSE
/// packet, and handle-scoped operations now fail with `FileHandleInvalid`.
#[tokio::test]
async fn double_close_sends_one_packet() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        match read_packet(&mut server_io).await {
            Request::Open { id, .. } => {
                send(
                    &mut server_io,
                    Response::Handle {
                        id,
                        handle: b"h".to_vec(),
                    },
                )
                .await
            }
            other => panic!("expected OPEN, got {}", other),
        }

        match read_packet(&mut server_io).await {
            Request::Close { id, .. } => send(&mut server_io, status(id, StatusCode::Ok)).await,
            other => panic!("expected CLOSE, got {}", other),
        }

        // Anything else the client sends before hanging up is a violation
        // of the close discipline.
        let mut rest = Vec::new();
        server_io.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "unexpected trailing bytes: {:?}", rest);
    });

    let session = start_client(client_io).await.unwrap();

    let file = session
        .open_file("/x", OpenFlags::READ, FileAttributes::new())
        .await
        .unwrap();
    file.close().await.unwrap();
    file.close().await.unwrap();

    let err = file.read(0, 1).await.unwrap_err();
    assert_eq!(err, Error::FileHandleInvalid);

    drop(file);
    drop(session);
    server.await.unwrap();
}

/// S4: two NAME batches, then one, then EOF; the aggregated listing keeps
/// server order.
#[tokio::test]
async fn readdir_loop() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        match read_packet(&mut server_io).await {
            Request::OpenDir { id, path } => {
                assert_eq!(path, "/d");
                send(
                    &mut server_io,
                    Response::Handle {
                        id,
                        handle: b"d1".to_vec(),
                    },
                )
                .await;
            }
            other => panic!("expected OPENDIR, got {}", other),
        }

        let batches: [Vec<DirEntry>; 2] =
            [vec![entry("zeta"), entry("alpha")], vec![entry("midway")]];
        for batch in batches {
            match read_packet(&mut server_io).await {
                Request::ReadDir { id, handle } => {
                    assert_eq!(handle, b"d1");
                    send(
                        &mut server_io,
                        Response::Name {
                            id,
                            entries: batch,
                        },
                    )
                    .await;
                }
                other => panic!("expected READDIR, got {}", other),
            }
        }

        match read_packet(&mut server_io).await {
            Request::ReadDir { id, .. } => send(&mut server_io, status(id, StatusCode::Eof)).await,
            other => panic!("expected READDIR, got {}", other),
        }

        match read_packet(&mut server_io).await {
            Request::Close { id, .. } => send(&mut server_io, status(id, StatusCode::Ok)).await,
            other => panic!("expected CLOSE, got {}", other),
        }

        server_io
    });

    let session = start_client(client_io).await.unwrap();

    let listing = session.read_dir("/d").await.unwrap();
    let names: Vec<_> = listing.iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, ["zeta", "alpha", "midway"]);

    let _server_io = server.await.unwrap();
}

/// S6: two stats in flight at once, answered in reverse order; each caller
/// gets its own attributes.
#[tokio::test]
async fn concurrent_requests_complete_out_of_order() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        let first = match read_packet(&mut server_io).await {
            Request::Stat { id, path } => {
                assert_eq!(path, "/a");
                id
            }
            other => panic!("expected STAT, got {}", other),
        };
        let second = match read_packet(&mut server_io).await {
            Request::Stat { id, path } => {
                assert_eq!(path, "/b");
                id
            }
            other => panic!("expected STAT, got {}", other),
        };
        assert_ne!(first, second);

        // Answer the later request first.
        let mut attrs_b = FileAttributes::new();
        attrs_b.size = Some(2);
        send(
            &mut server_io,
            Response::Attrs {
                id: second,
                attrs: attrs_b,
            },
        )
        .await;

        let mut attrs_a = FileAttributes::new();
        attrs_a.size = Some(1);
        send(
            &mut server_io,
            Response::Attrs {
                id: first,
                attrs: attrs_a,
            },
        )
        .await;

        server_io
    });

    let session = start_client(client_io).await.unwrap();

    let (a, b) = tokio::join!(session.stat("/a"), session.stat("/b"));
    assert_eq!(a.unwrap().size, Some(1));
    assert_eq!(b.unwrap().size, Some(2));

    let _server_io = server.await.unwrap();
}

/// Property 8: a structurally valid reply of the wrong variant surfaces as
/// `InvalidResponse`.
#[tokio::test]
async fn wrong_shape_reply_is_invalid_response() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        match read_packet(&mut server_io).await {
            Request::Open { id, .. } => {
                send(
                    &mut server_io,
                    Response::Attrs {
                        id,
                        attrs: FileAttributes::new(),
                    },
                )
                .await
            }
            other => panic!("expected OPEN, got {}", other),
        }

        server_io
    });

    let session = start_client(client_io).await.unwrap();

    let err = session
        .open_file("/x", OpenFlags::READ, FileAttributes::new())
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidResponse);

    let _server_io = server.await.unwrap();
}

/// A non-OK STATUS carries the server's code and message to the caller.
#[tokio::test]
async fn error_status_is_preserved() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        match read_packet(&mut server_io).await {
            Request::Stat { id, .. } => {
                send(&mut server_io, status(id, StatusCode::NoSuchFile)).await
            }
            other => panic!("expected STAT, got {}", other),
        }

        server_io
    });

    let session = start_client(client_io).await.unwrap();

    match session.stat("/missing").await.unwrap_err() {
        Error::Status(status) => {
            assert_eq!(status.status_code(), Some(StatusCode::NoSuchFile));
            assert_eq!(status.message, "No such file or directory");
        }
        other => panic!("expected a status error, got {}", other),
    }

    let _server_io = server.await.unwrap();
}

/// A reply for an ID nobody is waiting on is dropped; traffic afterwards
/// is unaffected.
#[tokio::test]
async fn unknown_request_id_is_dropped() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        // Unsolicited reply first.
        send(&mut server_io, status(999, StatusCode::Ok)).await;

        match read_packet(&mut server_io).await {
            Request::Stat { id, .. } => {
                let mut attrs = FileAttributes::new();
                attrs.size = Some(7);
                send(&mut server_io, Response::Attrs { id, attrs }).await;
            }
            other => panic!("expected STAT, got {}", other),
        }

        server_io
    });

    let session = start_client(client_io).await.unwrap();

    let attrs = session.stat("/a").await.unwrap();
    assert_eq!(attrs.size, Some(7));

    let _server_io = server.await.unwrap();
}

/// A malformed inbound packet is fatal: the pending operation fails with
/// the decode error and the session reaches `Closed`.
#[tokio::test]
async fn malformed_packet_closes_session() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        let _ = read_packet(&mut server_io).await;
        // Type 42 does not exist in version 3.
        server_io.write_all(&[0, 0, 0, 1, 42]).await.unwrap();
        server_io
    });

    let session = start_client(client_io).await.unwrap();

    let err = session.stat("/a").await.unwrap_err();
    assert!(matches!(err, Error::Malformed(_)));

    session.closed().await;
    assert_eq!(session.state(), SessionState::Closed);

    let _server_io = server.await.unwrap();
}

/// When the channel goes away, pending and future operations fail with
/// `ConnectionClosed` and `closed()` resolves.
#[tokio::test]
async fn channel_close_propagates() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;
        // Hang up.
        drop(server_io);
    });

    let session = start_client(client_io).await.unwrap();
    server.await.unwrap();

    session.closed().await;
    assert_eq!(session.state(), SessionState::Closed);

    let err = session.stat("/a").await.unwrap_err();
    assert_eq!(err, Error::ConnectionClosed);
}

/// Extension pairs flow both ways during the handshake.
#[tokio::test]
async fn handshake_extensions_roundtrip() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        match read_packet(&mut server_io).await {
            Request::Init {
                version,
                extensions,
            } => {
                assert_eq!(version, 3);
                assert_eq!(
                    extensions,
                    vec![("check-file".to_string(), "md5".to_string())]
                );
            }
            other => panic!("expected INIT, got {}", other),
        }
        send(
            &mut server_io,
            Response::Version {
                version: 3,
                extensions: vec![("posix-rename@openssh.com".to_string(), "1".to_string())],
            },
        )
        .await;
        server_io
    });

    let (rx, tx) = split(client_io);
    let config = SftpConfig {
        extensions: vec![("check-file".to_string(), "md5".to_string())],
        ..SftpConfig::default()
    };
    let session = SftpSession::start(rx, tx, config).await.unwrap();

    assert_eq!(
        session.server_extensions(),
        &[("posix-rename@openssh.com".to_string(), "1".to_string())]
    );

    let _server_io = server.await.unwrap();
}

/// The scoped helper closes on success and hands back the scope's value.
#[tokio::test]
async fn with_file_closes_on_success() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        match read_packet(&mut server_io).await {
            Request::Open { id, .. } => {
                send(
                    &mut server_io,
                    Response::Handle {
                        id,
                        handle: b"h".to_vec(),
                    },
                )
                .await
            }
            other => panic!("expected OPEN, got {}", other),
        }

        match read_packet(&mut server_io).await {
            Request::FStat { id, handle } => {
                assert_eq!(handle, b"h");
                let mut attrs = FileAttributes::new();
                attrs.size = Some(512);
                send(&mut server_io, Response::Attrs { id, attrs }).await;
            }
            other => panic!("expected FSTAT, got {}", other),
        }

        match read_packet(&mut server_io).await {
            Request::Close { id, .. } => send(&mut server_io, status(id, StatusCode::Ok)).await,
            other => panic!("expected CLOSE, got {}", other),
        }

        server_io
    });

    let session = start_client(client_io).await.unwrap();

    fn fstat_size(
        file: &RemoteFile,
    ) -> Pin<Box<dyn Future<Output = skiff_proto::sftp::Result<Option<u64>>> + Send + '_>> {
        Box::pin(async move { Ok(file.fstat().await?.size) })
    }

    let size = session
        .with_file("/x", OpenFlags::READ, FileAttributes::new(), fstat_size)
        .await
        .unwrap();
    assert_eq!(size, Some(512));

    let _server_io = server.await.unwrap();
}

/// The scope's error wins over the close outcome, and the close still
/// happens.
#[tokio::test]
async fn with_file_closes_on_failure() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        match read_packet(&mut server_io).await {
            Request::Open { id, .. } => {
                send(
                    &mut server_io,
                    Response::Handle {
                        id,
                        handle: b"h".to_vec(),
                    },
                )
                .await
            }
            other => panic!("expected OPEN, got {}", other),
        }

        match read_packet(&mut server_io).await {
            Request::Close { id, .. } => send(&mut server_io, status(id, StatusCode::Ok)).await,
            other => panic!("expected CLOSE, got {}", other),
        }

        server_io
    });

    let session = start_client(client_io).await.unwrap();

    fn failing_scope(
        _file: &RemoteFile,
    ) -> Pin<Box<dyn Future<Output = skiff_proto::sftp::Result<()>> + Send + '_>> {
        Box::pin(async move { Err(Error::InvalidResponse) })
    }

    let err = session
        .with_file("/x", OpenFlags::READ, FileAttributes::new(), failing_scope)
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidResponse);

    let _server_io = server.await.unwrap();
}

/// Reading a file to EOF: DATA replies until the EOF status sentinel.
#[tokio::test]
async fn read_until_eof() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        handshake(&mut server_io).await;

        match read_packet(&mut server_io).await {
            Request::Open { id, .. } => {
                send(
                    &mut server_io,
                    Response::Handle {
                        id,
                        handle: b"h".to_vec(),
                    },
                )
                .await
            }
            other => panic!("expected OPEN, got {}", other),
        }

        for chunk in [&b"abc"[..], &b"de"[..]] {
            match read_packet(&mut server_io).await {
                Request::Read { id, .. } => {
                    send(
                        &mut server_io,
                        Response::Data {
                            id,
                            data: chunk.to_vec(),
                        },
                    )
                    .await
                }
                other => panic!("expected READ, got {}", other),
            }
        }

        match read_packet(&mut server_io).await {
            Request::Read { id, .. } => send(&mut server_io, status(id, StatusCode::Eof)).await,
            other => panic!("expected READ, got {}", other),
        }

        match read_packet(&mut server_io).await {
            Request::Close { id, .. } => send(&mut server_io, status(id, StatusCode::Ok)).await,
            other => panic!("expected CLOSE, got {}", other),
        }

        server_io
    });

    let session = start_client(client_io).await.unwrap();

    let file = session
        .open_file("/f", OpenFlags::READ, FileAttributes::new())
        .await
        .unwrap();

    let mut contents = Vec::new();
    let mut offset = 0u64;
    while let Some(chunk) = file.read(offset, 3).await.unwrap() {
        offset += chunk.len() as u64;
        contents.extend(chunk);
    }
    assert_eq!(contents, b"abcde");

    file.close().await.unwrap();
    let _server_io = server.await.unwrap();
}
