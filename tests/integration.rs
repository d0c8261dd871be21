//! Integration tests for clamd-client.
//!
//! A scripted daemon accepts one connection, records the command (and any
//! INSTREAM chunks), writes a canned reply and then waits for the client
//! to close its side.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clamd_client::{
    Clamd, ClamdError, CommandMode, ScanCommand, SessionEvent, Status, StreamState, EICAR,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the scripted daemon saw on one connection.
#[derive(Debug, Default)]
struct Received {
    /// Command bytes including the mode prefix, without the terminator.
    command: Vec<u8>,
    chunks: Vec<Vec<u8>>,
    /// Zero-length chunk received.
    eof_marker: bool,
    /// Client closed its side.
    client_closed: bool,
}

impl Received {
    fn command_str(&self) -> &str {
        std::str::from_utf8(&self.command).unwrap()
    }
}

async fn serve<S>(mut stream: S, terminator: u8, reply: Vec<u8>) -> Received
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut received = Received::default();

    loop {
        match stream.read_u8().await {
            Ok(b) if b == terminator => break,
            Ok(b) => received.command.push(b),
            Err(_) => {
                received.client_closed = true;
                return received;
            }
        }
    }

    if received.command.ends_with(b"INSTREAM") {
        loop {
            let len = match stream.read_u32().await {
                Ok(len) => len,
                Err(_) => {
                    received.client_closed = true;
                    return received;
                }
            };
            if len == 0 {
                received.eof_marker = true;
                break;
            }
            let mut chunk = vec![0u8; len as usize];
            if stream.read_exact(&mut chunk).await.is_err() {
                received.client_closed = true;
                return received;
            }
            received.chunks.push(chunk);
        }
    }

    let _ = stream.write_all(&reply).await;
    let _ = stream.shutdown().await;

    // EOF or reset: either way the client released the connection
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest).await;
    received.client_closed = true;
    received
}

/// Start a one-shot TCP daemon. Returns its address and the recording.
async fn tcp_daemon(terminator: u8, reply: impl Into<Vec<u8>>) -> (String, JoinHandle<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let reply = reply.into();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, terminator, reply).await
    });

    (format!("tcp://{}", addr), handle)
}

async fn daemon(reply: impl Into<Vec<u8>>) -> (Clamd, JoinHandle<Received>) {
    let (addr, handle) = tcp_daemon(b'\n', reply).await;
    (Clamd::new(&addr).unwrap(), handle)
}

async fn join(handle: JoinHandle<Received>) -> Received {
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("daemon did not see the connection close")
        .unwrap()
}

type EventLog = Arc<Mutex<Vec<SessionEvent>>>;

fn event_log() -> (EventLog, impl Fn(&SessionEvent) + Send + Sync + 'static) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    (log, move |event: &SessionEvent| {
        sink.lock().unwrap().push(event.clone())
    })
}

/// The closer runs on its own task; wait for its event.
async fn wait_for(log: &EventLog, pred: impl Fn(&SessionEvent) -> bool) {
    for _ in 0..200 {
        if log.lock().unwrap().iter().any(&pred) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("event not observed: {:?}", log.lock().unwrap());
}

// ============================================================================
// Control commands
// ============================================================================

#[tokio::test]
async fn test_ping() {
    let (clamd, handle) = daemon("PONG\n").await;

    clamd.ping().await.unwrap();

    let received = join(handle).await;
    assert_eq!(received.command_str(), "nPING");
    assert!(received.client_closed);
}

#[tokio::test]
async fn test_ping_unexpected_reply() {
    let (clamd, handle) = daemon("PANG\n").await;

    let err = clamd.ping().await.unwrap_err();
    assert!(matches!(err, ClamdError::Protocol(_)));
    assert!(err.to_string().contains("PANG"));
    join(handle).await;
}

#[tokio::test]
async fn test_ping_empty_reply() {
    let (clamd, handle) = daemon("").await;

    let err = clamd.ping().await.unwrap_err();
    assert!(matches!(err, ClamdError::Protocol(_)));
    assert!(err.to_string().contains("got nothing"));
    join(handle).await;
}

#[tokio::test]
async fn test_ping_extra_records() {
    let (clamd, handle) = daemon("PONG\nPONG\n").await;

    let err = clamd.ping().await.unwrap_err();
    assert!(matches!(err, ClamdError::Protocol(_)));
    join(handle).await;
}

#[tokio::test]
async fn test_version() {
    let (clamd, handle) = daemon("ClamAV 1.0.5/27400/Sat Oct 17 08:26:54 2026\n").await;

    let version = clamd.version().await.unwrap();
    assert_eq!(version.raw, "ClamAV 1.0.5/27400/Sat Oct 17 08:26:54 2026");
    assert_eq!(version.status, Status::Unstructured);

    assert_eq!(join(handle).await.command_str(), "nVERSION");
}

#[tokio::test]
async fn test_version_empty_reply() {
    let (clamd, handle) = daemon("").await;

    let err = clamd.version().await.unwrap_err();
    assert!(matches!(err, ClamdError::Protocol(_)));
    join(handle).await;
}

#[tokio::test]
async fn test_stats() {
    let reply = "POOLS: 1\n\nSTATE: VALID PRIMARY\nTHREADS: live 1  idle 0 max 12 idle-timeout 30\nQUEUE: 0 items\nMEMSTATS: heap N/A mmap N/A used N/A\nEND\n";
    let (clamd, handle) = daemon(reply).await;

    let stats = clamd.stats().await.unwrap();
    assert_eq!(stats.pools, "1");
    assert_eq!(stats.state, "STATE: VALID PRIMARY");
    assert_eq!(stats.threads, "THREADS: live 1  idle 0 max 12 idle-timeout 30");
    assert_eq!(stats.queue, "QUEUE: 0 items");
    assert_eq!(stats.memstats, "MEMSTATS: heap N/A mmap N/A used N/A");

    assert_eq!(join(handle).await.command_str(), "nSTATS");
}

#[tokio::test]
async fn test_stats_unknown_line() {
    let (clamd, handle) = daemon("POOLS: 1\nBOGUS: x\nEND\n").await;

    let err = clamd.stats().await.unwrap_err();
    assert!(matches!(err, ClamdError::Decode(_)));
    assert!(err.to_string().contains("BOGUS: x"));
    join(handle).await;
}

#[tokio::test]
async fn test_reload() {
    let (clamd, handle) = daemon("RELOADING\n").await;

    clamd.reload().await.unwrap();
    assert_eq!(join(handle).await.command_str(), "nRELOAD");
}

#[tokio::test]
async fn test_shutdown() {
    let (clamd, handle) = daemon("").await;

    clamd.shutdown().await.unwrap();

    let received = join(handle).await;
    assert_eq!(received.command_str(), "nSHUTDOWN");
    assert!(received.client_closed);
}

// ============================================================================
// Path scans
// ============================================================================

#[tokio::test]
async fn test_scan_variants_wire_lines() {
    for variant in ScanCommand::ALL {
        let (clamd, handle) = daemon("/srv/file.txt: OK\n").await;

        let result = clamd.scan_file("/srv/file.txt", variant).await.unwrap();
        assert!(result.is_clean());
        assert_eq!(result.path, "/srv/file.txt");

        let received = join(handle).await;
        assert_eq!(received.command_str(), format!("n{} /srv/file.txt", variant));
    }
}

#[tokio::test]
async fn test_scan_wrappers() {
    let (clamd, handle) = daemon("/x: OK\n").await;
    clamd.scan("/x").await.unwrap();
    assert_eq!(join(handle).await.command_str(), "nSCAN /x");

    let (clamd, handle) = daemon("/x: OK\n").await;
    clamd.raw_scan("/x").await.unwrap();
    assert_eq!(join(handle).await.command_str(), "nRAWSCAN /x");

    let (clamd, handle) = daemon("/x: OK\n").await;
    clamd.multi_scan("/x").await.unwrap();
    assert_eq!(join(handle).await.command_str(), "nMULTISCAN /x");

    let (clamd, handle) = daemon("/x: OK\n").await;
    clamd.cont_scan("/x").await.unwrap();
    assert_eq!(join(handle).await.command_str(), "nCONTSCAN /x");

    let (clamd, handle) = daemon("/x: OK\n").await;
    clamd.all_match_scan("/x").await.unwrap();
    assert_eq!(join(handle).await.command_str(), "nALLMATCHSCAN /x");
}

#[tokio::test]
async fn test_scan_file_stream_multiple_records() {
    let reply = "/srv/a: OK\n/srv/b: Eicar-Signature FOUND\n/srv/c: Access denied. ERROR\n";
    let (clamd, handle) = daemon(reply).await;

    let records = clamd
        .scan_file_stream("/srv", ScanCommand::ContScan)
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].status, Status::Ok);
    assert_eq!(records[0].path, "/srv/a");
    assert_eq!(records[1].status, Status::Found);
    assert_eq!(records[1].path, "/srv/b");
    assert_eq!(records[1].description, "Eicar-Signature");
    assert_eq!(records[2].status, Status::Error);
    assert_eq!(records[2].path, "/srv/c");
    assert_eq!(records[2].description, "Access denied.");

    assert!(join(handle).await.client_closed);
}

#[tokio::test]
async fn test_scan_file_returns_parse_error_record() {
    let (clamd, handle) = daemon("/srv/a: FOUND\n").await;

    let result = clamd.scan("/srv/a").await.unwrap();
    assert_eq!(result.status, Status::ParseError);
    assert_eq!(result.raw, "/srv/a: FOUND");
    join(handle).await;
}

#[tokio::test]
async fn test_found_with_extended_info() {
    let (clamd, handle) =
        daemon("/srv/eicar: Eicar-Signature(44d88612fea8a8f36de82e1278abb02f:68) FOUND\n").await;

    let result = clamd.all_match_scan("/srv/eicar").await.unwrap();
    assert!(result.is_infected());
    assert_eq!(result.description, "Eicar-Signature");
    assert_eq!(result.hash, "44d88612fea8a8f36de82e1278abb02f");
    assert_eq!(result.size, 68);
    join(handle).await;
}

#[tokio::test]
async fn test_abandoned_stream_still_closes() {
    let reply: String = (0..500).map(|i| format!("/srv/f{}: OK\n", i)).collect();
    let (addr, handle) = tcp_daemon(b'\n', reply).await;
    let clamd = Clamd::builder()
        .address(addr)
        .channel_capacity(1)
        .build()
        .unwrap();

    let mut stream = clamd
        .scan_file_stream("/srv", ScanCommand::ContScan)
        .await
        .unwrap();
    assert!(stream.next().await.unwrap().unwrap().is_clean());
    drop(stream);

    assert!(join(handle).await.client_closed);
}

// ============================================================================
// INSTREAM
// ============================================================================

#[tokio::test]
async fn test_scan_stream_chunk_framing() {
    let (addr, handle) = tcp_daemon(b'\n', "stream: OK\n").await;
    let clamd = Clamd::builder().address(addr).chunk_size(4).build().unwrap();

    let records = clamd
        .scan_bytes(b"0123456789", CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_clean());
    assert_eq!(records[0].path, "stream");

    let received = join(handle).await;
    assert_eq!(received.command_str(), "nINSTREAM");
    assert_eq!(
        received.chunks,
        vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]
    );
    assert!(received.eof_marker);
    assert!(received.client_closed);
}

#[tokio::test]
async fn test_scan_stream_exact_chunk_multiple() {
    let (addr, handle) = tcp_daemon(b'\n', "stream: OK\n").await;
    let clamd = Clamd::builder().address(addr).chunk_size(4).build().unwrap();

    clamd
        .scan_bytes(b"abcdefgh", CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    let received = join(handle).await;
    assert_eq!(received.chunks, vec![b"abcd".to_vec(), b"efgh".to_vec()]);
    assert!(received.eof_marker);
}

#[tokio::test]
async fn test_scan_stream_empty_source() {
    let (clamd, handle) = daemon("stream: OK\n").await;

    let mut results = clamd
        .scan_bytes(b"", CancellationToken::new())
        .await
        .unwrap();
    assert!(results.next().await.unwrap().unwrap().is_clean());

    let received = join(handle).await;
    assert!(received.chunks.is_empty());
    assert!(received.eof_marker);
}

#[tokio::test]
async fn test_scan_stream_eicar() {
    let (clamd, handle) = daemon("stream: Eicar-Signature FOUND\n").await;

    let mut results = clamd
        .scan_bytes(EICAR, CancellationToken::new())
        .await
        .unwrap();
    let verdict = results.next().await.unwrap().unwrap();
    assert!(verdict.is_infected());
    assert_eq!(verdict.description, "Eicar-Signature");

    let received = join(handle).await;
    assert_eq!(received.chunks.concat(), EICAR);
}

#[tokio::test]
async fn test_scan_stream_size_limit_error() {
    let (clamd, handle) = daemon("INSTREAM size limit exceeded. ERROR\n").await;

    let records = clamd
        .scan_bytes(b"payload", CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(records[0].status, Status::Error);
    assert_eq!(records[0].path, "");
    assert_eq!(records[0].description, "INSTREAM size limit exceeded.");
    join(handle).await;
}

#[tokio::test]
async fn test_scan_stream_cancelled_before_upload() {
    let (clamd, handle) = daemon("stream: OK\n").await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = clamd.scan_bytes(b"data", cancel).await.unwrap_err();
    assert!(matches!(err, ClamdError::Cancelled));

    let received = join(handle).await;
    assert!(received.command.is_empty());
    assert!(received.chunks.is_empty());
    assert!(received.client_closed);
}

#[tokio::test]
async fn test_scan_stream_cancelled_mid_upload() {
    let (addr, handle) = tcp_daemon(b'\n', "stream: OK\n").await;
    let cancel = CancellationToken::new();

    // Cancel as soon as the first chunk is on the wire
    let trigger = cancel.clone();
    let clamd = Clamd::builder()
        .address(addr)
        .chunk_size(3)
        .observer(move |event: &SessionEvent| {
            if matches!(event, SessionEvent::ChunkSent { .. }) {
                trigger.cancel();
            }
        })
        .build()
        .unwrap();

    // The source never ends on its own
    let (mut feed, source) = tokio::io::duplex(64);
    feed.write_all(b"abc").await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), clamd.scan_stream(source, cancel))
        .await
        .expect("cancelled upload did not return");
    assert!(matches!(result, Err(ClamdError::Cancelled)));

    let received = join(handle).await;
    assert_eq!(received.command_str(), "nINSTREAM");
    assert_eq!(received.chunks, vec![b"abc".to_vec()]);
    assert!(!received.eof_marker);
    assert!(received.client_closed);
    drop(feed);
}

/// Source whose first read fails.
struct FailingSource;

impl AsyncRead for FailingSource {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "source unavailable",
        )))
    }
}

#[tokio::test]
async fn test_scan_stream_source_error() {
    let (clamd, handle) = daemon("stream: OK\n").await;

    let err = clamd
        .scan_stream(FailingSource, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert!(err.to_string().contains("source unavailable"));

    let received = join(handle).await;
    assert_eq!(received.command_str(), "nINSTREAM");
    assert!(!received.eof_marker);
    assert!(received.client_closed);
}

#[tokio::test]
async fn test_scan_stream_state_events() {
    let (addr, handle) = tcp_daemon(b'\n', "stream: OK\n").await;
    let (log, observer) = event_log();
    let clamd = Clamd::builder()
        .address(addr)
        .chunk_size(2)
        .observer(observer)
        .build()
        .unwrap();

    clamd
        .scan_bytes(b"abcde", CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    wait_for(&log, |e| {
        *e == SessionEvent::StateChanged {
            state: StreamState::Closed,
        }
    })
    .await;
    join(handle).await;

    let events = log.lock().unwrap();
    let states: Vec<StreamState> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { state } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            StreamState::Connecting,
            StreamState::Uploading,
            StreamState::AwaitingVerdict,
            StreamState::Draining,
            StreamState::Closed,
        ]
    );

    let chunks: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ChunkSent { len } => Some(*len),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec![2, 2, 1]);

    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::CommandSent { command, .. } if command == "INSTREAM")));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectionClosed { command, .. } if command == "INSTREAM")));
}

// ============================================================================
// Modes, transports and lifecycle
// ============================================================================

#[tokio::test]
async fn test_null_mode() {
    let (addr, handle) = tcp_daemon(b'\0', "/srv/a: OK\0/srv/b: OK\0").await;
    let clamd = Clamd::builder()
        .address(addr)
        .command_mode(CommandMode::Null)
        .build()
        .unwrap();

    let records = clamd
        .scan_file_stream("/srv", ScanCommand::MultiScan)
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].path, "/srv/b");

    assert_eq!(join(handle).await.command_str(), "zMULTISCAN /srv");
}

#[tokio::test]
async fn test_command_observer_events() {
    let (addr, handle) = tcp_daemon(b'\n', "PONG\n").await;
    let (log, observer) = event_log();
    let clamd = Clamd::builder()
        .address(addr)
        .observer(observer)
        .build()
        .unwrap();

    clamd.ping().await.unwrap();
    wait_for(&log, |e| matches!(e, SessionEvent::ConnectionClosed { .. })).await;
    join(handle).await;

    let events = log.lock().unwrap();
    assert!(matches!(&events[0], SessionEvent::CommandSent { command, .. } if command == "PING"));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::StateChanged { .. })));
}

#[tokio::test]
async fn test_close_only_after_all_records() {
    for round in 0..20 {
        let count = 10 + round * 7;
        let reply: String = (0..count).map(|i| format!("/srv/f{}: OK\n", i)).collect();
        let (clamd, handle) = daemon(reply).await;

        let records = clamd
            .scan_file_stream("/srv", ScanCommand::ContScan)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(records.len(), count);
        assert_eq!(records[count - 1].path, format!("/srv/f{}", count - 1));

        assert!(join(handle).await.client_closed);
    }
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let clamd = Clamd::new(&format!("tcp://{}", addr)).unwrap();
    let err = clamd.ping().await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_invalid_address() {
    let err = Clamd::new("tcp://:3310").unwrap_err();
    assert!(matches!(err, ClamdError::Address(_)));

    let err = Clamd::new("").unwrap_err();
    assert!(matches!(err, ClamdError::Address(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket() {
    use tokio::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clamd.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, b'\n', b"stream: OK\n".to_vec()).await
    });

    let clamd = Clamd::new(path.to_str().unwrap()).unwrap();
    assert!(clamd.address().is_unix());

    let mut results = clamd
        .scan_bytes(b"hello", CancellationToken::new())
        .await
        .unwrap();
    assert!(results.next().await.unwrap().unwrap().is_clean());

    let received = join(handle).await;
    assert_eq!(received.chunks, vec![b"hello".to_vec()]);
    assert!(received.client_closed);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_url_address() {
    use tokio::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clamd.ctl");
    let listener = UnixListener::bind(&path).unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, b'\n', b"PONG\n".to_vec()).await
    });

    let clamd = Clamd::new(&format!("unix://{}", path.display())).unwrap();
    clamd.ping().await.unwrap();
    join(handle).await;
}
