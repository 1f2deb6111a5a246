#![cfg(unix)]

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use proptest::prelude::*;
use tabula_codec::{CqlType, TypeInfo};
use tabula_config::CompressionConfig;
use tabula_directory::{TABLETS_ROUTING_V1, Tablet, encode_tablet_payload, murmur3_token};
use tabula_types::{HostId, ProtocolVersion, Replica, ShardId, Token};
use test_case::test_case;
use uuid::Uuid;

use crate::body::{BodyReader, write_bytes, write_short_bytes, write_string};
use crate::{
    ClientConfig, ClientError, Connection, Dispatcher, EVENT_STREAM, Event, Frame, FrameFlags,
    MAX_BODY_SIZE, Opcode, QueryResult, Statement,
};

/// Server side of a socket pair.
struct Node {
    stream: UnixStream,
    buf: BytesMut,
}

impl Node {
    /// Next request, or `None` once the client hung up.
    fn recv(&mut self) -> Option<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf, MAX_BODY_SIZE).unwrap() {
                return Some(frame);
            }
            match self.stream.read(&mut chunk) {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn send(&mut self, frame: &Frame) {
        let mut out = BytesMut::new();
        frame.encode(&mut out);
        self.stream.write_all(&out).unwrap();
    }

    fn reply(&mut self, request: &Frame, opcode: Opcode, flags: FrameFlags, body: Bytes) {
        self.send(&Frame::response(
            request.header.version,
            flags,
            request.stream(),
            opcode,
            body,
        ));
    }

    fn reply_void(&mut self, request: &Frame) {
        self.reply(request, Opcode::Result, FrameFlags::empty(), void());
    }

    fn push_event(&mut self, body: Bytes) {
        self.send(&Frame::response(
            ProtocolVersion::V4,
            FrameFlags::empty(),
            EVENT_STREAM,
            Opcode::Event,
            body,
        ));
    }
}

fn pair(config: &ClientConfig) -> (Connection, Node) {
    let (client, server) = UnixStream::pair().unwrap();
    let connection = Connection::open(client, config).unwrap();
    let node = Node {
        stream: server,
        buf: BytesMut::new(),
    };
    (connection, node)
}

fn body(f: impl FnOnce(&mut BytesMut)) -> Bytes {
    let mut buf = BytesMut::new();
    f(&mut buf);
    buf.freeze()
}

fn void() -> Bytes {
    body(|b| b.put_i32(1))
}

fn info(cql: CqlType) -> TypeInfo {
    TypeInfo::new(cql, ProtocolVersion::V4)
}

fn host(n: u128) -> HostId {
    HostId::new(Uuid::from_u128(n))
}

/// Polls `f` until it holds or five seconds pass.
fn eventually(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

// ============================================================================
// Connection
// ============================================================================

#[test]
fn request_gets_its_response() {
    let (connection, mut node) = pair(&ClientConfig::default());
    let server = thread::spawn(move || {
        let request = node.recv().unwrap();
        assert_eq!(request.opcode(), Opcode::Query);
        assert!(!request.header.response);
        node.reply(&request, Opcode::Result, FrameFlags::empty(), request.body.clone());
        node
    });

    let response = connection
        .request(Opcode::Query, FrameFlags::empty(), Bytes::from_static(b"ping"))
        .unwrap();
    assert_eq!(response.opcode(), Opcode::Result);
    assert_eq!(response.body.as_ref(), b"ping");
    assert_eq!(connection.in_flight(), 0);
    drop(server.join().unwrap());
}

#[test]
fn responses_are_demultiplexed_by_stream() {
    let (connection, mut node) = pair(&ClientConfig::default());
    let server = thread::spawn(move || {
        let first = node.recv().unwrap();
        let second = node.recv().unwrap();
        assert_ne!(first.stream(), second.stream());
        // Answer in reverse order, echoing each body.
        for request in [&second, &first] {
            node.reply(request, Opcode::Result, FrameFlags::empty(), request.body.clone());
        }
        node
    });

    thread::scope(|scope| {
        let callers: Vec<_> = ["one", "two"]
            .into_iter()
            .map(|tag| {
                let connection = &connection;
                scope.spawn(move || {
                    let response = connection
                        .request(Opcode::Query, FrameFlags::empty(), Bytes::from(tag))
                        .unwrap();
                    assert_eq!(response.body.as_ref(), tag.as_bytes());
                })
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }
    });
    assert_eq!(connection.in_flight(), 0);
    drop(server.join().unwrap());
}

#[test]
fn timed_out_stream_stays_reserved_until_the_late_response() {
    let config = ClientConfig {
        request_timeout: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let (connection, mut node) = pair(&config);
    let (go, wait) = mpsc::channel::<()>();
    let server = thread::spawn(move || {
        let request = node.recv().unwrap();
        wait.recv().unwrap();
        node.reply_void(&request);
        node
    });

    let result = connection.request(Opcode::Query, FrameFlags::empty(), Bytes::new());
    let Err(ClientError::Timeout { stream }) = result else {
        panic!("expected a timeout, got {result:?}");
    };
    assert!(stream > 0);
    assert_eq!(connection.orphaned(), 1);
    assert_eq!(connection.in_flight(), 1);

    go.send(()).unwrap();
    assert!(eventually(|| connection.orphaned() == 0));
    assert_eq!(connection.in_flight(), 0);
    drop(server.join().unwrap());
}

#[test]
fn peer_close_fails_pending_requests() {
    let (connection, mut node) = pair(&ClientConfig::default());
    let server = thread::spawn(move || {
        node.recv().unwrap();
        // Hang up without answering.
    });

    let result = connection.request(Opcode::Query, FrameFlags::empty(), Bytes::new());
    assert!(matches!(result, Err(ClientError::Closed)), "{result:?}");
    server.join().unwrap();

    assert!(eventually(|| connection.is_closed()));
    assert_eq!(connection.in_flight(), 0);
    assert!(matches!(
        connection.request(Opcode::Query, FrameFlags::empty(), Bytes::new()),
        Err(ClientError::Closed)
    ));
}

#[test]
fn local_close_wakes_waiting_callers() {
    let (connection, mut node) = pair(&ClientConfig::default());
    let (seen, received) = mpsc::channel();
    let server = thread::spawn(move || {
        let request = node.recv().unwrap();
        seen.send(()).unwrap();
        // Keep the socket open until the client closes it.
        assert!(node.recv().is_none());
        drop(request);
    });

    thread::scope(|scope| {
        let caller = scope.spawn(|| {
            connection.request(Opcode::Query, FrameFlags::empty(), Bytes::new())
        });
        received.recv().unwrap();
        connection.close();
        assert!(matches!(caller.join().unwrap(), Err(ClientError::Closed)));
    });
    server.join().unwrap();
}

#[test_case(0x2200, "line 1:0 no viable alternative" ; "syntax error")]
#[test_case(0x1000, "Cannot achieve consistency level QUORUM" ; "unavailable")]
fn error_frames_become_server_errors(code: i32, message: &str) {
    let (connection, mut node) = pair(&ClientConfig::default());
    let reply = body(|b| {
        b.put_i32(code);
        write_string(b, message).unwrap();
    });
    let server = thread::spawn(move || {
        let request = node.recv().unwrap();
        node.reply(&request, Opcode::Error, FrameFlags::empty(), reply);
        node
    });

    let result = connection.request(Opcode::Query, FrameFlags::empty(), Bytes::new());
    match result {
        Err(ClientError::Server { code: c, message: m }) => {
            assert_eq!(c, code);
            assert_eq!(m, message);
        }
        other => panic!("expected a server error, got {other:?}"),
    }
    drop(server.join().unwrap());
}

#[test]
fn startup_and_options() {
    let (connection, mut node) = pair(&ClientConfig::default());
    let server = thread::spawn(move || {
        let startup = node.recv().unwrap();
        assert_eq!(startup.opcode(), Opcode::Startup);
        let mut options = BodyReader::new(startup.body.clone());
        assert_eq!(options.read_u16().unwrap(), 1);
        assert_eq!(options.read_string().unwrap(), "CQL_VERSION");
        node.reply(&startup, Opcode::Ready, FrameFlags::empty(), Bytes::new());

        let request = node.recv().unwrap();
        assert_eq!(request.opcode(), Opcode::Options);
        let supported = body(|b| {
            b.put_u16(1);
            write_string(b, "COMPRESSION").unwrap();
            b.put_u16(1);
            write_string(b, "lz4").unwrap();
        });
        node.reply(&request, Opcode::Supported, FrameFlags::empty(), supported);
        node
    });

    connection.startup().unwrap();
    let supported = connection.options().unwrap();
    assert_eq!(supported["COMPRESSION"], vec!["lz4"]);
    drop(server.join().unwrap());
}

#[test]
fn v5_connections_are_refused() {
    let (client, _server) = UnixStream::pair().unwrap();
    let config = ClientConfig {
        protocol_version: ProtocolVersion::V5,
        ..ClientConfig::default()
    };
    assert!(matches!(
        Connection::open(client, &config),
        Err(ClientError::UnsupportedVersion(_))
    ));
}

#[test]
fn events_reach_the_handler() {
    let (connection, mut node) = pair(&ClientConfig::default());
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    connection.set_event_handler(move |event| {
        tx.lock().unwrap().send(event).unwrap();
    });

    node.push_event(body(|b| {
        write_string(b, "STATUS_CHANGE").unwrap();
        write_string(b, "UP").unwrap();
        b.put_u8(4);
        b.put_slice(&[10, 0, 0, 3]);
        b.put_i32(9042);
    }));

    let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let expected: SocketAddr = "10.0.0.3:9042".parse().unwrap();
    assert_eq!(
        event,
        Event::StatusChange {
            change: "UP".to_string(),
            address: expected,
        }
    );
    assert_eq!(connection.in_flight(), 0);
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs a node that answers every request with `respond` and reports
/// each request's opcode on `log`.
fn serve(
    mut node: Node,
    name: &'static str,
    log: mpsc::Sender<(&'static str, Opcode)>,
    respond: impl Fn(&Frame) -> (FrameFlags, Bytes) + Send + 'static,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Some(request) = node.recv() {
            if log.send((name, request.opcode())).is_err() {
                return;
            }
            let (flags, body) = respond(&request);
            node.reply(&request, Opcode::Result, flags, body);
        }
    })
}

#[test]
fn learned_tablets_route_later_requests() {
    let dispatcher = Dispatcher::new(ClientConfig::default()).unwrap();
    let (a, b) = (host(1), host(2));
    let key = 7i32.to_be_bytes();
    let token = murmur3_token(&key).value();
    let learned = Tablet::new(
        Token::new(token - 1),
        Token::new(token),
        vec![Replica::new(b, ShardId::new(0))],
    )
    .unwrap();
    let payload = encode_tablet_payload(ProtocolVersion::V4, &learned).unwrap();

    let (log, requests) = mpsc::channel();
    let (connection_a, node_a) = pair(dispatcher.config());
    let (connection_b, node_b) = pair(dispatcher.config());
    let server_a = serve(node_a, "a", log.clone(), move |_| {
        let body = body(|buf| {
            buf.put_u16(1);
            write_string(buf, TABLETS_ROUTING_V1).unwrap();
            write_bytes(buf, Some(payload.as_ref())).unwrap();
            buf.put_i32(1);
        });
        (FrameFlags::CUSTOM_PAYLOAD, body)
    });
    let server_b = serve(node_b, "b", log, |_| (FrameFlags::empty(), void()));
    dispatcher.add_host(a, None, connection_a);
    dispatcher.add_host(b, None, connection_b);

    let statement = Statement::query("SELECT * FROM ks.t WHERE pk = ?")
        .with_table("ks", "t")
        .bind_key(&dispatcher.type_info(CqlType::Int), &7i32)
        .unwrap();

    // Nothing is known yet: the first request goes round-robin to `a`.
    let first = dispatcher.execute(&statement).unwrap();
    assert_eq!(first.result, QueryResult::Void);
    assert_eq!(requests.recv().unwrap(), ("a", Opcode::Query));
    assert_eq!(dispatcher.directory().tablets_for_table("ks", "t").len(), 1);

    for _ in 0..3 {
        dispatcher.execute(&statement).unwrap();
        assert_eq!(requests.recv().unwrap(), ("b", Opcode::Query));
    }

    drop(dispatcher);
    server_a.join().unwrap();
    server_b.join().unwrap();
}

#[test]
fn unroutable_statements_rotate_over_hosts() {
    let dispatcher = Dispatcher::new(ClientConfig::default()).unwrap();
    let (log, requests) = mpsc::channel();
    let mut servers = Vec::new();
    for (n, name) in [(1, "a"), (2, "b")] {
        let (connection, node) = pair(dispatcher.config());
        servers.push(serve(node, name, log.clone(), |_| (FrameFlags::empty(), void())));
        dispatcher.add_host(host(n), None, connection);
    }

    let mut seen = Vec::new();
    for _ in 0..4 {
        dispatcher.execute(&Statement::query("SELECT now() FROM system.local")).unwrap();
        seen.push(requests.recv().unwrap().0);
    }
    assert_eq!(seen, vec!["a", "b", "a", "b"]);

    assert!(dispatcher.remove_host(host(1)));
    assert!(!dispatcher.remove_host(host(1)));
    dispatcher.execute(&Statement::query("SELECT now() FROM system.local")).unwrap();
    assert_eq!(requests.recv().unwrap().0, "b");

    drop(dispatcher);
    for server in servers {
        server.join().unwrap();
    }
}

#[test]
fn removed_node_event_prunes_tablets_and_refreshes() {
    let dispatcher = Dispatcher::new(ClientConfig::default()).unwrap();
    let address: SocketAddr = "10.0.0.2:9042".parse().unwrap();
    let (connection, mut node) = pair(dispatcher.config());
    dispatcher.add_host(host(2), Some(address), connection);
    dispatcher.directory().add_tablet(
        "ks",
        "t",
        Tablet::new(
            Token::new(0),
            Token::new(100),
            vec![Replica::new(host(2), ShardId::new(0))],
        )
        .unwrap(),
    );

    let (tx, refreshed) = mpsc::channel();
    let tx = Mutex::new(tx);
    dispatcher.set_refresh(move || {
        let _ = tx.lock().unwrap().send(());
    });

    node.push_event(body(|b| {
        write_string(b, "TOPOLOGY_CHANGE").unwrap();
        write_string(b, "REMOVED_NODE").unwrap();
        b.put_u8(4);
        b.put_slice(&[10, 0, 0, 2]);
        b.put_i32(9042);
    }));

    refreshed.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(dispatcher.directory().tablets_for_table("ks", "t").is_empty());
}

/// Writes `event` until the client side of the pair goes away.
fn flood(mut node: Node, event: &Frame) {
    let mut out = BytesMut::new();
    event.encode(&mut out);
    while node.stream.write_all(&out).is_ok() {}
}

#[test]
fn replacing_a_host_while_its_events_are_handled_completes() {
    let dispatcher = Arc::new(Dispatcher::new(ClientConfig::default()).unwrap());
    let address: SocketAddr = "10.0.0.3:9042".parse().unwrap();
    let event = Frame::response(
        ProtocolVersion::V4,
        FrameFlags::empty(),
        EVENT_STREAM,
        Opcode::Event,
        body(|b| {
            write_string(b, "TOPOLOGY_CHANGE").unwrap();
            write_string(b, "REMOVED_NODE").unwrap();
            b.put_u8(4);
            b.put_slice(&[10, 0, 0, 3]);
            b.put_i32(9042);
        }),
    );

    let (done, finished) = mpsc::channel();
    let worker = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            let mut floods = Vec::new();
            for _ in 0..50 {
                let (connection, node) = pair(dispatcher.config());
                dispatcher.add_host(host(3), Some(address), connection);
                let event = event.clone();
                floods.push(thread::spawn(move || flood(node, &event)));
                thread::sleep(Duration::from_millis(1));
            }
            assert!(dispatcher.remove_host(host(3)));
            done.send(()).unwrap();
            floods
        })
    };

    finished
        .recv_timeout(Duration::from_secs(10))
        .expect("host replacement stalled");
    for flood in worker.join().unwrap() {
        flood.join().unwrap();
    }
    assert_eq!(dispatcher.host_count(), 0);
}

#[test]
fn event_bursts_coalesce_into_few_refreshes() {
    let dispatcher = Arc::new(Dispatcher::new(ClientConfig::default()).unwrap());
    let runs = Arc::new(Mutex::new(0usize));
    let (started, wait_started) = mpsc::channel();
    let (release, wait_release) = mpsc::channel::<()>();
    let gate = Mutex::new((started, wait_release));
    {
        let runs = Arc::clone(&runs);
        dispatcher.set_refresh(move || {
            let gate = gate.lock().unwrap();
            let first = {
                let mut runs = runs.lock().unwrap();
                *runs += 1;
                *runs == 1
            };
            if first {
                gate.0.send(()).unwrap();
                gate.1.recv().unwrap();
            }
        });
    }

    let event = Event::StatusChange {
        change: "DOWN".to_string(),
        address: "10.0.0.9:9042".parse().unwrap(),
    };
    dispatcher.handle_event(&event);
    wait_started.recv_timeout(Duration::from_secs(5)).unwrap();
    for _ in 0..5 {
        dispatcher.handle_event(&event);
    }
    // Let the burst's spawned threads reach the debouncer.
    thread::sleep(Duration::from_millis(100));
    release.send(()).unwrap();

    assert!(eventually(|| *runs.lock().unwrap() == 2));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(*runs.lock().unwrap(), 2);
}

#[test]
fn values_are_compressed_on_the_wire_and_restored() {
    let config = ClientConfig {
        compression: Some(CompressionConfig {
            enabled: true,
            threshold: 32,
            ..CompressionConfig::default()
        }),
        ..ClientConfig::default()
    };
    let dispatcher = Dispatcher::new(config).unwrap();
    let (connection, mut node) = pair(dispatcher.config());
    dispatcher.add_host(host(1), None, connection);

    let server = thread::spawn(move || {
        let request = node.recv().unwrap();
        let mut r = BodyReader::new(request.body.clone());
        r.read_long_string().unwrap();
        r.read_u16().unwrap();
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 1);
        let stored = r.read_bytes().unwrap().unwrap();
        assert!(stored.starts_with(b"lz4:"));

        let rows = body(|b| {
            b.put_i32(2);
            b.put_i32(0x0001);
            b.put_i32(1);
            write_string(b, "ks").unwrap();
            write_string(b, "t").unwrap();
            write_string(b, "data").unwrap();
            b.put_u16(0x0003);
            b.put_i32(1);
            write_bytes(b, Some(stored.as_ref())).unwrap();
        });
        node.reply(&request, Opcode::Result, FrameFlags::empty(), rows);
        node
    });

    let blob = b"0123456789abcdef".repeat(32);
    let statement = Statement::query("SELECT data FROM ks.t")
        .bind(&info(CqlType::Blob), &blob)
        .unwrap();
    let response = dispatcher.execute(&statement).unwrap();
    let rows = response.rows().unwrap();
    let mut data: Vec<u8> = Vec::new();
    rows.get(0, 0, &mut data).unwrap();
    assert_eq!(data, blob);
    drop(server.join().unwrap());
}

#[test]
fn prepared_statements_execute_by_id() {
    let dispatcher = Dispatcher::new(ClientConfig::default()).unwrap();
    let (connection, mut node) = pair(dispatcher.config());
    dispatcher.add_host(host(1), None, connection);

    let server = thread::spawn(move || {
        let prepare = node.recv().unwrap();
        assert_eq!(prepare.opcode(), Opcode::Prepare);
        let prepared = body(|b| {
            b.put_i32(4);
            write_short_bytes(b, b"id-1").unwrap();
            b.put_i32(0x0001);
            b.put_i32(1);
            b.put_i32(1);
            b.put_u16(0);
            write_string(b, "ks").unwrap();
            write_string(b, "t").unwrap();
            write_string(b, "pk").unwrap();
            b.put_u16(0x0009);
            b.put_i32(0x0004);
            b.put_i32(0);
        });
        node.reply(&prepare, Opcode::Result, FrameFlags::empty(), prepared);

        let execute = node.recv().unwrap();
        assert_eq!(execute.opcode(), Opcode::Execute);
        let mut r = BodyReader::new(execute.body.clone());
        assert_eq!(r.read_short_bytes().unwrap().as_ref(), b"id-1");
        node.reply_void(&execute);
        node
    });

    let prepared = dispatcher.prepare("SELECT * FROM ks.t WHERE pk = ?").unwrap();
    let statement = Statement::prepared(&prepared)
        .bind(&dispatcher.type_info(CqlType::Int), &5i32)
        .unwrap();
    assert_eq!(statement.table().map(ToString::to_string).as_deref(), Some("ks:t"));
    assert_eq!(
        statement.routing_key().unwrap().unwrap().as_ref(),
        &5i32.to_be_bytes()
    );
    dispatcher.execute(&statement).unwrap();
    drop(server.join().unwrap());
}

// ============================================================================
// Framing
// ============================================================================

proptest! {
    #[test]
    fn frames_survive_arbitrary_chunking(
        bodies in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..8),
        cut in 1usize..32,
    ) {
        let frames: Vec<Frame> = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| {
                let stream = i16::try_from(i + 1).unwrap();
                Frame::response(
                    ProtocolVersion::V4,
                    FrameFlags::empty(),
                    stream,
                    Opcode::Result,
                    Bytes::from(body.clone()),
                )
            })
            .collect();
        let mut wire = BytesMut::new();
        for frame in &frames {
            frame.encode(&mut wire);
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in wire.chunks(cut) {
            buf.extend_from_slice(chunk);
            while let Some(frame) = Frame::decode(&mut buf, MAX_BODY_SIZE).unwrap() {
                decoded.push(frame);
            }
        }
        prop_assert_eq!(decoded, frames);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn frame_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut buf = BytesMut::from(&data[..]);
        let _ = Frame::decode(&mut buf, 1024);
    }
}
