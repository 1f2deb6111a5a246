//! Multiplexed connections.
//!
//! A [`Connection`] owns one transport. Callers send requests from any
//! thread; each request takes a stream id, registers a one-slot response
//! channel under that id and blocks on it with a timeout. A dedicated
//! reader thread decodes frames and hands each response to the channel
//! registered for its stream id.
//!
//! A request that times out leaves its stream id *orphaned*: the id stays
//! reserved until the late response arrives or the connection closes, so
//! a stale response can never be delivered to a newer request.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tabula_types::{ProtocolVersion, UnsupportedVersion};
use tracing::{debug, trace, warn};

use crate::body::{BodyReader, write_string_list, write_string_map};
use crate::buffer_pool::FrameBufferPool;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::event::Event;
use crate::frame::{EVENT_STREAM, Frame, FrameFlags, Opcode};
use crate::stream::StreamIdSet;

const READ_CHUNK: usize = 16 * 1024;

/// A byte stream that can be split into a reading and a writing half.
pub trait Transport: Read + Write + Send + Sync + Sized + 'static {
    fn try_clone(&self) -> io::Result<Self>;

    /// Shuts both directions down, waking a blocked reader.
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn try_clone(&self) -> io::Result<Self> {
        std::os::unix::net::UnixStream::try_clone(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Default)]
struct InFlight {
    waiting: HashMap<i16, SyncSender<Frame>>,
    orphaned: HashSet<i16>,
}

/// State shared between callers and the reader thread.
struct Shared {
    streams: StreamIdSet,
    in_flight: Mutex<InFlight>,
    closed: AtomicBool,
    max_frame_size: usize,
    events: RwLock<Option<EventHandler>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes one incoming frame.
    fn dispatch(&self, frame: Frame) {
        let stream = frame.stream();
        if stream == EVENT_STREAM {
            self.dispatch_event(frame);
            return;
        }

        let sender = {
            let mut in_flight = self.lock();
            let sender = in_flight.waiting.remove(&stream);
            if sender.is_some() {
                if in_flight.orphaned.remove(&stream) {
                    debug!(stream, "late response released orphaned stream");
                }
                self.streams.release(stream);
            }
            sender
        };

        match sender {
            Some(sender) => {
                // Fails only if the awaiting side already gave up.
                let _ = sender.send(frame);
            }
            None => warn!(stream, opcode = ?frame.opcode(), "response for unknown stream"),
        }
    }

    fn dispatch_event(&self, frame: Frame) {
        if frame.opcode() != Opcode::Event {
            warn!(opcode = ?frame.opcode(), "unexpected frame on event stream");
            return;
        }
        let event = match Event::decode(frame.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping undecodable event");
                return;
            }
        };
        trace!(?event, "server event");
        let handler = self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Marks the connection closed and fails every waiting request.
    fn close(&self) {
        let mut in_flight = self.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let waiting = in_flight.waiting.len();
        let orphaned = in_flight.orphaned.len();
        // Dropping the senders wakes every awaiter with `Closed`.
        in_flight.waiting.clear();
        in_flight.orphaned.clear();
        self.streams.clear();
        debug!(waiting, orphaned, "connection closed");
    }
}

/// One multiplexed connection to a node.
pub struct Connection {
    shared: Arc<Shared>,
    writer: Mutex<Box<dyn Write + Send>>,
    closer: Box<dyn Fn() -> io::Result<()> + Send + Sync>,
    reader: Mutex<Option<JoinHandle<()>>>,
    pool: FrameBufferPool,
    version: ProtocolVersion,
    timeout: Duration,
}

impl Connection {
    /// Connects over TCP and performs the STARTUP exchange.
    pub fn connect(addr: impl ToSocketAddrs, config: &ClientConfig) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let connection = Self::open(stream, config)?;
        connection.startup()?;
        Ok(connection)
    }

    /// Wraps an established transport and starts its reader thread.
    ///
    /// No handshake is performed.
    pub fn open<T: Transport>(transport: T, config: &ClientConfig) -> ClientResult<Self> {
        if config.protocol_version == ProtocolVersion::V5 {
            return Err(UnsupportedVersion(ProtocolVersion::V5.as_u8()).into());
        }

        let shared = Arc::new(Shared {
            streams: StreamIdSet::new(),
            in_flight: Mutex::new(InFlight::default()),
            closed: AtomicBool::new(false),
            max_frame_size: config.max_frame_size,
            events: RwLock::new(None),
        });

        let source = transport.try_clone()?;
        let closer = transport.try_clone()?;
        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("tabula-reader".to_string())
                .spawn(move || read_loop(source, &shared))?
        };

        Ok(Self {
            shared,
            writer: Mutex::new(Box::new(transport)),
            closer: Box::new(move || closer.shutdown()),
            reader: Mutex::new(Some(reader)),
            pool: FrameBufferPool::new(config.buffer_pool_size),
            version: config.protocol_version,
            timeout: config.request_timeout,
        })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Sends STARTUP and waits for READY.
    pub fn startup(&self) -> ClientResult<()> {
        let mut body = BytesMut::new();
        write_string_map(&mut body, &[("CQL_VERSION", "3.0.0")])?;
        let response = self.request(Opcode::Startup, FrameFlags::empty(), body.freeze())?;
        expect_opcode(&response, Opcode::Ready)
    }

    /// Sends OPTIONS and returns the SUPPORTED multimap.
    pub fn options(&self) -> ClientResult<HashMap<String, Vec<String>>> {
        let response = self.request(Opcode::Options, FrameFlags::empty(), Bytes::new())?;
        expect_opcode(&response, Opcode::Supported)?;
        BodyReader::new(response.body).read_string_multimap()
    }

    /// Subscribes this connection to server events.
    pub fn register(&self, events: &[&str]) -> ClientResult<()> {
        let mut body = BytesMut::new();
        write_string_list(&mut body, events)?;
        let response = self.request(Opcode::Register, FrameFlags::empty(), body.freeze())?;
        expect_opcode(&response, Opcode::Ready)
    }

    /// Installs the callback that receives server events.
    ///
    /// The callback runs on the reader thread and must not block on a
    /// response from this connection.
    pub fn set_event_handler(&self, handler: impl Fn(Event) + Send + Sync + 'static) {
        *self
            .shared
            .events
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Sends a request and waits for its response with the configured
    /// timeout. ERROR responses are turned into [`ClientError::Server`].
    pub fn request(&self, opcode: Opcode, flags: FrameFlags, body: Bytes) -> ClientResult<Frame> {
        check_error(self.send(opcode, flags, body, self.timeout)?)
    }

    /// Sends a request and waits up to `timeout` for the raw response.
    pub fn send(
        &self,
        opcode: Opcode,
        flags: FrameFlags,
        body: Bytes,
        timeout: Duration,
    ) -> ClientResult<Frame> {
        let stream = self.shared.streams.acquire().ok_or(ClientError::Saturated)?;
        let (sender, receiver) = mpsc::sync_channel(1);
        {
            let mut in_flight = self.shared.lock();
            if self.shared.closed.load(Ordering::SeqCst) {
                drop(in_flight);
                self.shared.streams.release(stream);
                return Err(ClientError::Closed);
            }
            in_flight.waiting.insert(stream, sender);
        }

        trace!(stream, ?opcode, len = body.len(), "sending request");
        let frame = Frame::request(self.version, flags, stream, opcode, body);
        let mut buf = self.pool.get();
        frame.encode(&mut buf);
        let written = {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(&buf).and_then(|()| writer.flush())
        };
        self.pool.put(buf);
        if let Err(e) = written {
            warn!(stream, error = %e, "write failed; closing connection");
            self.shutdown();
            return Err(e.into());
        }

        match receiver.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Closed),
            Err(RecvTimeoutError::Timeout) => {
                let mut in_flight = self.shared.lock();
                if in_flight.waiting.contains_key(&stream) {
                    in_flight.orphaned.insert(stream);
                    debug!(stream, "request timed out; stream orphaned");
                    return Err(ClientError::Timeout { stream });
                }
                drop(in_flight);
                // The response raced the timeout and is already queued.
                receiver.try_recv().map_err(|_| ClientError::Closed)
            }
        }
    }

    /// Number of requests awaiting a response, orphans included.
    pub fn in_flight(&self) -> usize {
        self.shared.streams.in_use()
    }

    /// Number of timed-out requests still holding their stream id.
    pub fn orphaned(&self) -> usize {
        self.shared.lock().orphaned.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.shared.close();
        if let Err(e) = (self.closer)() {
            trace!(error = %e, "transport shutdown");
        }
    }

    /// Closes the transport, fails pending requests and joins the reader.
    pub fn close(&self) {
        self.shutdown();
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            warn!("reader thread panicked");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop<R: Read>(mut source: R, shared: &Shared) {
    match pump(&mut source, shared) {
        Ok(()) => debug!("connection closed by peer"),
        Err(e) if shared.closed.load(Ordering::SeqCst) => trace!(error = %e, "reader stopped"),
        Err(e) => warn!(error = %e, "connection failed"),
    }
    shared.close();
}

fn pump<R: Read>(source: &mut R, shared: &Shared) -> ClientResult<()> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        while let Some(frame) = Frame::decode(&mut buf, shared.max_frame_size)? {
            shared.dispatch(frame);
        }
        let n = match source.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Turns an ERROR frame into [`ClientError::Server`].
pub(crate) fn check_error(frame: Frame) -> ClientResult<Frame> {
    if frame.opcode() != Opcode::Error {
        return Ok(frame);
    }
    let mut body = BodyReader::new(frame.body);
    let code = body.read_i32()?;
    let message = body.read_string()?;
    Err(ClientError::server(code, message))
}

pub(crate) fn expect_opcode(frame: &Frame, expected: Opcode) -> ClientResult<()> {
    if frame.opcode() == expected {
        return Ok(());
    }
    Err(ClientError::UnexpectedResponse {
        expected: format!("{expected:?}"),
        actual: format!("{:?}", frame.opcode()),
    })
}
