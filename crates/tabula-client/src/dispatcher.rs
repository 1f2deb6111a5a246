//! Request dispatch across hosts.
//!
//! The dispatcher owns one [`Connection`] per host and the tablet
//! directory. A statement with a table and a complete partition key is
//! hashed to a token and sent to a replica of the tablet owning it; any
//! other statement, or one whose replicas are not connected, goes to the
//! next open connection in round-robin order.
//!
//! Tablets are learned from the `tablets-routing-v1` payload that the
//! server attaches when a request reached a non-owning node. Server events
//! prune the directory and schedule the registered refresh through a
//! [`SingleFlightDebouncer`], off the connection's reader thread.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use bytes::BytesMut;
use tabula_codec::{CqlType, TypeInfo};
use tabula_compress::Codec;
use tabula_directory::{TABLETS_ROUTING_V1, TabletDirectory, decode_tablet_payload, murmur3_token};
use tabula_types::{HostId, Replica};
use tracing::{debug, info, trace, warn};

use crate::body::write_long_string;
use crate::config::ClientConfig;
use crate::connection::{Connection, expect_opcode};
use crate::debounce::SingleFlightDebouncer;
use crate::error::{ClientError, ClientResult};
use crate::event::{EVENT_TYPES, Event};
use crate::frame::{Frame, FrameFlags, Opcode};
use crate::request::Statement;
use crate::result::{Prepared, QueryResult, Response};

type Refresh = Arc<dyn Fn() + Send + Sync>;

struct Host {
    id: HostId,
    address: Option<SocketAddr>,
    connection: Arc<Connection>,
}

struct Inner {
    config: ClientConfig,
    codec: Option<Arc<dyn Codec>>,
    directory: TabletDirectory,
    hosts: RwLock<Vec<Host>>,
    next: AtomicUsize,
    debouncer: Arc<SingleFlightDebouncer>,
    refresh: RwLock<Option<Refresh>>,
}

/// Routes statements to connected hosts.
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let codec = config.value_codec()?;
        if let Some(codec) = &codec {
            debug!(codec = codec.name(), "value compression enabled");
        }
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                codec,
                directory: TabletDirectory::new(),
                hosts: RwLock::new(Vec::new()),
                next: AtomicUsize::new(0),
                debouncer: Arc::new(SingleFlightDebouncer::new()),
                refresh: RwLock::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn directory(&self) -> &TabletDirectory {
        &self.inner.directory
    }

    /// Type info at the configured protocol version, for binding values.
    pub fn type_info(&self, cql: CqlType) -> TypeInfo {
        TypeInfo::new(cql, self.inner.config.protocol_version)
    }

    /// Connects to a host, subscribes to events and adds it.
    pub fn connect(&self, id: HostId, address: SocketAddr) -> ClientResult<()> {
        let connection = Connection::connect(address, &self.inner.config)?;
        connection.register(&EVENT_TYPES)?;
        self.add_host(id, Some(address), connection);
        Ok(())
    }

    /// Adds an established connection, replacing any previous one for
    /// `id`. Events arriving on it are handled by this dispatcher.
    pub fn add_host(&self, id: HostId, address: Option<SocketAddr>, connection: Connection) {
        let weak = Arc::downgrade(&self.inner);
        connection.set_event_handler(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(&event);
            }
        });

        let replaced = {
            let mut hosts = self.inner.hosts_mut();
            let replaced = detach(&mut hosts, id);
            hosts.push(Host {
                id,
                address,
                connection: Arc::new(connection),
            });
            info!(host = %id, ?address, hosts = hosts.len(), "host added");
            replaced
        };
        // Closing joins the reader, which may be waiting on the host lock.
        drop(replaced);
    }

    /// Drops a host's connection and every tablet replica on it.
    pub fn remove_host(&self, id: HostId) -> bool {
        let removed = detach(&mut self.inner.hosts_mut(), id);
        self.inner.directory.remove_tablets_with_host(id);
        if removed.is_empty() {
            return false;
        }
        info!(host = %id, "host removed");
        drop(removed);
        true
    }

    pub fn host_count(&self) -> usize {
        self.inner.hosts().len()
    }

    /// Sets the callback run, debounced, after server events.
    pub fn set_refresh(&self, refresh: impl Fn() + Send + Sync + 'static) {
        *self
            .inner
            .refresh
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(refresh));
    }

    /// Applies a server event to the directory and schedules a refresh.
    pub fn handle_event(&self, event: &Event) {
        self.inner.handle_event(event);
    }

    /// Picks the host a statement is sent to.
    pub fn route(&self, statement: &Statement) -> ClientResult<(HostId, Arc<Connection>)> {
        let replicas = self.inner.replicas_for(statement)?;
        let hosts = self.inner.hosts();
        if let Some(replicas) = replicas {
            let owner = replicas.iter().find_map(|replica| {
                hosts
                    .iter()
                    .find(|host| host.id == replica.host_id() && !host.connection.is_closed())
            });
            if let Some(host) = owner {
                trace!(host = %host.id, "routed to tablet replica");
                return Ok((host.id, Arc::clone(&host.connection)));
            }
            debug!("no tablet replica connected; falling back");
        }

        let len = hosts.len();
        let start = self.inner.next.fetch_add(1, Ordering::Relaxed);
        (0..len)
            .map(|i| &hosts[(start + i) % len])
            .find(|host| !host.connection.is_closed())
            .map(|host| (host.id, Arc::clone(&host.connection)))
            .ok_or(ClientError::NoHostAvailable)
    }

    /// Sends a statement and decodes its RESULT.
    pub fn execute(&self, statement: &Statement) -> ClientResult<Response> {
        let (host, connection) = self.route(statement)?;
        let body = statement.encode(self.inner.config.consistency, self.inner.codec.as_deref())?;
        let frame = connection.request(statement.opcode(), FrameFlags::empty(), body)?;
        let mut response = decode_result(frame)?;
        trace!(%host, kind = response.result.kind(), "statement executed");

        if self.inner.config.tablet_aware {
            self.inner.learn_tablet(statement, &response);
        }
        if let (Some(codec), QueryResult::Rows(rows)) = (&self.inner.codec, &mut response.result) {
            rows.decompress(codec.as_ref())?;
        }
        Ok(response)
    }

    /// Prepares a query on any connected host.
    pub fn prepare(&self, query: &str) -> ClientResult<Prepared> {
        let (_, connection) = self.route(&Statement::query(query))?;
        let mut body = BytesMut::new();
        write_long_string(&mut body, query)?;
        let frame = connection.request(Opcode::Prepare, FrameFlags::empty(), body.freeze())?;
        match decode_result(frame)?.result {
            QueryResult::Prepared(prepared) => Ok(prepared),
            other => Err(ClientError::UnexpectedResponse {
                expected: "PREPARED".to_string(),
                actual: other.kind().to_string(),
            }),
        }
    }
}

impl Inner {
    fn hosts(&self) -> RwLockReadGuard<'_, Vec<Host>> {
        self.hosts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn hosts_mut(&self) -> RwLockWriteGuard<'_, Vec<Host>> {
        self.hosts.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn replicas_for(&self, statement: &Statement) -> ClientResult<Option<Vec<Replica>>> {
        if !self.config.tablet_aware {
            return Ok(None);
        }
        let Some(table) = statement.table() else {
            return Ok(None);
        };
        let Some(key) = statement.routing_key()? else {
            return Ok(None);
        };
        let token = murmur3_token(&key);
        trace!(%table, %token, "routing by token");
        Ok(self
            .directory
            .find_replicas_for_token(table.keyspace(), table.table(), token))
    }

    fn learn_tablet(&self, statement: &Statement, response: &Response) {
        let Some(payload) = response.payload(TABLETS_ROUTING_V1) else {
            return;
        };
        let Some(table) = statement.table() else {
            debug!("tablet payload for a statement without a table");
            return;
        };
        match decode_tablet_payload(self.config.protocol_version, payload) {
            Ok(tablet) => self
                .directory
                .add_tablet(table.keyspace(), table.table(), tablet),
            Err(e) => warn!(%table, error = %e, "ignoring malformed tablet payload"),
        }
    }

    fn handle_event(&self, event: &Event) {
        debug!(?event, "server event");
        match event {
            Event::SchemaChange(change) => {
                if change.drops_keyspace() {
                    self.directory.remove_tablets_with_keyspace(&change.keyspace);
                } else if let Some(table) = change.dropped_table() {
                    self.directory
                        .remove_tablets_with_table(&change.keyspace, table);
                }
            }
            Event::TopologyChange { .. } => {
                if let Some(address) = event.removed_node() {
                    let removed: Vec<HostId> = self
                        .hosts()
                        .iter()
                        .filter(|host| host.address == Some(address))
                        .map(|host| host.id)
                        .collect();
                    for id in removed {
                        self.directory.remove_tablets_with_host(id);
                    }
                }
            }
            Event::StatusChange { .. } => {}
        }
        self.schedule_refresh();
    }

    /// Runs the refresh on its own thread; events are handled on a reader
    /// thread, which must keep reading while the refresh issues requests.
    fn schedule_refresh(&self) {
        let refresh = self
            .refresh
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(refresh) = refresh else {
            return;
        };
        let debouncer = self
            .config
            .debounce_refresh
            .then(|| Arc::clone(&self.debouncer));
        let spawned = thread::Builder::new()
            .name("tabula-refresh".to_string())
            .spawn(move || match debouncer {
                Some(debouncer) => debouncer.debounce(move || refresh()),
                None => refresh(),
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn refresh thread");
        }
    }
}

/// Takes `id`'s entries out of the list. The caller drops them once the
/// lock is released.
fn detach(hosts: &mut Vec<Host>, id: HostId) -> Vec<Host> {
    let (detached, kept) = std::mem::take(hosts)
        .into_iter()
        .partition(|host| host.id == id);
    *hosts = kept;
    detached
}

fn decode_result(frame: Frame) -> ClientResult<Response> {
    expect_opcode(&frame, Opcode::Result)?;
    Response::decode(frame)
}
