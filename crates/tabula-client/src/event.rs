//! Server-pushed events.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::body::BodyReader;
use crate::error::{ClientError, ClientResult};

/// Event kinds a connection can subscribe to with REGISTER.
pub const EVENT_TYPES: [&str; 3] = ["TOPOLOGY_CHANGE", "STATUS_CHANGE", "SCHEMA_CHANGE"];

/// A decoded EVENT body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `NEW_NODE` or `REMOVED_NODE`.
    TopologyChange { change: String, address: SocketAddr },
    /// `UP` or `DOWN`.
    StatusChange { change: String, address: SocketAddr },
    /// `CREATED`, `UPDATED` or `DROPPED` on a schema element.
    SchemaChange(SchemaChange),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub change: String,
    /// `KEYSPACE`, `TABLE`, `TYPE`, `FUNCTION` or `AGGREGATE`.
    pub target: String,
    pub keyspace: String,
    /// Element name; absent for keyspace changes.
    pub name: Option<String>,
    /// Argument types of a function or aggregate.
    pub arguments: Vec<String>,
}

impl SchemaChange {
    pub(crate) fn decode(r: &mut BodyReader) -> ClientResult<Self> {
        let change = r.read_string()?;
        let target = r.read_string()?;
        let keyspace = r.read_string()?;
        let (name, arguments) = match target.as_str() {
            "KEYSPACE" => (None, Vec::new()),
            "TABLE" | "TYPE" => (Some(r.read_string()?), Vec::new()),
            "FUNCTION" | "AGGREGATE" => (Some(r.read_string()?), r.read_string_list()?),
            other => {
                return Err(ClientError::protocol(format!(
                    "unknown schema change target {other}"
                )));
            }
        };
        Ok(Self {
            change,
            target,
            keyspace,
            name,
            arguments,
        })
    }

    /// Returns true if this drops a whole keyspace.
    pub fn drops_keyspace(&self) -> bool {
        self.change == "DROPPED" && self.target == "KEYSPACE"
    }

    /// Returns the dropped table, if this drops one.
    pub fn dropped_table(&self) -> Option<&str> {
        (self.change == "DROPPED" && self.target == "TABLE")
            .then_some(self.name.as_deref())
            .flatten()
    }
}

impl Event {
    /// Decodes an EVENT body.
    pub fn decode(body: Bytes) -> ClientResult<Self> {
        let mut r = BodyReader::new(body);
        let kind = r.read_string()?;
        match kind.as_str() {
            "TOPOLOGY_CHANGE" => Ok(Self::TopologyChange {
                change: r.read_string()?,
                address: r.read_inet()?,
            }),
            "STATUS_CHANGE" => Ok(Self::StatusChange {
                change: r.read_string()?,
                address: r.read_inet()?,
            }),
            "SCHEMA_CHANGE" => SchemaChange::decode(&mut r).map(Self::SchemaChange),
            other => Err(ClientError::protocol(format!("unknown event type {other}"))),
        }
    }

    /// Returns true if the event announces that a node left the cluster.
    pub fn removed_node(&self) -> Option<SocketAddr> {
        match self {
            Self::TopologyChange { change, address } if change == "REMOVED_NODE" => Some(*address),
            _ => None,
        }
    }
}
