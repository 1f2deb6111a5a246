//! Statements and their QUERY / EXECUTE bodies.

use bytes::{BufMut, Bytes, BytesMut};
use tabula_codec::{CqlType, Marshal, TypeInfo, compose_routing_key, marshal};
use tabula_compress::Codec;
use tabula_types::{Consistency, TableName};

use crate::body::{write_bytes, write_long_string, write_short_bytes};
use crate::error::{ClientError, ClientResult};
use crate::frame::Opcode;
use crate::result::{Prepared, value_channel};

const FLAG_VALUES: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Query(String),
    Prepared(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BoundValue {
    cql: CqlType,
    value: Option<Bytes>,
}

/// A query or prepared statement with its bound values.
///
/// Values are marshaled when bound. Values marked as partition-key
/// components make up the routing key, in the order they were marked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    target: Target,
    table: Option<TableName>,
    values: Vec<BoundValue>,
    key_indexes: Vec<usize>,
    consistency: Option<Consistency>,
}

impl Statement {
    /// A plain QUERY.
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            target: Target::Query(text.into()),
            table: None,
            values: Vec::new(),
            key_indexes: Vec::new(),
            consistency: None,
        }
    }

    /// An EXECUTE of a prepared statement. Table and partition-key
    /// positions come from the prepared metadata.
    pub fn prepared(prepared: &Prepared) -> Self {
        Self {
            target: Target::Prepared(prepared.id.clone()),
            table: prepared
                .table()
                .map(|(keyspace, table)| TableName::new(keyspace, table)),
            values: Vec::new(),
            key_indexes: prepared.pk_indexes.iter().map(|&i| usize::from(i)).collect(),
            consistency: None,
        }
    }

    /// Sets the table the statement targets, enabling tablet routing.
    #[must_use]
    pub fn with_table(mut self, keyspace: &str, table: &str) -> Self {
        self.table = Some(TableName::new(keyspace, table));
        self
    }

    #[must_use]
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    /// Binds the next value.
    pub fn bind<T: Marshal + ?Sized>(mut self, info: &TypeInfo, value: &T) -> ClientResult<Self> {
        self.values.push(BoundValue {
            cql: info.cql().clone(),
            value: marshal(info, value)?,
        });
        Ok(self)
    }

    /// Binds the next value and marks it as the next partition-key
    /// component.
    pub fn bind_key<T: Marshal + ?Sized>(self, info: &TypeInfo, value: &T) -> ClientResult<Self> {
        let index = self.values.len();
        let mut statement = self.bind(info, value)?;
        statement.key_indexes.push(index);
        Ok(statement)
    }

    pub fn table(&self) -> Option<&TableName> {
        self.table.as_ref()
    }

    pub fn consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    pub(crate) fn opcode(&self) -> Opcode {
        match self.target {
            Target::Query(_) => Opcode::Query,
            Target::Prepared(_) => Opcode::Execute,
        }
    }

    /// The serialized partition key, or `None` when it is unknown or has
    /// a null component.
    pub fn routing_key(&self) -> ClientResult<Option<Bytes>> {
        if self.key_indexes.is_empty() {
            return Ok(None);
        }
        let mut components = Vec::with_capacity(self.key_indexes.len());
        for &index in &self.key_indexes {
            match self.values.get(index).and_then(|v| v.value.clone()) {
                Some(component) => components.push(component),
                None => return Ok(None),
            }
        }
        Ok(Some(compose_routing_key(&components)?))
    }

    /// Encodes the request body. Non-key blob and text values pass through
    /// `codec` first.
    pub(crate) fn encode(
        &self,
        default_consistency: Consistency,
        codec: Option<&dyn Codec>,
    ) -> ClientResult<Bytes> {
        let mut buf = BytesMut::new();
        match &self.target {
            Target::Query(text) => write_long_string(&mut buf, text)?,
            Target::Prepared(id) => write_short_bytes(&mut buf, id)?,
        }
        buf.put_u16(self.consistency.unwrap_or(default_consistency).code());

        if self.values.is_empty() {
            buf.put_u8(0);
            return Ok(buf.freeze());
        }
        let count = u16::try_from(self.values.len()).map_err(|_| {
            ClientError::protocol(format!("{} bound values exceed a short", self.values.len()))
        })?;
        buf.put_u8(FLAG_VALUES);
        buf.put_u16(count);
        for (index, bound) in self.values.iter().enumerate() {
            let compress = codec
                .filter(|_| !self.key_indexes.contains(&index))
                .zip(value_channel(&bound.cql));
            match (&bound.value, compress) {
                (Some(value), Some((codec, channel))) => {
                    let packed = codec.compress(value, channel)?;
                    write_bytes(&mut buf, Some(packed.as_slice()))?;
                }
                (value, _) => write_bytes(&mut buf, value.as_deref())?,
            }
        }
        Ok(buf.freeze())
    }
}
