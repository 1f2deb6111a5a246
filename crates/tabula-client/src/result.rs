//! RESULT message decoding.

use std::collections::HashMap;

use bytes::Bytes;
use tabula_codec::{CqlType, TypeInfo, Unmarshal, unmarshal};
use tabula_compress::{Channel, Codec};
use tabula_types::ProtocolVersion;
use uuid::Uuid;

use crate::body::BodyReader;
use crate::error::{ClientError, ClientResult};
use crate::event::SchemaChange;
use crate::frame::{Frame, FrameFlags};

const KIND_VOID: i32 = 0x0001;
const KIND_ROWS: i32 = 0x0002;
const KIND_SET_KEYSPACE: i32 = 0x0003;
const KIND_PREPARED: i32 = 0x0004;
const KIND_SCHEMA_CHANGE: i32 = 0x0005;

const GLOBAL_TABLES_SPEC: i32 = 0x0001;
const HAS_MORE_PAGES: i32 = 0x0002;
const NO_METADATA: i32 = 0x0004;

/// One column of result or prepared metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub cql: CqlType,
}

/// Column layout of a rows result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowsMetadata {
    /// Empty when the server skipped metadata.
    pub columns: Vec<ColumnSpec>,
    pub column_count: usize,
    pub paging_state: Option<Bytes>,
}

impl RowsMetadata {
    fn decode(r: &mut BodyReader) -> ClientResult<Self> {
        let flags = r.read_i32()?;
        let column_count = count(r.read_i32()?, "column count")?;
        let paging_state = if flags & HAS_MORE_PAGES != 0 {
            r.read_bytes()?
        } else {
            None
        };
        let columns = if flags & NO_METADATA == 0 {
            read_columns(r, flags & GLOBAL_TABLES_SPEC != 0, column_count)?
        } else {
            Vec::new()
        };
        Ok(Self {
            columns,
            column_count,
            paging_state,
        })
    }
}

/// A page of rows. Cells are raw values; `None` is null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rows {
    pub metadata: RowsMetadata,
    rows: Vec<Vec<Option<Bytes>>>,
    version: ProtocolVersion,
}

impl Rows {
    fn decode(r: &mut BodyReader, version: ProtocolVersion) -> ClientResult<Self> {
        let metadata = RowsMetadata::decode(r)?;
        let row_count = count(r.read_i32()?, "row count")?;
        // Every cell takes at least four bytes, so the body bounds the row count.
        let fits = match metadata.column_count {
            0 => row_count == 0,
            columns => row_count <= r.remaining() / 4 / columns,
        };
        if !fits {
            return Err(ClientError::protocol(format!(
                "{row_count} rows of {} columns do not fit in {} bytes",
                metadata.column_count,
                r.remaining()
            )));
        }
        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let row = (0..metadata.column_count)
                .map(|_| r.read_bytes())
                .collect::<ClientResult<Vec<_>>>()?;
            rows.push(row);
        }
        Ok(Self {
            metadata,
            rows,
            version,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Raw cell value.
    pub fn cell(&self, row: usize, column: usize) -> Option<&Bytes> {
        self.rows.get(row)?.get(column)?.as_ref()
    }

    /// Index of the column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.metadata.columns.iter().position(|c| c.name == name)
    }

    /// Decodes one cell into `out`.
    pub fn get<T: Unmarshal + ?Sized>(
        &self,
        row: usize,
        column: usize,
        out: &mut T,
    ) -> ClientResult<()> {
        let spec = self.metadata.columns.get(column).ok_or_else(|| {
            ClientError::protocol(format!("no metadata for column {column}"))
        })?;
        let cell = self
            .rows
            .get(row)
            .and_then(|r| r.get(column))
            .ok_or_else(|| ClientError::protocol(format!("no cell at row {row}, column {column}")))?;
        let info = TypeInfo::new(spec.cql.clone(), self.version);
        match cell {
            Some(data) => unmarshal(&info, data, out)?,
            None => out.from_cql(&info, None)?,
        }
        Ok(())
    }

    /// Reverses client-side compression on blob and text columns.
    pub(crate) fn decompress(&mut self, codec: &dyn Codec) -> ClientResult<()> {
        let channels: Vec<Option<Channel>> = self
            .metadata
            .columns
            .iter()
            .map(|c| value_channel(&c.cql))
            .collect();
        for row in &mut self.rows {
            for (cell, channel) in row.iter_mut().zip(&channels) {
                if let (Some(data), Some(channel)) = (cell.as_mut(), channel) {
                    *data = Bytes::from(codec.decompress(data, *channel)?);
                }
            }
        }
        Ok(())
    }
}

/// Compression channel for values of `cql`, if they are compressed at all.
pub(crate) fn value_channel(cql: &CqlType) -> Option<Channel> {
    match cql {
        CqlType::Blob => Some(Channel::Binary),
        CqlType::Ascii | CqlType::Text => Some(Channel::Ascii),
        _ => None,
    }
}

/// Metadata returned by PREPARE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub id: Bytes,
    /// Bound variables in marker order.
    pub variables: Vec<ColumnSpec>,
    /// Positions of the partition-key variables, in key order.
    pub pk_indexes: Vec<u16>,
    pub result: RowsMetadata,
}

impl Prepared {
    fn decode(r: &mut BodyReader, version: ProtocolVersion) -> ClientResult<Self> {
        let id = r.read_short_bytes()?;
        let flags = r.read_i32()?;
        let column_count = count(r.read_i32()?, "variable count")?;
        let mut pk_indexes = Vec::new();
        if version >= ProtocolVersion::V4 {
            let pk_count = count(r.read_i32()?, "partition key count")?;
            for _ in 0..pk_count {
                pk_indexes.push(r.read_u16()?);
            }
        }
        let variables = read_columns(r, flags & GLOBAL_TABLES_SPEC != 0, column_count)?;
        let result = RowsMetadata::decode(r)?;
        Ok(Self {
            id,
            variables,
            pk_indexes,
            result,
        })
    }

    /// Keyspace and table of the first bound variable.
    pub fn table(&self) -> Option<(&str, &str)> {
        self.variables
            .first()
            .map(|c| (c.keyspace.as_str(), c.table.as_str()))
    }
}

/// The kind-specific part of a RESULT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Void,
    Rows(Rows),
    SetKeyspace(String),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

impl QueryResult {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Void => "VOID",
            Self::Rows(_) => "ROWS",
            Self::SetKeyspace(_) => "SET_KEYSPACE",
            Self::Prepared(_) => "PREPARED",
            Self::SchemaChange(_) => "SCHEMA_CHANGE",
        }
    }
}

/// A decoded RESULT frame with its envelope fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub result: QueryResult,
    pub tracing_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub custom_payload: HashMap<String, Option<Bytes>>,
}

impl Response {
    /// Decodes a RESULT frame.
    pub fn decode(frame: Frame) -> ClientResult<Self> {
        let flags = frame.header.flags;
        let version = frame.header.version;
        let mut r = BodyReader::new(frame.body);

        let tracing_id = if flags.contains(FrameFlags::TRACING) {
            let raw = r.read_raw(16)?;
            let mut id = [0u8; 16];
            id.copy_from_slice(&raw);
            Some(Uuid::from_bytes(id))
        } else {
            None
        };
        let warnings = if flags.contains(FrameFlags::WARNING) {
            r.read_string_list()?
        } else {
            Vec::new()
        };
        let custom_payload = if flags.contains(FrameFlags::CUSTOM_PAYLOAD) {
            r.read_bytes_map()?
        } else {
            HashMap::new()
        };

        let result = match r.read_i32()? {
            KIND_VOID => QueryResult::Void,
            KIND_ROWS => QueryResult::Rows(Rows::decode(&mut r, version)?),
            KIND_SET_KEYSPACE => QueryResult::SetKeyspace(r.read_string()?),
            KIND_PREPARED => QueryResult::Prepared(Prepared::decode(&mut r, version)?),
            KIND_SCHEMA_CHANGE => QueryResult::SchemaChange(SchemaChange::decode(&mut r)?),
            other => {
                return Err(ClientError::protocol(format!("unknown result kind {other}")));
            }
        };
        Ok(Self {
            result,
            tracing_id,
            warnings,
            custom_payload,
        })
    }

    /// A custom payload entry, if present and not null.
    pub fn payload(&self, key: &str) -> Option<&Bytes> {
        self.custom_payload.get(key)?.as_ref()
    }

    pub fn rows(&self) -> Option<&Rows> {
        match &self.result {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

fn count(n: i32, what: &str) -> ClientResult<usize> {
    usize::try_from(n).map_err(|_| ClientError::protocol(format!("negative {what} {n}")))
}

fn read_columns(r: &mut BodyReader, global: bool, n: usize) -> ClientResult<Vec<ColumnSpec>> {
    let global = if global {
        Some((r.read_string()?, r.read_string()?))
    } else {
        None
    };
    let mut columns = Vec::with_capacity(n.min(r.remaining() / 4));
    for _ in 0..n {
        let (keyspace, table) = match &global {
            Some((keyspace, table)) => (keyspace.clone(), table.clone()),
            None => (r.read_string()?, r.read_string()?),
        };
        let name = r.read_string()?;
        let cql = r.read_option()?;
        columns.push(ColumnSpec {
            keyspace,
            table,
            name,
            cql,
        });
    }
    Ok(columns)
}
