//! The CQL type tree and its protocol-version-qualified wrapper.
//!
//! Types arrive from the server as `[option]` values inside result
//! metadata; [`CqlType::read_option`] parses them. Custom types are carried
//! as their marshal class name, except `VectorType`, which is resolved into
//! [`CqlType::Vector`].

use std::fmt::{self, Display};

use bytes::Buf;
use tabula_types::ProtocolVersion;

use crate::error::{CodecError, CodecResult};

const MARSHAL_PREFIX: &str = "org.apache.cassandra.db.marshal.";

/// Deepest type nesting accepted from the server.
pub const MAX_TYPE_DEPTH: usize = 64;

/// Server-side schema type of a column or bind marker.
///
/// `varchar` is an alias of `text` and shares its variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CqlType {
    Ascii,
    BigInt,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Duration,
    Float,
    Int,
    SmallInt,
    Text,
    Timestamp,
    TimeUuid,
    TinyInt,
    Uuid,
    Varint,
    Inet,
    Date,
    Time,
    List(Box<CqlType>),
    Set(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
    Tuple(Vec<CqlType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, CqlType)>,
    },
    Vector {
        element: Box<CqlType>,
        dimension: usize,
    },
    /// A custom marshal class the codec has no case for.
    Custom(String),
}

impl CqlType {
    pub fn list(element: CqlType) -> Self {
        Self::List(Box::new(element))
    }

    pub fn set(element: CqlType) -> Self {
        Self::Set(Box::new(element))
    }

    pub fn map(key: CqlType, value: CqlType) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    pub fn vector(element: CqlType, dimension: usize) -> Self {
        Self::Vector {
            element: Box::new(element),
            dimension,
        }
    }

    /// Byte width of types whose encoding never varies in length.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::Boolean | Self::TinyInt => Some(1),
            Self::SmallInt => Some(2),
            Self::Int | Self::Float | Self::Date => Some(4),
            Self::BigInt | Self::Counter | Self::Double | Self::Timestamp | Self::Time => Some(8),
            Self::Uuid | Self::TimeUuid => Some(16),
            _ => None,
        }
    }

    /// Returns true for the raw-byte string types.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Ascii | Self::Text)
    }

    /// Parses one `[option]` from result or prepared metadata.
    pub fn read_option(buf: &mut impl Buf) -> CodecResult<Self> {
        Self::read_option_at(buf, 0)
    }

    fn read_option_at(buf: &mut impl Buf, depth: usize) -> CodecResult<Self> {
        if depth > MAX_TYPE_DEPTH {
            return Err(too_deep("option"));
        }
        let id = read_u16(buf)?;
        let ty = match id {
            0x0000 => {
                let class = read_string(buf)?;
                Self::from_marshal_class(&class)?
            }
            0x0001 => Self::Ascii,
            0x0002 => Self::BigInt,
            0x0003 => Self::Blob,
            0x0004 => Self::Boolean,
            0x0005 => Self::Counter,
            0x0006 => Self::Decimal,
            0x0007 => Self::Double,
            0x0008 => Self::Float,
            0x0009 => Self::Int,
            0x000A | 0x000D => Self::Text,
            0x000B => Self::Timestamp,
            0x000C => Self::Uuid,
            0x000E => Self::Varint,
            0x000F => Self::TimeUuid,
            0x0010 => Self::Inet,
            0x0011 => Self::Date,
            0x0012 => Self::Time,
            0x0013 => Self::SmallInt,
            0x0014 => Self::TinyInt,
            0x0015 => Self::Duration,
            0x0020 => Self::list(Self::read_option_at(buf, depth + 1)?),
            0x0021 => {
                let key = Self::read_option_at(buf, depth + 1)?;
                let value = Self::read_option_at(buf, depth + 1)?;
                Self::map(key, value)
            }
            0x0022 => Self::set(Self::read_option_at(buf, depth + 1)?),
            0x0030 => {
                let keyspace = read_string(buf)?;
                let name = read_string(buf)?;
                let count = read_u16(buf)?;
                let mut fields = Vec::with_capacity(usize::from(count).min(buf.remaining() / 4));
                for _ in 0..count {
                    let field = read_string(buf)?;
                    fields.push((field, Self::read_option_at(buf, depth + 1)?));
                }
                Self::Udt {
                    keyspace,
                    name,
                    fields,
                }
            }
            0x0031 => {
                let count = read_u16(buf)?;
                let mut types = Vec::with_capacity(usize::from(count).min(buf.remaining() / 2));
                for _ in 0..count {
                    types.push(Self::read_option_at(buf, depth + 1)?);
                }
                Self::Tuple(types)
            }
            other => {
                return Err(CodecError::malformed(
                    "option",
                    format!("unknown type id {other:#06x}"),
                ));
            }
        };
        Ok(ty)
    }

    /// Resolves a server marshal class name such as
    /// `org.apache.cassandra.db.marshal.VectorType(...FloatType, 3)`.
    pub fn from_marshal_class(class: &str) -> CodecResult<Self> {
        let mut parser = ClassParser { input: class.trim() };
        let ty = parser.parse(0)?;
        if !parser.input.trim().is_empty() {
            return Err(CodecError::malformed(
                "custom type",
                format!("trailing input in {class}"),
            ));
        }
        Ok(ty)
    }
}

impl Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascii => f.write_str("ascii"),
            Self::BigInt => f.write_str("bigint"),
            Self::Blob => f.write_str("blob"),
            Self::Boolean => f.write_str("boolean"),
            Self::Counter => f.write_str("counter"),
            Self::Decimal => f.write_str("decimal"),
            Self::Double => f.write_str("double"),
            Self::Duration => f.write_str("duration"),
            Self::Float => f.write_str("float"),
            Self::Int => f.write_str("int"),
            Self::SmallInt => f.write_str("smallint"),
            Self::Text => f.write_str("text"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::TimeUuid => f.write_str("timeuuid"),
            Self::TinyInt => f.write_str("tinyint"),
            Self::Uuid => f.write_str("uuid"),
            Self::Varint => f.write_str("varint"),
            Self::Inet => f.write_str("inet"),
            Self::Date => f.write_str("date"),
            Self::Time => f.write_str("time"),
            Self::List(e) => write!(f, "list<{e}>"),
            Self::Set(e) => write!(f, "set<{e}>"),
            Self::Map(k, v) => write!(f, "map<{k}, {v}>"),
            Self::Tuple(types) => {
                f.write_str("tuple<")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{t}")?;
                }
                f.write_str(">")
            }
            Self::Udt { keyspace, name, .. } => write!(f, "{keyspace}.{name}"),
            Self::Vector { element, dimension } => write!(f, "vector<{element}, {dimension}>"),
            Self::Custom(class) => write!(f, "'{class}'"),
        }
    }
}

/// A CQL type together with the protocol version it was negotiated for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    cql: CqlType,
    version: ProtocolVersion,
}

impl TypeInfo {
    pub fn new(cql: CqlType, version: ProtocolVersion) -> Self {
        Self { cql, version }
    }

    pub fn cql(&self) -> &CqlType {
        &self.cql
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Type info of a nested type, at the same protocol version.
    pub fn nested(&self, cql: &CqlType) -> Self {
        Self {
            cql: cql.clone(),
            version: self.version,
        }
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.cql.fmt(f)
    }
}

fn too_deep(what: &str) -> CodecError {
    CodecError::malformed(what, format!("types nested deeper than {MAX_TYPE_DEPTH}"))
}

fn read_u16(buf: &mut impl Buf) -> CodecResult<u16> {
    if buf.remaining() < 2 {
        return Err(CodecError::truncated("option", 2, buf.remaining()));
    }
    Ok(buf.get_u16())
}

fn read_string(buf: &mut impl Buf) -> CodecResult<String> {
    let len = usize::from(read_u16(buf)?);
    if buf.remaining() < len {
        return Err(CodecError::truncated("string", len, buf.remaining()));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::malformed("string", "invalid utf-8"))
}

/// Recursive-descent parser for marshal class names.
struct ClassParser<'a> {
    input: &'a str,
}

impl ClassParser<'_> {
    fn parse(&mut self, depth: usize) -> CodecResult<CqlType> {
        if depth > MAX_TYPE_DEPTH {
            return Err(too_deep("custom type"));
        }
        let input = self.input.trim_start();
        let end = input
            .find(|c: char| c == '(' || c == ',' || c == ')')
            .unwrap_or(input.len());
        let name = input[..end].trim();
        let name = name.strip_prefix(MARSHAL_PREFIX).unwrap_or(name);
        self.input = &input[end..];

        let simple = match name {
            "AsciiType" => Some(CqlType::Ascii),
            "LongType" => Some(CqlType::BigInt),
            "BytesType" => Some(CqlType::Blob),
            "BooleanType" => Some(CqlType::Boolean),
            "CounterColumnType" => Some(CqlType::Counter),
            "DecimalType" => Some(CqlType::Decimal),
            "DoubleType" => Some(CqlType::Double),
            "DurationType" => Some(CqlType::Duration),
            "FloatType" => Some(CqlType::Float),
            "Int32Type" => Some(CqlType::Int),
            "ShortType" => Some(CqlType::SmallInt),
            "ByteType" => Some(CqlType::TinyInt),
            "UTF8Type" => Some(CqlType::Text),
            "TimestampType" | "DateType" => Some(CqlType::Timestamp),
            "TimeUUIDType" => Some(CqlType::TimeUuid),
            "UUIDType" => Some(CqlType::Uuid),
            "IntegerType" => Some(CqlType::Varint),
            "InetAddressType" => Some(CqlType::Inet),
            "SimpleDateType" => Some(CqlType::Date),
            "TimeType" => Some(CqlType::Time),
            _ => None,
        };
        if let Some(ty) = simple {
            return Ok(ty);
        }

        match name {
            "ListType" | "SetType" | "FrozenType" | "ReversedType" => {
                self.expect('(')?;
                let inner = self.parse(depth + 1)?;
                self.expect(')')?;
                Ok(match name {
                    "ListType" => CqlType::list(inner),
                    "SetType" => CqlType::set(inner),
                    _ => inner,
                })
            }
            "MapType" => {
                self.expect('(')?;
                let key = self.parse(depth + 1)?;
                self.expect(',')?;
                let value = self.parse(depth + 1)?;
                self.expect(')')?;
                Ok(CqlType::map(key, value))
            }
            "VectorType" => {
                self.expect('(')?;
                let element = self.parse(depth + 1)?;
                self.expect(',')?;
                let digits_end = self
                    .input
                    .find(')')
                    .ok_or_else(|| CodecError::malformed("custom type", "unterminated vector"))?;
                let dimension = self.input[..digits_end].trim().parse::<usize>().map_err(|_| {
                    CodecError::malformed("custom type", "vector dimension is not a number")
                })?;
                self.input = &self.input[digits_end..];
                self.expect(')')?;
                Ok(CqlType::vector(element, dimension))
            }
            other => {
                // Unknown classes are kept verbatim, including any arguments.
                let mut class = other.to_string();
                if self.input.starts_with('(') {
                    let mut depth = 0usize;
                    let mut consumed = 0;
                    for (i, c) in self.input.char_indices() {
                        match c {
                            '(' => depth += 1,
                            ')' => {
                                depth -= 1;
                                if depth == 0 {
                                    consumed = i + 1;
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    if consumed == 0 {
                        return Err(CodecError::malformed("custom type", "unbalanced parentheses"));
                    }
                    class.push_str(&self.input[..consumed]);
                    self.input = &self.input[consumed..];
                }
                Ok(CqlType::Custom(class))
            }
        }
    }

    fn expect(&mut self, c: char) -> CodecResult<()> {
        let trimmed = self.input.trim_start();
        match trimmed.strip_prefix(c) {
            Some(rest) => {
                self.input = rest;
                Ok(())
            }
            None => Err(CodecError::malformed(
                "custom type",
                format!("expected '{c}' at '{trimmed}'"),
            )),
        }
    }
}
