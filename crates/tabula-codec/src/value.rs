//! Dynamically typed CQL values.
//!
//! [`CqlValue`] is the tagged union the wire codec speaks. Nulls inside
//! composite values are `None`; a top-level null is represented by the
//! surrounding `Option`.

use std::fmt::{self, Display};
use std::net::IpAddr;

use uuid::Uuid;

/// Arbitrary-precision signed integer in minimal two's-complement
/// big-endian form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CqlVarint(Vec<u8>);

impl CqlVarint {
    /// Builds a varint from two's-complement big-endian bytes, dropping
    /// redundant sign bytes. An empty input is zero.
    pub fn from_signed_bytes_be(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self(vec![0]);
        }
        Self(minimal(bytes).to_vec())
    }

    pub fn as_signed_bytes_be(&self) -> &[u8] {
        &self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0[0] & 0x80 != 0
    }

    /// Returns the value if it fits in 128 bits.
    pub fn to_i128(&self) -> Option<i128> {
        if self.0.len() > 16 {
            return None;
        }
        let fill = if self.is_negative() { 0xFF } else { 0x00 };
        let mut buf = [fill; 16];
        buf[16 - self.0.len()..].copy_from_slice(&self.0);
        Some(i128::from_be_bytes(buf))
    }

    /// Returns the value if it fits in 64 bits.
    pub fn to_i64(&self) -> Option<i64> {
        self.to_i128().and_then(|v| i64::try_from(v).ok())
    }
}

impl From<i128> for CqlVarint {
    fn from(value: i128) -> Self {
        Self(minimal(&value.to_be_bytes()).to_vec())
    }
}

impl From<i64> for CqlVarint {
    fn from(value: i64) -> Self {
        Self(minimal(&value.to_be_bytes()).to_vec())
    }
}

impl Display for CqlVarint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_i128() {
            Some(v) => write!(f, "{v}"),
            None => {
                f.write_str("0x")?;
                for b in &self.0 {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Strips leading bytes that only repeat the sign.
fn minimal(bytes: &[u8]) -> &[u8] {
    let mut start = 0;
    while start + 1 < bytes.len() {
        let (b, next) = (bytes[start], bytes[start + 1]);
        let redundant = (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    &bytes[start..]
}

/// Arbitrary-precision decimal: `unscaled × 10^-scale`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CqlDecimal {
    pub unscaled: CqlVarint,
    pub scale: i32,
}

impl CqlDecimal {
    pub fn new(unscaled: impl Into<CqlVarint>, scale: i32) -> Self {
        Self {
            unscaled: unscaled.into(),
            scale,
        }
    }
}

/// Calendar-aware duration: months and days are not convertible to a
/// fixed number of nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CqlDuration {
    pub months: i32,
    pub days: i32,
    pub nanoseconds: i64,
}

/// Days since the epoch, with the epoch at `2^31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CqlDate(pub u32);

impl CqlDate {
    pub const EPOCH: u32 = 1 << 31;

    /// Days relative to 1970-01-01.
    pub fn days_since_epoch(self) -> i64 {
        i64::from(self.0) - i64::from(Self::EPOCH)
    }
}

/// Nanoseconds since midnight, in `[0, 86_399_999_999_999]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CqlTime(pub i64);

impl CqlTime {
    pub const MAX_NANOS: i64 = 86_399_999_999_999;
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CqlTimestamp(pub i64);

/// A decoded or to-be-encoded CQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    /// Raw bytes; validating the character set is left to the server.
    Ascii(Vec<u8>),
    BigInt(i64),
    Blob(Vec<u8>),
    Boolean(bool),
    Counter(i64),
    Decimal(CqlDecimal),
    Double(f64),
    Duration(CqlDuration),
    Float(f32),
    Int(i32),
    SmallInt(i16),
    /// Raw bytes, not checked for UTF-8.
    Text(Vec<u8>),
    Timestamp(CqlTimestamp),
    TimeUuid(Uuid),
    TinyInt(i8),
    Uuid(Uuid),
    Varint(CqlVarint),
    Inet(IpAddr),
    Date(CqlDate),
    Time(CqlTime),
    List(Vec<Option<CqlValue>>),
    Set(Vec<Option<CqlValue>>),
    Map(Vec<(Option<CqlValue>, Option<CqlValue>)>),
    Tuple(Vec<Option<CqlValue>>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, Option<CqlValue>)>,
    },
    Vector(Vec<CqlValue>),
}

impl CqlValue {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ascii(_) => "ascii",
            Self::BigInt(_) => "bigint",
            Self::Blob(_) => "blob",
            Self::Boolean(_) => "boolean",
            Self::Counter(_) => "counter",
            Self::Decimal(_) => "decimal",
            Self::Double(_) => "double",
            Self::Duration(_) => "duration",
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::SmallInt(_) => "smallint",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::TimeUuid(_) => "timeuuid",
            Self::TinyInt(_) => "tinyint",
            Self::Uuid(_) => "uuid",
            Self::Varint(_) => "varint",
            Self::Inet(_) => "inet",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Tuple(_) => "tuple",
            Self::Udt { .. } => "udt",
            Self::Vector(_) => "vector",
        }
    }

    /// Integer content of any integral variant.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Self::TinyInt(v) => Some(i128::from(*v)),
            Self::SmallInt(v) => Some(i128::from(*v)),
            Self::Int(v) => Some(i128::from(*v)),
            Self::BigInt(v) | Self::Counter(v) => Some(i128::from(*v)),
            Self::Varint(v) => v.to_i128(),
            _ => None,
        }
    }

    /// Textual content, if the bytes are valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Ascii(s) | Self::Text(s) => std::str::from_utf8(s).ok(),
            _ => None,
        }
    }
}
