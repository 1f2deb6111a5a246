//! Conversions between Rust host types and [`CqlValue`].
//!
//! [`Marshal`] and [`Unmarshal`] are implemented once per host type and
//! translate to the dynamically typed value the wire layer speaks. The
//! wire layer in [`crate::wire`] then dispatches on the CQL type.
//!
//! Decoding writes through `&mut self`, so caller-owned storage (a
//! `String`'s buffer, a `Vec`'s allocation, an `Option` that is already
//! `Some`) is reused instead of replaced.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{BuildHasher, Hash};
use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{CodecError, CodecResult};
use crate::types::{CqlType, TypeInfo};
use crate::value::{
    CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlValue, CqlVarint,
};
use crate::wire::{decode_value, encode_value};

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A host value that can be encoded as a CQL value.
pub trait Marshal {
    /// Converts to a CQL value of `info`'s type. `None` is nil.
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>>;
}

/// A host slot that a CQL value can be decoded into.
pub trait Unmarshal {
    /// Overwrites `self` with `value`; `None` resets the slot to its zero
    /// or absent representation.
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()>;
}

/// Encodes a host value. `Ok(None)` is nil and is sent as a null value.
pub fn marshal<T: Marshal + ?Sized>(info: &TypeInfo, value: &T) -> CodecResult<Option<Bytes>> {
    match value.to_cql(info)? {
        Some(value) => encode_value(info, &value).map(Some),
        None => Ok(None),
    }
}

/// Decodes `data` into caller-owned storage.
pub fn unmarshal<T: Unmarshal + ?Sized>(
    info: &TypeInfo,
    data: &[u8],
    out: &mut T,
) -> CodecResult<()> {
    let value = decode_value(info, data)?;
    out.from_cql(info, value)
}

fn unsupported<T>(host: &str, info: &TypeInfo) -> CodecResult<T> {
    Err(CodecError::unsupported(host, info.cql()))
}

// ============================================================================
// Integers
// ============================================================================

fn integer_to_cql(n: i128, info: &TypeInfo, host: &str) -> CodecResult<CqlValue> {
    let ty = info.cql();
    let out_of_range = |_| CodecError::out_of_range(n, ty);
    Ok(match ty {
        CqlType::TinyInt => CqlValue::TinyInt(i8::try_from(n).map_err(out_of_range)?),
        CqlType::SmallInt => CqlValue::SmallInt(i16::try_from(n).map_err(out_of_range)?),
        CqlType::Int => CqlValue::Int(i32::try_from(n).map_err(out_of_range)?),
        CqlType::BigInt => CqlValue::BigInt(i64::try_from(n).map_err(out_of_range)?),
        CqlType::Counter => CqlValue::Counter(i64::try_from(n).map_err(out_of_range)?),
        CqlType::Timestamp => {
            CqlValue::Timestamp(CqlTimestamp(i64::try_from(n).map_err(out_of_range)?))
        }
        CqlType::Time => CqlValue::Time(CqlTime(i64::try_from(n).map_err(out_of_range)?)),
        CqlType::Varint => CqlValue::Varint(CqlVarint::from(n)),
        CqlType::Decimal => CqlValue::Decimal(CqlDecimal::new(n, 0)),
        CqlType::Ascii => CqlValue::Ascii(n.to_string().into_bytes()),
        CqlType::Text => CqlValue::Text(n.to_string().into_bytes()),
        _ => return unsupported(host, info),
    })
}

fn integer_from_cql(value: &CqlValue, info: &TypeInfo, host: &str) -> CodecResult<i128> {
    match value {
        CqlValue::Varint(v) => v.to_i128().ok_or_else(|| CodecError::out_of_range(v, host)),
        CqlValue::Timestamp(CqlTimestamp(v)) | CqlValue::Time(CqlTime(v)) => Ok(i128::from(*v)),
        other => match other.as_integer() {
            Some(n) => Ok(n),
            None => unsupported(host, info),
        },
    }
}

/// Parses a decimal string for an integral column.
fn parse_integer(s: &str, info: &TypeInfo) -> CodecResult<i128> {
    s.trim()
        .parse::<i128>()
        .map_err(|_| CodecError::out_of_range(format!("{s:?}"), info.cql()))
}

macro_rules! impl_integer {
    ($($t:ty),* $(,)?) => {$(
        impl Marshal for $t {
            fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
                let n = i128::try_from(*self)
                    .map_err(|_| CodecError::out_of_range(*self, info.cql()))?;
                integer_to_cql(n, info, stringify!($t)).map(Some)
            }
        }

        impl Unmarshal for $t {
            fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
                let Some(value) = value else {
                    *self = 0;
                    return Ok(());
                };
                let n = integer_from_cql(&value, info, stringify!($t))?;
                *self = <$t>::try_from(n)
                    .map_err(|_| CodecError::out_of_range(n, stringify!($t)))?;
                Ok(())
            }
        }
    )*};
}

// `u8` is left out so that `Vec<u8>` and `[u8]` can mean `blob`.
impl_integer!(i8, i16, i32, i64, i128, isize, u16, u32, u64, usize);

// ============================================================================
// Scalars
// ============================================================================

impl Marshal for bool {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match info.cql() {
            CqlType::Boolean => Ok(Some(CqlValue::Boolean(*self))),
            _ => unsupported("bool", info),
        }
    }
}

impl Unmarshal for bool {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => false,
            Some(CqlValue::Boolean(b)) => b,
            Some(_) => return unsupported("bool", info),
        };
        Ok(())
    }
}

impl Marshal for f32 {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match info.cql() {
            CqlType::Float => Ok(Some(CqlValue::Float(*self))),
            CqlType::Double => Ok(Some(CqlValue::Double(f64::from(*self)))),
            _ => unsupported("f32", info),
        }
    }
}

impl Unmarshal for f32 {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => 0.0,
            Some(CqlValue::Float(v)) => v,
            Some(CqlValue::Double(v)) => narrow_f64(v)?,
            Some(_) => return unsupported("f32", info),
        };
        Ok(())
    }
}

impl Marshal for f64 {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match info.cql() {
            CqlType::Double => Ok(Some(CqlValue::Double(*self))),
            CqlType::Float => Ok(Some(CqlValue::Float(narrow_f64(*self)?))),
            _ => unsupported("f64", info),
        }
    }
}

impl Unmarshal for f64 {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => 0.0,
            Some(CqlValue::Double(v)) => v,
            Some(CqlValue::Float(v)) => f64::from(v),
            Some(_) => return unsupported("f64", info),
        };
        Ok(())
    }
}

/// Narrows a double only when no precision is lost.
fn narrow_f64(v: f64) -> CodecResult<f32> {
    let narrowed = v as f32;
    if v.is_nan() || f64::from(narrowed) == v {
        Ok(narrowed)
    } else {
        Err(CodecError::out_of_range(v, "float"))
    }
}

// ============================================================================
// Strings and bytes
// ============================================================================

fn str_to_cql(s: &str, info: &TypeInfo) -> CodecResult<CqlValue> {
    Ok(match info.cql() {
        CqlType::Ascii => CqlValue::Ascii(s.as_bytes().to_vec()),
        CqlType::Text => CqlValue::Text(s.as_bytes().to_vec()),
        CqlType::Blob => CqlValue::Blob(s.as_bytes().to_vec()),
        CqlType::Inet => CqlValue::Inet(
            s.parse::<IpAddr>()
                .map_err(|_| CodecError::out_of_range(format!("{s:?}"), "inet"))?,
        ),
        CqlType::Uuid => CqlValue::Uuid(parse_uuid(s)?),
        CqlType::TimeUuid => CqlValue::TimeUuid(parse_uuid(s)?),
        CqlType::TinyInt
        | CqlType::SmallInt
        | CqlType::Int
        | CqlType::BigInt
        | CqlType::Counter
        | CqlType::Varint => integer_to_cql(parse_integer(s, info)?, info, "str")?,
        _ => return unsupported("str", info),
    })
}

fn parse_uuid(s: &str) -> CodecResult<Uuid> {
    Uuid::parse_str(s).map_err(|_| CodecError::out_of_range(format!("{s:?}"), "uuid"))
}

impl Marshal for str {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        str_to_cql(self, info).map(Some)
    }
}

impl Marshal for String {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        str_to_cql(self, info).map(Some)
    }
}

impl Unmarshal for String {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        let Some(value) = value else {
            self.clear();
            return Ok(());
        };
        let text = match value {
            CqlValue::Ascii(b) | CqlValue::Text(b) | CqlValue::Blob(b) => utf8(b, info)?,
            CqlValue::Inet(addr) => addr.to_string(),
            CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => u.to_string(),
            other => match other.as_integer() {
                Some(n) => n.to_string(),
                None => return unsupported("String", info),
            },
        };
        self.clear();
        self.push_str(&text);
        Ok(())
    }
}

/// UTF-8 is only required when the host slot is a Rust string.
fn utf8(b: Vec<u8>, info: &TypeInfo) -> CodecResult<String> {
    String::from_utf8(b).map_err(|e| {
        CodecError::malformed(
            info.cql(),
            format!("invalid utf-8 at byte {}", e.utf8_error().valid_up_to()),
        )
    })
}

/// Parses textual content, reporting the raw bytes when they do not parse.
fn parse_text<T: std::str::FromStr>(b: &[u8], info: &TypeInfo, what: &str) -> CodecResult<T> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            CodecError::malformed(
                info.cql(),
                format!("{:?} is not {what}", String::from_utf8_lossy(b)),
            )
        })
}

fn bytes_to_cql(b: &[u8], info: &TypeInfo) -> CodecResult<CqlValue> {
    match info.cql() {
        CqlType::Blob => Ok(CqlValue::Blob(b.to_vec())),
        CqlType::Ascii => Ok(CqlValue::Ascii(b.to_vec())),
        CqlType::Text => Ok(CqlValue::Text(b.to_vec())),
        _ => unsupported("bytes", info),
    }
}

impl Marshal for [u8] {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        bytes_to_cql(self, info).map(Some)
    }
}

impl Marshal for Vec<u8> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        bytes_to_cql(self, info).map(Some)
    }
}

impl Marshal for Bytes {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        bytes_to_cql(self, info).map(Some)
    }
}

impl Unmarshal for Vec<u8> {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        let bytes = match value {
            None => Vec::new(),
            Some(CqlValue::Blob(b) | CqlValue::Ascii(b) | CqlValue::Text(b)) => b,
            Some(_) => return unsupported("Vec<u8>", info),
        };
        self.clear();
        self.extend_from_slice(&bytes);
        Ok(())
    }
}

// ============================================================================
// Identifiers and addresses
// ============================================================================

impl Marshal for Uuid {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        Ok(Some(match info.cql() {
            CqlType::Uuid => CqlValue::Uuid(*self),
            CqlType::TimeUuid => CqlValue::TimeUuid(*self),
            CqlType::Ascii => CqlValue::Ascii(self.to_string().into_bytes()),
            CqlType::Text => CqlValue::Text(self.to_string().into_bytes()),
            CqlType::Blob => CqlValue::Blob(self.as_bytes().to_vec()),
            _ => return unsupported("Uuid", info),
        }))
    }
}

impl Unmarshal for Uuid {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => Uuid::nil(),
            Some(CqlValue::Uuid(u) | CqlValue::TimeUuid(u)) => u,
            Some(CqlValue::Ascii(s) | CqlValue::Text(s)) => parse_text(&s, info, "a uuid")?,
            Some(CqlValue::Blob(b)) => Uuid::from_slice(&b).map_err(|_| {
                CodecError::malformed(info.cql(), format!("{} bytes is not a uuid", b.len()))
            })?,
            Some(_) => return unsupported("Uuid", info),
        };
        Ok(())
    }
}

impl Marshal for IpAddr {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        Ok(Some(match info.cql() {
            CqlType::Inet => CqlValue::Inet(*self),
            CqlType::Ascii => CqlValue::Ascii(self.to_string().into_bytes()),
            CqlType::Text => CqlValue::Text(self.to_string().into_bytes()),
            _ => return unsupported("IpAddr", info),
        }))
    }
}

impl Unmarshal for IpAddr {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Some(CqlValue::Inet(addr)) => addr,
            Some(CqlValue::Ascii(s) | CqlValue::Text(s)) => parse_text(&s, info, "an address")?,
            Some(_) => return unsupported("IpAddr", info),
        };
        Ok(())
    }
}

// ============================================================================
// Time
// ============================================================================

impl Marshal for DateTime<Utc> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match info.cql() {
            CqlType::Timestamp => Ok(Some(CqlValue::Timestamp(CqlTimestamp(
                self.timestamp_millis(),
            )))),
            CqlType::Date => self.date_naive().to_cql(info),
            _ => unsupported("DateTime<Utc>", info),
        }
    }
}

impl Unmarshal for DateTime<Utc> {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => DateTime::<Utc>::default(),
            Some(CqlValue::Timestamp(CqlTimestamp(ms))) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| CodecError::out_of_range(ms, "DateTime<Utc>"))?,
            Some(CqlValue::Date(date)) => date_from_cql(date)?
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .ok_or_else(|| CodecError::out_of_range(date.0, "DateTime<Utc>"))?,
            Some(_) => return unsupported("DateTime<Utc>", info),
        };
        Ok(())
    }
}

fn date_from_cql(date: CqlDate) -> CodecResult<NaiveDate> {
    i32::try_from(date.days_since_epoch() + UNIX_EPOCH_DAYS_FROM_CE)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| CodecError::out_of_range(date.0, "NaiveDate"))
}

impl Marshal for NaiveDate {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match info.cql() {
            CqlType::Date => {
                let days = i64::from(self.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE;
                let raw = u32::try_from(days + i64::from(CqlDate::EPOCH))
                    .map_err(|_| CodecError::out_of_range(self, info.cql()))?;
                Ok(Some(CqlValue::Date(CqlDate(raw))))
            }
            _ => unsupported("NaiveDate", info),
        }
    }
}

impl Unmarshal for NaiveDate {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => NaiveDate::default(),
            Some(CqlValue::Date(date)) => date_from_cql(date)?,
            Some(CqlValue::Timestamp(CqlTimestamp(ms))) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| CodecError::out_of_range(ms, "NaiveDate"))?
                .date_naive(),
            Some(_) => return unsupported("NaiveDate", info),
        };
        Ok(())
    }
}

impl Marshal for NaiveTime {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match info.cql() {
            CqlType::Time => {
                let nanos = i64::from(self.num_seconds_from_midnight()) * NANOS_PER_SECOND
                    + i64::from(self.nanosecond());
                Ok(Some(CqlValue::Time(CqlTime(nanos))))
            }
            _ => unsupported("NaiveTime", info),
        }
    }
}

impl Unmarshal for NaiveTime {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => NaiveTime::default(),
            Some(CqlValue::Time(CqlTime(nanos))) => {
                let secs = u32::try_from(nanos / NANOS_PER_SECOND).ok();
                let frac = u32::try_from(nanos % NANOS_PER_SECOND).ok();
                secs.zip(frac)
                    .and_then(|(s, n)| NaiveTime::from_num_seconds_from_midnight_opt(s, n))
                    .ok_or_else(|| CodecError::out_of_range(nanos, "NaiveTime"))?
            }
            Some(_) => return unsupported("NaiveTime", info),
        };
        Ok(())
    }
}

impl Marshal for CqlDuration {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match info.cql() {
            CqlType::Duration => Ok(Some(CqlValue::Duration(*self))),
            _ => unsupported("CqlDuration", info),
        }
    }
}

impl Unmarshal for CqlDuration {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => CqlDuration::default(),
            Some(CqlValue::Duration(d)) => d,
            Some(_) => return unsupported("CqlDuration", info),
        };
        Ok(())
    }
}

// ============================================================================
// Arbitrary precision
// ============================================================================

impl Marshal for CqlVarint {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match info.cql() {
            CqlType::Varint => Ok(Some(CqlValue::Varint(self.clone()))),
            CqlType::Decimal => Ok(Some(CqlValue::Decimal(CqlDecimal::new(self.clone(), 0)))),
            _ => {
                let n = self
                    .to_i128()
                    .ok_or_else(|| CodecError::out_of_range(self, info.cql()))?;
                integer_to_cql(n, info, "CqlVarint").map(Some)
            }
        }
    }
}

impl Unmarshal for CqlVarint {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => CqlVarint::from(0i64),
            Some(CqlValue::Varint(v)) => v,
            Some(other) => CqlVarint::from(integer_from_cql(&other, info, "CqlVarint")?),
        };
        Ok(())
    }
}

impl Marshal for CqlDecimal {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match info.cql() {
            CqlType::Decimal => Ok(Some(CqlValue::Decimal(self.clone()))),
            _ => unsupported("CqlDecimal", info),
        }
    }
}

impl Unmarshal for CqlDecimal {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => CqlDecimal::new(0i64, 0),
            Some(CqlValue::Decimal(d)) => d,
            Some(_) => return unsupported("CqlDecimal", info),
        };
        Ok(())
    }
}

impl Marshal for Decimal {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        Ok(Some(match info.cql() {
            CqlType::Decimal => {
                let scale = i32::try_from(self.scale())
                    .map_err(|_| CodecError::out_of_range(self, info.cql()))?;
                CqlValue::Decimal(CqlDecimal::new(self.mantissa(), scale))
            }
            CqlType::Ascii => CqlValue::Ascii(self.to_string().into_bytes()),
            CqlType::Text => CqlValue::Text(self.to_string().into_bytes()),
            _ => return unsupported("Decimal", info),
        }))
    }
}

impl Unmarshal for Decimal {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = match value {
            None => Decimal::ZERO,
            Some(CqlValue::Decimal(d)) => decimal_from_cql(&d)?,
            Some(_) => return unsupported("Decimal", info),
        };
        Ok(())
    }
}

fn decimal_from_cql(d: &CqlDecimal) -> CodecResult<Decimal> {
    let out_of_range = || CodecError::out_of_range(&d.unscaled, "Decimal");
    let mantissa = d.unscaled.to_i128().ok_or_else(out_of_range)?;
    if d.scale >= 0 {
        return Decimal::try_from_i128_with_scale(mantissa, d.scale.unsigned_abs())
            .map_err(|_| out_of_range());
    }
    // A negative scale multiplies the mantissa.
    let factor = 10i128
        .checked_pow(d.scale.unsigned_abs())
        .ok_or_else(out_of_range)?;
    let scaled = mantissa.checked_mul(factor).ok_or_else(out_of_range)?;
    Decimal::try_from_i128_with_scale(scaled, 0).map_err(|_| out_of_range())
}

// ============================================================================
// Dynamic values
// ============================================================================

impl Marshal for CqlValue {
    fn to_cql(&self, _info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        Ok(Some(self.clone()))
    }
}

impl Unmarshal for Option<CqlValue> {
    fn from_cql(&mut self, _info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        *self = value;
        Ok(())
    }
}

/// Always nil; decoding a non-null value into `()` fails.
impl Marshal for () {
    fn to_cql(&self, _info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        Ok(None)
    }
}

impl Unmarshal for () {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        match value {
            None => Ok(()),
            Some(_) => Err(CodecError::nil_target("()", info.cql())),
        }
    }
}

// ============================================================================
// References and options
// ============================================================================

impl<T: Marshal + ?Sized> Marshal for &T {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        (**self).to_cql(info)
    }
}

impl<T: Marshal + ?Sized> Marshal for Box<T> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        (**self).to_cql(info)
    }
}

impl<T: Unmarshal + ?Sized> Unmarshal for Box<T> {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        (**self).from_cql(info, value)
    }
}

impl<T: Marshal> Marshal for Option<T> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        match self {
            Some(value) => value.to_cql(info),
            None => Ok(None),
        }
    }
}

impl<T: Unmarshal + Default> Unmarshal for Option<T> {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        let Some(value) = value else {
            *self = None;
            return Ok(());
        };
        match self {
            Some(slot) => slot.from_cql(info, Some(value)),
            None => {
                let mut slot = T::default();
                slot.from_cql(info, Some(value))?;
                *self = Some(slot);
                Ok(())
            }
        }
    }
}

// ============================================================================
// Collections
// ============================================================================

fn sequence_to_cql<'a, T, I>(items: I, info: &TypeInfo, host: &str) -> CodecResult<Option<CqlValue>>
where
    T: Marshal + 'a,
    I: Iterator<Item = &'a T>,
{
    match info.cql() {
        CqlType::List(element) | CqlType::Set(element) => {
            let inner = info.nested(element);
            let values = items
                .map(|item| item.to_cql(&inner))
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(Some(if matches!(info.cql(), CqlType::Set(_)) {
                CqlValue::Set(values)
            } else {
                CqlValue::List(values)
            }))
        }
        CqlType::Vector { element, .. } => {
            let inner = info.nested(element);
            let values = items
                .map(|item| {
                    item.to_cql(&inner)?
                        .ok_or_else(|| CodecError::nil_target(host, info.cql()))
                })
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(Some(CqlValue::Vector(values)))
        }
        _ => unsupported(host, info),
    }
}

/// Decodes each element of a list, set or vector into a fresh slot.
fn sequence_from_cql<T, F>(
    info: &TypeInfo,
    value: CqlValue,
    host: &str,
    mut push: F,
) -> CodecResult<()>
where
    T: Unmarshal + Default,
    F: FnMut(T),
{
    match (info.cql(), value) {
        (
            CqlType::List(element) | CqlType::Set(element),
            CqlValue::List(items) | CqlValue::Set(items),
        ) => {
            let inner = info.nested(element);
            for item in items {
                let mut slot = T::default();
                slot.from_cql(&inner, item)?;
                push(slot);
            }
            Ok(())
        }
        (CqlType::Vector { element, .. }, CqlValue::Vector(items)) => {
            let inner = info.nested(element);
            for item in items {
                let mut slot = T::default();
                slot.from_cql(&inner, Some(item))?;
                push(slot);
            }
            Ok(())
        }
        _ => unsupported(host, info),
    }
}

impl<T: Marshal> Marshal for [T] {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        sequence_to_cql(self.iter(), info, "slice")
    }
}

impl<T: Marshal> Marshal for Vec<T> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        sequence_to_cql(self.iter(), info, "Vec")
    }
}

impl<T: Unmarshal + Default> Unmarshal for Vec<T> {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        self.clear();
        match value {
            Some(value) => sequence_from_cql(info, value, "Vec", |item| self.push(item)),
            None => Ok(()),
        }
    }
}

impl<T: Marshal, const N: usize> Marshal for [T; N] {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        sequence_to_cql(self.iter(), info, "array")
    }
}

impl<T: Unmarshal + Default, const N: usize> Unmarshal for [T; N] {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        let Some(value) = value else {
            for slot in self.iter_mut() {
                *slot = T::default();
            }
            return Ok(());
        };
        let mut decoded = Vec::with_capacity(N);
        sequence_from_cql(info, value, "array", |item| decoded.push(item))?;
        if decoded.len() != N {
            return Err(CodecError::malformed(
                info.cql(),
                format!("{} elements for an array of {N}", decoded.len()),
            ));
        }
        for (slot, item) in self.iter_mut().zip(decoded) {
            *slot = item;
        }
        Ok(())
    }
}

impl<T: Marshal, S> Marshal for HashSet<T, S> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        sequence_to_cql(self.iter(), info, "HashSet")
    }
}

impl<T, S> Unmarshal for HashSet<T, S>
where
    T: Unmarshal + Default + Eq + Hash,
    S: BuildHasher,
{
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        self.clear();
        match value {
            Some(value) => sequence_from_cql(info, value, "HashSet", |item| {
                self.insert(item);
            }),
            None => Ok(()),
        }
    }
}

impl<T: Marshal> Marshal for BTreeSet<T> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        sequence_to_cql(self.iter(), info, "BTreeSet")
    }
}

impl<T: Unmarshal + Default + Ord> Unmarshal for BTreeSet<T> {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        self.clear();
        match value {
            Some(value) => sequence_from_cql(info, value, "BTreeSet", |item| {
                self.insert(item);
            }),
            None => Ok(()),
        }
    }
}

fn map_to_cql<'a, K, V, I>(entries: I, info: &TypeInfo, host: &str) -> CodecResult<Option<CqlValue>>
where
    K: Marshal + 'a,
    V: Marshal + 'a,
    I: Iterator<Item = (&'a K, &'a V)>,
{
    let CqlType::Map(key_ty, value_ty) = info.cql() else {
        return unsupported(host, info);
    };
    let (key_info, value_info) = (info.nested(key_ty), info.nested(value_ty));
    let entries = entries
        .map(|(k, v)| Ok((k.to_cql(&key_info)?, v.to_cql(&value_info)?)))
        .collect::<CodecResult<Vec<_>>>()?;
    Ok(Some(CqlValue::Map(entries)))
}

fn map_from_cql<K, V, F>(info: &TypeInfo, value: CqlValue, host: &str, mut insert: F) -> CodecResult<()>
where
    K: Unmarshal + Default,
    V: Unmarshal + Default,
    F: FnMut(K, V),
{
    let (CqlType::Map(key_ty, value_ty), CqlValue::Map(entries)) = (info.cql(), value) else {
        return unsupported(host, info);
    };
    let (key_info, value_info) = (info.nested(key_ty), info.nested(value_ty));
    for (k, v) in entries {
        let mut key = K::default();
        key.from_cql(&key_info, k)?;
        let mut value = V::default();
        value.from_cql(&value_info, v)?;
        insert(key, value);
    }
    Ok(())
}

impl<K: Marshal, V: Marshal, S> Marshal for HashMap<K, V, S> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        map_to_cql(self.iter(), info, "HashMap")
    }
}

impl<K, V, S> Unmarshal for HashMap<K, V, S>
where
    K: Unmarshal + Default + Eq + Hash,
    V: Unmarshal + Default,
    S: BuildHasher,
{
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        self.clear();
        match value {
            Some(value) => map_from_cql(info, value, "HashMap", |k, v| {
                self.insert(k, v);
            }),
            None => Ok(()),
        }
    }
}

impl<K: Marshal, V: Marshal> Marshal for BTreeMap<K, V> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        map_to_cql(self.iter(), info, "BTreeMap")
    }
}

impl<K, V> Unmarshal for BTreeMap<K, V>
where
    K: Unmarshal + Default + Ord,
    V: Unmarshal + Default,
{
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        self.clear();
        match value {
            Some(value) => map_from_cql(info, value, "BTreeMap", |k, v| {
                self.insert(k, v);
            }),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Tuples
// ============================================================================

macro_rules! impl_tuple {
    ($arity:literal; $($T:ident $idx:tt),+) => {
        impl<$($T: Marshal),+> Marshal for ($($T,)+) {
            fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
                let CqlType::Tuple(types) = info.cql() else {
                    return unsupported("tuple", info);
                };
                if types.len() < $arity {
                    return Err(CodecError::malformed(
                        info.cql(),
                        format!("{} fields for a tuple of {}", types.len(), $arity),
                    ));
                }
                let mut items = Vec::with_capacity(types.len());
                $(items.push(self.$idx.to_cql(&info.nested(&types[$idx]))?);)+
                items.resize(types.len(), None);
                Ok(Some(CqlValue::Tuple(items)))
            }
        }

        impl<$($T: Unmarshal + Default),+> Unmarshal for ($($T,)+) {
            fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
                let CqlType::Tuple(types) = info.cql() else {
                    return unsupported("tuple", info);
                };
                let mut items = match value {
                    None => Vec::new(),
                    Some(CqlValue::Tuple(items)) => items,
                    Some(_) => return unsupported("tuple", info),
                }
                .into_iter();
                $(
                    match types.get($idx) {
                        Some(ty) => self.$idx.from_cql(&info.nested(ty), items.next().flatten())?,
                        None => self.$idx = $T::default(),
                    }
                )+
                Ok(())
            }
        }
    };
}

impl_tuple!(1; A 0);
impl_tuple!(2; A 0, B 1);
impl_tuple!(3; A 0, B 1, C 2);
impl_tuple!(4; A 0, B 1, C 2, D 3);

// ============================================================================
// User-defined types
// ============================================================================

/// A host record encodable as a UDT, field by field.
pub trait UdtMarshal {
    /// Encodes the field called `name`. Fields the host does not know are
    /// sent as null.
    fn marshal_field(&self, name: &str, info: &TypeInfo) -> CodecResult<Option<CqlValue>>;
}

/// A host record decodable from a UDT, field by field.
pub trait UdtUnmarshal {
    /// Decodes the field called `name`. Unknown names should be ignored.
    fn unmarshal_field(
        &mut self,
        name: &str,
        info: &TypeInfo,
        value: Option<CqlValue>,
    ) -> CodecResult<()>;
}

/// Adapts a [`UdtMarshal`]/[`UdtUnmarshal`] record to the codec traits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Udt<T>(pub T);

impl<T: UdtMarshal> Marshal for Udt<T> {
    fn to_cql(&self, info: &TypeInfo) -> CodecResult<Option<CqlValue>> {
        let CqlType::Udt {
            keyspace,
            name,
            fields: defs,
        } = info.cql()
        else {
            return unsupported("udt", info);
        };
        let fields = defs
            .iter()
            .map(|(field, ty)| Ok((field.clone(), self.0.marshal_field(field, &info.nested(ty))?)))
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Some(CqlValue::Udt {
            keyspace: keyspace.clone(),
            name: name.clone(),
            fields,
        }))
    }
}

impl<T: UdtUnmarshal> Unmarshal for Udt<T> {
    fn from_cql(&mut self, info: &TypeInfo, value: Option<CqlValue>) -> CodecResult<()> {
        let CqlType::Udt { fields: defs, .. } = info.cql() else {
            return unsupported("udt", info);
        };
        let mut values = match value {
            None => Vec::new(),
            Some(CqlValue::Udt { fields, .. }) => fields,
            Some(_) => return unsupported("udt", info),
        };
        for (field, ty) in defs {
            let value = values
                .iter()
                .position(|(name, _)| name == field)
                .and_then(|i| values.swap_remove(i).1);
            self.0.unmarshal_field(field, &info.nested(ty), value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_types::ProtocolVersion;

    fn info(cql: CqlType) -> TypeInfo {
        TypeInfo::new(cql, ProtocolVersion::V4)
    }

    #[test]
    fn string_decode_reuses_buffer() {
        let mut out = String::with_capacity(64);
        let ptr = out.as_ptr();
        unmarshal(&info(CqlType::Text), b"hello", &mut out).unwrap();
        assert_eq!(out, "hello");
        assert_eq!(out.as_ptr(), ptr);
    }

    #[test_case::test_case(CqlType::Text ; "text")]
    #[test_case::test_case(CqlType::Ascii ; "ascii")]
    fn textual_columns_carry_raw_bytes(cql: CqlType) {
        let raw = vec![0xffu8, 0xfe];
        let wire = marshal(&info(cql.clone()), &raw).unwrap().unwrap();
        assert_eq!(&wire[..], &raw[..]);

        let mut out: Vec<u8> = Vec::new();
        unmarshal(&info(cql.clone()), &wire, &mut out).unwrap();
        assert_eq!(out, raw);

        let mut s = String::new();
        let err = unmarshal(&info(cql), &wire, &mut s).unwrap_err();
        assert!(matches!(err, CodecError::MalformedData { .. }));
    }

    #[test]
    fn option_decode_writes_through_existing_value() {
        let mut out = Some(String::with_capacity(32));
        let ptr = out.as_ref().unwrap().as_ptr();
        unmarshal(&info(CqlType::Text), b"abc", &mut out).unwrap();
        assert_eq!(out.as_deref(), Some("abc"));
        assert_eq!(out.as_ref().unwrap().as_ptr(), ptr);
    }

    #[test]
    fn nil_option_is_null() {
        let value: Option<i32> = None;
        assert_eq!(marshal(&info(CqlType::Int), &value).unwrap(), None);
    }

    #[test]
    fn empty_body_zeroes_integer() {
        let mut out = 42i32;
        unmarshal(&info(CqlType::Int), &[], &mut out).unwrap();
        assert_eq!(out, 0);
    }

    #[test]
    fn tinyint_rejects_wide_values() {
        let err = marshal(&info(CqlType::TinyInt), &300i32).unwrap_err();
        assert!(matches!(err, CodecError::OutOfRange { .. }));
        let err = marshal(&info(CqlType::TinyInt), "200").unwrap_err();
        assert!(matches!(err, CodecError::OutOfRange { .. }));
        let ok = marshal(&info(CqlType::TinyInt), "-7").unwrap().unwrap();
        assert_eq!(&ok[..], &[0xF9]);
    }

    #[test]
    fn narrowing_decode_is_range_checked() {
        let wire = marshal(&info(CqlType::BigInt), &(i64::from(i32::MAX) + 1))
            .unwrap()
            .unwrap();
        let mut out = 0i32;
        let err = unmarshal(&info(CqlType::BigInt), &wire, &mut out).unwrap_err();
        assert!(matches!(err, CodecError::OutOfRange { .. }));
    }

    #[test]
    fn sign_extends_narrow_wire_values() {
        let mut out = 0i64;
        unmarshal(&info(CqlType::TinyInt), &[0xFF], &mut out).unwrap();
        assert_eq!(out, -1);
    }

    #[test]
    fn unit_rejects_values() {
        let err = unmarshal(&info(CqlType::Int), &[0, 0, 0, 1], &mut ()).unwrap_err();
        assert!(matches!(err, CodecError::NilTarget { .. }));
    }

    #[test]
    fn array_length_must_match_vector() {
        let ty = info(CqlType::vector(CqlType::Float, 3));
        let wire = marshal(&ty, &[1.0f32, 2.0, 3.0]).unwrap().unwrap();
        let mut short = [0f32; 2];
        let err = unmarshal(&ty, &wire, &mut short).unwrap_err();
        assert!(matches!(err, CodecError::MalformedData { .. }));
        let mut exact = [0f32; 3];
        unmarshal(&ty, &wire, &mut exact).unwrap();
        assert_eq!(exact, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn decimal_negative_scale() {
        let d = CqlDecimal::new(12i64, -2);
        assert_eq!(decimal_from_cql(&d).unwrap(), Decimal::from(1200));
    }

    #[test]
    fn double_narrows_only_when_exact() {
        assert!(marshal(&info(CqlType::Float), &0.5f64).is_ok());
        let err = marshal(&info(CqlType::Float), &0.1f64).unwrap_err();
        assert!(matches!(err, CodecError::OutOfRange { .. }));
    }
}
