//! Wire encoding of CQL values.
//!
//! This is the codec registry: one dispatch keyed by [`CqlType`], shared by
//! every host type. Host conversions in [`crate::host`] only translate to
//! and from [`CqlValue`]; byte layouts live here.
//!
//! # Layouts
//!
//! - Fixed-width scalars are big-endian; `boolean` is one byte.
//! - `varint` is minimal two's complement; `decimal` is `be32(scale) ‖ varint`.
//! - `duration` is three zig-zag vints (months, days, nanoseconds).
//! - `list`/`set`/`map` are `be32(count)` followed by `[bytes]` elements.
//! - `tuple`/`udt` are `[bytes]` fields in declared order, no count.
//! - `vector<T, n>` is `n` raw fixed-width elements.
//!
//! `[bytes]` is `be32(len) ‖ body`, with `len = -1` for null.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, Bytes, BytesMut};
use tabula_types::ProtocolVersion;
use uuid::Uuid;

use crate::error::{CodecError, CodecResult};
use crate::types::{CqlType, TypeInfo};
use crate::value::{CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlValue, CqlVarint};

/// Encodes a non-null value.
pub fn encode_value(info: &TypeInfo, value: &CqlValue) -> CodecResult<Bytes> {
    let mut buf = BytesMut::new();
    encode_into(info.cql(), info.version(), value, &mut buf)?;
    Ok(buf.freeze())
}

/// Decodes a value body.
///
/// An empty body decodes to `None` except for `ascii`, `text` and `blob`,
/// where it is the empty value.
pub fn decode_value(info: &TypeInfo, data: &[u8]) -> CodecResult<Option<CqlValue>> {
    decode(info.cql(), info.version(), data)
}

/// Appends `[bytes]`: a signed length followed by the body, or `-1`.
pub fn write_bytes(body: Option<&[u8]>, buf: &mut BytesMut) -> CodecResult<()> {
    match body {
        None => buf.put_i32(-1),
        Some(body) => {
            let len = i32::try_from(body.len())
                .map_err(|_| CodecError::out_of_range(body.len(), "[bytes] length"))?;
            buf.put_i32(len);
            buf.put_slice(body);
        }
    }
    Ok(())
}

fn encode_into(
    ty: &CqlType,
    version: ProtocolVersion,
    value: &CqlValue,
    buf: &mut BytesMut,
) -> CodecResult<()> {
    match (ty, value) {
        (CqlType::Ascii | CqlType::Text, CqlValue::Ascii(s) | CqlValue::Text(s)) => {
            buf.put_slice(s);
        }
        (CqlType::Blob, CqlValue::Blob(b)) => buf.put_slice(b),
        (CqlType::Boolean, CqlValue::Boolean(b)) => buf.put_u8(u8::from(*b)),
        (CqlType::TinyInt, CqlValue::TinyInt(v)) => buf.put_i8(*v),
        (CqlType::SmallInt, CqlValue::SmallInt(v)) => buf.put_i16(*v),
        (CqlType::Int, CqlValue::Int(v)) => buf.put_i32(*v),
        (CqlType::BigInt | CqlType::Counter, CqlValue::BigInt(v) | CqlValue::Counter(v)) => {
            buf.put_i64(*v);
        }
        (CqlType::Float, CqlValue::Float(v)) => buf.put_f32(*v),
        (CqlType::Double, CqlValue::Double(v)) => buf.put_f64(*v),
        (CqlType::Varint, CqlValue::Varint(v)) => buf.put_slice(v.as_signed_bytes_be()),
        (CqlType::Decimal, CqlValue::Decimal(d)) => {
            buf.put_i32(d.scale);
            buf.put_slice(d.unscaled.as_signed_bytes_be());
        }
        (CqlType::Timestamp, CqlValue::Timestamp(CqlTimestamp(ms))) => buf.put_i64(*ms),
        (CqlType::Date, CqlValue::Date(CqlDate(days))) => buf.put_u32(*days),
        (CqlType::Time, CqlValue::Time(CqlTime(nanos))) => {
            if !(0..=CqlTime::MAX_NANOS).contains(nanos) {
                return Err(CodecError::out_of_range(nanos, ty));
            }
            buf.put_i64(*nanos);
        }
        (CqlType::Uuid, CqlValue::Uuid(u) | CqlValue::TimeUuid(u)) => buf.put_slice(u.as_bytes()),
        (CqlType::TimeUuid, CqlValue::Uuid(u) | CqlValue::TimeUuid(u)) => {
            if u.get_version_num() != 1 {
                return Err(CodecError::malformed(ty, format!("{u} is not a time-based uuid")));
            }
            buf.put_slice(u.as_bytes());
        }
        (CqlType::Inet, CqlValue::Inet(addr)) => match addr {
            IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
            IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
        },
        (CqlType::Duration, CqlValue::Duration(d)) => {
            if !version.supports_duration() {
                return Err(CodecError::unsupported(
                    "duration",
                    format!("{ty} at protocol {version}"),
                ));
            }
            put_vint(buf, i64::from(d.months));
            put_vint(buf, i64::from(d.days));
            put_vint(buf, d.nanoseconds);
        }
        (
            CqlType::List(element) | CqlType::Set(element),
            CqlValue::List(items) | CqlValue::Set(items),
        ) => {
            put_count(buf, items.len(), ty)?;
            for item in items {
                encode_element(element, version, item.as_ref(), buf)?;
            }
        }
        (CqlType::Map(key_ty, value_ty), CqlValue::Map(entries)) => {
            put_count(buf, entries.len(), ty)?;
            for (key, value) in entries {
                encode_element(key_ty, version, key.as_ref(), buf)?;
                encode_element(value_ty, version, value.as_ref(), buf)?;
            }
        }
        (CqlType::Tuple(types), CqlValue::Tuple(items)) => {
            if items.len() > types.len() {
                return Err(CodecError::malformed(
                    ty,
                    format!("{} values for {} fields", items.len(), types.len()),
                ));
            }
            for (i, field_ty) in types.iter().enumerate() {
                let item = items.get(i).and_then(Option::as_ref);
                encode_element(field_ty, version, item, buf)?;
            }
        }
        (CqlType::Udt { fields: defs, .. }, CqlValue::Udt { fields: values, .. }) => {
            if let Some((unknown, _)) = values
                .iter()
                .find(|(name, _)| !defs.iter().any(|(def, _)| def == name))
            {
                return Err(CodecError::malformed(ty, format!("unknown field {unknown}")));
            }
            for (name, field_ty) in defs {
                let item = values
                    .iter()
                    .find(|(field, _)| field == name)
                    .and_then(|(_, v)| v.as_ref());
                encode_element(field_ty, version, item, buf)?;
            }
        }
        (CqlType::Vector { element, dimension }, CqlValue::Vector(items)) => {
            if element.fixed_width().is_none() {
                return Err(CodecError::unsupported(element, ty));
            }
            if items.len() != *dimension {
                return Err(CodecError::malformed(
                    ty,
                    format!("{} elements for dimension {dimension}", items.len()),
                ));
            }
            for item in items {
                encode_into(element, version, item, buf)?;
            }
        }
        _ => return Err(CodecError::unsupported(value.kind(), ty)),
    }
    Ok(())
}

fn put_count(buf: &mut BytesMut, len: usize, ty: &CqlType) -> CodecResult<()> {
    let count = i32::try_from(len).map_err(|_| CodecError::out_of_range(len, ty))?;
    buf.put_i32(count);
    Ok(())
}

/// Writes one `[bytes]` element, encoding in place and backfilling the length.
fn encode_element(
    ty: &CqlType,
    version: ProtocolVersion,
    value: Option<&CqlValue>,
    buf: &mut BytesMut,
) -> CodecResult<()> {
    let Some(value) = value else {
        buf.put_i32(-1);
        return Ok(());
    };
    let start = buf.len();
    buf.put_i32(0);
    encode_into(ty, version, value, buf)?;
    let written = buf.len() - start - 4;
    let len = i32::try_from(written).map_err(|_| CodecError::out_of_range(written, ty))?;
    buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn decode(ty: &CqlType, version: ProtocolVersion, data: &[u8]) -> CodecResult<Option<CqlValue>> {
    if data.is_empty() {
        return Ok(match ty {
            CqlType::Ascii => Some(CqlValue::Ascii(Vec::new())),
            CqlType::Text => Some(CqlValue::Text(Vec::new())),
            CqlType::Blob => Some(CqlValue::Blob(Vec::new())),
            _ => None,
        });
    }

    let value = match ty {
        CqlType::Ascii => CqlValue::Ascii(data.to_vec()),
        CqlType::Text => CqlValue::Text(data.to_vec()),
        CqlType::Blob => CqlValue::Blob(data.to_vec()),
        CqlType::Boolean => CqlValue::Boolean(fixed::<1>(ty, data)?[0] != 0),
        CqlType::TinyInt => CqlValue::TinyInt(i8::from_be_bytes(fixed(ty, data)?)),
        CqlType::SmallInt => CqlValue::SmallInt(i16::from_be_bytes(fixed(ty, data)?)),
        CqlType::Int => CqlValue::Int(i32::from_be_bytes(fixed(ty, data)?)),
        CqlType::BigInt => CqlValue::BigInt(i64::from_be_bytes(fixed(ty, data)?)),
        CqlType::Counter => CqlValue::Counter(i64::from_be_bytes(fixed(ty, data)?)),
        CqlType::Float => CqlValue::Float(f32::from_be_bytes(fixed(ty, data)?)),
        CqlType::Double => CqlValue::Double(f64::from_be_bytes(fixed(ty, data)?)),
        CqlType::Varint => CqlValue::Varint(CqlVarint::from_signed_bytes_be(data)),
        CqlType::Decimal => {
            if data.len() < 4 {
                return Err(CodecError::truncated(ty, 4, data.len()));
            }
            let (scale, unscaled) = data.split_at(4);
            if unscaled.is_empty() {
                return Err(CodecError::malformed(ty, "missing unscaled value"));
            }
            let scale = i32::from_be_bytes([scale[0], scale[1], scale[2], scale[3]]);
            CqlValue::Decimal(CqlDecimal {
                unscaled: CqlVarint::from_signed_bytes_be(unscaled),
                scale,
            })
        }
        CqlType::Timestamp => {
            CqlValue::Timestamp(CqlTimestamp(i64::from_be_bytes(fixed(ty, data)?)))
        }
        CqlType::Date => CqlValue::Date(CqlDate(u32::from_be_bytes(fixed(ty, data)?))),
        CqlType::Time => {
            let nanos = i64::from_be_bytes(fixed(ty, data)?);
            if !(0..=CqlTime::MAX_NANOS).contains(&nanos) {
                return Err(CodecError::malformed(ty, format!("{nanos} is not a time of day")));
            }
            CqlValue::Time(CqlTime(nanos))
        }
        CqlType::Uuid => CqlValue::Uuid(Uuid::from_bytes(fixed(ty, data)?)),
        CqlType::TimeUuid => CqlValue::TimeUuid(Uuid::from_bytes(fixed(ty, data)?)),
        CqlType::Inet => match data.len() {
            4 => CqlValue::Inet(IpAddr::V4(Ipv4Addr::from(fixed::<4>(ty, data)?))),
            16 => CqlValue::Inet(IpAddr::V6(Ipv6Addr::from(fixed::<16>(ty, data)?))),
            n => {
                return Err(CodecError::malformed(ty, format!("invalid address length {n}")));
            }
        },
        CqlType::Duration => {
            if !version.supports_duration() {
                return Err(CodecError::unsupported(
                    "duration",
                    format!("{ty} at protocol {version}"),
                ));
            }
            CqlValue::Duration(decode_duration(ty, data)?)
        }
        CqlType::List(element) | CqlType::Set(element) => {
            let mut reader = Reader::new(ty, data);
            let count = reader.read_count()?;
            let mut items = Vec::with_capacity(count.min(data.len() / 4));
            for _ in 0..count {
                items.push(reader.read_element(element, version)?);
            }
            reader.finish()?;
            if matches!(ty, CqlType::Set(_)) {
                CqlValue::Set(items)
            } else {
                CqlValue::List(items)
            }
        }
        CqlType::Map(key_ty, value_ty) => {
            let mut reader = Reader::new(ty, data);
            let count = reader.read_count()?;
            let mut entries = Vec::with_capacity(count.min(data.len() / 8));
            for _ in 0..count {
                let key = reader.read_element(key_ty, version)?;
                let value = reader.read_element(value_ty, version)?;
                entries.push((key, value));
            }
            reader.finish()?;
            CqlValue::Map(entries)
        }
        CqlType::Tuple(types) => {
            let mut reader = Reader::new(ty, data);
            let mut items = Vec::with_capacity(types.len());
            for field_ty in types {
                // Fields missing from the wire decode as null.
                if reader.is_empty() {
                    items.push(None);
                } else {
                    items.push(reader.read_element(field_ty, version)?);
                }
            }
            CqlValue::Tuple(items)
        }
        CqlType::Udt {
            keyspace,
            name,
            fields: defs,
        } => {
            let mut reader = Reader::new(ty, data);
            let mut fields = Vec::with_capacity(defs.len());
            for (field, field_ty) in defs {
                let value = if reader.is_empty() {
                    None
                } else {
                    reader.read_element(field_ty, version)?
                };
                fields.push((field.clone(), value));
            }
            // Fields added to the type after this schema was read are ignored.
            CqlValue::Udt {
                keyspace: keyspace.clone(),
                name: name.clone(),
                fields,
            }
        }
        CqlType::Vector { element, dimension } => {
            let width = element
                .fixed_width()
                .ok_or_else(|| CodecError::unsupported(element.as_ref(), ty))?;
            let expected = dimension
                .checked_mul(width)
                .ok_or_else(|| CodecError::malformed(ty, "dimension overflows"))?;
            if data.len() < expected {
                return Err(CodecError::truncated(ty, expected, data.len()));
            }
            if data.len() > expected {
                return Err(CodecError::malformed(
                    ty,
                    format!("expected {expected} bytes, got {}", data.len()),
                ));
            }
            let mut items = Vec::with_capacity(*dimension);
            for chunk in data.chunks_exact(width) {
                let item = decode(element, version, chunk)?
                    .ok_or_else(|| CodecError::malformed(ty, "empty vector element"))?;
                items.push(item);
            }
            CqlValue::Vector(items)
        }
        CqlType::Custom(_) => return Err(CodecError::unsupported("bytes", ty)),
    };
    Ok(Some(value))
}

fn fixed<const N: usize>(ty: &CqlType, data: &[u8]) -> CodecResult<[u8; N]> {
    if data.len() < N {
        return Err(CodecError::truncated(ty, N, data.len()));
    }
    data.try_into().map_err(|_| {
        CodecError::malformed(ty, format!("expected {N} bytes, got {}", data.len()))
    })
}

/// Cursor over the body of a composite value.
struct Reader<'a> {
    ty: &'a CqlType,
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(ty: &'a CqlType, data: &'a [u8]) -> Self {
        Self { ty, data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn read_i32(&mut self) -> CodecResult<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_count(&mut self) -> CodecResult<usize> {
        let count = self.read_i32()?;
        usize::try_from(count)
            .map_err(|_| CodecError::malformed(self.ty, format!("negative count {count}")))
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.data.len() < n {
            return Err(CodecError::truncated(self.ty, n, self.data.len()));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn read_element(
        &mut self,
        ty: &CqlType,
        version: ProtocolVersion,
    ) -> CodecResult<Option<CqlValue>> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| CodecError::malformed(self.ty, format!("invalid element length {len}")))?;
        let body = self.take(len)?;
        decode(ty, version, body)
    }

    fn finish(&self) -> CodecResult<()> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(CodecError::malformed(
                self.ty,
                format!("{} trailing bytes", self.data.len()),
            ))
        }
    }
}

// ============================================================================
// Variable-length integers (duration components)
// ============================================================================

fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Encoded size of an unsigned vint: the count of leading one bits in the
/// first byte gives the number of extra bytes.
fn unsigned_vint_size(v: u64) -> usize {
    let magnitude = (v | 1).leading_zeros() as usize;
    (639 - magnitude * 9) >> 6
}

fn put_vint(buf: &mut BytesMut, value: i64) {
    let v = zigzag(value);
    let size = unsigned_vint_size(v);
    if size == 1 {
        buf.put_u8(v as u8);
        return;
    }
    let bytes = v.to_be_bytes();
    if size == 9 {
        buf.put_u8(0xFF);
        buf.put_slice(&bytes);
        return;
    }
    let extra = size - 1;
    let mut out = [0u8; 8];
    out[..size].copy_from_slice(&bytes[8 - size..]);
    out[0] |= !(0xFFu8 >> extra);
    buf.put_slice(&out[..size]);
}

fn get_vint(ty: &CqlType, data: &[u8], pos: &mut usize) -> CodecResult<i64> {
    let first = *data
        .get(*pos)
        .ok_or_else(|| CodecError::truncated(ty, *pos + 1, data.len()))?;
    *pos += 1;
    let extra = first.leading_ones() as usize;
    if *pos + extra > data.len() {
        return Err(CodecError::truncated(ty, *pos + extra, data.len()));
    }
    let mut value = if extra >= 8 {
        0
    } else {
        u64::from(first & (0xFF >> extra))
    };
    for &b in &data[*pos..*pos + extra] {
        value = (value << 8) | u64::from(b);
    }
    *pos += extra;
    Ok(unzigzag(value))
}

fn decode_duration(ty: &CqlType, data: &[u8]) -> CodecResult<CqlDuration> {
    let mut pos = 0;
    let months = get_vint(ty, data, &mut pos)?;
    let days = get_vint(ty, data, &mut pos)?;
    let nanoseconds = get_vint(ty, data, &mut pos)?;
    if pos != data.len() {
        return Err(CodecError::malformed(
            ty,
            format!("{} trailing bytes", data.len() - pos),
        ));
    }
    let months = i32::try_from(months)
        .map_err(|_| CodecError::malformed(ty, format!("months {months} overflow int")))?;
    let days = i32::try_from(days)
        .map_err(|_| CodecError::malformed(ty, format!("days {days} overflow int")))?;
    Ok(CqlDuration {
        months,
        days,
        nanoseconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn info(cql: CqlType) -> TypeInfo {
        TypeInfo::new(cql, ProtocolVersion::V4)
    }

    #[test_case(0, &[0x00])]
    #[test_case(-1, &[0x01])]
    #[test_case(1, &[0x02])]
    #[test_case(63, &[0x7E])]
    #[test_case(64, &[0x80, 0x80])]
    fn vint_layout(value: i64, expected: &[u8]) {
        let mut buf = BytesMut::new();
        put_vint(&mut buf, value);
        assert_eq!(&buf[..], expected);
    }

    #[test_case(i64::MAX)]
    #[test_case(i64::MIN)]
    #[test_case(1 << 40)]
    #[test_case(-(1 << 20))]
    fn vint_extremes_roundtrip(value: i64) {
        let mut buf = BytesMut::new();
        put_vint(&mut buf, value);
        let mut pos = 0;
        assert_eq!(get_vint(&CqlType::Duration, &buf, &mut pos).unwrap(), value);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn duration_rejects_trailing_bytes() {
        let err = decode_value(&info(CqlType::Duration), &[0x02, 0x02, 0x02, 0x00]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedData { .. }));
    }

    #[test]
    fn duration_rejects_truncated_nanoseconds() {
        // months=1, days=1, nanoseconds announces one extra byte that is missing
        let err = decode_value(&info(CqlType::Duration), &[0x02, 0x02, 0x80]).unwrap_err();
        assert!(matches!(err, CodecError::TruncatedData { .. }));
    }

    #[test]
    fn duration_is_rejected_on_v3() {
        let info = TypeInfo::new(CqlType::Duration, ProtocolVersion::V3);
        let value = CqlValue::Duration(CqlDuration::default());
        assert!(matches!(
            encode_value(&info, &value),
            Err(CodecError::UnsupportedType { .. })
        ));
    }

    #[test_case(3)]
    #[test_case(5)]
    #[test_case(17)]
    fn inet_rejects_odd_lengths(len: usize) {
        let err = decode_value(&info(CqlType::Inet), &vec![1; len]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedData { .. }));
    }

    #[test]
    fn list_layout_has_count_and_lengths() {
        let value = CqlValue::List(vec![Some(CqlValue::Int(1)), None]);
        let bytes = encode_value(&info(CqlType::list(CqlType::Int)), &value).unwrap();
        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 2, 0, 0, 0, 4, 0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn tuple_null_pads_short_input() {
        let ty = CqlType::Tuple(vec![CqlType::Int, CqlType::Text, CqlType::Boolean]);
        let wire = [0, 0, 0, 4, 0, 0, 0, 9];
        let value = decode_value(&info(ty), &wire).unwrap().unwrap();
        assert_eq!(value, CqlValue::Tuple(vec![Some(CqlValue::Int(9)), None, None]));
    }

    #[test]
    fn udt_ignores_extra_wire_fields() {
        let ty = CqlType::Udt {
            keyspace: "ks".into(),
            name: "point".into(),
            fields: vec![("x".into(), CqlType::Int)],
        };
        let wire = [0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0, 2];
        let value = decode_value(&info(ty), &wire).unwrap().unwrap();
        let CqlValue::Udt { fields, .. } = value else {
            panic!("expected udt");
        };
        assert_eq!(fields, vec![("x".to_string(), Some(CqlValue::Int(1)))]);
    }

    #[test]
    fn vector_of_floats_is_raw() {
        let ty = CqlType::vector(CqlType::Float, 2);
        let value = CqlValue::Vector(vec![CqlValue::Float(1.0), CqlValue::Float(-2.5)]);
        let bytes = encode_value(&info(ty.clone()), &value).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_be_bytes());

        let err = decode_value(&info(ty.clone()), &bytes[..7]).unwrap_err();
        assert!(matches!(err, CodecError::TruncatedData { .. }));
        let mut long = bytes.to_vec();
        long.push(0);
        let err = decode_value(&info(ty), &long).unwrap_err();
        assert!(matches!(err, CodecError::MalformedData { .. }));
    }

    #[test]
    fn vector_of_text_is_unsupported() {
        let ty = CqlType::vector(CqlType::Text, 1);
        let value = CqlValue::Vector(vec![CqlValue::Text("a".into())]);
        assert!(matches!(
            encode_value(&info(ty), &value),
            Err(CodecError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn negative_collection_count_is_malformed() {
        let err = decode_value(&info(CqlType::list(CqlType::Int)), &[0xFF, 0xFF, 0xFF, 0xFE])
            .unwrap_err();
        assert!(matches!(err, CodecError::MalformedData { .. }));
    }

    #[test]
    fn huge_collection_count_does_not_allocate() {
        let err = decode_value(&info(CqlType::list(CqlType::Int)), &[0x7F, 0xFF, 0xFF, 0xFF])
            .unwrap_err();
        assert!(matches!(err, CodecError::TruncatedData { .. }));
    }

    #[test]
    fn empty_body_is_nil_for_scalars_and_empty_for_strings() {
        assert_eq!(decode_value(&info(CqlType::Int), &[]).unwrap(), None);
        assert_eq!(
            decode_value(&info(CqlType::Text), &[]).unwrap(),
            Some(CqlValue::Text(Vec::new()))
        );
    }

    #[test]
    fn timeuuid_requires_version_one() {
        let random = Uuid::from_bytes([0x42; 16]);
        let err = encode_value(&info(CqlType::TimeUuid), &CqlValue::TimeUuid(random)).unwrap_err();
        assert!(matches!(err, CodecError::MalformedData { .. }));
    }

    #[test]
    fn mismatched_value_is_unsupported() {
        let err = encode_value(&info(CqlType::Int), &CqlValue::Text("1".into())).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedType { .. }));
    }
}
