//! The `tablets-routing-v1` custom payload.
//!
//! A server that routed a request to a non-owning replica attaches the
//! correct tablet to the response under this key. The value is a
//! `tuple<bigint, bigint, list<tuple<uuid, int>>>` holding the first
//! token, the last token and the `(host, shard)` replica list.

use bytes::Bytes;
use tabula_codec::{CqlType, TypeInfo, marshal, unmarshal};
use tabula_types::{HostId, ProtocolVersion, Replica, ShardId, Token};
use uuid::Uuid;

use crate::error::{DirectoryError, DirectoryResult};
use crate::tablet::Tablet;

/// Custom payload key carrying a tablet.
pub const TABLETS_ROUTING_V1: &str = "tablets-routing-v1";

type WireTablet = (i64, i64, Vec<(Uuid, i32)>);

/// The payload's CQL type.
pub fn tablet_payload_type() -> CqlType {
    CqlType::Tuple(vec![
        CqlType::BigInt,
        CqlType::BigInt,
        CqlType::list(CqlType::Tuple(vec![CqlType::Uuid, CqlType::Int])),
    ])
}

/// Decodes a `tablets-routing-v1` value into a tablet.
pub fn decode_tablet_payload(version: ProtocolVersion, data: &[u8]) -> DirectoryResult<Tablet> {
    let info = TypeInfo::new(tablet_payload_type(), version);
    let mut wire = WireTablet::default();
    unmarshal(&info, data, &mut wire)?;

    let (first, last, replicas) = wire;
    let replicas = replicas
        .into_iter()
        .map(|(host, shard)| {
            let shard = u32::try_from(shard).map_err(|_| DirectoryError::InvalidShard(shard))?;
            Ok(Replica::new(HostId::new(host), ShardId::new(shard)))
        })
        .collect::<DirectoryResult<Vec<_>>>()?;

    Tablet::new(Token::new(first), Token::new(last), replicas)
}

/// Encodes a tablet as a `tablets-routing-v1` value.
pub fn encode_tablet_payload(version: ProtocolVersion, tablet: &Tablet) -> DirectoryResult<Bytes> {
    let info = TypeInfo::new(tablet_payload_type(), version);
    let replicas = tablet
        .replicas()
        .iter()
        .map(|r| {
            let shard = r.shard().as_u32();
            let shard =
                i32::try_from(shard).map_err(|_| DirectoryError::InvalidShard(shard as i32))?;
            Ok((r.host_id().as_uuid(), shard))
        })
        .collect::<DirectoryResult<Vec<_>>>()?;
    let wire: WireTablet = (
        tablet.first_token().value(),
        tablet.last_token().value(),
        replicas,
    );
    Ok(marshal(&info, &wire)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_codec::CodecError;

    fn host(n: u8) -> HostId {
        HostId::from_bytes([n; 16])
    }

    #[test]
    fn payload_decodes_to_tablet() {
        let tablet = Tablet::new(
            Token::new(-100),
            Token::new(250),
            vec![
                Replica::new(host(1), ShardId::new(0)),
                Replica::new(host(2), ShardId::new(7)),
            ],
        )
        .unwrap();
        let bytes = encode_tablet_payload(ProtocolVersion::V4, &tablet).unwrap();
        let decoded = decode_tablet_payload(ProtocolVersion::V4, &bytes).unwrap();
        assert_eq!(decoded, tablet);
    }

    #[test]
    fn wire_layout_is_a_three_field_tuple() {
        let tablet = Tablet::new(Token::new(1), Token::new(2), Vec::new()).unwrap();
        let bytes = encode_tablet_payload(ProtocolVersion::V4, &tablet).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&8i32.to_be_bytes());
        expected.extend_from_slice(&1i64.to_be_bytes());
        expected.extend_from_slice(&8i32.to_be_bytes());
        expected.extend_from_slice(&2i64.to_be_bytes());
        expected.extend_from_slice(&4i32.to_be_bytes());
        expected.extend_from_slice(&0i32.to_be_bytes());
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn negative_shard_is_rejected() {
        let info = TypeInfo::new(tablet_payload_type(), ProtocolVersion::V4);
        let wire: WireTablet = (0, 10, vec![(Uuid::from_bytes([3; 16]), -1)]);
        let bytes = marshal(&info, &wire).unwrap().unwrap();
        let err = decode_tablet_payload(ProtocolVersion::V4, &bytes).unwrap_err();
        assert_eq!(err, DirectoryError::InvalidShard(-1));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let info = TypeInfo::new(tablet_payload_type(), ProtocolVersion::V4);
        let wire: WireTablet = (10, 10, Vec::new());
        let bytes = marshal(&info, &wire).unwrap().unwrap();
        assert!(matches!(
            decode_tablet_payload(ProtocolVersion::V4, &bytes),
            Err(DirectoryError::InvalidRange { .. })
        ));
    }

    #[test]
    fn truncated_payload_is_a_codec_error() {
        let err = decode_tablet_payload(ProtocolVersion::V4, &[0, 0, 0, 8, 1]).unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::Payload(
                CodecError::TruncatedData { .. } | CodecError::MalformedData { .. }
            )
        ));
    }
}
