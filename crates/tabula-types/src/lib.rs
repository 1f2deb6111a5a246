//! # tabula-types: Core types for `Tabula`
//!
//! This crate contains the small value types shared by every layer of the
//! driver:
//! - Topology identifiers ([`HostId`], [`ShardId`], [`Replica`])
//! - Partitioning ([`Token`])
//! - Schema addressing ([`TableName`])
//! - Protocol negotiation ([`ProtocolVersion`], [`Consistency`])

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Topology identifiers - All Copy
// ============================================================================

/// Opaque 16-byte identifier of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(Uuid);

impl HostId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for HostId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<HostId> for Uuid {
    fn from(id: HostId) -> Self {
        id.0
    }
}

/// Index of a CPU shard on a node. Non-negative by construction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ShardId(u32);

impl ShardId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ShardId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<ShardId> for u32 {
    fn from(id: ShardId) -> Self {
        id.0
    }
}

/// A (host, shard) pair that stores a copy of a tablet.
///
/// Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replica {
    host_id: HostId,
    shard: ShardId,
}

impl Replica {
    pub fn new(host_id: HostId, shard: ShardId) -> Self {
        Self { host_id, shard }
    }

    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }
}

impl Display for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host_id, self.shard)
    }
}

// ============================================================================
// Partitioning
// ============================================================================

/// Signed 64-bit hash of a partition key.
///
/// Tokens order the ring; tablets own half-open ranges `(first, last]`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Token(i64);

impl Token {
    pub const MIN: Token = Token(i64::MIN);
    pub const MAX: Token = Token(i64::MAX);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Token {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Token> for i64 {
    fn from(token: Token) -> Self {
        token.0
    }
}

// ============================================================================
// Schema addressing
// ============================================================================

/// A fully qualified `(keyspace, table)` pair.
///
/// Displays as `keyspace:table`, the key format of the routing table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    keyspace: String,
    table: String,
}

impl TableName {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.keyspace, self.table)
    }
}

// ============================================================================
// Protocol negotiation
// ============================================================================

/// Native protocol version negotiated for a connection.
///
/// Versions below 3 use 1-byte stream ids and 2-byte collection lengths,
/// neither of which this driver speaks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ProtocolVersion {
    V3,
    #[default]
    V4,
    V5,
}

impl ProtocolVersion {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::V3 => 3,
            Self::V4 => 4,
            Self::V5 => 5,
        }
    }

    /// Returns true if the `duration` type exists at this version.
    pub const fn supports_duration(self) -> bool {
        !matches!(self, Self::V3)
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// Error returned when a protocol version byte is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported protocol version: {0}")]
pub struct UnsupportedVersion(pub u8);

impl TryFrom<u8> for ProtocolVersion {
    type Error = UnsupportedVersion;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        // The response direction bit is not part of the version.
        match value & 0x7F {
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            5 => Ok(Self::V5),
            other => Err(UnsupportedVersion(other)),
        }
    }
}

/// Consistency level sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    #[default]
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl Consistency {
    /// Wire code of this consistency level.
    pub const fn code(self) -> u16 {
        match self {
            Self::Any => 0x0000,
            Self::One => 0x0001,
            Self::Two => 0x0002,
            Self::Three => 0x0003,
            Self::Quorum => 0x0004,
            Self::All => 0x0005,
            Self::LocalQuorum => 0x0006,
            Self::EachQuorum => 0x0007,
            Self::Serial => 0x0008,
            Self::LocalSerial => 0x0009,
            Self::LocalOne => 0x000A,
        }
    }
}

impl Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "ANY",
            Self::One => "ONE",
            Self::Two => "TWO",
            Self::Three => "THREE",
            Self::Quorum => "QUORUM",
            Self::All => "ALL",
            Self::LocalQuorum => "LOCAL_QUORUM",
            Self::EachQuorum => "EACH_QUORUM",
            Self::Serial => "SERIAL",
            Self::LocalSerial => "LOCAL_SERIAL",
            Self::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an unknown consistency name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown consistency level: {0}")]
pub struct UnknownConsistency(pub String);

impl FromStr for Consistency {
    type Err = UnknownConsistency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ANY" => Ok(Self::Any),
            "ONE" => Ok(Self::One),
            "TWO" => Ok(Self::Two),
            "THREE" => Ok(Self::Three),
            "QUORUM" => Ok(Self::Quorum),
            "ALL" => Ok(Self::All),
            "LOCAL_QUORUM" => Ok(Self::LocalQuorum),
            "EACH_QUORUM" => Ok(Self::EachQuorum),
            "SERIAL" => Ok(Self::Serial),
            "LOCAL_SERIAL" => Ok(Self::LocalSerial),
            "LOCAL_ONE" => Ok(Self::LocalOne),
            _ => Err(UnknownConsistency(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn table_name_displays_as_routing_key() {
        let name = TableName::new("ks", "events");
        assert_eq!(name.to_string(), "ks:events");
        assert_eq!(name.keyspace(), "ks");
        assert_eq!(name.table(), "events");
    }

    #[test]
    fn host_id_roundtrips_bytes() {
        let bytes = [7u8; 16];
        let host = HostId::from_bytes(bytes);
        assert_eq!(host.as_bytes(), &bytes);
    }

    #[test_case(3, ProtocolVersion::V3)]
    #[test_case(4, ProtocolVersion::V4)]
    #[test_case(0x84, ProtocolVersion::V4; "response direction bit ignored")]
    #[test_case(5, ProtocolVersion::V5)]
    fn protocol_version_from_byte(byte: u8, expected: ProtocolVersion) {
        assert_eq!(ProtocolVersion::try_from(byte), Ok(expected));
    }

    #[test]
    fn legacy_protocol_versions_are_rejected() {
        assert_eq!(ProtocolVersion::try_from(2), Err(UnsupportedVersion(2)));
    }

    #[test]
    fn duration_needs_v4() {
        assert!(!ProtocolVersion::V3.supports_duration());
        assert!(ProtocolVersion::V4.supports_duration());
    }

    #[test_case("quorum", Consistency::Quorum)]
    #[test_case("LOCAL_ONE", Consistency::LocalOne)]
    #[test_case("each_quorum", Consistency::EachQuorum)]
    fn consistency_parses(name: &str, expected: Consistency) {
        assert_eq!(name.parse::<Consistency>().unwrap(), expected);
    }

    #[test]
    fn unknown_consistency_is_an_error() {
        assert!("SOMETIMES".parse::<Consistency>().is_err());
    }

    proptest! {
        #[test]
        fn token_order_matches_i64(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(Token::new(a).cmp(&Token::new(b)), a.cmp(&b));
        }

        #[test]
        fn consistency_display_parses_back(idx in 0usize..11) {
            let all = [
                Consistency::Any, Consistency::One, Consistency::Two, Consistency::Three,
                Consistency::Quorum, Consistency::All, Consistency::LocalQuorum,
                Consistency::EachQuorum, Consistency::Serial, Consistency::LocalSerial,
                Consistency::LocalOne,
            ];
            let c = all[idx];
            prop_assert_eq!(c.to_string().parse::<Consistency>().unwrap(), c);
        }
    }
}
