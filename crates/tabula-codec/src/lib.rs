//! # tabula-codec: CQL value serialization for Tabula
//!
//! This crate translates Rust values to and from the protocol's value
//! encoding for every CQL type: native scalars, `list`/`set`/`map`,
//! `tuple`, user-defined types and `vector`.
//!
//! # Architecture
//!
//! ```text
//! host value ──Marshal──▶ CqlValue ──encode_value──▶ bytes
//! host slot ◀─Unmarshal── CqlValue ◀─decode_value─── bytes
//! ```
//!
//! The wire layer is a single dispatch keyed by [`CqlType`]; the host layer
//! is one trait implementation per Rust type. [`TypeInfo`] carries the
//! negotiated [`ProtocolVersion`](tabula_types::ProtocolVersion), which
//! gates `duration`.
//!
//! Decoding never panics: malformed input surfaces as
//! [`CodecError::MalformedData`] or [`CodecError::TruncatedData`].

mod error;
mod host;
mod routing_key;
mod types;
mod value;
mod wire;

pub use error::{CodecError, CodecResult};
pub use host::{Marshal, Udt, UdtMarshal, UdtUnmarshal, Unmarshal, marshal, unmarshal};
pub use routing_key::compose_routing_key;
pub use types::{CqlType, MAX_TYPE_DEPTH, TypeInfo};
pub use value::{
    CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlValue, CqlVarint,
};
pub use wire::{decode_value, encode_value, write_bytes};
