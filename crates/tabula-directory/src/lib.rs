//! # tabula-directory: tablet-aware request routing
//!
//! Tables using tablets split the token ring into ranges, each replicated
//! on its own set of `(host, shard)` pairs. The driver learns those ranges
//! lazily: whenever a request lands on a non-owning replica the server
//! answers with a `tablets-routing-v1` payload, which is decoded
//! ([`decode_tablet_payload`]) and inserted into the [`TabletDirectory`].
//!
//! ```text
//! routing key ──murmur3──▶ Token ──TabletDirectory──▶ Tablet ──▶ replicas
//! ```
//!
//! Every table's list is copy-on-write: lookups take a snapshot and never
//! wait for a writer, while writers are serialized per table.

mod cow;
mod error;
mod list;
mod partitioner;
mod payload;
mod tablet;

pub use cow::{CowTabletList, TabletDirectory};
pub use error::{DirectoryError, DirectoryResult};
pub use list::TabletList;
pub use partitioner::{murmur3_h1, murmur3_token};
pub use payload::{
    TABLETS_ROUTING_V1, decode_tablet_payload, encode_tablet_payload, tablet_payload_type,
};
pub use tablet::Tablet;
