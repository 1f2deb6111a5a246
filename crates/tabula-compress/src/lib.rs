//! # tabula-compress: value compression for Tabula
//!
//! Large `blob` and `text` values can opt into client-side LZ4 compression.
//! A compressed value is tagged with a prefix so plain and compressed
//! values coexist in one column:
//!
//! ```text
//! prefix ‖ be32(uncompressed length) ‖ lz4 block
//! ```
//!
//! For `text`/`ascii` columns the envelope is re-cut into 7-bit bytes
//! (see [`bin_to_ascii`]) so server-side validation accepts it.
//!
//! A [`RateEvaluator`] can be attached to skip payload sizes that
//! historically compress poorly. [`StatsRateEvaluator`] is the
//! single-threaded variant; [`SharedStatsRateEvaluator`] may be shared
//! across threads.

mod ascii;
mod envelope;
mod error;
mod rate;

pub use ascii::{ascii_len, ascii_to_bin, bin_len, bin_to_ascii};
pub use envelope::{
    Channel, Codec, DEFAULT_MAX_UNCOMPRESSED, DEFAULT_PREFIX, DEFAULT_THRESHOLD, Lz4Codec,
    NoneCodec,
};
pub use error::{CompressionError, CompressionResult};
pub use rate::{
    BUCKETS, DEFAULT_TARGET_RATIO, Decision, NoopEvaluator, RateEvaluator,
    SharedStatsRateEvaluator, StatsRateEvaluator, WINDOW, bucket,
};

#[cfg(test)]
mod tests;
