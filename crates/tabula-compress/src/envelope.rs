//! Prefix-tagged LZ4 envelopes for opaque column values.
//!
//! A compressed value is `prefix ‖ be32(uncompressed_len) ‖ lz4_block`.
//! Anything not starting with the prefix is passed through untouched, so
//! compressed and plain values can share a column.

use tracing::trace;

use crate::ascii::{ascii_len, ascii_to_bin, bin_to_ascii, decode_channel};
use crate::error::{CompressionError, CompressionResult};
use crate::rate::{Decision, NoopEvaluator, RateEvaluator};

/// Default envelope prefix.
pub const DEFAULT_PREFIX: &[u8] = b"lz4:";

/// Payloads shorter than this are stored as-is by default.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// Default ceiling on a declared uncompressed length (256 MiB).
pub const DEFAULT_MAX_UNCOMPRESSED: usize = 256 * 1024 * 1024;

/// How the value travels: raw bytes, or spread over 7-bit bytes for
/// server-validated string columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Binary,
    Ascii,
}

/// A value compression codec.
pub trait Codec: Send + Sync {
    /// Short codec name for logs and errors.
    fn name(&self) -> &'static str;

    /// Compresses `input`, or returns it unchanged when not worthwhile.
    fn compress(&self, input: &[u8], channel: Channel) -> CompressionResult<Vec<u8>>;

    /// Reverses [`Codec::compress`]; plain values pass through.
    fn decompress(&self, input: &[u8], channel: Channel) -> CompressionResult<Vec<u8>>;
}

/// Passthrough codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCodec;

impl Codec for NoneCodec {
    fn name(&self) -> &'static str {
        "none"
    }

    fn compress(&self, input: &[u8], _channel: Channel) -> CompressionResult<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], _channel: Channel) -> CompressionResult<Vec<u8>> {
        Ok(input.to_vec())
    }
}

/// LZ4 block compression behind a configurable prefix, using `lz4_flex`.
///
/// With a [`RateEvaluator`] attached, payload sizes that historically
/// compress poorly are skipped.
#[derive(Debug, Clone)]
pub struct Lz4Codec<E = NoopEvaluator> {
    prefix: Vec<u8>,
    threshold: usize,
    max_uncompressed: usize,
    evaluator: E,
}

impl Lz4Codec {
    /// Creates a codec with the default prefix and threshold.
    pub fn new() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_vec(),
            threshold: DEFAULT_THRESHOLD,
            max_uncompressed: DEFAULT_MAX_UNCOMPRESSED,
            evaluator: NoopEvaluator,
        }
    }
}

impl Default for Lz4Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: RateEvaluator> Lz4Codec<E> {
    /// Replaces the prefix. An empty prefix would tag every value.
    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> CompressionResult<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(CompressionError::EmptyPrefix);
        }
        self.prefix = prefix;
        Ok(self)
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_uncompressed(mut self, limit: usize) -> Self {
        self.max_uncompressed = limit;
        self
    }

    /// Attaches a rate evaluator.
    pub fn with_evaluator<F: RateEvaluator>(self, evaluator: F) -> Lz4Codec<F> {
        Lz4Codec {
            prefix: self.prefix,
            threshold: self.threshold,
            max_uncompressed: self.max_uncompressed,
            evaluator,
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Returns true if `buf` carries a binary envelope.
    pub fn is_data_compressed(&self, buf: &[u8]) -> bool {
        buf.starts_with(&self.prefix)
    }

    /// Returns true if `buf` carries an envelope on the 7-bit channel.
    ///
    /// Only the channel bytes covering the prefix are decoded.
    pub fn is_ascii_data_compressed(&self, buf: &[u8]) -> bool {
        let needed = ascii_len(self.prefix.len());
        if buf.len() < needed {
            return false;
        }
        match decode_channel(&buf[..needed], self.prefix.len()) {
            Ok(head) => head == self.prefix,
            Err(_) => false,
        }
    }

    /// Compresses `src` into a binary envelope, or returns it unchanged.
    ///
    /// Input that already looks like an envelope is always compressed so
    /// that decompression can not mistake it for one.
    pub fn compress_binary(&self, src: &[u8]) -> CompressionResult<Vec<u8>> {
        let forced = self.is_data_compressed(src);
        match self.compress_envelope(src, forced)? {
            Some(envelope) => Ok(envelope),
            None => Ok(src.to_vec()),
        }
    }

    /// Opens a binary envelope; values without the prefix pass through.
    pub fn decompress_binary(&self, buf: &[u8]) -> CompressionResult<Vec<u8>> {
        if !self.is_data_compressed(buf) {
            return Ok(buf.to_vec());
        }
        self.open_envelope(buf)
    }

    /// Compresses `src` and carries the envelope on the 7-bit channel.
    pub fn compress_ascii(&self, src: &[u8]) -> CompressionResult<Vec<u8>> {
        let forced = self.is_ascii_data_compressed(src);
        match self.compress_envelope(src, forced)? {
            Some(envelope) => Ok(bin_to_ascii(&envelope)),
            None => Ok(src.to_vec()),
        }
    }

    /// Opens an envelope carried on the 7-bit channel.
    pub fn decompress_ascii(&self, buf: &[u8]) -> CompressionResult<Vec<u8>> {
        if !self.is_ascii_data_compressed(buf) {
            return Ok(buf.to_vec());
        }
        self.open_envelope(&ascii_to_bin(buf)?)
    }

    /// Builds the envelope, or `None` when compression is skipped.
    fn compress_envelope(&self, src: &[u8], forced: bool) -> CompressionResult<Option<Vec<u8>>> {
        if !forced && src.len() < self.threshold {
            return Ok(None);
        }
        let decision = if forced {
            Decision::Compress
        } else {
            self.evaluator.worth_compressing(src.len())
        };
        if decision == Decision::DontCompress {
            trace!(size = src.len(), "compression skipped by rate history");
            return Ok(None);
        }

        let envelope = self.seal(src)?;
        if decision == Decision::Undecided
            && !self.evaluator.worth_compressing_rate(src.len(), envelope.len())
        {
            trace!(
                size = src.len(),
                compressed = envelope.len(),
                "speculative compression discarded"
            );
            return Ok(None);
        }
        Ok(Some(envelope))
    }

    fn seal(&self, src: &[u8]) -> CompressionResult<Vec<u8>> {
        let declared = u32::try_from(src.len()).map_err(|_| CompressionError::TooLarge {
            declared: src.len(),
            limit: u32::MAX as usize,
        })?;
        let header = self.prefix.len() + 4;
        let mut out = vec![0u8; header + lz4_flex::block::get_maximum_output_size(src.len())];
        out[..self.prefix.len()].copy_from_slice(&self.prefix);
        out[self.prefix.len()..header].copy_from_slice(&declared.to_be_bytes());
        let written = lz4_flex::block::compress_into(src, &mut out[header..]).map_err(|e| {
            CompressionError::CompressionFailed {
                codec: "lz4",
                reason: e.to_string(),
            }
        })?;
        out.truncate(header + written);
        Ok(out)
    }

    fn open_envelope(&self, buf: &[u8]) -> CompressionResult<Vec<u8>> {
        let header = self.prefix.len() + 4;
        if buf.len() < header {
            return Err(CompressionError::Truncated {
                needed: header,
                available: buf.len(),
            });
        }
        let len_bytes = &buf[self.prefix.len()..header];
        let declared =
            u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        if declared > self.max_uncompressed {
            return Err(CompressionError::TooLarge {
                declared,
                limit: self.max_uncompressed,
            });
        }

        let mut out = vec![0u8; declared];
        let written = lz4_flex::block::decompress_into(&buf[header..], &mut out).map_err(|e| {
            CompressionError::DecompressionFailed {
                codec: "lz4",
                reason: e.to_string(),
            }
        })?;
        if written != declared {
            return Err(CompressionError::DecompressionFailed {
                codec: "lz4",
                reason: format!("expected {declared} bytes, got {written}"),
            });
        }
        Ok(out)
    }
}

impl<E: RateEvaluator + Send + Sync> Codec for Lz4Codec<E> {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, input: &[u8], channel: Channel) -> CompressionResult<Vec<u8>> {
        match channel {
            Channel::Binary => self.compress_binary(input),
            Channel::Ascii => self.compress_ascii(input),
        }
    }

    fn decompress(&self, input: &[u8], channel: Channel) -> CompressionResult<Vec<u8>> {
        match channel {
            Channel::Binary => self.decompress_binary(input),
            Channel::Ascii => self.decompress_ascii(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::{SharedStatsRateEvaluator, WINDOW};

    /// Deterministic bytes that LZ4 can not shrink.
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn envelope_layout() {
        let codec = Lz4Codec::new().with_threshold(1);
        let payload = b"1234567890".repeat(20);
        let compressed = codec.compress_binary(&payload).unwrap();
        assert_eq!(&compressed[..4], b"lz4:");
        assert_eq!(&compressed[4..8], &200u32.to_be_bytes());
        assert!(compressed.len() < payload.len());
        assert_eq!(codec.decompress_binary(&compressed).unwrap(), payload);
    }

    #[test]
    fn short_values_pass_through() {
        let codec = Lz4Codec::new();
        let payload = b"short".to_vec();
        assert_eq!(codec.compress_binary(&payload).unwrap(), payload);
        assert_eq!(codec.decompress_binary(&payload).unwrap(), payload);
    }

    #[test]
    fn prefixed_input_is_always_wrapped() {
        let codec = Lz4Codec::new();
        let payload = b"lz4:looks compressed".to_vec();
        let compressed = codec.compress_binary(&payload).unwrap();
        assert_ne!(compressed, payload);
        assert_eq!(codec.decompress_binary(&compressed).unwrap(), payload);
    }

    #[test]
    fn empty_prefix_rejected() {
        assert_eq!(
            Lz4Codec::new().with_prefix(Vec::new()).unwrap_err(),
            CompressionError::EmptyPrefix
        );
    }

    #[test]
    fn truncated_envelope_is_an_error() {
        let codec = Lz4Codec::new();
        let err = codec.decompress_binary(b"lz4:\x00\x00").unwrap_err();
        assert!(matches!(err, CompressionError::Truncated { .. }));
    }

    #[test]
    fn oversized_declaration_is_refused() {
        let codec = Lz4Codec::new().with_max_uncompressed(16);
        let err = codec.decompress_binary(b"lz4:\x00\x00\x01\x00\x00").unwrap_err();
        assert_eq!(
            err,
            CompressionError::TooLarge {
                declared: 256,
                limit: 16
            }
        );
    }

    #[test]
    fn corrupt_body_is_a_decompression_failure() {
        let codec = Lz4Codec::new();
        let err = codec.decompress_binary(b"lz4:\x00\x00\x00\x10\xff\xff").unwrap_err();
        assert!(matches!(err, CompressionError::DecompressionFailed { .. }));
    }

    #[test]
    fn ascii_variant_stays_seven_bit() {
        let codec = Lz4Codec::new().with_threshold(1);
        let payload = "héllo wörld ".repeat(50).into_bytes();
        let compressed = codec.compress_ascii(&payload).unwrap();
        assert!(compressed.iter().all(|b| *b <= 0x7F));
        assert!(codec.is_ascii_data_compressed(&compressed));
        assert!(!codec.is_data_compressed(&compressed));
        assert_eq!(codec.decompress_ascii(&compressed).unwrap(), payload);
    }

    #[test]
    fn ascii_passthrough_for_plain_text() {
        let codec = Lz4Codec::new();
        let payload = b"plain text".to_vec();
        assert_eq!(codec.compress_ascii(&payload).unwrap(), payload);
        assert_eq!(codec.decompress_ascii(&payload).unwrap(), payload);
    }

    #[test]
    fn adaptive_codec_learns_to_skip_noise() {
        let codec = Lz4Codec::new()
            .with_threshold(1)
            .with_evaluator(SharedStatsRateEvaluator::default());
        let payload = noise(2048);

        // Undecided: compressed speculatively, then discarded.
        for _ in 0..WINDOW {
            assert_eq!(codec.compress_binary(&payload).unwrap(), payload);
        }
        assert_eq!(codec.evaluator().worth_compressing(2048), Decision::DontCompress);
        assert_eq!(codec.compress_binary(&payload).unwrap(), payload);

        // Compressible data in another bucket is still compressed.
        let text = vec![b'a'; 100_000];
        let compressed = codec.compress_binary(&text).unwrap();
        assert!(codec.is_data_compressed(&compressed));
    }

    #[test]
    fn codec_trait_dispatches_by_channel() {
        let codecs: Vec<Box<dyn Codec>> = vec![Box::new(NoneCodec), Box::new(Lz4Codec::new())];
        let payload = vec![7u8; 4096];
        for codec in &codecs {
            for channel in [Channel::Binary, Channel::Ascii] {
                let out = codec.compress(&payload, channel).unwrap();
                assert_eq!(
                    codec.decompress(&out, channel).unwrap(),
                    payload,
                    "{} over {channel:?}",
                    codec.name()
                );
            }
        }
    }
}
