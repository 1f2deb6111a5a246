//! A 7-bit channel for binary data.
//!
//! `text` and `ascii` columns are validated by the server, so a binary
//! envelope stored in them must stay within `[0x00, 0x7F]`. The input is
//! treated as one bit stream and re-cut into 7-bit groups, most significant
//! bit first. The last group is zero-padded on the right.
//!
//! `n` binary bytes occupy `ceil(8n / 7)` channel bytes; `m` channel bytes
//! carry `floor(7m / 8)` binary bytes.

use crate::error::{CompressionError, CompressionResult};

/// Channel length of `n` binary bytes.
pub fn ascii_len(n: usize) -> usize {
    (n * 8).div_ceil(7)
}

/// Binary length carried by `m` channel bytes.
pub fn bin_len(m: usize) -> usize {
    m * 7 / 8
}

/// Spreads `src` across 7-bit bytes.
pub fn bin_to_ascii(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ascii_len(src.len()));
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &byte in src {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 7 {
            bits -= 7;
            out.push(((acc >> bits) & 0x7F) as u8);
        }
        acc &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(((acc << (7 - bits)) & 0x7F) as u8);
    }
    out
}

/// Reassembles the binary bytes carried by `src`.
pub fn ascii_to_bin(src: &[u8]) -> CompressionResult<Vec<u8>> {
    decode_channel(src, bin_len(src.len()))
}

/// Decodes at most `limit` binary bytes, reading only the channel bytes
/// they need.
pub(crate) fn decode_channel(src: &[u8], limit: usize) -> CompressionResult<Vec<u8>> {
    let mut out = Vec::with_capacity(limit.min(bin_len(src.len())));
    let mut acc: u32 = 0;
    let mut bits = 0;
    for (offset, &byte) in src.iter().enumerate() {
        if out.len() == limit {
            break;
        }
        if byte > 0x7F {
            return Err(CompressionError::NotAscii { offset, byte });
        }
        acc = (acc << 7) | u32::from(byte);
        bits += 7;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case(0, 0)]
    #[test_case(1, 2)]
    #[test_case(7, 8)]
    #[test_case(8, 10)]
    #[test_case(14, 16)]
    fn channel_length(bin: usize, ascii: usize) {
        assert_eq!(ascii_len(bin), ascii);
        assert_eq!(bin_len(ascii), bin);
    }

    #[test]
    fn all_ones_splits_msb_first() {
        assert_eq!(bin_to_ascii(&[0xFF]), vec![0x7F, 0x40]);
        assert_eq!(bin_to_ascii(&[0x80, 0x01]), vec![0x40, 0x00, 0x20]);
    }

    #[test]
    fn high_bytes_are_rejected() {
        let err = ascii_to_bin(&[0x10, 0x80]).unwrap_err();
        assert_eq!(err, CompressionError::NotAscii { offset: 1, byte: 0x80 });
    }

    #[test]
    fn prefix_decode_stops_early() {
        let encoded = bin_to_ascii(b"lz4:payload");
        // Garbage after the prefix's channel bytes is never inspected.
        let mut tampered = encoded[..ascii_len(4)].to_vec();
        tampered.push(0xFF);
        assert_eq!(decode_channel(&tampered, 4).unwrap(), b"lz4:");
    }

    proptest! {
        #[test]
        fn channel_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let encoded = bin_to_ascii(&data);
            prop_assert_eq!(encoded.len(), ascii_len(data.len()));
            prop_assert!(encoded.iter().all(|b| *b <= 0x7F));
            prop_assert_eq!(ascii_to_bin(&encoded).unwrap(), data);
        }
    }
}
