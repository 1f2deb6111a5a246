//! Property tests for the compression envelope.

use proptest::prelude::*;

use crate::{
    Lz4Codec, SharedStatsRateEvaluator, StatsRateEvaluator, ascii_to_bin, bin_to_ascii,
};

proptest! {
    #[test]
    fn binary_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..4096), threshold in 0usize..2048) {
        let codec = Lz4Codec::new().with_threshold(threshold);
        let compressed = codec.compress_binary(&data).unwrap();
        prop_assert_eq!(codec.decompress_binary(&compressed).unwrap(), data);
    }

    #[test]
    fn binary_roundtrip_with_prefixed_input(tail in proptest::collection::vec(any::<u8>(), 0..64)) {
        let codec = Lz4Codec::new();
        let mut data = b"lz4:".to_vec();
        data.extend_from_slice(&tail);
        let compressed = codec.compress_binary(&data).unwrap();
        prop_assert_eq!(codec.decompress_binary(&compressed).unwrap(), data);
    }

    #[test]
    fn ascii_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..2048), threshold in 0usize..1024) {
        let codec = Lz4Codec::new().with_threshold(threshold);
        let compressed = codec.compress_ascii(&data).unwrap();
        prop_assert_eq!(codec.decompress_ascii(&compressed).unwrap(), data);
    }

    #[test]
    fn channel_inverse(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        prop_assert_eq!(ascii_to_bin(&bin_to_ascii(&data)).unwrap(), data);
    }

    #[test]
    fn adaptive_roundtrip(chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..512), 1..32)) {
        let shared = Lz4Codec::new().with_threshold(1).with_evaluator(SharedStatsRateEvaluator::default());
        let local = Lz4Codec::new().with_threshold(1).with_evaluator(StatsRateEvaluator::default());
        for data in chunks {
            let a = shared.compress_binary(&data).unwrap();
            prop_assert_eq!(shared.decompress_binary(&a).unwrap(), data.clone());
            let b = local.compress_binary(&data).unwrap();
            prop_assert_eq!(local.decompress_binary(&b).unwrap(), data);
        }
    }

    #[test]
    fn decompress_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let codec = Lz4Codec::new().with_max_uncompressed(1 << 16);
        let mut tagged = b"lz4:".to_vec();
        tagged.extend_from_slice(&data);
        let _ = codec.decompress_binary(&tagged);
        let _ = codec.decompress_ascii(&data);
    }
}
