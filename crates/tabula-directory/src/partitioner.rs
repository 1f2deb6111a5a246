//! Murmur3 partitioner.
//!
//! This is the server's variant of MurmurHash3 x64 128 with seed 0: tail
//! bytes are sign-extended before mixing, and the token is the first 64
//! bits of the digest. `i64::MIN` is not a valid token and maps to
//! `i64::MAX`.

use tabula_types::Token;

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

/// Token of a serialized routing key.
pub fn murmur3_token(key: &[u8]) -> Token {
    let h = murmur3_h1(key);
    Token::new(if h == i64::MIN { i64::MAX } else { h })
}

/// First 64 bits of the digest, before token normalization.
pub fn murmur3_h1(data: &[u8]) -> i64 {
    let len = data.len();
    let mut h1: u64 = 0;
    let mut h2: u64 = 0;

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        let (lo, hi) = block.split_at(8);
        let k1 = u64::from_le_bytes([lo[0], lo[1], lo[2], lo[3], lo[4], lo[5], lo[6], lo[7]]);
        let k2 = u64::from_le_bytes([hi[0], hi[1], hi[2], hi[3], hi[4], hi[5], hi[6], hi[7]]);

        h1 ^= mix_k1(k1);
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(k2);
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    // Sign extension of tail bytes is what the server does.
    let byte = |i: usize| i64::from(tail[i] as i8) as u64;
    let mut k1: u64 = 0;
    let mut k2: u64 = 0;
    for i in (8..tail.len()).rev() {
        k2 ^= byte(i) << ((i - 8) * 8);
    }
    if tail.len() > 8 {
        h2 ^= mix_k2(k2);
    }
    for i in (0..tail.len().min(8)).rev() {
        k1 ^= byte(i) << (i * 8);
    }
    if !tail.is_empty() {
        h1 ^= mix_k1(k1);
    }

    h1 ^= len as u64;
    h2 ^= len as u64;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix(h1);
    h2 = fmix(h2);
    h1.wrapping_add(h2) as i64
}

fn mix_k1(k: u64) -> u64 {
    k.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

fn mix_k2(k: u64) -> u64 {
    k.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

fn fmix(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(&[], 0x0000_0000_0000_0000 ; "empty")]
    #[test_case(&[0], 0x4610_abe5_6eff_5cb5 ; "one byte")]
    #[test_case(&[0, 1], 0x7cb3_f5c5_8dab_264c ; "two bytes")]
    #[test_case(&[0, 1, 2], 0xb872_a12f_ef53_e6be ; "three bytes")]
    #[test_case(&[0, 1, 2, 3], 0xe1c5_94ae_0ddf_af10 ; "four bytes")]
    #[test_case(b"hello", 0xcbd8_a7b3_41bd_9b02 ; "hello")]
    #[test_case(b"hello, world", 0x342f_ac62_3a5e_bc8e ; "block boundary tail")]
    #[test_case(b"19 Jan 2038 at 3:14:07 AM", 0xb89e_5988_b737_affc ; "one block and tail")]
    #[test_case(
        b"The quick brown fox jumps over the lazy dog.",
        0xcd99_481f_9ee9_02c9 ;
        "two blocks and tail"
    )]
    fn digest_matches_server(key: &[u8], expected: u64) {
        assert_eq!(murmur3_h1(key) as u64, expected);
    }

    #[test_case(&1i32.to_be_bytes(), -4_069_959_284_402_364_209 ; "int 1")]
    #[test_case(&2i32.to_be_bytes(), -3_248_873_570_005_575_792 ; "int 2")]
    #[test_case(&3i32.to_be_bytes(), 9_010_454_139_840_013_625 ; "int 3")]
    #[test_case(b"test", -6_017_608_668_500_074_083 ; "text test")]
    #[test_case(b"xd", 4_507_812_186_440_344_727 ; "text xd")]
    #[test_case(b"primary_key", -1_632_642_444_691_073_360 ; "text primary key")]
    #[test_case("krem\u{f3}wki".as_bytes(), 4_354_931_215_268_080_151 ; "non-ascii tail")]
    fn token_matches_server(key: &[u8], expected: i64) {
        assert_eq!(murmur3_token(key), Token::new(expected));
    }

    #[test]
    fn high_tail_bytes_are_sign_extended() {
        // Zero-extending the 0xc3 0xb3 tail gives 5170069825885792609.
        let key = "krem\u{f3}wki".as_bytes();
        assert_eq!(key[4..6], [0xc3, 0xb3]);
        assert_ne!(murmur3_h1(key), 5_170_069_825_885_792_609);
    }

    #[test]
    fn tail_and_block_paths_are_deterministic() {
        let data: Vec<u8> = (0u8..=40).collect();
        for len in 0..data.len() {
            assert_eq!(murmur3_h1(&data[..len]), murmur3_h1(&data[..len]));
        }
        assert_ne!(murmur3_h1(&data[..16]), murmur3_h1(&data[..17]));
    }
}
