//! Lock-free stream id allocation.
//!
//! A connection multiplexes up to 32,768 requests, each tagged with a
//! 16-bit stream id. The set of ids in use is a bitmap of 512 64-bit
//! words. Within a word, numbering is MSB-first: bit 63 of word `k` is
//! stream `64k`, bit 0 is stream `64k + 63`. Stream 0 is reserved and
//! never handed out.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Number of 64-bit words in the bitmap.
pub const STREAM_BUCKETS: usize = 512;

/// Total number of stream ids, including the reserved id 0.
pub const MAX_STREAMS: usize = STREAM_BUCKETS * 64;

const RESERVED: u64 = 1 << 63;

/// Word holding stream `n`.
pub const fn bucket_offset(n: usize) -> usize {
    n / 64
}

/// Bit position of stream `n` within its word.
pub const fn stream_offset(n: usize) -> u32 {
    63 - (n % 64) as u32
}

/// Returns true if stream `n`'s bit is set in `word`.
pub const fn is_set(word: u64, n: usize) -> bool {
    word & (1 << stream_offset(n)) != 0
}

/// Per-connection set of in-flight stream ids.
#[derive(Debug)]
pub struct StreamIdSet {
    buckets: Box<[AtomicU64]>,
    in_use: AtomicUsize,
}

impl StreamIdSet {
    pub fn new() -> Self {
        let buckets = (0..STREAM_BUCKETS)
            .map(|k| AtomicU64::new(if k == 0 { RESERVED } else { 0 }))
            .collect();
        Self {
            buckets,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Claims the lowest free stream id, or `None` when saturated.
    pub fn acquire(&self) -> Option<i16> {
        for (k, bucket) in self.buckets.iter().enumerate() {
            let mut word = bucket.load(Ordering::SeqCst);
            while word != u64::MAX {
                let bit = (!word).leading_zeros();
                let mask = 1u64 << (63 - bit);
                match bucket.compare_exchange(word, word | mask, Ordering::SeqCst, Ordering::SeqCst)
                {
                    Ok(_) => {
                        self.in_use.fetch_add(1, Ordering::SeqCst);
                        return Some((k * 64 + bit as usize) as i16);
                    }
                    Err(current) => word = current,
                }
            }
        }
        None
    }

    /// Frees `id`. Returns true if it was in use.
    pub fn release(&self, id: i16) -> bool {
        let Ok(n) = usize::try_from(id) else {
            return false;
        };
        if n == 0 {
            return false;
        }
        let mask = 1u64 << stream_offset(n);
        let previous = self.buckets[bucket_offset(n)].fetch_and(!mask, Ordering::SeqCst);
        if previous & mask == 0 {
            return false;
        }
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        true
    }

    /// Returns true if `id` is currently held.
    pub fn is_in_use(&self, id: i16) -> bool {
        usize::try_from(id).is_ok_and(|n| {
            n != 0 && is_set(self.buckets[bucket_offset(n)].load(Ordering::SeqCst), n)
        })
    }

    /// Number of ids currently held.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Frees every id. Used when the connection closes.
    pub fn clear(&self) {
        for (k, bucket) in self.buckets.iter().enumerate() {
            bucket.store(if k == 0 { RESERVED } else { 0 }, Ordering::SeqCst);
        }
        self.in_use.store(0, Ordering::SeqCst);
    }
}

impl Default for StreamIdSet {
    fn default() -> Self {
        Self::new()
    }
}
