//! Per-size-bucket compression rate statistics.
//!
//! Payload sizes fall into 24 logarithmic buckets,
//! `b(size) = clamp(floor(log4(size)) - 3, 0, 23)`. Each bucket keeps the
//! last [`WINDOW`] observed ratios (`original / compressed`). Once a
//! bucket's window is full, its mean decides whether payloads of that size
//! are worth compressing.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Number of size buckets.
pub const BUCKETS: usize = 24;

/// Samples per bucket.
pub const WINDOW: usize = 10;

/// Default target ratio; a bucket must compress strictly better than this.
pub const DEFAULT_TARGET_RATIO: f32 = 1.1;

/// Outcome of a size-based compression query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Compress,
    DontCompress,
    /// The bucket has not seen a full window of samples yet.
    Undecided,
}

/// Decides, per payload size, whether compression pays off.
pub trait RateEvaluator {
    /// Consults the statistics for payloads of `size` bytes.
    fn worth_compressing(&self, size: usize) -> Decision;

    /// Records the ratio `original / compressed` and returns whether it
    /// beats the target. Zero lengths are ignored and return `false`.
    fn worth_compressing_rate(&self, original: usize, compressed: usize) -> bool;
}

/// Bucket index of a payload size.
pub fn bucket(size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let log4 = (usize::BITS - 1 - size.leading_zeros()) as usize / 2;
    log4.saturating_sub(3).min(BUCKETS - 1)
}

fn ratio(original: usize, compressed: usize) -> Option<f32> {
    if original == 0 || compressed == 0 {
        return None;
    }
    Some(original as f32 / compressed as f32)
}

fn decide(mean: Option<f32>, target: f32) -> Decision {
    match mean {
        None => Decision::Undecided,
        Some(mean) if mean > target => Decision::Compress,
        Some(_) => Decision::DontCompress,
    }
}

/// Always compresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvaluator;

impl RateEvaluator for NoopEvaluator {
    fn worth_compressing(&self, _size: usize) -> Decision {
        Decision::Compress
    }

    fn worth_compressing_rate(&self, _original: usize, _compressed: usize) -> bool {
        true
    }
}

// ============================================================================
// Single-threaded statistics
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Window {
    samples: [f32; WINDOW],
    next: usize,
    filled: usize,
}

impl Window {
    fn record(&mut self, ratio: f32) {
        self.samples[self.next] = ratio;
        self.next = (self.next + 1) % WINDOW;
        self.filled = (self.filled + 1).min(WINDOW);
    }

    fn mean(&self) -> Option<f32> {
        (self.filled == WINDOW).then(|| self.samples.iter().sum::<f32>() / WINDOW as f32)
    }
}

/// Rate statistics for a single thread.
///
/// Interior mutability is unsynchronized, so the type is `!Sync`; use
/// [`SharedStatsRateEvaluator`] when the codec is shared.
#[derive(Debug)]
pub struct StatsRateEvaluator {
    target: f32,
    buckets: RefCell<[Window; BUCKETS]>,
}

impl StatsRateEvaluator {
    pub fn new(target: f32) -> Self {
        Self {
            target,
            buckets: RefCell::new([Window::default(); BUCKETS]),
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Mean ratio of the bucket holding `size`, once its window is full.
    pub fn estimate(&self, size: usize) -> Option<f32> {
        self.buckets.borrow()[bucket(size)].mean()
    }
}

impl Default for StatsRateEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_RATIO)
    }
}

impl RateEvaluator for StatsRateEvaluator {
    fn worth_compressing(&self, size: usize) -> Decision {
        decide(self.estimate(size), self.target)
    }

    fn worth_compressing_rate(&self, original: usize, compressed: usize) -> bool {
        let Some(ratio) = ratio(original, compressed) else {
            return false;
        };
        self.buckets.borrow_mut()[bucket(original)].record(ratio);
        ratio > self.target
    }
}

// ============================================================================
// Thread-safe statistics
// ============================================================================

/// One bucket: ratios stored as `f32` bits, zero meaning "no sample yet".
#[derive(Debug)]
struct AtomicWindow {
    samples: [AtomicU32; WINDOW],
    next: AtomicUsize,
}

impl AtomicWindow {
    fn new() -> Self {
        Self {
            samples: std::array::from_fn(|_| AtomicU32::new(0)),
            next: AtomicUsize::new(0),
        }
    }

    fn record(&self, ratio: f32) {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % WINDOW;
        self.samples[slot].store(ratio.to_bits(), Ordering::Release);
    }

    /// Reads the window without moving the write cursor.
    fn mean(&self) -> Option<f32> {
        let mut sum = 0.0;
        for sample in &self.samples {
            let bits = sample.load(Ordering::Acquire);
            if bits == 0 {
                return None;
            }
            sum += f32::from_bits(bits);
        }
        Some(sum / WINDOW as f32)
    }
}

/// Rate statistics shared across threads.
///
/// Concurrent writers may interleave within a window; readers see each
/// slot either before or after a store, never a torn value.
#[derive(Debug)]
pub struct SharedStatsRateEvaluator {
    target: f32,
    buckets: Box<[AtomicWindow]>,
}

impl SharedStatsRateEvaluator {
    pub fn new(target: f32) -> Self {
        Self {
            target,
            buckets: (0..BUCKETS).map(|_| AtomicWindow::new()).collect(),
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Mean ratio of the bucket holding `size`, once its window is full.
    pub fn estimate(&self, size: usize) -> Option<f32> {
        self.buckets[bucket(size)].mean()
    }
}

impl Default for SharedStatsRateEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_RATIO)
    }
}

impl RateEvaluator for SharedStatsRateEvaluator {
    fn worth_compressing(&self, size: usize) -> Decision {
        decide(self.estimate(size), self.target)
    }

    fn worth_compressing_rate(&self, original: usize, compressed: usize) -> bool {
        let Some(ratio) = ratio(original, compressed) else {
            return false;
        };
        self.buckets[bucket(original)].record(ratio);
        ratio > self.target
    }
}

impl<E: RateEvaluator + ?Sized> RateEvaluator for std::sync::Arc<E> {
    fn worth_compressing(&self, size: usize) -> Decision {
        (**self).worth_compressing(size)
    }

    fn worth_compressing_rate(&self, original: usize, compressed: usize) -> bool {
        (**self).worth_compressing_rate(original, compressed)
    }
}
