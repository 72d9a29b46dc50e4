//! Small shared primitives with no natural home in a single module.

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` that can be read and written without a lock, for values read on
/// a real-time audio callback thread (spec §5: the render callback "must be
/// non-blocking"). Reused for the reference-clock offset (§4.1) and the
/// per-peer streamer offset (§4.5) consumed by the render callback (§4.8).
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[must_use]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_values() {
        let a = AtomicF64::new(1.5);
        assert_eq!(a.load(), 1.5);
        a.store(-2.25);
        assert_eq!(a.load(), -2.25);
    }
}
