//! Bounded SPSC output queue between the cooperative loop and the audio
//! backend's real-time thread (spec §4.2, §5, §9 "SPSC between loop and
//! audio backend").
//!
//! The stream acceptor (C8b) is the sole producer; the render callback
//! (C8c) is the sole consumer, on a thread the audio backend owns and may
//! not block. Built on `ringbuf`'s lock-free `HeapRb`, the same crate the
//! pack's `haileys-bark` reference project uses for exactly this streamer
//! loop ↔ audio callback handoff (`bark-device/src/sink.rs`).

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use crate::frame::DecodedFrame;

/// Producer half, owned by the cooperative loop (stream acceptor).
pub struct QueueProducer {
    inner: HeapProducer<DecodedFrame>,
}

impl QueueProducer {
    /// Pushes one frame. Never blocks; returns the frame back on a full
    /// queue so the caller can decide to drop it (spec B1: "enqueue blocks
    /// at most one callback period" is satisfied trivially here since this
    /// call never blocks at all — the documented policy is reject-on-full,
    /// not evict-oldest, since evicting would silently reorder which frame
    /// is "next", which §5 forbids across a single sink).
    pub fn try_push(&mut self, frame: DecodedFrame) -> Result<(), DecodedFrame> {
        self.inner.push(frame)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }
}

/// Consumer half, owned by the render callback's real-time thread.
pub struct QueueConsumer {
    inner: HeapConsumer<DecodedFrame>,
}

impl QueueConsumer {
    /// Removes and returns the head frame, if any. Never blocks.
    pub fn try_pop(&mut self) -> Option<DecodedFrame> {
        self.inner.pop()
    }

    /// Returns the head frame without removing it, if any (spec §4.8 step
    /// 3: "peek at head").
    pub fn peek(&self) -> Option<&DecodedFrame> {
        self.inner.iter().next()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Creates a bound producer/consumer pair with the given capacity (spec
/// default 10, [`crate::constants::OUTPUT_QUEUE_CAPACITY`]).
#[must_use]
pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let rb = HeapRb::<DecodedFrame>::new(capacity);
    let (producer, consumer) = rb.split();
    (QueueProducer { inner: producer }, QueueConsumer { inner: consumer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(deadline: f64) -> DecodedFrame {
        DecodedFrame {
            deadline,
            payload: Bytes::from_static(b"abcd"),
        }
    }

    #[test]
    fn push_then_pop_round_trips() {
        let (mut tx, mut rx) = bounded(2);
        assert!(tx.try_push(frame(1.0)).is_ok());
        let popped = rx.try_pop().unwrap();
        assert_eq!(popped.deadline, 1.0);
    }

    // B2: queue empty on render returns None, leaving the caller free to
    // substitute silence without touching the DAC clock.
    #[test]
    fn pop_on_empty_queue_returns_none() {
        let (_tx, mut rx) = bounded(2);
        assert!(rx.try_pop().is_none());
    }

    // B1: push on a full queue is rejected, not blocked, and not an evict.
    #[test]
    fn push_on_full_queue_is_rejected_not_evicted() {
        let (mut tx, _rx) = bounded(1);
        assert!(tx.try_push(frame(1.0)).is_ok());
        let rejected = tx.try_push(frame(2.0));
        assert!(rejected.is_err());
        assert_eq!(rejected.unwrap_err().deadline, 2.0);
    }

    #[test]
    fn peek_does_not_remove() {
        let (mut tx, rx) = bounded(2);
        tx.try_push(frame(5.0)).unwrap();
        assert_eq!(rx.peek().map(|f| f.deadline), Some(5.0));
        assert_eq!(rx.peek().map(|f| f.deadline), Some(5.0));
    }
}
