//! The MIDI ingress ring.
//!
//! A bounded queue of timestamped channel events between the MIDI reader and
//! the audio callback. Empty is `read == write`; full is detected as
//! `(write + 1) % capacity == read`, so a ring of capacity C holds C − 1
//! events. Overflowing events are dropped with a warning rather than ever
//! blocking the producer.
//!
//! The consumer side is single-owner and wait-free. The producer side is
//! `Clone` (the MIDI reader in steady state, plus the OSC `midi` handler)
//! and writes are serialized by a short mutex that is never taken on the
//! audio thread.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::warn;

use continuo_plugin::SynthEvent;

/// A channel event stamped with its wall-clock arrival time.
#[derive(Clone, Copy, Debug)]
pub struct IngressEvent {
    pub at: Instant,
    pub ev: SynthEvent,
}

#[repr(align(64))]
#[derive(Debug)]
struct Cursor(AtomicUsize);

#[derive(Debug)]
struct RingInner {
    slots: Box<[UnsafeCell<IngressEvent>]>,
    /// Advanced only by the consumer.
    read: Cursor,
    /// Advanced only under the producer mutex.
    write: Cursor,
}

// SAFETY: a slot is written only while it is outside the readable region
// (the full check keeps the producer off the slot at `read`), and read only
// after the write index has been published with Release ordering.
unsafe impl Send for RingInner {}
unsafe impl Sync for RingInner {}

impl RingInner {
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Producer half; cloneable, writes serialized by an internal mutex.
#[derive(Clone, Debug)]
pub struct EventProducer {
    inner: Arc<RingInner>,
    gate: Arc<Mutex<()>>,
}

impl EventProducer {
    /// Enqueue one event. Returns false (and warns) when the ring is full.
    pub fn push(&self, event: IngressEvent) -> bool {
        let _guard = self.gate.lock();
        let write = self.inner.write.0.load(Ordering::Relaxed);
        let read = self.inner.read.0.load(Ordering::Acquire);
        if (write + 1) % self.inner.capacity() == read {
            warn!("MIDI event buffer overflow, dropping event");
            return false;
        }
        // SAFETY: the slot at `write` is outside the readable region.
        unsafe {
            *self.inner.slots[write].get() = event;
        }
        self.inner
            .write
            .0
            .store((write + 1) % self.inner.capacity(), Ordering::Release);
        true
    }
}

/// Consumer half; single-owner, used from the audio callback only.
#[derive(Debug)]
pub struct EventConsumer {
    inner: Arc<RingInner>,
}

impl EventConsumer {
    /// Copy of the oldest event, without consuming it.
    #[inline]
    pub fn peek(&self) -> Option<IngressEvent> {
        let read = self.inner.read.0.load(Ordering::Relaxed);
        let write = self.inner.write.0.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        // SAFETY: the slot at `read` was published by the producer and the
        // producer will not touch it until `read` advances past it.
        Some(unsafe { *self.inner.slots[read].get() })
    }

    /// Consume the oldest event.
    #[inline]
    pub fn pop(&mut self) -> Option<IngressEvent> {
        let event = self.peek()?;
        let read = self.inner.read.0.load(Ordering::Relaxed);
        self.inner
            .read
            .0
            .store((read + 1) % self.inner.capacity(), Ordering::Release);
        Some(event)
    }

    pub fn len(&self) -> usize {
        let read = self.inner.read.0.load(Ordering::Relaxed);
        let write = self.inner.write.0.load(Ordering::Acquire);
        (write + self.inner.capacity() - read) % self.inner.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create a ring holding up to `capacity - 1` events.
pub fn event_ring(capacity: usize) -> (EventProducer, EventConsumer) {
    assert!(capacity >= 2, "ring capacity must be at least 2");
    let filler = IngressEvent {
        at: Instant::now(),
        ev: SynthEvent::default(),
    };
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(filler))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let inner = Arc::new(RingInner {
        slots,
        read: Cursor(AtomicUsize::new(0)),
        write: Cursor(AtomicUsize::new(0)),
    });
    (
        EventProducer {
            inner: Arc::clone(&inner),
            gate: Arc::new(Mutex::new(())),
        },
        EventConsumer { inner },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(note: u8) -> IngressEvent {
        IngressEvent {
            at: Instant::now(),
            ev: SynthEvent::note_on(0, note, 100),
        }
    }

    #[test]
    fn empty_ring_peeks_nothing() {
        let (_producer, mut consumer) = event_ring(8);
        assert!(consumer.peek().is_none());
        assert!(consumer.pop().is_none());
        assert!(consumer.is_empty());
    }

    #[test]
    fn events_come_out_in_ingress_order() {
        let (producer, mut consumer) = event_ring(16);
        for note in 0..10 {
            assert!(producer.push(ev(note)));
        }
        for note in 0..10 {
            assert_eq!(consumer.pop().unwrap().ev.data1, note);
        }
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn usable_capacity_is_one_less_than_allocated() {
        // Capacity 4 holds 3: full is detected as next-write == read.
        let (producer, mut consumer) = event_ring(4);
        let mut accepted = 0;
        let mut dropped = 0;
        for note in 0..6 {
            if producer.push(ev(note)) {
                accepted += 1;
            } else {
                dropped += 1;
            }
        }
        assert_eq!(accepted, 3);
        assert_eq!(dropped, 3);

        let mut consumed = 0;
        while let Some(event) = consumer.pop() {
            assert_eq!(event.ev.data1, consumed);
            consumed += 1;
        }
        // Consumed plus dropped accounts for every ingress event.
        assert_eq!(consumed as usize + dropped, 6);
    }

    #[test]
    fn peek_does_not_consume() {
        let (producer, mut consumer) = event_ring(4);
        producer.push(ev(60));
        assert_eq!(consumer.peek().unwrap().ev.data1, 60);
        assert_eq!(consumer.len(), 1);
        assert_eq!(consumer.pop().unwrap().ev.data1, 60);
        assert!(consumer.is_empty());
    }

    #[test]
    fn cloned_producers_share_the_ring() {
        let (producer, mut consumer) = event_ring(8);
        let injector = producer.clone();
        producer.push(ev(1));
        injector.push(ev(2));
        assert_eq!(consumer.pop().unwrap().ev.data1, 1);
        assert_eq!(consumer.pop().unwrap().ev.data1, 2);
    }

    #[test]
    fn wraparound_preserves_order() {
        let (producer, mut consumer) = event_ring(4);
        for round in 0..10u8 {
            for j in 0..3 {
                assert!(producer.push(ev(round * 3 + j)));
            }
            for j in 0..3 {
                assert_eq!(consumer.pop().unwrap().ev.data1, round * 3 + j);
            }
        }
    }
}
