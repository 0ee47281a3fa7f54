//! Fixed-capacity event ring owned by one session.
//!
//! # Overview
//! - One producer (fan-out delivery), one consumer (the session's reader).
//! - Capacity is a power of two; slot storage is allocated once and reused.
//! - `head` and `tail` are free-running counters masked into slot indices,
//!   so `head == tail` means empty and `head - tail == capacity` means full.
//! - Inserting into a full ring hands the event back to the caller: the
//!   newest event is the one that gets dropped, never an unread older one.

use crate::event::Event;

/// Outcome of [`EventRing::push`] when the ring has no room.
#[derive(Debug)]
pub struct RingFull(pub Event);

pub struct EventRing {
    slots: Box<[Option<Event>]>,
    mask: usize,
    head: usize,
    tail: usize,
}

impl EventRing {
    /// Create an empty ring.
    ///
    /// # Panics
    /// Panics if `capacity` is not a power of two or is below 2. Capacities
    /// come from a validated [`MultiplexerConfig`](hidmux_core::MultiplexerConfig).
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= 2 && capacity.is_power_of_two(),
            "ring capacity must be a power of two >= 2"
        );
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            mask: capacity - 1,
            head: 0,
            tail: 0,
        }
    }

    #[inline]
    /// Number of slots.
    pub const fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    /// Number of queued events.
    pub const fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub const fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Append an event at `head`.
    pub fn push(&mut self, event: Event) -> Result<(), RingFull> {
        if self.is_full() {
            return Err(RingFull(event));
        }
        let idx = self.head & self.mask;
        debug_assert!(self.slots[idx].is_none());
        self.slots[idx] = Some(event);
        self.head = self.head.wrapping_add(1);
        Ok(())
    }

    /// Remove the oldest event at `tail`.
    pub fn pop(&mut self) -> Option<Event> {
        if self.is_empty() {
            return None;
        }
        let idx = self.tail & self.mask;
        let event = self.slots[idx].take();
        self.tail = self.tail.wrapping_add(1);
        event
    }

    /// Drop every queued event. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let mut discarded = 0;
        while self.pop().is_some() {
            discarded += 1;
        }
        discarded
    }
}

impl std::fmt::Debug for EventRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRing")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
