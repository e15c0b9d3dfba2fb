//! Note events emitted by the render context
//!
//! Scheduled notes produce activation/deactivation pairs time-stamped
//! relative to the start of the block that emitted them. They are handed to
//! downstream instrumentation through a bounded lock-free queue.

use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoteEventKind {
    Activate,
    Deactivate,
}

/// A byte-encoded note event
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoteEvent {
    pub kind: NoteEventKind,
    /// `[status | channel, note, velocity]`
    pub bytes: [u8; 3],
    /// Offset from the start of the emitting block, in milliseconds
    pub time_ms: f64,
}

impl NoteEvent {
    pub fn activate(channel: u8, note: u8, velocity: u8, time_ms: f64) -> Self {
        Self {
            kind: NoteEventKind::Activate,
            bytes: [NOTE_ON | (channel & 0x0f), note, velocity],
            time_ms,
        }
    }

    pub fn deactivate(channel: u8, note: u8, velocity: u8, time_ms: f64) -> Self {
        Self {
            kind: NoteEventKind::Deactivate,
            bytes: [NOTE_OFF | (channel & 0x0f), note, velocity],
            time_ms,
        }
    }

    pub fn channel(&self) -> u8 {
        self.bytes[0] & 0x0f
    }

    pub fn note(&self) -> u8 {
        self.bytes[1]
    }

    pub fn velocity(&self) -> u8 {
        self.bytes[2]
    }
}

/// Bounded queue of emitted note events
pub struct EventQueue {
    queue: ArrayQueue<NoteEvent>,
    dropped: AtomicUsize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Push an event, returns false (and counts it) when the queue is full
    pub fn push(&self, event: NoteEvent) -> bool {
        match self.queue.push(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pop(&self) -> Option<NoteEvent> {
        self.queue.pop()
    }

    /// Take every queued event, oldest first
    pub fn drain(&self) -> Vec<NoteEvent> {
        let mut events = Vec::with_capacity(self.queue.len());
        while let Some(event) = self.queue.pop() {
            events.push(event);
        }
        events
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_encoding() {
        let on = NoteEvent::activate(3, 60, 100, 1.5);
        assert_eq!(on.bytes, [0x93, 60, 100]);
        assert_eq!(on.channel(), 3);

        let off = NoteEvent::deactivate(3, 60, 100, 250.0);
        assert_eq!(off.bytes, [0x83, 60, 100]);
        assert_eq!(off.kind, NoteEventKind::Deactivate);
    }

    #[test]
    fn test_queue_counts_drops() {
        let queue = EventQueue::new(2);
        assert!(queue.push(NoteEvent::activate(0, 60, 90, 0.0)));
        assert!(queue.push(NoteEvent::deactivate(0, 60, 90, 10.0)));
        assert!(!queue.push(NoteEvent::activate(0, 62, 90, 0.0)));
        assert_eq!(queue.dropped_count(), 1);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind, NoteEventKind::Activate);
        assert!(queue.is_empty());
    }
}
