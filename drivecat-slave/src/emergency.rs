//! A bounded queue of emergency messages awaiting transmission
use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;
use portable_atomic::{AtomicU32, Ordering};

use drivecat_common::coe::EmergencyFrame;

/// Emergency error codes raised by the stack itself
pub mod codes {
    /// Sync manager settings refused during a state transition
    pub const SM_CONFIGURATION: u16 = 0x8120;
    /// Process data watchdog expired
    pub const SM_WATCHDOG: u16 = 0x8130;
    /// PDO mapping could not be compiled
    pub const PDO_MAPPING: u16 = 0x8210;
    /// A unit conversion failed during cyclic exchange
    pub const UNIT_CONVERSION: u16 = 0xFF10;
}

/// A bounded queue of emergency messages
///
/// Messages are raised from any context, held until the mailbox can accept
/// them, and dropped (counted, never reported to the master as an error) when
/// the queue is full. Queue storage is fixed; the free list is the spare
/// capacity of the queue.
#[allow(missing_debug_implementations)]
pub struct EmcyQueue<const N: usize = 8> {
    queue: Mutex<RefCell<Deque<EmergencyFrame, N>>>,
    dropped: AtomicU32,
}

impl<const N: usize> Default for EmcyQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EmcyQueue<N> {
    /// Create a new, empty queue
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Deque::new())),
            dropped: AtomicU32::new(0),
        }
    }

    /// Queue an emergency message for transmission
    ///
    /// Returns false if no free message slot was available; the message is
    /// dropped and counted.
    pub fn raise(&self, code: u16, register: u8, data: [u8; 4]) -> bool {
        let frame = EmergencyFrame {
            code,
            register,
            data,
        };
        let ok = critical_section::with(|cs| {
            self.queue.borrow_ref_mut(cs).push_back(frame).is_ok()
        });
        if !ok {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Take the oldest queued message for transmission
    pub fn pop(&self) -> Option<EmergencyFrame> {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).pop_front())
    }

    /// Return a message taken with [`pop`](Self::pop) that could not be
    /// transmitted, keeping its place at the head of the queue
    pub fn requeue_front(&self, frame: EmergencyFrame) {
        critical_section::with(|cs| {
            self.queue.borrow_ref_mut(cs).push_front(frame).ok();
        });
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).len())
    }

    /// True when no messages are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages dropped because the queue was full
    pub fn dropped_count(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_drops_when_full() {
        let queue: EmcyQueue<2> = EmcyQueue::new();
        assert!(queue.raise(codes::SM_WATCHDOG, 0x10, [0; 4]));
        assert!(queue.raise(codes::PDO_MAPPING, 0x10, [1; 4]));
        assert!(!queue.raise(codes::UNIT_CONVERSION, 0x10, [2; 4]));
        assert_eq!(1, queue.dropped_count());

        let first = queue.pop().unwrap();
        assert_eq!(codes::SM_WATCHDOG, first.code);
        // A freed slot accepts a new message again
        assert!(queue.raise(codes::UNIT_CONVERSION, 0x10, [2; 4]));
    }

    #[test]
    fn test_requeue_preserves_order() {
        let queue: EmcyQueue<4> = EmcyQueue::new();
        queue.raise(0x1000, 0, [0; 4]);
        queue.raise(0x2000, 0, [0; 4]);
        let first = queue.pop().unwrap();
        queue.requeue_front(first);
        assert_eq!(0x1000, queue.pop().unwrap().code);
        assert_eq!(0x2000, queue.pop().unwrap().code);
        assert!(queue.pop().is_none());
    }
}
