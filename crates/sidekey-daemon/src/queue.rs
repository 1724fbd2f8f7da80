//! Bounded keyboard event queue
//!
//! A fixed-capacity ring buffer decoupling the two keyboard-event producers
//! (keyboard input worker and mouse I/O worker) from the single keyboard
//! output worker. One mutex protects the slots and both indices end to end;
//! a condvar provides the blocking dequeue. Because the consumer re-checks
//! the emptiness predicate after every wakeup, `drain()` needs no separate
//! signal bookkeeping: a consumer woken after a drain simply goes back to
//! waiting.
//!
//! The buffer holds `capacity - 1` events: it is full when advancing the
//! write index would make it equal the read index, and empty when the two
//! indices are equal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use evdev::{EventType, InputEvent};
use thiserror::Error;

use sidekey_config::OverflowPolicy;

/// Returned by `enqueue` under the `abort` overflow policy. Carries the
/// buffer indices so the log line is enough to diagnose a sizing bug.
#[derive(Debug, Error)]
#[error(
    "keyboard event queue overflow (write_index={write_index}, read_index={read_index}, capacity={capacity})"
)]
pub struct QueueOverflow {
    pub write_index: usize,
    pub read_index: usize,
    pub capacity: usize,
}

pub struct EventQueue {
    ring: Mutex<Ring>,
    ready: Condvar,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

struct Ring {
    slots: Box<[InputEvent]>,
    write_index: usize,
    read_index: usize,
}

impl Ring {
    fn next(&self, index: usize) -> usize {
        (index + 1) & (self.slots.len() - 1)
    }

    fn is_empty(&self) -> bool {
        self.write_index == self.read_index
    }

    fn is_full(&self) -> bool {
        self.next(self.write_index) == self.read_index
    }

    fn len(&self) -> usize {
        self.write_index.wrapping_sub(self.read_index) & (self.slots.len() - 1)
    }
}

impl EventQueue {
    /// Create a queue with at least `capacity` slots, rounded up to a power
    /// of two. The right production value depends on the worst-case producer
    /// burst before the consumer is scheduled; it is configurable rather
    /// than hard-coded.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let filler = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        Self {
            ring: Mutex::new(Ring {
                slots: vec![filler; capacity].into_boxed_slice(),
                write_index: 0,
                read_index: 0,
            }),
            ready: Condvar::new(),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // A poisoned lock means a panic elsewhere; the indices are still
        // consistent because every mutation is a single store.
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer side. On overflow the configured policy applies: `abort`
    /// returns the error for the caller to escalate, `drop` logs, counts and
    /// discards the event.
    pub fn enqueue(&self, event: InputEvent) -> Result<(), QueueOverflow> {
        let mut ring = self.lock();

        if ring.is_full() {
            return match self.policy {
                OverflowPolicy::Abort => Err(QueueOverflow {
                    write_index: ring.write_index,
                    read_index: ring.read_index,
                    capacity: ring.slots.len(),
                }),
                OverflowPolicy::Drop => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        "keyboard event queue full, dropping event (type={:?}, code={}, value={}, write_index={}, read_index={}, dropped_total={})",
                        event.event_type(),
                        event.code(),
                        event.value(),
                        ring.write_index,
                        ring.read_index,
                        dropped
                    );
                    Ok(())
                }
            };
        }

        let write_index = ring.write_index;
        ring.slots[write_index] = event;
        ring.write_index = ring.next(write_index);
        drop(ring);

        self.ready.notify_one();
        Ok(())
    }

    /// Consumer side. Blocks until an event is available.
    pub fn dequeue(&self) -> InputEvent {
        let mut ring = self.lock();
        loop {
            if !ring.is_empty() {
                let read_index = ring.read_index;
                let event = ring.slots[read_index];
                ring.read_index = ring.next(read_index);
                return event;
            }
            ring = self
                .ready
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Discard all buffered-but-unconsumed events. Called by the keyboard
    /// input worker while its session is being reopened, so stale
    /// pre-disconnect events are never replayed. Safe to call while the
    /// consumer is blocked in `dequeue()`.
    pub fn drain(&self) {
        let discarded = {
            let mut ring = self.lock();
            let discarded = ring.len();
            ring.read_index = ring.write_index;
            discarded
        };
        if discarded > 0 {
            tracing::info!(
                "keyboard event queue cleared ({} buffered events discarded)",
                discarded
            );
        }
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Total events discarded under the `drop` overflow policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
