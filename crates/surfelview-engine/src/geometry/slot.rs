use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Single-entry mailbox between the producer and the render thread.
///
/// `publish` replaces whatever is pending; `try_consume` takes it. The lock is
/// only held to swap the value, never across upload or draw, and a replaced
/// value is dropped after the lock is released.
#[derive(Debug)]
pub struct StagingSlot<T> {
    pending: Mutex<Option<T>>,
    published: AtomicU64,
    superseded: AtomicU64,
}

impl<T> StagingSlot<T> {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            published: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
        }
    }

    /// Stores `value` as the pending snapshot. Never waits for the consumer.
    pub fn publish(&self, value: T) {
        let replaced = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.replace(value)
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        if replaced.is_some() {
            let n = self.superseded.fetch_add(1, Ordering::Relaxed) + 1;
            log::trace!("staging slot: unconsumed snapshot superseded ({n} total)");
        }
    }

    /// Takes the most recent unconsumed snapshot, if any.
    pub fn try_consume(&self) -> Option<T> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drops any pending snapshot without consuming it.
    pub fn clear(&self) {
        let dropped = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(dropped);
    }

    /// Number of `publish` calls so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of snapshots replaced before anyone consumed them.
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}

impl<T> Default for StagingSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    // ── basic hand-off ────────────────────────────────────────────────────

    #[test]
    fn empty_slot_yields_nothing() {
        let slot: StagingSlot<u32> = StagingSlot::new();
        assert!(!slot.has_pending());
        assert_eq!(slot.try_consume(), None);
    }

    #[test]
    fn consume_takes_the_value_once() {
        let slot = StagingSlot::new();
        slot.publish(1000);
        assert!(slot.has_pending());
        assert_eq!(slot.try_consume(), Some(1000));
        assert_eq!(slot.try_consume(), None);
        assert_eq!(slot.superseded(), 0);
    }

    #[test]
    fn back_to_back_publishes_keep_only_the_last() {
        let slot = StagingSlot::new();
        slot.publish(1000);
        assert_eq!(slot.try_consume(), Some(1000));

        slot.publish(1200);
        slot.publish(1500);
        assert_eq!(slot.try_consume(), Some(1500));
        assert_eq!(slot.try_consume(), None);
        assert_eq!(slot.published(), 3);
        assert_eq!(slot.superseded(), 1);
    }

    #[test]
    fn clear_discards_pending() {
        let slot = StagingSlot::new();
        slot.publish("a");
        slot.clear();
        assert!(!slot.has_pending());
        assert_eq!(slot.superseded(), 0);
    }

    #[test]
    fn replaced_value_is_dropped() {
        let slot = StagingSlot::new();
        let first = Arc::new(1);
        slot.publish(first.clone());
        slot.publish(Arc::new(2));
        assert_eq!(Arc::strong_count(&first), 1);
    }

    // ── threads ───────────────────────────────────────────────────────────

    #[test]
    fn consumer_sees_increasing_values_and_the_final_one() {
        let slot = Arc::new(StagingSlot::new());
        let producer = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                for i in 1..=10_000u64 {
                    slot.publish(i);
                }
            })
        };

        let mut last = 0;
        loop {
            if let Some(v) = slot.try_consume() {
                assert!(v > last, "{v} after {last}");
                last = v;
            }
            if producer.is_finished() && !slot.has_pending() {
                break;
            }
        }
        producer.join().unwrap();
        if let Some(v) = slot.try_consume() {
            last = v;
        }
        assert_eq!(last, 10_000);
        assert_eq!(slot.published(), 10_000);
    }
}
