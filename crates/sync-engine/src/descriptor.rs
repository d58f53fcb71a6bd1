//! `SendDescriptor` and the ordered maps that track outstanding sends and
//! violating receives (spec §3), grounded on
//! `original_source/parallel/paralleltrace.py::SendEvent` and
//! `syncedtracelog.py`'s `RSTableElement`/`SendEvent`.
//!
//! Both `send_events` and `violating_recv_events` must iterate in insertion
//! order and support popping from the front — `Vec`'s linear removal and
//! `HashMap`'s unordered iteration are both wrong here, so we use
//! `indexmap::IndexMap`, the ordered-map crate reached for across the wider
//! example corpus whenever insertion order needs to survive a `HashMap`-like
//! lookup.

use indexmap::IndexMap;

/// One outstanding (or resolved) send: its corrected send time, the
/// receiver it targets, and the receive time once known.
#[derive(Debug, Clone)]
pub struct SendDescriptor {
    pub sent_time: u64,
    pub recv_time: Option<u64>,
    pub receiver: u32,
}

impl SendDescriptor {
    pub fn new(sent_time: u64, receiver: u32) -> Self {
        SendDescriptor {
            sent_time,
            recv_time: None,
            receiver,
        }
    }

    /// Slack available before this send's receiver would see a causality
    /// violation: `recv_time - min_msg_delay - sent_time`. `None` until the
    /// receive has been observed.
    pub fn offset(&self, min_msg_delay: u64) -> Option<i64> {
        self.recv_time
            .map(|r| r as i64 - min_msg_delay as i64 - self.sent_time as i64)
    }

    pub fn refill(&mut self, recv_time: u64) {
        self.recv_time = Some(recv_time);
    }
}

/// `sent_time -> [SendDescriptor, ...]` — a list per key because a
/// multi-send fans one send event out to several receivers sharing the
/// same `sent_time`.
pub type SendEvents = IndexMap<u64, Vec<SendDescriptor>>;

/// `corrected_recv_time -> delta` where `delta = corrected - original > 0`,
/// the receives that had to be pushed forward.
pub type ViolatingRecvEvents = IndexMap<u64, u64>;

pub fn push_send(events: &mut SendEvents, sent_time: u64, receiver: u32) {
    events
        .entry(sent_time)
        .or_insert_with(Vec::new)
        .push(SendDescriptor::new(sent_time, receiver));
}

/// Finds the first not-yet-refilled descriptor for `receiver` at
/// `sent_time` and fills in its receive time.
pub fn refill(events: &mut SendEvents, sent_time: u64, receiver: u32, recv_time: u64) -> bool {
    if let Some(descriptors) = events.get_mut(&sent_time) {
        if let Some(d) = descriptors
            .iter_mut()
            .find(|d| d.receiver == receiver && d.recv_time.is_none())
        {
            d.refill(recv_time);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_fills_matching_descriptor() {
        let mut events = SendEvents::new();
        push_send(&mut events, 100, 1);
        push_send(&mut events, 100, 2);
        assert!(refill(&mut events, 100, 2, 160));
        let descriptors = &events[&100];
        assert_eq!(descriptors[0].recv_time, None);
        assert_eq!(descriptors[1].recv_time, Some(160));
        assert_eq!(descriptors[1].offset(10), Some(50));
    }

    #[test]
    fn preserves_insertion_order() {
        let mut events = SendEvents::new();
        push_send(&mut events, 300, 1);
        push_send(&mut events, 100, 2);
        push_send(&mut events, 200, 3);
        let keys: Vec<u64> = events.keys().copied().collect();
        assert_eq!(keys, vec![300, 100, 200]);
    }
}
