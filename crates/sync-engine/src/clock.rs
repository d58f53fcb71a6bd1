//! Clock Repair — the pure per-event timestamp correction rules (spec §4.1).
//!
//! Grounded on `original_source/sequential/syncedtracelog.py::_clock` and
//! `_clock_receive`. Both functions are pure: callers own the mutable
//! `last_event_time` and pass it in, so the same rule can be exercised from
//! the sequential coordinator, the parallel coordinator, and unit tests
//! without any shared state.

/// Corrects an internal (non-receive) event's timestamp.
///
/// `last_event_time` is `0` before the process's first event.
pub fn repair_internal(raw_time: u64, last_event_time: u64, min_event_diff: u64) -> u64 {
    if last_event_time == 0 {
        raw_time
    } else {
        raw_time.max(last_event_time + min_event_diff)
    }
}

/// Corrects a receive event's timestamp against its paired (already
/// corrected) send time.
pub fn repair_receive(
    raw_time: u64,
    sent_time: u64,
    last_event_time: u64,
    min_event_diff: u64,
    min_msg_delay: u64,
) -> u64 {
    let floor = sent_time + min_msg_delay;
    if last_event_time == 0 {
        floor.max(raw_time)
    } else {
        floor.max(raw_time).max(last_event_time + min_event_diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_internal_event_passes_through() {
        assert_eq!(repair_internal(100, 0, 10), 100);
    }

    #[test]
    fn internal_event_respects_minimum_gap() {
        assert_eq!(repair_internal(5, 100, 10), 110);
        assert_eq!(repair_internal(200, 100, 10), 200);
    }

    #[test]
    fn receive_respects_message_delay_floor() {
        // sent at 100, delay 50 -> floor 150, raw 120 -> corrected 150
        assert_eq!(repair_receive(120, 100, 0, 10, 50), 150);
    }

    #[test]
    fn receive_respects_both_floors() {
        // last_event_time=200, min_event_diff=10 -> internal floor 210
        // sent=50, min_msg_delay=5 -> msg floor 55
        // raw=60
        assert_eq!(repair_receive(60, 50, 200, 10, 5), 210);
    }
}
