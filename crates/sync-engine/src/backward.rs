//! Backward amortization (spec §4.4): a single end-of-run post-pass that
//! raises earlier events in a process to absorb slack injected by a
//! violating receive, bounded by each send's own slack to its receiver.
//!
//! This is the *only* backward amortization implementation in this engine.
//! The reference Python carries two different in-line, per-receive variants
//! (`syncedtracelog.py::_backward_amortization`'s `Messenger`-callback
//! version and `paralleltrace.py::_backward_amortization`'s MPI-gated
//! version) that mutate `data_list` while the main loop is still running.
//! Both are superseded here by the post-pass invoked once after a process's
//! trace is fully read (see Open Question decision 1 in `DESIGN.md`) — it
//! is simpler to reason about and produces the same non-decrease guarantee
//! (P8) without needing to keep `send_events`' keys in sync mid-walk.

use crate::descriptor::{SendEvents, ViolatingRecvEvents};
use crate::event::{Kind, RawEvent};

pub fn run(
    data_list: &mut [RawEvent],
    send_events: &mut SendEvents,
    violating_recv_events: &ViolatingRecvEvents,
    last_violating_recv_index: Option<usize>,
    min_msg_delay: u64,
) {
    if violating_recv_events.is_empty() {
        return;
    }
    let Some(last_idx) = last_violating_recv_index else {
        return;
    };

    collapse_multi_sends(send_events, min_msg_delay);

    let (_, &last_delta) = violating_recv_events
        .last()
        .expect("checked non-empty above");
    let mut offset: i64 = last_delta as i64;

    if last_idx == 0 {
        return;
    }

    let mut i = last_idx - 1;
    loop {
        let event = &mut data_list[i];
        let pre_shift_time = event.time;

        if event.kind == Kind::Send || event.kind == Kind::MultiSend {
            if let Some(descriptors) = send_events.get(&pre_shift_time) {
                if let Some(d) = descriptors.first() {
                    if let Some(max_offset) = d.offset(min_msg_delay) {
                        if max_offset < offset {
                            offset = max_offset;
                        }
                    }
                }
            }
        }

        event.time = (event.time as i64 + offset).max(0) as u64;

        if event.kind == Kind::Receive {
            if let Some(&delta) = violating_recv_events.get(&pre_shift_time) {
                offset += delta as i64;
            }
        }

        if i == 0 {
            break;
        }
        i -= 1;
    }
}

/// Collapses each multi-send's descriptor list down to the single
/// descriptor with the smallest slack, since that is the tightest bound on
/// how far this send may still be shifted.
fn collapse_multi_sends(send_events: &mut SendEvents, min_msg_delay: u64) {
    for descriptors in send_events.values_mut() {
        if descriptors.len() <= 1 {
            continue;
        }
        let min_idx = descriptors
            .iter()
            .enumerate()
            .min_by_key(|(_, d)| d.offset(min_msg_delay).unwrap_or(i64::MAX))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let kept = descriptors[min_idx].clone();
        descriptors.clear();
        descriptors.push(kept);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{self, SendEvents};

    fn internal(kind: Kind, time: u64) -> RawEvent {
        RawEvent::new(kind, time, Vec::new())
    }

    #[test]
    fn raises_earlier_events_bounded_by_send_slack() {
        // process: T@0, M@10 (slack to receiver = 20), R@100 (violating, delta=30)
        let mut data_list = vec![internal(Kind::Fired, 0), internal(Kind::Send, 10), internal(Kind::Receive, 100)];
        let mut send_events = SendEvents::new();
        descriptor::push_send(&mut send_events, 10, 99);
        descriptor::refill(&mut send_events, 10, 99, 10 + 0 + 20); // offset = recv - delay(0) - sent(10) = 20
        let mut violating = ViolatingRecvEvents::new();
        violating.insert(100, 30);

        run(&mut data_list, &mut send_events, &violating, Some(2), 0);

        // offset starts at 30, but send's own slack (20) bounds it before shifting the send
        assert_eq!(data_list[1].time, 10 + 20);
        // the Fired event before it also gets the (now 20) offset
        assert_eq!(data_list[0].time, 0 + 20);
    }

    #[test]
    fn zero_slack_send_does_not_stop_the_walk() {
        // process: T@0, R@10 (itself violating, delta=5), M@20 (slack to
        // receiver = 0), R@100 (most recent violation, delta=30, index 3).
        // A zero-slack send must not cut the walk short — R@10 still raises
        // offset back up via its own violation delta, so T@0 moves too.
        let mut data_list = vec![
            internal(Kind::Fired, 0),
            internal(Kind::Receive, 10),
            internal(Kind::Send, 20),
            internal(Kind::Receive, 100),
        ];
        let mut send_events = SendEvents::new();
        descriptor::push_send(&mut send_events, 20, 99);
        descriptor::refill(&mut send_events, 20, 99, 20); // offset = 20 - 0 - 20 = 0
        let mut violating = ViolatingRecvEvents::new();
        violating.insert(10, 5);
        violating.insert(100, 30);

        run(&mut data_list, &mut send_events, &violating, Some(3), 0);

        assert_eq!(data_list[2].time, 20); // send clamped to zero slack
        assert_eq!(data_list[1].time, 10); // receive shifted by 0, then offset += 5
        assert_eq!(data_list[0].time, 5); // fired picks up the restored offset
    }

    #[test]
    fn no_violations_is_a_no_op() {
        let mut data_list = vec![internal(Kind::Fired, 0)];
        let mut send_events = SendEvents::new();
        let violating = ViolatingRecvEvents::new();
        run(&mut data_list, &mut send_events, &violating, None, 0);
        assert_eq!(data_list[0].time, 0);
    }
}
