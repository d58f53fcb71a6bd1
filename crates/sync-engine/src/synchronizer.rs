//! Per-Process Synchronizer (spec §4.2).
//!
//! Owns one process's parsed trace, drives Clock Repair one event at a
//! time, and accumulates the rewritten event list plus the bookkeeping
//! backward amortization needs. Grounded on
//! `original_source/sequential/syncedtracelog.py::SyncedTrace` — the offset
//! tracking, `send_events`/`violating_recv_events` fields, and the
//! clock/amortization call sequence all follow that class, generalized away
//! from its shared in-process `Queue`-based message passing (replaced here
//! by a `Coordinator` that owns routing).

use crate::backward;
use crate::clock;
use crate::descriptor::{self, SendEvents, ViolatingRecvEvents};
use crate::error::{SyncError, SyncResult};
use crate::event::{Kind, RawEvent};
use crate::header::KttHeader;
use crate::reader::TraceFile;
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub min_event_diff: u64,
    pub min_msg_delay: u64,
    pub forward_amort: bool,
    pub backward_amort: bool,
}

/// The result of advancing the synchronizer by one event, handed back to
/// the Coordinator so it can route sends and schedule the next process.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub kind: Kind,
    pub corrected_time: u64,
    /// Populated for `Send`/`MultiSend`: the receivers this event targets.
    pub targets: Vec<u32>,
}

pub struct Synchronizer {
    pub process_id: u32,
    config: SyncConfig,
    events: Vec<RawEvent>,
    cursor: usize,
    header: KttHeader,
    header_bytes: Vec<u8>,
    init_time: u64,

    time_offset: u64,
    last_event_time: u64,
    last_recv_event_time: u64,
    last_received_sent_time: u64,

    data_list: Vec<RawEvent>,
    send_events: SendEvents,
    violating_recv_events: ViolatingRecvEvents,
    last_violating_recv_index: Option<usize>,
}

impl Synchronizer {
    pub fn new(process_id: u32, trace: TraceFile, config: SyncConfig) -> Self {
        Synchronizer {
            process_id,
            config,
            events: trace.events,
            cursor: 0,
            header: trace.header,
            header_bytes: trace.header_bytes,
            init_time: trace.init_time,
            time_offset: 0,
            last_event_time: 0,
            last_recv_event_time: 0,
            last_received_sent_time: 0,
            data_list: Vec::new(),
            send_events: SendEvents::new(),
            violating_recv_events: ViolatingRecvEvents::new(),
            last_violating_recv_index: None,
        }
    }

    pub fn get_init_time(&self) -> u64 {
        self.init_time
    }

    pub fn set_time_offset(&mut self, offset: u64) {
        self.time_offset = offset;
    }

    pub fn is_at_end(&self) -> bool {
        self.cursor >= self.events.len()
    }

    pub fn next_event_kind(&self) -> Option<Kind> {
        self.events.get(self.cursor).map(|e| e.kind)
    }

    pub fn next_event_original_time(&self) -> Option<u64> {
        self.events.get(self.cursor).map(|e| e.time)
    }

    /// Peeks the sender id of the next event, if it is a receive.
    pub fn next_event_sender_if_receive(&self) -> Option<u32> {
        self.events.get(self.cursor).and_then(|e| {
            if e.kind == Kind::Receive {
                e.origin
            } else {
                None
            }
        })
    }

    pub fn last_recv_event_time(&self) -> u64 {
        self.last_recv_event_time
    }

    /// Advances past an internal (non-receive) event. Errors if the next
    /// event is a receive — callers must check `next_event_kind()` first.
    pub fn process_event(&mut self) -> SyncResult<ProcessedEvent> {
        let idx = self.cursor;
        let raw = self.events[idx].clone();
        if raw.kind == Kind::Receive {
            return Err(SyncError::Causality {
                process: self.process_id,
                detail: "process_event called on a receive; use process_receive".into(),
            });
        }
        self.cursor += 1;

        let adjusted = raw.time + self.time_offset;
        let corrected = clock::repair_internal(adjusted, self.last_event_time, self.config.min_event_diff);
        self.last_event_time = corrected;

        trace!(process = self.process_id, kind = ?raw.kind, corrected, "processed internal event");

        let mut event = raw.clone();
        event.time = corrected;

        if event.kind.is_send() {
            for &target in &event.targets {
                descriptor::push_send(&mut self.send_events, corrected, target);
            }
        }

        let out = ProcessedEvent {
            kind: event.kind,
            corrected_time: corrected,
            targets: event.targets.clone(),
        };
        self.data_list.push(event);
        Ok(out)
    }

    /// Advances past a receive event, given the (already corrected)
    /// `sent_time` of its counterpart send, as resolved by the Coordinator.
    pub fn process_receive(&mut self, sent_time: u64) -> SyncResult<ProcessedEvent> {
        let idx = self.cursor;
        let raw = self.events[idx].clone();
        if raw.kind != Kind::Receive {
            return Err(SyncError::Causality {
                process: self.process_id,
                detail: "process_receive called on a non-receive event".into(),
            });
        }
        self.cursor += 1;

        let adjusted = raw.time + self.time_offset;
        let corrected = clock::repair_receive(
            adjusted,
            sent_time,
            self.last_event_time,
            self.config.min_event_diff,
            self.config.min_msg_delay,
        );

        if corrected > adjusted {
            let slack = corrected - adjusted;
            if self.config.forward_amort {
                self.time_offset += slack;
            }
            if self.config.backward_amort {
                self.violating_recv_events.insert(corrected, slack);
            }
        }

        self.last_event_time = corrected;
        self.last_recv_event_time = corrected;
        self.last_received_sent_time = sent_time;

        let mut event = raw.clone();
        event.time = corrected;
        self.data_list.push(event);

        if corrected > adjusted && self.config.backward_amort {
            self.last_violating_recv_index = Some(self.data_list.len() - 1);
        }

        debug!(
            process = self.process_id,
            sent_time, corrected, "processed receive event"
        );

        Ok(ProcessedEvent {
            kind: Kind::Receive,
            corrected_time: corrected,
            targets: Vec::new(),
        })
    }

    /// Called by the Coordinator once the counterpart receive for a prior
    /// send from this process has been synchronized, so backward
    /// amortization can bound how far that send may still move.
    pub fn refill_received_time(&mut self, sent_time: u64, received_time: u64, receiver: u32) {
        descriptor::refill(&mut self.send_events, sent_time, receiver, received_time);
    }

    pub fn do_backward_amortization(&mut self) {
        if !self.config.backward_amort {
            return;
        }
        backward::run(
            &mut self.data_list,
            &mut self.send_events,
            &self.violating_recv_events,
            self.last_violating_recv_index,
            self.config.min_msg_delay,
        );
    }

    pub fn export_bytes(&self) -> Vec<u8> {
        let mut out = self.header_bytes.clone();
        for event in &self.data_list {
            out.push(event.tag);
            let mut time_bytes = [0u8; 8];
            LittleEndian::write_u64(&mut time_bytes, event.time);
            out.extend_from_slice(&time_bytes);
            out.extend_from_slice(&event.payload);
        }
        out
    }

    pub fn header(&self) -> &KttHeader {
        &self.header
    }
}
