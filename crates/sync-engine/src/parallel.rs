//! Parallel Coordinator (spec §4.6): one synchronizer per worker process,
//! driven over a `Transport`. Grounded on
//! `original_source/parallel/paralleltrace.py::ParallelSyncedTrace`,
//! generalized from its MPI `communicator.irecv`/`isend` calls to the
//! `Transport` trait so the same coordinator logic runs over TCP.

use crate::error::SyncResult;
use crate::event::Kind;
use crate::reader::TraceFile;
use crate::synchronizer::{SyncConfig, Synchronizer};
use crate::transport::{Tag, Transport};
use std::collections::VecDeque;
use tracing::{debug, info};

/// A send whose BACK_AMORT refill is still outstanding, tracked in the
/// order it was posted so it can be drained front-to-back at shutdown.
struct PendingRefill {
    sent_time: u64,
    target: u32,
}

pub struct ParallelCoordinator<T: Transport> {
    synchronizer: Synchronizer,
    transport: T,
    config: SyncConfig,
    pending_refills: VecDeque<PendingRefill>,
}

impl<T: Transport> ParallelCoordinator<T> {
    /// `time_offset` is the value computed from the rank-0 gather/scatter of
    /// every process's `inittime` (spec §4.6 init phase); the caller
    /// performs that exchange since it is itself a transport round-trip
    /// distinct from the per-event MAIN/BACK_AMORT traffic below.
    pub fn new(process_id: u32, trace: TraceFile, config: SyncConfig, time_offset: u64, transport: T) -> Self {
        let mut synchronizer = Synchronizer::new(process_id, trace, config);
        synchronizer.set_time_offset(time_offset);
        ParallelCoordinator {
            synchronizer,
            transport,
            config,
            pending_refills: VecDeque::new(),
        }
    }

    pub async fn run(&mut self) -> SyncResult<()> {
        while let Some(kind) = self.synchronizer.next_event_kind() {
            match kind {
                Kind::Receive => {
                    let sender = self
                        .synchronizer
                        .next_event_sender_if_receive()
                        .expect("receive event must carry an origin id");
                    let sent_time = self.transport.recv_main(sender).await?;
                    let processed = self.synchronizer.process_receive(sent_time)?;
                    if self.config.backward_amort {
                        self.transport
                            .send(sender, Tag::BackAmort, processed.corrected_time)?;
                    }
                }
                _ => {
                    let processed = self.synchronizer.process_event()?;
                    if processed.kind.is_send() {
                        for &target in &processed.targets {
                            self.transport.send(target, Tag::Main, processed.corrected_time)?;
                            if self.config.backward_amort {
                                self.pending_refills.push_back(PendingRefill {
                                    sent_time: processed.corrected_time,
                                    target,
                                });
                            }
                        }
                    }
                }
            }

            self.drain_ready_refills()?;
        }

        if self.config.backward_amort {
            self.drain_all_refills().await?;
            self.synchronizer.do_backward_amortization();
        }

        info!(process = self.synchronizer.process_id, "parallel synchronization complete");
        Ok(())
    }

    /// Non-blocking poll of outstanding BACK_AMORT refills, from the front
    /// of the pending list — matches spec §4.6's "probe the pending list
    /// from the front" rule.
    fn drain_ready_refills(&mut self) -> SyncResult<()> {
        while let Some(front) = self.pending_refills.front() {
            match self.transport.try_recv_back_amort(front.target)? {
                Some(received_time) => {
                    let front = self.pending_refills.pop_front().unwrap();
                    self.synchronizer
                        .refill_received_time(front.sent_time, received_time, front.target);
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Blocking drain of every outstanding refill at shutdown.
    async fn drain_all_refills(&mut self) -> SyncResult<()> {
        while let Some(front) = self.pending_refills.pop_front() {
            debug!(
                process = self.synchronizer.process_id,
                sent_time = front.sent_time,
                target = front.target,
                "draining outstanding back-amortization refill"
            );
            let received_time = self.transport.recv_back_amort(front.target).await?;
            self.synchronizer
                .refill_received_time(front.sent_time, received_time, front.target);
        }
        Ok(())
    }

    pub fn export_bytes(&self) -> Vec<u8> {
        self.synchronizer.export_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEvent;
    use crate::header::KttHeader;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory fake transport: two coordinators share one `FakeNetwork`
    /// so a test can drive both sides of a send/receive pair without TCP.
    struct FakeNetwork {
        main: Mutex<HashMap<(u32, u32), VecDeque<u64>>>,
        back: Mutex<HashMap<(u32, u32), VecDeque<u64>>>,
    }

    struct FakeTransport<'a> {
        rank: u32,
        net: &'a FakeNetwork,
    }

    impl<'a> Transport for FakeTransport<'a> {
        fn send(&self, to: u32, tag: Tag, value: u64) -> SyncResult<()> {
            let map = match tag {
                Tag::Main => &self.net.main,
                Tag::BackAmort => &self.net.back,
            };
            map.lock().unwrap().entry((self.rank, to)).or_default().push_back(value);
            Ok(())
        }

        async fn recv_main(&self, from: u32) -> SyncResult<u64> {
            loop {
                if let Some(v) = self
                    .net
                    .main
                    .lock()
                    .unwrap()
                    .get_mut(&(from, self.rank))
                    .and_then(|q| q.pop_front())
                {
                    return Ok(v);
                }
                tokio::task::yield_now().await;
            }
        }

        fn try_recv_back_amort(&self, from: u32) -> SyncResult<Option<u64>> {
            Ok(self
                .net
                .back
                .lock()
                .unwrap()
                .get_mut(&(from, self.rank))
                .and_then(|q| q.pop_front()))
        }

        async fn recv_back_amort(&self, from: u32) -> SyncResult<u64> {
            loop {
                if let Some(v) = self.try_recv_back_amort(from)? {
                    return Ok(v);
                }
                tokio::task::yield_now().await;
            }
        }
    }

    fn trace(init_time: u64, events: Vec<RawEvent>) -> TraceFile {
        let mut header = KttHeader::default();
        header.entries.push(("inittime".into(), init_time.to_string()));
        TraceFile {
            header,
            header_bytes: Vec::new(),
            events,
            init_time,
        }
    }

    fn send_event(time: u64, target: u32) -> RawEvent {
        let mut e = RawEvent::new(Kind::Send, time, Vec::new());
        e.targets = vec![target];
        e
    }

    fn recv_event(time: u64, origin: u32) -> RawEvent {
        let mut e = RawEvent::new(Kind::Receive, time, Vec::new());
        e.origin = Some(origin);
        e
    }

    #[tokio::test]
    async fn two_rank_send_receive_enforces_delay() {
        let net = FakeNetwork {
            main: Mutex::new(HashMap::new()),
            back: Mutex::new(HashMap::new()),
        };
        let config = SyncConfig {
            min_event_diff: 0,
            min_msg_delay: 50,
            forward_amort: true,
            backward_amort: true,
        };

        let mut sender_coord = ParallelCoordinator::new(
            0,
            trace(0, vec![send_event(10, 1)]),
            config,
            0,
            FakeTransport { rank: 0, net: &net },
        );
        let mut receiver_coord = ParallelCoordinator::new(
            1,
            trace(0, vec![recv_event(15, 0)]),
            config,
            0,
            FakeTransport { rank: 1, net: &net },
        );

        let (send_result, recv_result) = tokio::join!(sender_coord.run(), receiver_coord.run());
        send_result.unwrap();
        recv_result.unwrap();
    }
}
