//! Point-to-point transport for the Parallel Coordinator (spec §4.6).
//!
//! One persistent TCP connection per peer pair, multiplexing two logical
//! channels over it via a one-byte tag: `MAIN` carries forward send times,
//! `BACK_AMORT` carries the receive-time refills backward amortization
//! needs. Framing and task split (`read_task`/`write_task` over
//! `OwnedReadHalf`/`OwnedWriteHalf`, fed by an `UnboundedSender`) follow
//! `examples/neatsys-boson-circuit/src/net/session.rs`'s `TcpControl`; our
//! messages are a fixed 9 bytes (tag + little-endian u64) rather than that
//! crate's variable-length buffers, since every message here is a single
//! timestamp.
//!
//! Connection setup: the lower-ranked side of each pair dials out and
//! announces its rank as a 4-byte preamble; the higher-ranked side's
//! listener accepts and demultiplexes by the announced rank. This keeps
//! exactly one connection per pair regardless of process count, mirroring
//! `TcpControl`'s "at most one connection between each pair of addresses"
//! invariant.

use crate::error::{SyncError, SyncResult};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const TAG_MAIN: u8 = 0;
const TAG_BACK_AMORT: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Main,
    BackAmort,
}

impl Tag {
    fn byte(self) -> u8 {
        match self {
            Tag::Main => TAG_MAIN,
            Tag::BackAmort => TAG_BACK_AMORT,
        }
    }
}

struct PeerLink {
    out_tx: UnboundedSender<(u8, u64)>,
}

/// The transport surface the Parallel Coordinator drives against. `TcpTransport`
/// is the only production implementation; the trait exists so coordinator
/// logic in `parallel.rs` can be exercised against an in-memory fake in tests.
pub trait Transport: Send + Sync {
    fn send(&self, to: u32, tag: Tag, value: u64) -> SyncResult<()>;
    fn recv_main(&self, from: u32) -> impl std::future::Future<Output = SyncResult<u64>> + Send;
    fn try_recv_back_amort(&self, from: u32) -> SyncResult<Option<u64>>;
    fn recv_back_amort(&self, from: u32) -> impl std::future::Future<Output = SyncResult<u64>> + Send;
}

impl Transport for TcpTransport {
    fn send(&self, to: u32, tag: Tag, value: u64) -> SyncResult<()> {
        TcpTransport::send(self, to, tag, value)
    }

    async fn recv_main(&self, from: u32) -> SyncResult<u64> {
        TcpTransport::recv_main(self, from).await
    }

    fn try_recv_back_amort(&self, from: u32) -> SyncResult<Option<u64>> {
        TcpTransport::try_recv_back_amort(self, from)
    }

    async fn recv_back_amort(&self, from: u32) -> SyncResult<u64> {
        TcpTransport::recv_back_amort(self, from).await
    }
}

/// A connected mesh of per-rank TCP links, demultiplexed into MAIN and
/// BACK_AMORT inboxes per peer.
pub struct TcpTransport {
    rank: u32,
    links: HashMap<u32, PeerLink>,
    main_inboxes: HashMap<u32, Mutex<UnboundedReceiver<u64>>>,
    back_inboxes: HashMap<u32, Mutex<UnboundedReceiver<u64>>>,
}

impl TcpTransport {
    /// Connects this rank to every peer in `peers` (indexed by rank). Lower
    /// ranks dial out; this rank's listener accepts connections from every
    /// rank below it.
    pub async fn connect(rank: u32, peers: &[SocketAddr]) -> SyncResult<Self> {
        let size = peers.len() as u32;
        let listener = TcpListener::bind(peers[rank as usize])
            .await
            .map_err(SyncError::Io)?;

        let mut main_inboxes = HashMap::new();
        let mut back_inboxes = HashMap::new();
        let mut links = HashMap::new();

        // Accept connections from every lower rank first so dial-outs below
        // don't race an unbounded accept loop.
        let expected_incoming = rank;
        let mut accepted = 0u32;
        let mut accept_fut = Box::pin(async {
            let mut incoming = Vec::new();
            while accepted < expected_incoming {
                let (stream, remote) = listener.accept().await.map_err(SyncError::Io)?;
                incoming.push((stream, remote));
                accepted += 1;
            }
            Ok::<_, SyncError>(incoming)
        });

        let mut outgoing = Vec::new();
        for peer in (rank + 1)..size {
            outgoing.push(peer);
        }

        let incoming = (&mut accept_fut).await?;
        for (stream, remote) in incoming {
            let peer_rank = read_preamble(&stream).await?;
            debug!(rank, peer_rank, ?remote, "accepted peer connection");
            let (out_tx, main_rx, back_rx) = spawn_link(stream, peer_rank);
            links.insert(peer_rank, PeerLink { out_tx });
            main_inboxes.insert(peer_rank, Mutex::new(main_rx));
            back_inboxes.insert(peer_rank, Mutex::new(back_rx));
        }

        for peer_rank in outgoing {
            let stream = dial_with_retry(peers[peer_rank as usize]).await?;
            write_preamble(&stream, rank).await?;
            debug!(rank, peer_rank, "dialed peer connection");
            let (out_tx, main_rx, back_rx) = spawn_link(stream, peer_rank);
            links.insert(peer_rank, PeerLink { out_tx });
            main_inboxes.insert(peer_rank, Mutex::new(main_rx));
            back_inboxes.insert(peer_rank, Mutex::new(back_rx));
        }

        Ok(TcpTransport {
            rank,
            links,
            main_inboxes,
            back_inboxes,
        })
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Non-blocking: enqueues the value for delivery and returns immediately.
    pub fn send(&self, to: u32, tag: Tag, value: u64) -> SyncResult<()> {
        let link = self.links.get(&to).ok_or_else(|| SyncError::Transport {
            from: self.rank,
            to,
            detail: "no connection to peer".into(),
        })?;
        link.out_tx.send((tag.byte(), value)).map_err(|_| SyncError::Transport {
            from: self.rank,
            to,
            detail: "peer connection closed".into(),
        })
    }

    /// Blocking receive of the next MAIN-tagged value from `from`.
    pub async fn recv_main(&self, from: u32) -> SyncResult<u64> {
        let mut rx = self
            .main_inboxes
            .get(&from)
            .ok_or_else(|| SyncError::Transport {
                from,
                to: self.rank,
                detail: "no connection to peer".into(),
            })?
            .lock()
            .await;
        rx.recv().await.ok_or_else(|| SyncError::Transport {
            from,
            to: self.rank,
            detail: "connection closed before message arrived".into(),
        })
    }

    /// Non-blocking poll of the next BACK_AMORT-tagged value from `from`.
    pub fn try_recv_back_amort(&self, from: u32) -> SyncResult<Option<u64>> {
        let mut rx = self
            .back_inboxes
            .get(&from)
            .ok_or_else(|| SyncError::Transport {
                from,
                to: self.rank,
                detail: "no connection to peer".into(),
            })?
            .try_lock()
            .map_err(|_| SyncError::Transport {
                from,
                to: self.rank,
                detail: "back-amortization inbox busy".into(),
            })?;
        match rx.try_recv() {
            Ok(v) => Ok(Some(v)),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => Ok(None),
        }
    }

    /// Blocking drain of the next BACK_AMORT-tagged value from `from`, used
    /// when a process must wait for all outstanding refills at shutdown.
    pub async fn recv_back_amort(&self, from: u32) -> SyncResult<u64> {
        let mut rx = self
            .back_inboxes
            .get(&from)
            .ok_or_else(|| SyncError::Transport {
                from,
                to: self.rank,
                detail: "no connection to peer".into(),
            })?
            .lock()
            .await;
        rx.recv().await.ok_or_else(|| SyncError::Transport {
            from,
            to: self.rank,
            detail: "connection closed before back-amortization refill arrived".into(),
        })
    }
}

fn spawn_link(
    stream: TcpStream,
    peer_rank: u32,
) -> (
    UnboundedSender<(u8, u64)>,
    UnboundedReceiver<u64>,
    UnboundedReceiver<u64>,
) {
    let (read, write) = stream.into_split();
    let (out_tx, out_rx) = unbounded_channel::<(u8, u64)>();
    let (main_tx, main_rx) = unbounded_channel::<u64>();
    let (back_tx, back_rx) = unbounded_channel::<u64>();

    tokio::spawn(write_task(write, out_rx, peer_rank));
    tokio::spawn(read_task(read, main_tx, back_tx, peer_rank));

    (out_tx, main_rx, back_rx)
}

async fn write_task(
    mut stream: tokio::net::tcp::OwnedWriteHalf,
    mut receiver: UnboundedReceiver<(u8, u64)>,
    peer_rank: u32,
) {
    while let Some((tag, value)) = receiver.recv().await {
        let mut frame = [0u8; 9];
        frame[0] = tag;
        LittleEndian::write_u64(&mut frame[1..], value);
        if let Err(err) = stream.write_all(&frame).await {
            warn!(peer_rank, %err, "write_task: connection error");
            break;
        }
    }
}

async fn read_task(
    mut stream: tokio::net::tcp::OwnedReadHalf,
    main_tx: UnboundedSender<u64>,
    back_tx: UnboundedSender<u64>,
    peer_rank: u32,
) {
    loop {
        let mut frame = [0u8; 9];
        if let Err(err) = stream.read_exact(&mut frame).await {
            if err.kind() != std::io::ErrorKind::UnexpectedEof {
                warn!(peer_rank, %err, "read_task: connection error");
            }
            break;
        }
        let value = LittleEndian::read_u64(&frame[1..]);
        let sent = match frame[0] {
            TAG_MAIN => main_tx.send(value),
            TAG_BACK_AMORT => back_tx.send(value),
            other => {
                warn!(peer_rank, tag = other, "read_task: unknown tag");
                continue;
            }
        };
        if sent.is_err() {
            break;
        }
    }
}

async fn write_preamble(stream: &TcpStream, rank: u32) -> SyncResult<()> {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, rank);
    loop {
        stream.writable().await.map_err(SyncError::Io)?;
        match stream.try_write(&buf) {
            Ok(_) => return Ok(()),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(SyncError::Io(e)),
        }
    }
}

async fn read_preamble(stream: &TcpStream) -> SyncResult<u32> {
    let mut buf = [0u8; 4];
    let mut read = 0;
    loop {
        stream.readable().await.map_err(SyncError::Io)?;
        match stream.try_read(&mut buf[read..]) {
            Ok(0) => {
                return Err(SyncError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before preamble",
                )))
            }
            Ok(n) => {
                read += n;
                if read == 4 {
                    return Ok(LittleEndian::read_u32(&buf));
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(SyncError::Io(e)),
        }
    }
}

async fn dial_with_retry(addr: SocketAddr) -> SyncResult<TcpStream> {
    let mut attempt = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(SyncError::Io)?;
                return Ok(stream);
            }
            Err(err) if attempt < 50 => {
                attempt += 1;
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                debug!(%addr, attempt, %err, "retrying peer connection");
            }
            Err(err) => return Err(SyncError::Io(err)),
        }
    }
}
