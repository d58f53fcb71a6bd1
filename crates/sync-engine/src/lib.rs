pub mod backward;
pub mod clock;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod header;
pub mod parallel;
pub mod reader;
pub mod sequential;
pub mod synchronizer;
pub mod transport;
pub mod writer;

pub use config::{PeerEntry, PeersConfig};
pub use error::{SyncError, SyncResult};
pub use event::{Kind, RawEvent};
pub use header::{KttHeader, PointerSize};
pub use reader::{parse_trace, TraceFile};
pub use sequential::SequentialCoordinator;
pub use synchronizer::{ProcessedEvent, SyncConfig, Synchronizer};
pub use transport::{Tag, TcpTransport, Transport};
