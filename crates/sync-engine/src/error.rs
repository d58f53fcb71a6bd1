use thiserror::Error;

/// Error kinds produced by the synchronization engine (see design notes §7).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("process {process}: malformed trace at byte offset {offset}: {reason}")]
    Malformed {
        process: u32,
        offset: usize,
        reason: String,
    },

    #[error("process {process}: causality violation: {detail}")]
    Causality { process: u32, detail: String },

    #[error("transport error between rank {from} and rank {to}: {detail}")]
    Transport {
        from: u32,
        to: u32,
        detail: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
