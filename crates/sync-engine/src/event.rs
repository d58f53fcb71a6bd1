//! Event kinds and the rewritten event record.
//!
//! Mirrors the tagged event stream described in the wire format (see
//! `original_source/parallel/tracelog.py`'s dispatch table): each record
//! carries a one-byte kind tag, a timestamp, and a trailing payload of
//! bytes that the engine never interprets.

/// One character identifying an event record in the trace stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Fired,
    Finished,
    Send,
    /// Multi-send; wire-identical to `Send`, kept as a distinct tag only
    /// because the original format distinguishes them by the byte that
    /// precedes the shared layout.
    MultiSend,
    Receive,
    Spawn,
    Idle,
    /// Covers both the `Q` tag and the legacy `H` tag (kept by the original
    /// format "for backward compatibility" — see `tracelog.py`'s dispatch
    /// table). `RawEvent::tag` carries whichever byte was actually read, so
    /// this merge never corrupts the wire output.
    Quit,
    End,
}

impl Kind {
    pub fn from_tag(tag: u8) -> Option<Kind> {
        match tag {
            b'T' => Some(Kind::Fired),
            b'F' => Some(Kind::Finished),
            b'M' => Some(Kind::Send),
            b'N' => Some(Kind::MultiSend),
            b'R' => Some(Kind::Receive),
            b'S' => Some(Kind::Spawn),
            b'I' => Some(Kind::Idle),
            b'H' | b'Q' => Some(Kind::Quit),
            b'X' => Some(Kind::End),
            _ => None,
        }
    }

    /// The canonical wire tag for this kind. Not used to re-serialize an
    /// already-parsed `Quit` event — see `RawEvent::tag` for that, since `H`
    /// and `Q` share a `Kind` but must round-trip as whichever byte they
    /// arrived as.
    pub fn tag(self) -> u8 {
        match self {
            Kind::Fired => b'T',
            Kind::Finished => b'F',
            Kind::Send => b'M',
            Kind::MultiSend => b'N',
            Kind::Receive => b'R',
            Kind::Spawn => b'S',
            Kind::Idle => b'I',
            Kind::Quit => b'Q',
            Kind::End => b'X',
        }
    }

    /// A send fans out to one or more receivers; `M` and `N` are both sends.
    pub fn is_send(self) -> bool {
        matches!(self, Kind::Send | Kind::MultiSend)
    }
}

/// One rewritten event: its kind, corrected timestamp, and the verbatim
/// trailing payload bytes captured from the input (everything after the
/// original timestamp up to the next record boundary).
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub kind: Kind,
    pub time: u64,
    /// The actual wire byte this event was read as. Defaults to
    /// `kind.tag()`, which is correct for every kind except `Quit`, where
    /// the input may have been `H` or `Q` — callers that parse a `Quit`
    /// event must overwrite this with the byte they actually read.
    pub tag: u8,
    /// For `Send`/`MultiSend`, the receiver ids this record targets.
    pub targets: Vec<u32>,
    /// For `Receive`, the id of the sending process.
    pub origin: Option<u32>,
    pub payload: Vec<u8>,
}

impl RawEvent {
    pub fn new(kind: Kind, time: u64, payload: Vec<u8>) -> Self {
        RawEvent {
            kind,
            time,
            tag: kind.tag(),
            targets: Vec::new(),
            origin: None,
            payload,
        }
    }
}
