//! `.kth`/`.ktt` header handling.
//!
//! The `.kth` file is a single line of XML carrying the `pointer-size`
//! attribute used to size pointer-width fields in the `.ktt` streams. The
//! `.ktt` header is a zero-terminated key/value text table, terminated by an
//! empty key/value pair, grounded on `original_source/parallel/tracelog.py`
//! (`Trace.__init__`'s header-parsing loop).
//!
//! No XML crate appears anywhere in the retrieved corpus, so the `.kth`
//! scan below is a minimal hand-written attribute lookup rather than a
//! general parser — this is the one boundary format the design explicitly
//! leaves out of scope (spec §1).

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerSize {
    Four,
    Eight,
}

impl PointerSize {
    pub fn bytes(self) -> usize {
        match self {
            PointerSize::Four => 4,
            PointerSize::Eight => 8,
        }
    }
}

/// Scans a `.kth` file's content for `pointer-size="4"` or `pointer-size="8"`.
pub fn parse_kth(content: &str) -> SyncResult<PointerSize> {
    let needle = "pointer-size";
    let idx = content.find(needle).ok_or_else(|| SyncError::Malformed {
        process: 0,
        offset: 0,
        reason: "missing pointer-size attribute in .kth header".into(),
    })?;
    let rest = &content[idx + needle.len()..];
    let quote_start = rest.find(['"', '\'']).ok_or_else(|| SyncError::Malformed {
        process: 0,
        offset: idx,
        reason: "malformed pointer-size attribute".into(),
    })?;
    let quote_char = rest.as_bytes()[quote_start] as char;
    let after_quote = &rest[quote_start + 1..];
    let quote_end = after_quote.find(quote_char).ok_or_else(|| SyncError::Malformed {
        process: 0,
        offset: idx,
        reason: "unterminated pointer-size attribute".into(),
    })?;
    match after_quote[..quote_end].trim() {
        "4" => Ok(PointerSize::Four),
        "8" => Ok(PointerSize::Eight),
        other => Err(SyncError::Malformed {
            process: 0,
            offset: idx,
            reason: format!("unsupported pointer-size value {other:?}"),
        }),
    }
}

/// Parsed `.ktt` key/value header table.
#[derive(Debug, Clone, Default)]
pub struct KttHeader {
    pub entries: Vec<(String, String)>,
}

impl KttHeader {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn init_time(&self) -> SyncResult<u64> {
        self.get("inittime")
            .ok_or_else(|| SyncError::Malformed {
                process: 0,
                offset: 0,
                reason: "missing inittime in .ktt header".into(),
            })?
            .parse()
            .map_err(|_| SyncError::Malformed {
                process: 0,
                offset: 0,
                reason: "inittime is not a valid integer".into(),
            })
    }

    pub fn is_kaira_thread_trace(&self) -> bool {
        self.get("KairaThreadTrace") == Some("1")
    }
}

/// Parses the key/value header table at the start of a `.ktt` byte stream.
/// Returns the table plus the byte offset immediately following the
/// terminating empty key/value pair (the start of the event stream).
pub fn parse_ktt_header(data: &[u8]) -> SyncResult<(KttHeader, usize)> {
    let mut header = KttHeader::default();
    let mut pos = 0usize;

    loop {
        let key = read_cstring(data, &mut pos)?;
        let value = read_cstring(data, &mut pos)?;
        if key.is_empty() && value.is_empty() {
            break;
        }
        header.entries.push((key, value));
    }

    Ok((header, pos))
}

/// Serializes a `.ktt` header table back to its on-disk key/value form,
/// including the terminating empty pair.
pub fn write_ktt_header(header: &KttHeader) -> Vec<u8> {
    let mut out = Vec::new();
    for (k, v) in &header.entries {
        out.extend_from_slice(k.as_bytes());
        out.push(0);
        out.extend_from_slice(v.as_bytes());
        out.push(0);
    }
    out.push(0);
    out.push(0);
    out
}

fn read_cstring(data: &[u8], pos: &mut usize) -> SyncResult<String> {
    let start = *pos;
    let end = data[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|i| start + i)
        .ok_or_else(|| SyncError::Malformed {
            process: 0,
            offset: start,
            reason: "unterminated string in .ktt header".into(),
        })?;
    let s = String::from_utf8_lossy(&data[start..end]).into_owned();
    *pos = end + 1;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pointer_size() {
        let kth = r#"<?xml version="1.0"?><trace pointer-size="8" other="x"/>"#;
        assert_eq!(parse_kth(kth).unwrap(), PointerSize::Eight);
    }

    #[test]
    fn rejects_unsupported_pointer_size() {
        let kth = r#"<trace pointer-size="16"/>"#;
        assert!(parse_kth(kth).is_err());
    }

    #[test]
    fn round_trips_ktt_header() {
        let mut header = KttHeader::default();
        header.entries.push(("KairaThreadTrace".into(), "1".into()));
        header.entries.push(("inittime".into(), "12345".into()));
        let bytes = write_ktt_header(&header);
        let (parsed, offset) = parse_ktt_header(&bytes).unwrap();
        assert_eq!(offset, bytes.len());
        assert_eq!(parsed.init_time().unwrap(), 12345);
        assert!(parsed.is_kaira_thread_trace());
    }
}
