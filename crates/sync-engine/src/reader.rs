//! Sans-I/O trace stream parser.
//!
//! Takes the bytes of a single process's `.ktt` file already in memory and
//! produces a flat, ordered `Vec<RawEvent>` plus the original header bytes.
//! No file I/O happens here — the caller (a CLI driver) is responsible for
//! reading the file into memory first. This separation of parsing from I/O
//! follows `examples/rtic-scope-itm-decode`'s decoder, which never touches
//! a file handle either.
//!
//! Every timestamped record's payload is defined as "everything following
//! its 64-bit time field, verbatim" (spec §4.7/§6), so the writer can emit
//! `kind, time, payload` without needing to know the per-kind field layout
//! again. Embedded `M`/`N` sends nested inside a `T`/`F` record's tail are
//! lifted out into their own top-level `RawEvent`s in encounter order —
//! matching `tracelog.py::_extra_event_send`, which appends a fresh
//! `data_list` entry for a send even when found while processing the
//! enclosing transition event.

use crate::error::{SyncError, SyncResult};
use crate::event::{Kind, RawEvent};
use crate::header::{parse_ktt_header, KttHeader, PointerSize};
use byteorder::{ByteOrder, LittleEndian};

/// A fully parsed per-process trace: header bytes preserved verbatim, plus
/// the flat event list in file order.
#[derive(Debug, Clone)]
pub struct TraceFile {
    pub header: KttHeader,
    pub header_bytes: Vec<u8>,
    pub events: Vec<RawEvent>,
    pub init_time: u64,
}

pub fn parse_trace(process_id: u32, data: &[u8], pointer_size: PointerSize) -> SyncResult<TraceFile> {
    let (header, header_end) = parse_ktt_header(data).map_err(|e| retag(e, process_id))?;
    let init_time = header.init_time().map_err(|e| retag(e, process_id))?;
    let header_bytes = data[..header_end].to_vec();

    let mut pos = header_end;
    let mut events = Vec::new();

    while pos < data.len() {
        parse_one(process_id, data, &mut pos, pointer_size, &mut events)?;
    }

    Ok(TraceFile {
        header,
        header_bytes,
        events,
        init_time,
    })
}

fn retag(err: SyncError, process_id: u32) -> SyncError {
    match err {
        SyncError::Malformed { offset, reason, .. } => SyncError::Malformed {
            process: process_id,
            offset,
            reason,
        },
        other => other,
    }
}

fn parse_one(
    process_id: u32,
    data: &[u8],
    pos: &mut usize,
    pointer_size: PointerSize,
    events: &mut Vec<RawEvent>,
) -> SyncResult<()> {
    let start = *pos;
    let tag = data[*pos];
    let kind = Kind::from_tag(tag).ok_or_else(|| SyncError::Malformed {
        process: process_id,
        offset: start,
        reason: format!("unknown event tag {:?}", tag as char),
    })?;
    *pos += 1;
    let time = read_u64(data, pos, process_id)?;

    match kind {
        Kind::Send | Kind::MultiSend => {
            let ev = parse_send_tail(process_id, kind, data, pos, time)?;
            events.push(ev);
        }
        Kind::Fired => {
            let mut payload = read_bytes(data, pos, 4, process_id)?; // transition id
            let (tail, emitted) = scan_tail(process_id, data, pos, pointer_size)?;
            payload.extend_from_slice(&tail);
            events.push(RawEvent::new(kind, time, payload));
            events.extend(emitted);
        }
        Kind::Finished => {
            let (tail, emitted) = scan_tail(process_id, data, pos, pointer_size)?;
            events.push(RawEvent::new(kind, time, tail));
            events.extend(emitted);
        }
        Kind::Receive => {
            let origin_bytes = read_bytes(data, pos, 4, process_id)?;
            let origin = LittleEndian::read_u32(&origin_bytes);
            let (tail, emitted) = scan_tail(process_id, data, pos, pointer_size)?;
            let mut payload = origin_bytes;
            payload.extend_from_slice(&tail);
            let mut ev = RawEvent::new(kind, time, payload);
            ev.origin = Some(origin);
            events.push(ev);
            events.extend(emitted);
        }
        Kind::Spawn => {
            let mut payload = read_bytes(data, pos, 4, process_id)?; // net id
            let (tail, emitted) = scan_tail(process_id, data, pos, pointer_size)?;
            payload.extend_from_slice(&tail);
            events.push(RawEvent::new(kind, time, payload));
            events.extend(emitted);
        }
        Kind::Idle | Kind::Quit | Kind::End => {
            let mut ev = RawEvent::new(kind, time, Vec::new());
            ev.tag = tag;
            events.push(ev);
        }
    }

    Ok(())
}

fn parse_send_tail(
    process_id: u32,
    kind: Kind,
    data: &[u8],
    pos: &mut usize,
    time: u64,
) -> SyncResult<RawEvent> {
    let start = *pos;
    let _size = read_u64(data, pos, process_id)?;
    let _edge_id = read_bytes(data, pos, 4, process_id)?;
    let count_bytes = read_bytes(data, pos, 4, process_id)?;
    let count = LittleEndian::read_u32(&count_bytes) as usize;
    let mut targets = Vec::with_capacity(count);
    for _ in 0..count {
        let t = read_bytes(data, pos, 4, process_id)?;
        targets.push(LittleEndian::read_u32(&t));
    }
    let payload = data[start..*pos].to_vec();
    let mut ev = RawEvent::new(kind, time, payload);
    ev.targets = targets;
    Ok(ev)
}

/// Consumes the trailing typed-value / token-add / quit-marker / end stream
/// that follows the fixed fields of `T`/`F`/`R`/`S` records, lifting embedded
/// sends out as their own events. Stops as soon as it sees a tag that does
/// not belong to this grammar (the start of the next top-level record) or
/// after consuming an `X` end marker.
fn scan_tail(
    process_id: u32,
    data: &[u8],
    pos: &mut usize,
    pointer_size: PointerSize,
) -> SyncResult<(Vec<u8>, Vec<RawEvent>)> {
    let mut payload = Vec::new();
    let mut emitted = Vec::new();

    loop {
        if *pos >= data.len() {
            break;
        }
        let tag = data[*pos];
        match tag {
            b'i' | b'd' | b's' | b'r' => {
                let chunk = consume_typed_value(process_id, data, pos, pointer_size)?;
                payload.extend_from_slice(&chunk);
            }
            b't' => {
                let start = *pos;
                *pos += 1;
                *pos += pointer_size.bytes() + 4; // token id + ref count
                loop {
                    if *pos >= data.len() {
                        break;
                    }
                    match data[*pos] {
                        b'i' | b'd' | b's' | b'r' => {
                            consume_typed_value(process_id, data, pos, pointer_size)?;
                        }
                        _ => break,
                    }
                }
                payload.extend_from_slice(&data[start..*pos]);
            }
            b'M' | b'N' => {
                *pos += 1;
                let kind = Kind::from_tag(tag).unwrap();
                let time = read_u64(data, pos, process_id)?;
                let ev = parse_send_tail(process_id, kind, data, pos, time)?;
                emitted.push(ev);
            }
            b'Q' => {
                let start = *pos;
                *pos += 1;
                *pos += 8;
                payload.extend_from_slice(&data[start..*pos]);
            }
            b'X' => {
                let start = *pos;
                *pos += 1;
                *pos += 8;
                payload.extend_from_slice(&data[start..*pos]);
                break;
            }
            _ => break,
        }
        if *pos > data.len() {
            return Err(SyncError::Malformed {
                process: process_id,
                offset: *pos,
                reason: "record ran past end of trace".into(),
            });
        }
    }

    Ok((payload, emitted))
}

fn consume_typed_value(
    process_id: u32,
    data: &[u8],
    pos: &mut usize,
    pointer_size: PointerSize,
) -> SyncResult<Vec<u8>> {
    let start = *pos;
    match data[*pos] {
        b'i' => {
            *pos += 1 + 4;
        }
        b'd' => {
            *pos += 1 + 8;
        }
        b's' => {
            *pos += 1;
            let _ = read_cstring(data, pos, process_id)?;
        }
        b'r' => {
            *pos += 1 + pointer_size.bytes() + 4;
        }
        other => {
            return Err(SyncError::Malformed {
                process: process_id,
                offset: *pos,
                reason: format!("not a typed value tag: {:?}", other as char),
            })
        }
    }
    if *pos > data.len() {
        return Err(SyncError::Malformed {
            process: process_id,
            offset: start,
            reason: "typed value ran past end of trace".into(),
        });
    }
    Ok(data[start..*pos].to_vec())
}

fn read_u64(data: &[u8], pos: &mut usize, process_id: u32) -> SyncResult<u64> {
    let bytes = read_bytes(data, pos, 8, process_id)?;
    Ok(LittleEndian::read_u64(&bytes))
}

fn read_bytes(data: &[u8], pos: &mut usize, n: usize, process_id: u32) -> SyncResult<Vec<u8>> {
    if *pos + n > data.len() {
        return Err(SyncError::Malformed {
            process: process_id,
            offset: *pos,
            reason: format!("expected {n} more bytes, found {}", data.len() - *pos),
        });
    }
    let out = data[*pos..*pos + n].to_vec();
    *pos += n;
    Ok(out)
}

fn read_cstring(data: &[u8], pos: &mut usize, process_id: u32) -> SyncResult<String> {
    let start = *pos;
    let end = data[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|i| start + i)
        .ok_or_else(|| SyncError::Malformed {
            process: process_id,
            offset: start,
            reason: "unterminated string value".into(),
        })?;
    *pos = end + 1;
    Ok(String::from_utf8_lossy(&data[start..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::write_ktt_header;

    fn header_bytes(init_time: u64) -> Vec<u8> {
        let mut h = KttHeader::default();
        h.entries.push(("KairaThreadTrace".into(), "1".into()));
        h.entries.push(("inittime".into(), init_time.to_string()));
        write_ktt_header(&h)
    }

    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_u64(&mut tmp, v);
        buf.extend_from_slice(&tmp);
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        let mut tmp = [0u8; 4];
        LittleEndian::write_u32(&mut tmp, v);
        buf.extend_from_slice(&tmp);
    }

    #[test]
    fn parses_idle_event() {
        let mut data = header_bytes(100);
        data.push(b'I');
        push_u64(&mut data, 100);
        let trace = parse_trace(0, &data, PointerSize::Eight).unwrap();
        assert_eq!(trace.events.len(), 1);
        assert_eq!(trace.events[0].kind, Kind::Idle);
        assert_eq!(trace.events[0].time, 100);
    }

    #[test]
    fn parses_send_and_receive_pair() {
        let mut data = header_bytes(0);
        data.push(b'M');
        push_u64(&mut data, 10);
        push_u64(&mut data, 0); // size
        push_u32(&mut data, 1); // edge id
        push_u32(&mut data, 1); // target count
        push_u32(&mut data, 7); // target
        data.push(b'R');
        push_u64(&mut data, 20);
        push_u32(&mut data, 3); // origin

        let trace = parse_trace(0, &data, PointerSize::Eight).unwrap();
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.events[0].kind, Kind::Send);
        assert_eq!(trace.events[0].targets, vec![7]);
        assert_eq!(trace.events[1].kind, Kind::Receive);
        assert_eq!(trace.events[1].origin, Some(3));
    }

    #[test]
    fn lifts_embedded_send_out_of_fired_event() {
        let mut data = header_bytes(0);
        data.push(b'T');
        push_u64(&mut data, 5);
        push_u32(&mut data, 42); // transition id
        data.push(b'M');
        push_u64(&mut data, 6);
        push_u64(&mut data, 0);
        push_u32(&mut data, 1);
        push_u32(&mut data, 0);
        data.push(b'X');
        push_u64(&mut data, 7);

        let trace = parse_trace(0, &data, PointerSize::Eight).unwrap();
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.events[0].kind, Kind::Fired);
        assert_eq!(trace.events[1].kind, Kind::Send);
    }

    #[test]
    fn legacy_h_quit_tag_is_preserved_for_round_trip() {
        let mut data = header_bytes(0);
        data.push(b'H');
        push_u64(&mut data, 50);

        let trace = parse_trace(0, &data, PointerSize::Eight).unwrap();
        assert_eq!(trace.events[0].kind, Kind::Quit);
        assert_eq!(trace.events[0].tag, b'H');

        let mut q_data = header_bytes(0);
        q_data.push(b'Q');
        push_u64(&mut q_data, 50);
        let q_trace = parse_trace(0, &q_data, PointerSize::Eight).unwrap();
        assert_eq!(q_trace.events[0].tag, b'Q');
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut data = header_bytes(0);
        data.push(b'Z');
        assert!(parse_trace(0, &data, PointerSize::Eight).is_err());
    }
}
