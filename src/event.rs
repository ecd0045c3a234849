//! The event model: a tagged variant per event type, a single encoder, a
//! single decoder, and the append-only log that is the source of truth for
//! what gets broadcast to clients.
//!
//! Converted from: `add_new_game_event`/`add_pixel_event`/
//! `add_eliminated_event`/`add_game_over_event` in
//! `screen-worms-server.cpp` (server-side encode) and
//! `parse_event`/`parse_NEW_GAME`/`parse_PIXEL`/`parse_ELIMINATED` in
//! `screen-worms-client.cpp` (client-side decode). Polymorphism over event
//! types per spec.md §9's design note.

use crate::encoding::{crc32, decode_uint, encode_uint};

pub const NEW_GAME_TYPE: u8 = 0;
pub const PIXEL_TYPE: u8 = 1;
pub const PLAYER_ELIMINATED_TYPE: u8 = 2;
pub const GAME_OVER_TYPE: u8 = 3;

/// One fully decoded event, independent of its wire representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewGame {
        max_x: u32,
        max_y: u32,
        names: Vec<String>,
    },
    Pixel {
        player: u8,
        x: u32,
        y: u32,
    },
    PlayerEliminated {
        player: u8,
    },
    GameOver,
}

impl Event {
    /// Encodes `(event_no, self)` into the wire record: `len || event_no ||
    /// event_type || event_data || crc32`.
    pub fn encode(&self, event_no: u32) -> Vec<u8> {
        let mut body = Vec::new();
        let event_type = match self {
            Event::NewGame { max_x, max_y, names } => {
                encode_uint(&mut body, *max_x as u64, 4);
                encode_uint(&mut body, *max_y as u64, 4);
                for name in names {
                    body.extend_from_slice(name.as_bytes());
                    body.push(0);
                }
                NEW_GAME_TYPE
            }
            Event::Pixel { player, x, y } => {
                encode_uint(&mut body, *player as u64, 1);
                encode_uint(&mut body, *x as u64, 4);
                encode_uint(&mut body, *y as u64, 4);
                PIXEL_TYPE
            }
            Event::PlayerEliminated { player } => {
                encode_uint(&mut body, *player as u64, 1);
                PLAYER_ELIMINATED_TYPE
            }
            Event::GameOver => GAME_OVER_TYPE,
        };

        let len = 5 + body.len() as u32;
        let mut record = Vec::with_capacity(4 + len as usize + 4);
        encode_uint(&mut record, len as u64, 4);
        encode_uint(&mut record, event_no as u64, 4);
        encode_uint(&mut record, event_type as u64, 1);
        record.extend_from_slice(&body);

        let crc = crc32(&record);
        encode_uint(&mut record, crc as u64, 4);
        record
    }
}

/// Outcome of decoding a single event out of a datagram, per spec.md §4.7.
pub enum DecodeResult {
    /// Decoded one event; `consumed` bytes were used from the start of the
    /// slice passed in (the full `len + 8` record).
    Ok { event_no: u32, event: Option<Event>, consumed: usize },
    /// Malformed in a way that means "ignore the rest of this datagram" —
    /// short length, CRC mismatch, or out-of-order `event_no`.
    Ignore,
    /// A known event type with a payload that can never be legal — a fatal
    /// client error per spec.md §7(b).
    Fatal(&'static str),
}

/// Decodes one event record at the start of `buf`, given the caller's
/// current `expected_event_no`.
///
/// Mirrors `parse_event` in `screen-worms-client.cpp`: validates `len`,
/// checks CRC over the preceding `len + 4` bytes, checks `event_no`, then
/// dispatches on `event_type`. Unknown types are skipped (still consume
/// their bytes and advance `next_event_no`) rather than being fatal.
pub fn decode_event(buf: &[u8], expected_event_no: u32) -> DecodeResult {
    let mut off = 0;
    let len = match decode_uint(buf, &mut off, 4) {
        Some(l) => l as u32,
        None => return DecodeResult::Ignore,
    };

    if len < 5 || (len as usize) + 8 > buf.len() {
        return DecodeResult::Ignore;
    }

    let record_len = (len as usize) + 4;
    let mut crc_off = record_len;
    let stored_crc = match decode_uint(buf, &mut crc_off, 4) {
        Some(v) => v as u32,
        None => return DecodeResult::Ignore,
    };
    if crc32(&buf[..record_len]) != stored_crc {
        return DecodeResult::Ignore;
    }

    let event_no = decode_uint(buf, &mut off, 4).unwrap() as u32;
    if event_no != expected_event_no {
        return DecodeResult::Ignore;
    }

    let event_type = decode_uint(buf, &mut off, 1).unwrap() as u8;
    let data_end = record_len; // offset of the byte after event_data, i.e. where crc begins
    let consumed = record_len + 4;

    let event = match event_type {
        NEW_GAME_TYPE => match decode_new_game(buf, &mut off, data_end) {
            Ok(e) => e,
            Err(msg) => return DecodeResult::Fatal(msg),
        },
        PIXEL_TYPE => {
            if data_end - off != 9 {
                return DecodeResult::Fatal("malformed PIXEL payload length");
            }
            let player = decode_uint(buf, &mut off, 1).unwrap() as u8;
            let x = decode_uint(buf, &mut off, 4).unwrap() as u32;
            let y = decode_uint(buf, &mut off, 4).unwrap() as u32;
            Some(Event::Pixel { player, x, y })
        }
        PLAYER_ELIMINATED_TYPE => {
            if data_end - off != 1 {
                return DecodeResult::Fatal("malformed PLAYER_ELIMINATED payload length");
            }
            let player = decode_uint(buf, &mut off, 1).unwrap() as u8;
            Some(Event::PlayerEliminated { player })
        }
        GAME_OVER_TYPE => {
            if data_end != off {
                return DecodeResult::Fatal("malformed GAME_OVER payload length");
            }
            Some(Event::GameOver)
        }
        _ => None,
    };

    DecodeResult::Ok { event_no, event, consumed }
}

fn decode_new_game(buf: &[u8], off: &mut usize, data_end: usize) -> Result<Option<Event>, &'static str> {
    if data_end < *off + 8 {
        return Err("malformed NEW_GAME payload length");
    }
    let max_x = decode_uint(buf, off, 4).ok_or("truncated NEW_GAME")? as u32;
    let max_y = decode_uint(buf, off, 4).ok_or("truncated NEW_GAME")? as u32;

    if data_end == *off || buf[data_end - 1] != 0 {
        return Err("NEW_GAME player list missing trailing NUL");
    }

    let mut names = Vec::new();
    let mut name = Vec::new();
    while *off < data_end {
        let b = buf[*off];
        *off += 1;
        if b == 0 {
            let s = String::from_utf8(std::mem::take(&mut name))
                .map_err(|_| "NEW_GAME player name is not valid UTF-8")?;
            names.push(s);
        } else if !(33..=126).contains(&b) {
            return Err("NEW_GAME player name contains invalid byte");
        } else {
            name.push(b);
        }
    }

    Ok(Some(Event::NewGame { max_x, max_y, names }))
}

/// Append-only sequence of pre-encoded event records.
#[derive(Default)]
pub struct EventLog {
    records: Vec<Vec<u8>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn get(&self, i: usize) -> Option<&[u8]> {
        self.records.get(i).map(Vec::as_slice)
    }

    pub fn slice_from(&self, from: usize) -> &[Vec<u8>] {
        if from >= self.records.len() {
            &[]
        } else {
            &self.records[from..]
        }
    }

    fn append(&mut self, event: &Event) -> u32 {
        let event_no = self.records.len() as u32;
        self.records.push(event.encode(event_no));
        event_no
    }

    pub fn append_new_game(&mut self, max_x: u32, max_y: u32, names: Vec<String>) -> u32 {
        self.append(&Event::NewGame { max_x, max_y, names })
    }

    pub fn append_pixel(&mut self, worm_idx: u8, x: u32, y: u32) -> u32 {
        self.append(&Event::Pixel { player: worm_idx, x, y })
    }

    pub fn append_eliminated(&mut self, worm_idx: u8) -> u32 {
        self.append(&Event::PlayerEliminated { player: worm_idx })
    }

    pub fn append_game_over(&mut self) -> u32 {
        self.append(&Event::GameOver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_game_roundtrips() {
        let event = Event::NewGame {
            max_x: 640,
            max_y: 480,
            names: vec!["alice".to_string(), "bob".to_string()],
        };
        let record = event.encode(0);
        let decoded = decode_event(&record, 0);
        match decoded {
            DecodeResult::Ok { event_no, event: Some(e), consumed } => {
                assert_eq!(event_no, 0);
                assert_eq!(e, event);
                assert_eq!(consumed, record.len());
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn pixel_roundtrips() {
        let event = Event::Pixel { player: 2, x: 10, y: 20 };
        let record = event.encode(5);
        match decode_event(&record, 5) {
            DecodeResult::Ok { event_no, event: Some(e), .. } => {
                assert_eq!(event_no, 5);
                assert_eq!(e, event);
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn eliminated_roundtrips() {
        let event = Event::PlayerEliminated { player: 1 };
        let record = event.encode(3);
        match decode_event(&record, 3) {
            DecodeResult::Ok { event: Some(e), .. } => assert_eq!(e, event),
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn game_over_roundtrips() {
        let event = Event::GameOver;
        let record = event.encode(9);
        match decode_event(&record, 9) {
            DecodeResult::Ok { event: Some(e), .. } => assert_eq!(e, Event::GameOver),
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn crc_mismatch_is_ignored() {
        let event = Event::Pixel { player: 0, x: 1, y: 1 };
        let mut record = event.encode(0);
        let last = record.len() - 1;
        record[last] ^= 0xFF;
        assert!(matches!(decode_event(&record, 0), DecodeResult::Ignore));
    }

    #[test]
    fn wrong_event_no_is_ignored() {
        let event = Event::Pixel { player: 0, x: 1, y: 1 };
        let record = event.encode(0);
        assert!(matches!(decode_event(&record, 1), DecodeResult::Ignore));
    }

    #[test]
    fn unknown_event_type_is_skipped_not_fatal() {
        let event = Event::GameOver;
        let mut record = event.encode(0);
        // event_type byte sits right after len(4)+event_no(4)
        record[8] = 200;
        let crc_start = record.len() - 4;
        let crc = crc32(&record[..crc_start]);
        record[crc_start..].copy_from_slice(&crc.to_be_bytes());
        match decode_event(&record, 0) {
            DecodeResult::Ok { event: None, .. } => {}
            other => panic!("expected unknown-but-ok, got a different result: {:?}", matches!(other, DecodeResult::Ok{..})),
        }
    }

    #[test]
    fn truncated_buffer_is_ignored() {
        let event = Event::Pixel { player: 0, x: 1, y: 1 };
        let record = event.encode(0);
        assert!(matches!(decode_event(&record[..record.len() - 3], 0), DecodeResult::Ignore));
    }

    #[test]
    fn event_log_assigns_contiguous_numbers() {
        let mut log = EventLog::new();
        let n0 = log.append_new_game(10, 10, vec!["a".into()]);
        let n1 = log.append_pixel(0, 1, 1);
        let n2 = log.append_game_over();
        assert_eq!((n0, n1, n2), (0, 1, 2));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn event_log_get_matches_append_order() {
        let mut log = EventLog::new();
        log.append_pixel(0, 5, 5);
        log.append_pixel(0, 6, 6);
        let record = log.get(1).unwrap();
        match decode_event(record, 1) {
            DecodeResult::Ok { event: Some(Event::Pixel { x, y, .. }), .. } => {
                assert_eq!((x, y), (6, 6));
            }
            _ => panic!("expected pixel at index 1"),
        }
    }
}
