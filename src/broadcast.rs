//! Packing event records into ≤550-byte datagrams under one `game_id`.
//!
//! Converted from: `send_events_to_client` in `screen-worms-server.cpp`.

pub const MAX_UDP: usize = 550;

/// Packs `events` (already-encoded records, in order) into as few datagrams
/// as possible, each starting with the 4-byte `game_id` and never exceeding
/// `MAX_UDP` bytes. Returns an empty vec if `events` is empty.
pub fn pack_events(game_id: u32, events: &[Vec<u8>]) -> Vec<Vec<u8>> {
    if events.is_empty() {
        return Vec::new();
    }

    let header = game_id.to_be_bytes();
    let mut datagrams = Vec::new();
    let mut current = header.to_vec();

    for event in events {
        if current.len() + event.len() > MAX_UDP {
            datagrams.push(std::mem::replace(&mut current, header.to_vec()));
        }
        current.extend_from_slice(event);
    }

    if current.len() > header.len() {
        datagrams.push(current);
    }

    datagrams
}
