//! `Player`, the registry of connected clients, and the admission rules for
//! an incoming control datagram.
//!
//! Converted from: `player_t`, `is_ignored`, `add_client`,
//! `disconnect_timeout`, `check_for_game_start` in
//! `screen-worms-server.cpp`. Identity is `SocketAddr` rather than the
//! original's `"<ip6>/<port>"` string — the idiomatic Rust equivalent of the
//! same key (spec.md §4.5 itself only requires identity to be derived from
//! remote IP + port).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::worm::TurnDirection;

pub const MAX_PLAYERS: usize = 25;
pub const PLAYER_TIMEOUT: Duration = Duration::from_secs(2);
pub const MIN_CONTROL_PACKET: usize = 13;
pub const MAX_CONTROL_PACKET: usize = 33;

pub struct Player {
    pub session_id: u64,
    pub name: String,
    pub turn_direction: TurnDirection,
    pub ready: bool,
    pub worm_num: i32,
    pub addr: SocketAddr,
    pub deadline: Instant,
}

impl Player {
    fn new(session_id: u64, name: String, turn_direction: TurnDirection, addr: SocketAddr, now: Instant) -> Self {
        Self {
            session_id,
            name,
            turn_direction,
            ready: false,
            worm_num: -1,
            addr,
            deadline: now + PLAYER_TIMEOUT,
        }
    }
}

/// A parsed (but not yet admitted) client control packet, per spec.md §6/§4.5.
pub struct ControlPacket {
    pub session_id: u64,
    pub turn_direction: TurnDirection,
    pub next_expected_event_no: u32,
    pub name: String,
}

impl ControlPacket {
    /// Parses the 13..33-byte UDP control packet. Returns `None` for any
    /// reason the datagram should be dropped per spec.md §4.5's first three
    /// rows (size, turn_direction, name bytes).
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < MIN_CONTROL_PACKET || buf.len() > MAX_CONTROL_PACKET {
            return None;
        }
        let session_id = u64::from_be_bytes(buf[0..8].try_into().ok()?);
        let turn_direction = TurnDirection::from_wire(buf[8])?;
        let next_expected_event_no = u32::from_be_bytes(buf[9..13].try_into().ok()?);
        let name_bytes = &buf[13..];
        if name_bytes.iter().any(|&b| !(33..=126).contains(&b)) {
            return None;
        }
        let name = String::from_utf8(name_bytes.to_vec()).ok()?;
        Some(Self { session_id, turn_direction, next_expected_event_no, name })
    }
}

pub enum AdmitOutcome {
    /// The packet was accepted; the player's state has been
    /// admitted/refreshed.
    Accepted,
    Dropped,
}

#[derive(Default)]
pub struct Registry {
    players: HashMap<SocketAddr, Player>,
}

impl Registry {
    pub fn new() -> Self {
        Self { players: HashMap::new() }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Player> {
        self.players.get(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SocketAddr, &Player)> {
        self.players.iter()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Applies the admission table in spec.md §4.5 to one incoming control
    /// packet from `addr`.
    pub fn admit(&mut self, addr: SocketAddr, pkt: ControlPacket, now: Instant) -> AdmitOutcome {
        if let Some(existing) = self.players.get(&addr) {
            if existing.session_id > pkt.session_id {
                return AdmitOutcome::Dropped;
            }
            if existing.session_id == pkt.session_id && existing.name != pkt.name {
                return AdmitOutcome::Dropped;
            }
            if existing.session_id < pkt.session_id {
                self.players.remove(&addr);
            }
        } else if self.players.len() >= MAX_PLAYERS {
            return AdmitOutcome::Dropped;
        }

        let player = self.players.entry(addr).or_insert_with(|| {
            Player::new(pkt.session_id, pkt.name.clone(), pkt.turn_direction, addr, now)
        });

        player.turn_direction = pkt.turn_direction;
        player.deadline = now + PLAYER_TIMEOUT;
        if !pkt.name.is_empty() && pkt.turn_direction != TurnDirection::Straight {
            player.ready = true;
        }

        AdmitOutcome::Accepted
    }

    pub fn set_worm_turn_direction(&mut self, addr: &SocketAddr, worms: &mut [crate::worm::Worm]) {
        if let Some(player) = self.players.get(addr) {
            if player.worm_num >= 0 {
                if let Some(worm) = worms.get_mut(player.worm_num as usize) {
                    worm.turn_direction = player.turn_direction;
                }
            }
        }
    }

    /// Removes every player whose deadline has passed.
    pub fn evict_timed_out(&mut self, now: Instant) {
        self.players.retain(|_, p| p.deadline > now);
    }

    /// Implements `check_for_game_start`: every player with a non-empty
    /// name must be ready, and at least two players must be ready.
    pub fn check_start(&self) -> bool {
        let mut ready_count = 0;
        for player in self.players.values() {
            if player.ready {
                ready_count += 1;
            } else if !player.name.is_empty() {
                return false;
            }
        }
        ready_count >= 2
    }

    /// Ready players sorted by name ascending (byte-wise) — the canonical
    /// worm order (spec.md §4.4 step 2).
    pub fn ready_players_sorted(&self) -> Vec<SocketAddr> {
        let mut ready: Vec<&Player> = self.players.values().filter(|p| p.ready).collect();
        ready.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        ready.into_iter().map(|p| p.addr).collect()
    }

    pub fn set_worm_num(&mut self, addr: &SocketAddr, worm_num: i32) {
        if let Some(player) = self.players.get_mut(addr) {
            player.worm_num = worm_num;
        }
    }

    /// Clears every player's `ready` flag and `worm_num`, returning to the
    /// lobby state at `GAME_OVER` (spec.md §3 "Lifecycle").
    pub fn reset_for_lobby(&mut self) {
        for player in self.players.values_mut() {
            player.ready = false;
            player.worm_num = -1;
        }
    }
}
