//! Authoritative game state: board, worms, event log, and the `start`/`tick`
//! operations that drive them.
//!
//! Converted from: `initialize_game`/`make_moves` in
//! `screen-worms-server.cpp`.

use crate::board::Board;
use crate::event::EventLog;
use crate::rng::Rng;
use crate::worm::{TurnDirection, Worm};

pub struct GameState {
    pub game_id: u32,
    pub board: Board,
    pub worms: Vec<Worm>,
    pub log: EventLog,
    pub worms_alive: i32,
}

/// Result of initializing or ticking a game: whether it ended.
pub struct TickOutcome {
    pub game_over: bool,
}

impl GameState {
    /// Implements spec.md §4.4 "Game start". `players` is the canonical,
    /// already-sorted-by-name list of `(name, turn_direction)` for the
    /// ready players about to race; the caller is responsible for producing
    /// that order (the registry's `ready_players_sorted`, resolved to
    /// names/directions). Stops spawning worms the instant `worms_alive`
    /// reaches 1, mirroring `tick`'s early return.
    pub fn start(rng: &mut Rng, width: u32, height: u32, players: &[(String, TurnDirection)]) -> Self {
        let game_id = rng.next();
        let mut board = Board::new(width, height);
        let mut log = EventLog::new();
        let names: Vec<String> = players.iter().map(|(n, _)| n.clone()).collect();
        log.append_new_game(width, height, names);

        let mut worms = Vec::with_capacity(players.len());
        let mut worms_alive = players.len() as i32;

        for (i, (_, turn_direction)) in players.iter().enumerate() {
            let pos_x = (rng.next() % width) as f64 + 0.5;
            let pos_y = (rng.next() % height) as f64 + 0.5;
            let direction = (rng.next() % 360) as i32;

            let mut worm = Worm::new(pos_x, pos_y, direction, *turn_direction);
            let (cx, cy) = worm.cell();

            if board.is_blocked(cx, cy) {
                worm.eliminated = true;
                worms_alive -= 1;
                log.append_eliminated(i as u8);
            } else {
                board.paint(cx as u32, cy as u32);
                log.append_pixel(i as u8, cx as u32, cy as u32);
            }

            worms.push(worm);

            if worms_alive == 1 {
                log.append_game_over();
                break;
            }
        }

        Self { game_id, board, worms, log, worms_alive }
    }

    /// Implements spec.md §4.4 "Tick": advances every non-eliminated worm
    /// one step, in canonical (index) order, appending events as worms
    /// paint new cells or are eliminated.
    pub fn tick(&mut self, turning_speed: u32) -> TickOutcome {
        for i in 0..self.worms.len() {
            if self.worms[i].eliminated {
                continue;
            }

            let (old_cell, new_cell) = self.worms[i].step(turning_speed as i32);
            if old_cell == new_cell {
                continue;
            }

            if self.board.is_blocked(new_cell.0, new_cell.1) {
                self.worms[i].eliminated = true;
                self.worms_alive -= 1;
                self.log.append_eliminated(i as u8);

                if self.worms_alive == 1 {
                    self.log.append_game_over();
                    return TickOutcome { game_over: true };
                }
            } else {
                self.board.paint(new_cell.0 as u32, new_cell.1 as u32);
                self.log.append_pixel(i as u8, new_cell.0 as u32, new_cell.1 as u32);
            }
        }

        TickOutcome { game_over: false }
    }
}
