//! `Worm`: continuous position, integer heading, the per-tick turn intent.
//!
//! Converted from: `worm_t` and the kinematics in `make_moves` in
//! `screen-worms-server.cpp`.

/// The direction a worm's controlling player last asked it to turn.
///
/// Wire value doubles as the discriminant: `0 = STRAIGHT`, `1 = RIGHT`,
/// `2 = LEFT` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    Straight,
    Right,
    Left,
}

impl TurnDirection {
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Straight),
            1 => Some(Self::Right),
            2 => Some(Self::Left),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Straight => 0,
            Self::Right => 1,
            Self::Left => 2,
        }
    }
}

pub struct Worm {
    pub pos_x: f64,
    pub pos_y: f64,
    pub direction: i32,
    pub turn_direction: TurnDirection,
    pub eliminated: bool,
}

impl Worm {
    pub fn new(pos_x: f64, pos_y: f64, direction: i32, turn_direction: TurnDirection) -> Self {
        Self { pos_x, pos_y, direction, turn_direction, eliminated: false }
    }

    pub fn cell(&self) -> (i64, i64) {
        (self.pos_x.floor() as i64, self.pos_y.floor() as i64)
    }

    /// Applies one tick's turn and motion, per spec.md §4.4 step 1-2.
    /// Returns the cell before and after the step.
    pub fn step(&mut self, turning_speed: i32) -> ((i64, i64), (i64, i64)) {
        let old_cell = self.cell();

        match self.turn_direction {
            TurnDirection::Right => self.direction = (self.direction + turning_speed).rem_euclid(360),
            TurnDirection::Left => self.direction = (self.direction + 360 - turning_speed).rem_euclid(360),
            TurnDirection::Straight => {}
        }

        let radians = self.direction as f64 * std::f64::consts::PI / 180.0;
        self.pos_x += radians.cos();
        self.pos_y += radians.sin();

        (old_cell, self.cell())
    }
}
