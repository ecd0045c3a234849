//! Deterministic linear-congruential generator.
//!
//! Converted from: `my_rand` in `screen-worms-server.cpp`. Two servers that
//! start with the same seed and consume the RNG in the same order (spec.md
//! §4.3: `game_id`, then per worm `pos_x_cell`, `pos_y_cell`, `direction`)
//! must produce byte-identical event logs, so the multiply-mod arithmetic
//! here must match the original exactly.

const RAND_MULT: u64 = 279_410_273;
const RAND_MOD: u64 = 4_294_967_291;

pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Returns the current value, then advances the internal state.
    pub fn next(&mut self) -> u32 {
        let result = self.state;
        self.state = ((self.state as u64 * RAND_MULT) % RAND_MOD) as u32;
        result
    }
}
