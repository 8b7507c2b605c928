use std::time::{SystemTime, UNIX_EPOCH};

/// A Well512 pseudo-random number generator.
///
/// 16 words of 32-bit state, period `2^512 - 1`. This is the generator
/// behind every `CxNN` opcode; it is deliberately independent of the host
/// RNG so interpreter behaviour stays reproducible under a fixed seed.
pub struct Well512 {
    index: usize,
    state: [u32; 16],
}

impl Default for Well512 {
    /// Automatic seeding based on the system clock, spread across the
    /// 16 state words.
    fn default() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E3779B97F4A7C15);
        let mut state = [0u32; 16];
        for (i, word) in state.iter_mut().enumerate() {
            *word = (seed >> (i * 2)) as u32;
        }
        Well512 { index: 0, state }
    }
}

impl Well512 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructor with an explicit 16-word seed, for reproducible runs.
    pub fn from_seed(seeds: [u32; 16]) -> Self {
        Well512 {
            index: 0,
            state: seeds,
        }
    }

    /// Draws the next 32-bit value from the generator.
    pub fn next_u32(&mut self) -> u32 {
        let mut a = self.state[self.index];
        let mut c = self.state[(self.index + 13) & 0xF];
        let b = a ^ c ^ (a << 16) ^ (c << 15);
        c = self.state[(self.index + 9) & 0xF];
        c ^= c >> 11;
        a = b ^ c;
        self.state[self.index] = a;
        let d = a ^ ((a << 5) & 0xDA44_2D24);
        self.index = (self.index + 15) & 0xF;
        a = self.state[self.index];
        self.state[self.index] = a ^ b ^ d ^ (a << 2) ^ (b << 18) ^ (c << 28);
        self.state[self.index]
    }

    /// Draws the next value truncated to a byte, as consumed by `CxNN`.
    pub fn next_u8(&mut self) -> u8 {
        self.next_u32() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let seeds = [0xDEAD_BEEFu32; 16];
        let mut a = Well512::from_seed(seeds);
        let mut b = Well512::from_seed(seeds);
        for _ in 0..64 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_sequence_is_not_constant() {
        let mut rng = Well512::from_seed([1u32; 16]);
        let first = rng.next_u32();
        assert!((0..64).any(|_| rng.next_u32() != first));
    }

    #[test]
    fn test_next_u8_truncates() {
        let mut wide = Well512::from_seed([0x1234_5678u32; 16]);
        let mut narrow = Well512::from_seed([0x1234_5678u32; 16]);
        for _ in 0..16 {
            assert_eq!(narrow.next_u8(), wide.next_u32() as u8);
        }
    }
}
