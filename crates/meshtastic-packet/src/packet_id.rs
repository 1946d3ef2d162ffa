//! Packet-ID generation.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// How many previously issued ids are remembered.
pub const PACKET_ID_WINDOW: usize = 16;

/// Generates random packet ids that never repeat within a short window.
///
/// The generator keeps a ring of the last [`PACKET_ID_WINDOW`] issued ids
/// and rejection-samples until it draws a value not in the ring. The
/// randomness is not cryptographic; ids only need to make the mesh-wide
/// (from, id) pair unambiguous within the deduplication horizon.
///
/// Not thread-safe by itself; the node serializes access.
#[derive(Debug)]
pub struct PacketIdGenerator {
    rng: SmallRng,
    prev: [u32; PACKET_ID_WINDOW],
    index: usize,
}

impl PacketIdGenerator {
    /// Create a generator seeded from the OS.
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Create a generator with a caller-provided RNG (used by tests).
    pub fn with_rng(rng: SmallRng) -> Self {
        PacketIdGenerator {
            rng,
            prev: [0; PACKET_ID_WINDOW],
            index: 0,
        }
    }

    /// Draw the next packet id.
    pub fn next_id(&mut self) -> u32 {
        let mut id = self.rng.gen::<u32>();
        while self.prev.contains(&id) {
            id = self.rng.gen::<u32>();
        }

        self.prev[self.index] = id;
        self.index = (self.index + 1) % PACKET_ID_WINDOW;
        id
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_repeats_within_window() {
        let mut generator = PacketIdGenerator::with_rng(SmallRng::seed_from_u64(7));

        let ids: Vec<u32> = (0..10_000).map(|_| generator.next_id()).collect();
        for window in ids.windows(PACKET_ID_WINDOW) {
            for (i, a) in window.iter().enumerate() {
                for b in &window[i + 1..] {
                    assert_ne!(a, b, "id repeated within a {PACKET_ID_WINDOW}-wide window");
                }
            }
        }
    }

    #[test]
    fn test_zero_is_never_issued_from_a_fresh_ring() {
        // The ring starts out filled with zeroes, so zero is always
        // treated as already-seen.
        let mut generator = PacketIdGenerator::with_rng(SmallRng::seed_from_u64(1));
        for _ in 0..1000 {
            assert_ne!(generator.next_id(), 0);
        }
    }
}
