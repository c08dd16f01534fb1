//! Routing hash: maps an opaque request key to a pool slot.
//!
//! A one-at-a-time rolling hash seeded once per `RouteHasher`. Every step
//! is reduced modulo 2^31, so the result always fits in 31 bits. Two
//! hashers with different seeds route the same key to (usually) different
//! slots; one hasher routes a key to the same slot for its whole life.

const MODULUS: u64 = 1 << 31;

/// Deterministic, seeded hash from request keys to slot indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteHasher {
    seed: u32,
}

impl RouteHasher {
    /// Create a hasher with an explicit seed.
    pub fn with_seed(seed: u32) -> Self {
        Self { seed }
    }

    /// Create a hasher seeded from the thread-local RNG.
    pub fn random() -> Self {
        Self::with_seed(rand::random())
    }

    /// The seed this hasher was built with.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Hash a key. Keys are consumed as UTF-16 code units.
    pub fn hash(&self, key: &str) -> u32 {
        let mut h = u64::from(self.seed) % MODULUS;

        for unit in key.encode_utf16() {
            h = (h + u64::from(unit)) % MODULUS;
            h = (h + (h << 10)) % MODULUS;
            h ^= h >> 6;
        }

        h = (h + (h << 3)) % MODULUS;
        h ^= h >> 11;
        h = (h + (h << 15)) % MODULUS;

        h as u32
    }

    /// Slot index for `key` in a pool of `pool_size` slots.
    ///
    /// `pool_size` must be non-zero.
    pub fn slot(&self, key: &str, pool_size: usize) -> usize {
        self.hash(key) as usize % pool_size
    }
}

impl Default for RouteHasher {
    fn default() -> Self {
        Self::random()
    }
}
