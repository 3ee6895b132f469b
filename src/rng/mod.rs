//! Deterministic random number generation
//!
//! Every generator is a `ChaCha8Rng` seeded from (stream, entity, epoch), so a
//! worker or facility always sees the same sequence for a given master seed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Stream identifier for generator families
pub type StreamId = u32;

pub const SEEDING_STREAM: StreamId = 1;
pub const PRIMARY_STREAM: StreamId = 2;
pub const STAFF_STREAM: StreamId = 3;
pub const GROUPING_STREAM: StreamId = 4;

/// Hands out per-worker and per-facility generators
#[derive(Debug, Clone, Copy)]
pub struct RngManager {
    master_seed: u64,
}

impl RngManager {
    pub fn new(seed: u64) -> Self {
        Self { master_seed: seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Generator owned by one worker for one pass of one epoch
    pub fn worker_rng(&self, stream: StreamId, epoch: u64, worker: usize) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.derive_seed(stream, worker as u64, epoch))
    }

    /// Generator bound to a single entity (a facility during grouping, say)
    pub fn entity_rng(&self, stream: StreamId, epoch: u64, entity: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.derive_seed(stream, entity, epoch))
    }

    fn derive_seed(&self, stream: StreamId, entity: u64, epoch: u64) -> u64 {
        let mut seed = self.master_seed;
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        seed ^= (stream as u64).wrapping_mul(1103515245);
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        seed ^= entity.wrapping_mul(48271);
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        seed ^= epoch.wrapping_mul(69069);
        seed
    }
}

impl Default for RngManager {
    fn default() -> Self {
        Self::new(42)
    }
}

/// Small helpers used throughout the sampler
pub trait RngExt {
    /// Uniform draw in `[0, 1)`
    fn unit(&mut self) -> f64;
    fn chance(&mut self, probability: f64) -> bool;
}

impl<R: Rng> RngExt for R {
    fn unit(&mut self) -> f64 {
        self.gen::<f64>()
    }

    fn chance(&mut self, probability: f64) -> bool {
        self.gen::<f64>() < probability
    }
}
