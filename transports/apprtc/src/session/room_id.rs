//! Room id generation

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lowest generated room id (nine digits)
pub const MIN_ROOM_ID: u32 = 100_000_000;

/// One past the highest generated room id
pub const MAX_ROOM_ID: u32 = 1_000_000_000;

/// Source of room ids for sessions that do not name one
pub trait RoomIdGenerator: Send + Sync {
    /// Produce the next room id
    fn next_room_id(&self) -> String;
}

/// Uniformly random nine-digit room ids
///
/// Each generator owns its RNG, so concurrent sessions never share state.
pub struct RandomRoomIds {
    rng: Mutex<StdRng>,
}

impl RandomRoomIds {
    /// Generator seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for reproducible runs
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomRoomIds {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomIdGenerator for RandomRoomIds {
    fn next_room_id(&self) -> String {
        self.rng
            .lock()
            .gen_range(MIN_ROOM_ID..MAX_ROOM_ID)
            .to_string()
    }
}

/// Always returns the same room id
pub struct FixedRoomId(String);

impl FixedRoomId {
    /// Generator for `room_id`
    pub fn new(room_id: impl Into<String>) -> Self {
        Self(room_id.into())
    }
}

impl RoomIdGenerator for FixedRoomId {
    fn next_room_id(&self) -> String {
        self.0.clone()
    }
}
