//! Time-ordered 64-bit identifiers for metadata records.
//!
//! Layout (most significant first): 1 unused sign bit, 41 bits of milliseconds
//! since 2021-01-01T00:00:00Z, 5 bits datacenter id, 5 bits machine id and a
//! 12-bit per-millisecond sequence.
//!
//! Generation never blocks. If the wall clock steps back, or a millisecond's
//! sequence is exhausted, the generator keeps counting from its own last
//! millisecond until the wall clock passes it again.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// 2021-01-01T00:00:00Z in milliseconds
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_609_459_200_000;

const SEQUENCE_BITS: u32 = 12;
const MACHINE_BITS: u32 = 5;
const DATACENTER_BITS: u32 = 5;

const MACHINE_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_SHIFT: u32 = SEQUENCE_BITS + MACHINE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + MACHINE_BITS + DATACENTER_BITS;

const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_MACHINE_ID: u8 = (1 << MACHINE_BITS) - 1;
const MAX_DATACENTER_ID: u8 = (1 << DATACENTER_BITS) - 1;

/// Source of globally unique, roughly time-ordered ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> i64;
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: i64,
    sequence: i64,
}

#[derive(Debug)]
pub struct Snowflake {
    machine_id: i64,
    datacenter_id: i64,
    state: Mutex<SnowflakeState>,
}

impl Snowflake {
    /// Build a generator for an explicit node identity. Ids outside 0..=31 are masked.
    pub fn new(machine_id: u8, datacenter_id: u8) -> Self {
        Self {
            machine_id: i64::from(machine_id & MAX_MACHINE_ID),
            datacenter_id: i64::from(datacenter_id & MAX_DATACENTER_ID),
            state: Mutex::new(SnowflakeState::default()),
        }
    }

    /// Use the configured node ids, deriving any missing one from the hostname.
    pub fn from_node_ids(machine_id: Option<u8>, datacenter_id: Option<u8>) -> Self {
        let (host_machine, host_datacenter) = node_ids_from_hostname();
        let generator = Self::new(
            machine_id.unwrap_or(host_machine),
            datacenter_id.unwrap_or(host_datacenter),
        );
        tracing::info!(
            machine_id = generator.machine_id,
            datacenter_id = generator.datacenter_id,
            "Snowflake ID generator initialized"
        );
        generator
    }

    pub fn machine_id(&self) -> i64 {
        self.machine_id
    }

    pub fn datacenter_id(&self) -> i64 {
        self.datacenter_id
    }

    /// Split an id into (unix millis, datacenter id, machine id, sequence).
    pub fn decompose(id: i64) -> (i64, i64, i64, i64) {
        (
            (id >> TIMESTAMP_SHIFT) + SNOWFLAKE_EPOCH_MS,
            (id >> DATACENTER_SHIFT) & i64::from(MAX_DATACENTER_ID),
            (id >> MACHINE_SHIFT) & i64::from(MAX_MACHINE_ID),
            id & SEQUENCE_MASK,
        )
    }
}

impl Snowflake {
    fn id_at(&self, wall_ms: i64) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let ms = if wall_ms > state.last_ms {
            state.sequence = 0;
            wall_ms
        } else {
            if wall_ms < state.last_ms {
                tracing::warn!(
                    behind_ms = state.last_ms - wall_ms,
                    "Clock moved backwards, continuing from last issued millisecond"
                );
            }
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted; borrow the next millisecond
                state.last_ms + 1
            } else {
                state.last_ms
            }
        };
        state.last_ms = ms;

        ((ms - SNOWFLAKE_EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_SHIFT)
            | (self.machine_id << MACHINE_SHIFT)
            | state.sequence
    }
}

impl IdGenerator for Snowflake {
    fn next_id(&self) -> i64 {
        self.id_at(current_millis())
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(SNOWFLAKE_EPOCH_MS)
}

fn node_ids_from_hostname() -> (u8, u8) {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let digest = Sha256::digest(host.as_bytes());
    (digest[0] & MAX_MACHINE_ID, digest[1] & MAX_DATACENTER_ID)
}
