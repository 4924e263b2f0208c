//! Snowflake identifier generation
//!
//! Layout (most significant bit first):
//!
//! | bits | field          |
//! |------|----------------|
//! | 1    | sign (always 0) |
//! | 41   | milliseconds since [`EPOCH_MS`] |
//! | 5    | datacenter id  |
//! | 5    | worker id      |
//! | 12   | sequence       |
//!
//! One generator instance never hands out the same id twice and its ids
//! are strictly increasing.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Custom epoch (2010-11-04T01:42:54.657Z)
pub const EPOCH_MS: u64 = 1_288_834_974_657;

const WORKER_ID_BITS: u32 = 5;
const DATACENTER_ID_BITS: u32 = 5;
const SEQUENCE_BITS: u32 = 12;

pub const MAX_WORKER_ID: u64 = (1 << WORKER_ID_BITS) - 1;
pub const MAX_DATACENTER_ID: u64 = (1 << DATACENTER_ID_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_ID_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_ID_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS + DATACENTER_ID_BITS;

/// Backwards clock drift absorbed by issuing from the last timestamp
const CLOCK_BACKWARD_TOLERANCE_MS: u64 = 2000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("worker id {0} out of range 0..=31")]
    InvalidWorkerId(u64),

    #[error("datacenter id {0} out of range 0..=31")]
    InvalidDatacenterId(u64),

    #[error("clock moved backwards by {drift_ms}ms, refusing to generate id")]
    ClockMovedBackwards { drift_ms: u64 },
}

/// Decoded fields of a generated id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub timestamp_ms: u64,
    pub datacenter_id: u64,
    pub worker_id: u64,
    pub sequence: u64,
}

struct State {
    last_timestamp: u64,
    sequence: u64,
}

/// Process-wide snowflake id generator
pub struct IdGenerator {
    worker_id: u64,
    datacenter_id: u64,
    state: Mutex<State>,
    clock: fn() -> u64,
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("worker_id", &self.worker_id)
            .field("datacenter_id", &self.datacenter_id)
            .finish()
    }
}

impl IdGenerator {
    /// Create a generator with explicit discriminators.
    pub fn new(worker_id: u64, datacenter_id: u64) -> Result<Self, IdError> {
        Self::with_clock(worker_id, datacenter_id, system_millis)
    }

    /// Create a generator whose discriminators are derived from the host:
    /// the datacenter id from the local IPv4 address, the worker id from
    /// the process id.
    pub fn from_environment() -> Self {
        let datacenter_id = crate::local_ip()
            .rsplit('.')
            .next()
            .and_then(|octet| octet.parse::<u64>().ok())
            .unwrap_or(0)
            & MAX_DATACENTER_ID;
        let worker_id = u64::from(std::process::id()) & MAX_WORKER_ID;

        Self {
            worker_id,
            datacenter_id,
            state: Mutex::new(State {
                last_timestamp: 0,
                sequence: 0,
            }),
            clock: system_millis,
        }
    }

    fn with_clock(worker_id: u64, datacenter_id: u64, clock: fn() -> u64) -> Result<Self, IdError> {
        if worker_id > MAX_WORKER_ID {
            return Err(IdError::InvalidWorkerId(worker_id));
        }
        if datacenter_id > MAX_DATACENTER_ID {
            return Err(IdError::InvalidDatacenterId(datacenter_id));
        }

        Ok(Self {
            worker_id,
            datacenter_id,
            state: Mutex::new(State {
                last_timestamp: 0,
                sequence: 0,
            }),
            clock,
        })
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub fn datacenter_id(&self) -> u64 {
        self.datacenter_id
    }

    /// Generate the next id.
    pub fn next_id(&self) -> Result<u64, IdError> {
        let mut state = self.state.lock();
        let mut timestamp = (self.clock)();

        if timestamp < state.last_timestamp {
            let drift_ms = state.last_timestamp - timestamp;
            if drift_ms > CLOCK_BACKWARD_TOLERANCE_MS {
                return Err(IdError::ClockMovedBackwards { drift_ms });
            }
            timestamp = state.last_timestamp;
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                timestamp = self.til_next_millis(state.last_timestamp);
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp = timestamp;

        Ok(((timestamp - EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_ID_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | state.sequence)
    }

    /// Split an id back into its fields.
    pub fn decompose(id: u64) -> IdParts {
        IdParts {
            timestamp_ms: (id >> TIMESTAMP_SHIFT) + EPOCH_MS,
            datacenter_id: (id >> DATACENTER_ID_SHIFT) & MAX_DATACENTER_ID,
            worker_id: (id >> WORKER_ID_SHIFT) & MAX_WORKER_ID,
            sequence: id & SEQUENCE_MASK,
        }
    }

    // Sequence exhausted: move to the next millisecond. While running on a
    // logical clock (wall clock behind) the timestamp is advanced directly.
    fn til_next_millis(&self, last_timestamp: u64) -> u64 {
        let mut now = (self.clock)();
        if now < last_timestamp {
            return last_timestamp + 1;
        }
        while now <= last_timestamp {
            std::hint::spin_loop();
            now = (self.clock)();
        }
        now
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_environment()
    }
}

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MS)
}
