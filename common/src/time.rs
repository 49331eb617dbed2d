use std::time::{SystemTime, UNIX_EPOCH};

// Consensus timestamps are 32-bit seconds since epoch: they are hashed into
// blocks and transactions and must stay stable on the wire.
pub type Timestamp = u32;

// Seconds timestamps used for non-consensus bookkeeping (peer freshness,
// scheduled tasks). Never feed these into anything that must be
// deterministic across nodes.
pub type TimestampSeconds = u64;

pub fn get_current_time_in_seconds() -> TimestampSeconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

// Return the current time as a consensus timestamp
pub fn current_timestamp() -> Timestamp {
    get_current_time_in_seconds() as Timestamp
}
