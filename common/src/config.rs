use crate::time::Timestamp;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// In case of forks, a unique network id to avoid connecting to compatible chains
pub const NETWORK_ID_SIZE: usize = 16;
pub const NETWORK_ID: [u8; NETWORK_ID_SIZE] = [
    0x76, 0x65, 0x6c, 0x61, 0x2d, 0x6d, 0x61, 0x69, 0x6e, 0x2d, 0x76, 0x31, 0x00, 0x00, 0x00, 0x00,
];

// Block rules
pub const MAX_TRANSACTIONS_IN_BLOCK: usize = 100;

// Fixed per-block reward credited to the coinbase before transaction replay
pub const EMISSION_VALUE: u64 = 1_000;

// Genesis block parameters: fixed timestamp and the initial grant recipient.
// The whole supply (minus emission) starts on this account.
pub const GENESIS_TIMESTAMP: Timestamp = 1_583_789_617;
pub const GENESIS_RECIPIENT: &str = "49cfqVfB1gTGw5XZSu6nZDrntLr1";
