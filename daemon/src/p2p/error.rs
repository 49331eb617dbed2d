use crate::core::error::BlockchainError;
use vela_common::serializer::ReaderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Blockchain(#[from] BlockchainError),

    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("invalid frame")]
    InvalidFrame,

    #[error("peer write channel closed")]
    ChannelClosed,

    #[error("peer pool is full")]
    PoolFull,

    #[error("session closed")]
    Closed,
}
