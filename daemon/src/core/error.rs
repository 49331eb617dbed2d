use vela_common::{
    account::BalanceError, crypto::CryptoError, serializer::ReaderError,
    transaction::TransactionError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("corrupted data in storage")]
    CorruptedData,

    #[error("chain has no top block")]
    NoTopBlock,
}
