use super::{Transaction, TransactionType};
use crate::{
    account::Balance,
    crypto::Address,
    time::Timestamp,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("transaction amount cannot be zero")]
    ZeroAmount,

    #[error("contract creation requires init code")]
    EmptyCreationData,

    #[error("destination must be null exactly for contract creations")]
    DestinationMismatch,
}

/// Builds a transaction and enforces its structural invariants:
/// the destination is null exactly for contract creations, creations
/// carry init code, and everything else moves a non-zero amount.
#[derive(Default)]
pub struct TransactionBuilder {
    from: Option<Address>,
    to: Option<Address>,
    amount: Balance,
    fee: u64,
    timestamp: Option<Timestamp>,
    tx_type: TransactionType,
    data: Vec<u8>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn amount(mut self, amount: Balance) -> Self {
        self.amount = amount;
        self
    }

    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    // Message call against a deployed contract
    pub fn call(mut self, to: Address, data: Vec<u8>) -> Self {
        self.to = Some(to);
        self.tx_type = TransactionType::MessageCall;
        self.data = data;
        self
    }

    // Contract creation: destination is the null address, data is init code
    pub fn contract_creation(mut self, init_code: Vec<u8>) -> Self {
        self.to = Some(Address::null());
        self.tx_type = TransactionType::ContractCreation;
        self.data = init_code;
        self
    }

    pub fn build(self) -> Result<Transaction, TransactionError> {
        let from = self.from.ok_or(TransactionError::MissingField("from"))?;
        let to = self.to.ok_or(TransactionError::MissingField("to"))?;
        let timestamp = self
            .timestamp
            .ok_or(TransactionError::MissingField("timestamp"))?;

        let is_creation = self.tx_type == TransactionType::ContractCreation;
        if to.is_null() != is_creation {
            return Err(TransactionError::DestinationMismatch);
        }
        if is_creation {
            if self.data.is_empty() {
                return Err(TransactionError::EmptyCreationData);
            }
        } else if self.amount.is_zero() {
            // amount-0 calls against a contract are legal, plain transfers are not
            if self.tx_type != TransactionType::MessageCall {
                return Err(TransactionError::ZeroAmount);
            }
        }

        Ok(Transaction::new(
            from,
            to,
            self.amount,
            self.fee,
            timestamp,
            self.tx_type,
            self.data,
            None,
        ))
    }
}
