use super::Fee;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error, Formatter};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Success,
    Pending,
    BadSign,
    NotEnoughBalance,
    Revert,
    BadQueryForm,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    None,
    Transfer,
    ContractCall,
    ContractCreation,
}

/// Outcome of admitting or executing one transaction. Outcomes are data,
/// not errors: every processed transaction gets one, retrievable by hash.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct TransactionStatus {
    pub code: StatusCode,
    pub action: ActionType,
    pub gas_left: Fee,
    pub message: String,
}

impl TransactionStatus {
    pub fn new(code: StatusCode, action: ActionType, gas_left: Fee, message: String) -> Self {
        TransactionStatus {
            code,
            action,
            gas_left,
            message,
        }
    }

    pub fn pending(fee: Fee) -> Self {
        Self::new(StatusCode::Pending, ActionType::None, fee, String::new())
    }

    pub fn bad_sign(fee: Fee) -> Self {
        Self::new(StatusCode::BadSign, ActionType::None, fee, String::new())
    }

    pub fn is_pending(&self) -> bool {
        self.code == StatusCode::Pending
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "TransactionStatus[{:?}, {:?}, gas_left: {}]",
            self.code, self.action, self.gas_left
        )
    }
}
