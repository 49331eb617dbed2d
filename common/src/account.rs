use crate::crypto::{hash, Address, Hash};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// 256-bit unsigned balance. All arithmetic on it is checked.
pub type Balance = U256;

// 32-byte EVM storage word
pub type StorageValue = [u8; 32];

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("balance overflow")]
    Overflow,

    #[error("insufficient balance: need {need}, have {have}")]
    Insufficient { need: Balance, have: Balance },
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Client,
    Contract,
}

/// Live state of one account. Client accounts carry only a balance and
/// their transaction history; contract accounts additionally own storage
/// and runtime code. Not persisted: the account map is rebuilt by
/// replaying the chain.
#[derive(Clone, Debug)]
pub struct Account {
    account_type: AccountType,
    balance: Balance,
    // hashes of transactions sent from this account, in replay order
    transactions: Vec<Hash>,
    // storage slots, keyed by SHA256 of the 32-byte EVM slot key
    storage: HashMap<Hash, StorageValue>,
    runtime_code: Vec<u8>,
    code_hash: Hash,
}

impl Account {
    pub fn new(account_type: AccountType) -> Self {
        Account {
            account_type,
            balance: Balance::zero(),
            transactions: Vec::new(),
            storage: HashMap::new(),
            runtime_code: Vec::new(),
            code_hash: Hash::zero(),
        }
    }

    pub fn new_client() -> Self {
        Self::new(AccountType::Client)
    }

    pub fn new_contract() -> Self {
        Self::new(AccountType::Contract)
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn add_balance(&mut self, amount: Balance) -> Result<(), BalanceError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(BalanceError::Overflow)?;
        Ok(())
    }

    pub fn sub_balance(&mut self, amount: Balance) -> Result<(), BalanceError> {
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or(BalanceError::Insufficient {
                need: amount,
                have: self.balance,
            })?;
        Ok(())
    }

    pub fn add_transaction(&mut self, tx_hash: Hash) {
        self.transactions.push(tx_hash);
    }

    pub fn transactions(&self) -> &[Hash] {
        &self.transactions
    }

    // Number of transactions sent so far, used as the creation nonce
    // when deriving contract addresses
    pub fn nonce(&self) -> u64 {
        self.transactions.len() as u64
    }

    pub fn runtime_code(&self) -> &[u8] {
        &self.runtime_code
    }

    pub fn code_hash(&self) -> &Hash {
        &self.code_hash
    }

    pub fn set_runtime_code(&mut self, code: Vec<u8>) {
        self.code_hash = hash(&code);
        self.runtime_code = code;
    }

    pub fn has_storage_value(&self, key: &Hash) -> bool {
        self.storage.contains_key(key)
    }

    pub fn storage_value(&self, key: &Hash) -> Option<&StorageValue> {
        self.storage.get(key)
    }

    pub fn set_storage_value(&mut self, key: Hash, value: StorageValue) {
        self.storage.insert(key, value);
    }
}

// Snapshot of an account as reported to clients
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AccountInfo {
    pub account_type: AccountType,
    pub address: Address,
    pub balance: Balance,
    pub transactions: Vec<Hash>,
    pub code_hash: Hash,
}

impl AccountInfo {
    pub fn empty(address: Address) -> Self {
        AccountInfo {
            account_type: AccountType::Client,
            address,
            balance: Balance::zero(),
            transactions: Vec::new(),
            code_hash: Hash::zero(),
        }
    }
}

impl From<(&Address, &Account)> for AccountInfo {
    fn from((address, account): (&Address, &Account)) -> Self {
        AccountInfo {
            account_type: account.account_type(),
            address: *address,
            balance: account.balance(),
            transactions: account.transactions().to_vec(),
            code_hash: account.code_hash().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_balance_arithmetic() {
        let mut account = Account::new_client();
        account.add_balance(Balance::from(100u64)).unwrap();
        account.sub_balance(Balance::from(40u64)).unwrap();
        assert_eq!(account.balance(), Balance::from(60u64));

        assert!(account.sub_balance(Balance::from(61u64)).is_err());
        assert_eq!(account.balance(), Balance::from(60u64));

        account.add_balance(Balance::MAX - 60).unwrap();
        assert!(account.add_balance(Balance::from(1u64)).is_err());
    }

    #[test]
    fn test_code_hash_follows_code() {
        let mut account = Account::new_contract();
        assert_eq!(*account.code_hash(), Hash::zero());

        account.set_runtime_code(vec![0x60, 0x00]);
        assert_eq!(*account.code_hash(), hash(&[0x60, 0x00]));
    }

    #[test]
    fn test_nonce_counts_transactions() {
        let mut account = Account::new_client();
        assert_eq!(account.nonce(), 0);
        account.add_transaction(hash(b"tx1"));
        account.add_transaction(hash(b"tx2"));
        assert_eq!(account.nonce(), 2);
    }
}
