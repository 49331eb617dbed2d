use crate::core::error::BlockchainError;
use log::debug;
use std::collections::HashMap;
use vela_common::{
    account::{Account, AccountType, Balance, BalanceError},
    block::Block,
    crypto::{Address, Hash, Hashable},
    serializer::{Serializer, Writer},
    transaction::Transaction,
};

/// Owns the live account map. Mutation during block replay goes through
/// copy-on-write snapshots: one transaction executes against a sandbox and
/// its buffered writes are merged back only if the transaction commits.
/// The core wraps the manager in its state lock; snapshot commits happen
/// under the write side.
pub struct StateManager {
    accounts: HashMap<Address, Account>,
}

// Buffered writes of one committed sandbox. `None` marks a deleted account.
pub struct StateChanges(HashMap<Address, Option<Account>>);

impl StateManager {
    pub fn new() -> Self {
        StateManager {
            accounts: HashMap::new(),
        }
    }

    pub fn has_account(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn get_account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    // Auto-creates a zero-balance client account on first write access
    pub fn account_mut(&mut self, address: &Address) -> &mut Account {
        self.accounts
            .entry(*address)
            .or_insert_with(Account::new_client)
    }

    pub fn get_balance(&self, address: &Address) -> Balance {
        self.accounts
            .get(address)
            .map(|account| account.balance())
            .unwrap_or_else(Balance::zero)
    }

    // Sender can cover amount + fee out of its current balance
    pub fn check_transaction(&self, tx: &Transaction) -> bool {
        self.get_balance(tx.get_from()) >= tx.get_cost()
    }

    pub fn try_transfer_money(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Balance,
    ) -> Result<bool, BalanceError> {
        if self.get_balance(from) < amount {
            return Ok(false);
        }
        if from == to {
            return Ok(true);
        }
        self.account_mut(from).sub_balance(amount)?;
        self.account_mut(to).add_balance(amount)?;
        Ok(true)
    }

    // Credits the genesis grant; the genesis block is not replayed through
    // the executor (no fees, no emission, unsigned sender)
    pub fn update_from_genesis(&mut self, block: &Block) -> Result<(), BlockchainError> {
        for tx in block.get_transactions() {
            let tx_hash = tx.hash();
            self.account_mut(tx.get_to()).add_balance(tx.get_amount())?;
            self.account_mut(tx.get_from()).add_transaction(tx_hash);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> StateSnapshot<'_> {
        StateSnapshot {
            base: self,
            dirty: HashMap::new(),
        }
    }

    pub fn apply(&mut self, changes: StateChanges) {
        for (address, entry) in changes.0 {
            match entry {
                Some(account) => {
                    self.accounts.insert(address, account);
                }
                None => {
                    debug!("Removing account {}", address);
                    self.accounts.remove(&address);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy-on-write sandbox over a `StateManager`. Reads fall through to the
/// base state; the first write to an account clones it into the dirty map.
pub struct StateSnapshot<'a> {
    base: &'a StateManager,
    dirty: HashMap<Address, Option<Account>>,
}

impl<'a> StateSnapshot<'a> {
    pub fn has_account(&self, address: &Address) -> bool {
        match self.dirty.get(address) {
            Some(entry) => entry.is_some(),
            None => self.base.has_account(address),
        }
    }

    pub fn get_account(&self, address: &Address) -> Option<&Account> {
        match self.dirty.get(address) {
            Some(entry) => entry.as_ref(),
            None => self.base.get_account(address),
        }
    }

    pub fn account_type(&self, address: &Address) -> Option<AccountType> {
        self.get_account(address).map(|account| account.account_type())
    }

    pub fn account_mut(&mut self, address: &Address) -> &mut Account {
        let base = self.base;
        let slot = self
            .dirty
            .entry(*address)
            .or_insert_with(|| Some(base.get_account(address).cloned().unwrap_or_else(Account::new_client)));
        // a deleted account reappears as a fresh client on the next write
        slot.get_or_insert_with(Account::new_client)
    }

    pub fn get_balance(&self, address: &Address) -> Balance {
        self.get_account(address)
            .map(|account| account.balance())
            .unwrap_or_else(Balance::zero)
    }

    pub fn add_balance(&mut self, address: &Address, amount: Balance) -> Result<(), BalanceError> {
        self.account_mut(address).add_balance(amount)
    }

    pub fn sub_balance(&mut self, address: &Address, amount: Balance) -> Result<(), BalanceError> {
        self.account_mut(address).sub_balance(amount)
    }

    pub fn try_transfer_money(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Balance,
    ) -> Result<bool, BalanceError> {
        if self.get_balance(from) < amount {
            return Ok(false);
        }
        if from == to {
            return Ok(true);
        }
        self.account_mut(from).sub_balance(amount)?;
        self.account_mut(to).add_balance(amount)?;
        Ok(true)
    }

    /// Derives and registers a new contract account:
    /// address = RIPEMD160(SHA256(creator || init_code_hash || creator_nonce))
    pub fn create_contract_account(&mut self, creator: &Address, data_hash: &Hash) -> Address {
        let nonce = self
            .get_account(creator)
            .map(|account| account.nonce())
            .unwrap_or(0);

        let mut writer = Writer::with_capacity(20 + 32 + 8);
        creator.write(&mut writer);
        data_hash.write(&mut writer);
        writer.write_u64(nonce);
        let address = Address::from_data(&writer.into_bytes());

        self.dirty.insert(address, Some(Account::new_contract()));
        address
    }

    // Used by selfdestruct
    pub fn delete_account(&mut self, address: &Address) {
        self.dirty.insert(*address, None);
    }

    pub fn into_changes(self) -> StateChanges {
        StateChanges(self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: &[u8]) -> Address {
        Address::from_data(tag)
    }

    #[test]
    fn test_snapshot_isolation() {
        let mut state = StateManager::new();
        state
            .account_mut(&addr(b"alice"))
            .add_balance(Balance::from(100u64))
            .unwrap();

        let mut snapshot = state.snapshot();
        snapshot
            .sub_balance(&addr(b"alice"), Balance::from(40u64))
            .unwrap();
        // the base state is untouched until the changes are applied
        assert_eq!(snapshot.get_balance(&addr(b"alice")), Balance::from(60u64));
        assert_eq!(state.get_balance(&addr(b"alice")), Balance::from(100u64));

        let changes = snapshot.into_changes();
        state.apply(changes);
        assert_eq!(state.get_balance(&addr(b"alice")), Balance::from(60u64));
    }

    #[test]
    fn test_discarded_snapshot_changes_nothing() {
        let mut state = StateManager::new();
        state
            .account_mut(&addr(b"alice"))
            .add_balance(Balance::from(100u64))
            .unwrap();

        {
            let mut snapshot = state.snapshot();
            snapshot
                .sub_balance(&addr(b"alice"), Balance::from(100u64))
                .unwrap();
        }
        assert_eq!(state.get_balance(&addr(b"alice")), Balance::from(100u64));
    }

    #[test]
    fn test_transfer_paths() {
        let mut state = StateManager::new();
        state
            .account_mut(&addr(b"alice"))
            .add_balance(Balance::from(50u64))
            .unwrap();

        let mut snapshot = state.snapshot();
        assert!(snapshot
            .try_transfer_money(&addr(b"alice"), &addr(b"bob"), Balance::from(20u64))
            .unwrap());
        assert!(!snapshot
            .try_transfer_money(&addr(b"alice"), &addr(b"bob"), Balance::from(31u64))
            .unwrap());
        assert_eq!(snapshot.get_balance(&addr(b"bob")), Balance::from(20u64));

        // self-transfer is a no-op but must not fail while funded
        assert!(snapshot
            .try_transfer_money(&addr(b"alice"), &addr(b"alice"), Balance::from(30u64))
            .unwrap());
        assert_eq!(snapshot.get_balance(&addr(b"alice")), Balance::from(30u64));
    }

    #[test]
    fn test_contract_account_creation_is_deterministic() {
        let state = StateManager::new();
        let data_hash = vela_common::crypto::hash(b"init code");

        let mut first = state.snapshot();
        let a = first.create_contract_account(&addr(b"creator"), &data_hash);
        let mut second = state.snapshot();
        let b = second.create_contract_account(&addr(b"creator"), &data_hash);
        assert_eq!(a, b);
        assert_eq!(first.account_type(&a), Some(AccountType::Contract));
    }

    #[test]
    fn test_nonce_changes_contract_address() {
        let mut state = StateManager::new();
        let data_hash = vela_common::crypto::hash(b"init code");

        let mut snapshot = state.snapshot();
        let first = snapshot.create_contract_account(&addr(b"creator"), &data_hash);
        drop(snapshot);

        state
            .account_mut(&addr(b"creator"))
            .add_transaction(vela_common::crypto::hash(b"tx"));
        let mut snapshot = state.snapshot();
        let second = snapshot.create_contract_account(&addr(b"creator"), &data_hash);
        assert_ne!(first, second);
    }

    #[test]
    fn test_delete_account() {
        let mut state = StateManager::new();
        state
            .account_mut(&addr(b"contract"))
            .add_balance(Balance::from(5u64))
            .unwrap();

        let mut snapshot = state.snapshot();
        snapshot.delete_account(&addr(b"contract"));
        assert!(!snapshot.has_account(&addr(b"contract")));
        assert_eq!(snapshot.get_balance(&addr(b"contract")), Balance::zero());

        state.apply(snapshot.into_changes());
        assert!(!state.has_account(&addr(b"contract")));
    }
}
