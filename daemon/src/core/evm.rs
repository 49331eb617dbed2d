use crate::{config::STATIC_DIFFICULTY, core::state::StateSnapshot};
use log::{debug, warn};
use thiserror::Error;
use vela_common::{
    account::{AccountType, Balance, StorageValue},
    block::Block,
    crypto::{hash, Address, Hash},
    transaction::Transaction,
};

/// EVMC-shaped seam between the executor and whatever bytecode interpreter
/// the node embeds. The core only speaks this interface; the interpreter is
/// injected at construction.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallKind {
    Call,
    Create,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExecStatus {
    Success,
    Revert,
    Failure,
}

#[derive(Clone, Debug)]
pub struct ExecutionMessage {
    pub kind: CallKind,
    pub depth: u32,
    pub gas: u64,
    pub sender: Address,
    pub recipient: Address,
    pub value: Balance,
    pub input: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    pub gas_left: u64,
    pub output: Vec<u8>,
}

impl ExecutionResult {
    pub fn success(gas_left: u64, output: Vec<u8>) -> Self {
        ExecutionResult {
            status: ExecStatus::Success,
            gas_left,
            output,
        }
    }

    pub fn revert(gas_left: u64) -> Self {
        ExecutionResult {
            status: ExecStatus::Revert,
            gas_left,
            output: Vec::new(),
        }
    }

    pub fn failure(gas_left: u64) -> Self {
        ExecutionResult {
            status: ExecStatus::Failure,
            gas_left,
            output: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error("no bytecode interpreter is plugged into this node")]
    Unavailable,

    #[error("interpreter failure: {0}")]
    Internal(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StorageStatus {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

#[derive(Clone, Debug)]
pub struct TxContext {
    pub origin: Address,
    pub coinbase: Address,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub difficulty: u64,
}

/// Host callbacks the interpreter uses to reach world state. Mirrors the
/// EVMC host interface. A host instance is bound to a single top-level
/// transaction and is never shared across threads; `call` may re-enter the
/// interpreter.
pub trait HostContext {
    fn account_exists(&self, address: &Address) -> bool;
    fn get_storage(&self, address: &Address, key: &StorageValue) -> StorageValue;
    fn set_storage(
        &mut self,
        address: &Address,
        key: &StorageValue,
        value: &StorageValue,
    ) -> StorageStatus;
    fn get_balance(&self, address: &Address) -> Balance;
    fn get_code_size(&self, address: &Address) -> usize;
    fn get_code_hash(&self, address: &Address) -> Hash;
    fn copy_code(&self, address: &Address, offset: usize, buffer: &mut [u8]) -> usize;
    fn selfdestruct(&mut self, address: &Address, beneficiary: &Address);
    fn call(&mut self, msg: &ExecutionMessage) -> ExecutionResult;
    fn get_tx_context(&self) -> TxContext;
    fn get_block_hash(&self, block_number: u64) -> Option<Hash>;
    fn emit_log(&mut self, address: &Address, data: &[u8], topics: &[Hash]);
}

pub trait VirtualMachine: Send + Sync {
    fn execute(
        &self,
        host: &mut dyn HostContext,
        msg: &ExecutionMessage,
        code: &[u8],
    ) -> Result<ExecutionResult, VmError>;
}

// Resolves depth -> block hash for the BLOCKHASH opcode
pub trait BlockHashResolver {
    fn resolve_block_hash(&self, depth: u64) -> Option<Hash>;
}

impl BlockHashResolver for crate::core::storage::ChainStorage {
    fn resolve_block_hash(&self, depth: u64) -> Option<Hash> {
        self.find_block_hash_by_depth(depth)
    }
}

/// Placeholder interpreter for nodes built without one: every execution
/// reports `Unavailable`, which the executor turns into a `Failed` status.
pub struct NullVm;

impl VirtualMachine for NullVm {
    fn execute(
        &self,
        _host: &mut dyn HostContext,
        _msg: &ExecutionMessage,
        _code: &[u8],
    ) -> Result<ExecutionResult, VmError> {
        Err(VmError::Unavailable)
    }
}

const NULL_WORD: StorageValue = [0u8; 32];

/// Implements the host callbacks against one transaction's state sandbox.
pub struct EvmHost<'a, 'b> {
    state: &'a mut StateSnapshot<'b>,
    chain: &'a dyn BlockHashResolver,
    vm: &'a dyn VirtualMachine,
    block: &'a Block,
    tx: &'a Transaction,
}

impl<'a, 'b> EvmHost<'a, 'b> {
    pub fn new(
        state: &'a mut StateSnapshot<'b>,
        chain: &'a dyn BlockHashResolver,
        vm: &'a dyn VirtualMachine,
        block: &'a Block,
        tx: &'a Transaction,
    ) -> Self {
        EvmHost {
            state,
            chain,
            vm,
            block,
            tx,
        }
    }
}

impl HostContext for EvmHost<'_, '_> {
    fn account_exists(&self, address: &Address) -> bool {
        self.state.has_account(address)
    }

    fn get_storage(&self, address: &Address, key: &StorageValue) -> StorageValue {
        // storage keys are stored hashed
        let key = hash(key);
        self.state
            .get_account(address)
            .and_then(|account| account.storage_value(&key).copied())
            .unwrap_or(NULL_WORD)
    }

    fn set_storage(
        &mut self,
        address: &Address,
        key: &StorageValue,
        value: &StorageValue,
    ) -> StorageStatus {
        let key = hash(key);
        let account = self.state.account_mut(address);

        if !account.has_storage_value(&key) {
            if *value == NULL_WORD {
                return StorageStatus::Unchanged;
            }
            account.set_storage_value(key, *value);
            return StorageStatus::Added;
        }

        let old_value = account.storage_value(&key).copied().unwrap_or(NULL_WORD);
        account.set_storage_value(key, *value);
        if old_value == *value {
            StorageStatus::Unchanged
        } else if *value == NULL_WORD {
            StorageStatus::Deleted
        } else {
            StorageStatus::Modified
        }
    }

    fn get_balance(&self, address: &Address) -> Balance {
        self.state.get_balance(address)
    }

    fn get_code_size(&self, address: &Address) -> usize {
        self.state
            .get_account(address)
            .map(|account| account.runtime_code().len())
            .unwrap_or(0)
    }

    fn get_code_hash(&self, address: &Address) -> Hash {
        self.state
            .get_account(address)
            .map(|account| account.code_hash().clone())
            .unwrap_or_else(Hash::zero)
    }

    fn copy_code(&self, address: &Address, offset: usize, buffer: &mut [u8]) -> usize {
        let Some(account) = self.state.get_account(address) else {
            return 0;
        };
        let code = account.runtime_code();
        if offset >= code.len() {
            return 0;
        }
        let count = buffer.len().min(code.len() - offset);
        buffer[..count].copy_from_slice(&code[offset..offset + count]);
        count
    }

    // The transfer completes before the account disappears, so later
    // callbacks in the same execution observe the beneficiary credited
    // and the contract gone
    fn selfdestruct(&mut self, address: &Address, beneficiary: &Address) {
        debug!("selfdestruct of {} towards {}", address, beneficiary);
        let balance = self.state.get_balance(address);
        match self.state.try_transfer_money(address, beneficiary, balance) {
            Ok(_) => self.state.delete_account(address),
            Err(e) => warn!("selfdestruct transfer failed: {}", e),
        }
    }

    fn call(&mut self, msg: &ExecutionMessage) -> ExecutionResult {
        debug!("re-entrant call towards {}", msg.recipient);
        let is_contract = self.state.account_type(&msg.recipient) == Some(AccountType::Contract);
        if is_contract {
            let code = self
                .state
                .get_account(&msg.recipient)
                .map(|account| account.runtime_code().to_vec())
                .unwrap_or_default();
            let vm = self.vm;
            match vm.execute(self, msg, &code) {
                Ok(result) => result,
                Err(e) => {
                    warn!("nested execution failed: {}", e);
                    ExecutionResult::failure(msg.gas)
                }
            }
        } else {
            // plain value transfer towards a client account
            match self
                .state
                .try_transfer_money(&msg.sender, &msg.recipient, msg.value)
            {
                Ok(true) => ExecutionResult::success(msg.gas, Vec::new()),
                Ok(false) | Err(_) => ExecutionResult::failure(msg.gas),
            }
        }
    }

    fn get_tx_context(&self) -> TxContext {
        TxContext {
            origin: *self.tx.get_from(),
            coinbase: *self.block.get_coinbase(),
            block_number: self.block.get_depth(),
            block_timestamp: self.block.get_timestamp() as u64,
            difficulty: STATIC_DIFFICULTY,
        }
    }

    fn get_block_hash(&self, block_number: u64) -> Option<Hash> {
        self.chain.resolve_block_hash(block_number)
    }

    fn emit_log(&mut self, _address: &Address, _data: &[u8], _topics: &[Hash]) {
        warn!("emit_log is denied on this chain");
    }
}
