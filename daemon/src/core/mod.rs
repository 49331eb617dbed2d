pub mod error;
pub mod evm;
pub mod executor;
pub mod mempool;
pub mod state;
pub mod storage;

#[cfg(test)]
mod tests;

use crate::config::{Config, Difficulty, EVENT_CHANNEL_SIZE};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use self::{
    error::BlockchainError, evm::VirtualMachine, mempool::Mempool, state::StateManager,
    storage::ChainStorage,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, RwLock};
use vela_common::{
    account::{AccountInfo, Balance},
    block::{Block, BlockDepth},
    config::{GENESIS_RECIPIENT, GENESIS_TIMESTAMP, MAX_TRANSACTIONS_IN_BLOCK},
    crypto::{Address, Hash, Hashable, KeyVault},
    time::current_timestamp,
    transaction::{
        ActionType, StatusCode, Transaction, TransactionBuilder, TransactionStatus,
    },
};

lazy_static! {
    static ref GENESIS_BLOCK: Block = {
        let recipient: Address = GENESIS_RECIPIENT
            .parse()
            .expect("genesis recipient address is valid base58");
        let grant = TransactionBuilder::new()
            .from(Address::null())
            .to(recipient)
            .amount(Balance::MAX)
            .fee(0)
            .timestamp(GENESIS_TIMESTAMP)
            .build()
            .expect("genesis transaction is well formed");
        Block::new(
            0,
            Hash::zero(),
            GENESIS_TIMESTAMP,
            Address::null(),
            vec![grant],
        )
    };
}

pub fn genesis_block() -> &'static Block {
    &GENESIS_BLOCK
}

#[derive(Clone, Debug)]
pub struct BlockEvent {
    pub hash: Hash,
    pub block: Arc<Block>,
}

/// The node core: owns the chain store, the account state, the pending
/// pool and the transaction status registry, and wires the interpreter in.
/// All public operations are thread-safe. Lock order is chain, then state,
/// then mempool, then statuses; broadcasts fire after every lock is
/// released.
pub struct Core {
    vault: KeyVault,
    genesis: Block,
    chain: RwLock<ChainStorage>,
    state: RwLock<StateManager>,
    mempool: RwLock<Mempool>,
    tx_statuses: RwLock<HashMap<Hash, TransactionStatus>>,
    vm: Arc<dyn VirtualMachine>,
    block_events: broadcast::Sender<BlockEvent>,
    tx_events: broadcast::Sender<Arc<Transaction>>,
}

impl Core {
    /// Opens the store, installs genesis if the store is empty, and replays
    /// the whole chain to rebuild the account state and the status registry.
    pub fn new(
        config: &Config,
        vault: KeyVault,
        vm: Arc<dyn VirtualMachine>,
    ) -> Result<Arc<Self>, BlockchainError> {
        Self::with_genesis(config, vault, vm, genesis_block().clone())
    }

    // Same as `new` but for a custom chain (devnets, tests). The genesis
    // block must match whatever the store was built from.
    pub fn with_genesis(
        config: &Config,
        vault: KeyVault,
        vm: Arc<dyn VirtualMachine>,
        genesis: Block,
    ) -> Result<Arc<Self>, BlockchainError> {
        let mut storage = ChainStorage::open(&config.database.path, config.database.clean)?;
        let mut state = StateManager::new();
        let mut statuses = HashMap::new();

        if storage.is_empty() {
            if !storage.try_add_block(&genesis)? {
                return Err(BlockchainError::CorruptedData);
            }
            info!("Initialized chain with genesis block {}", genesis.hash());
        }

        // the store must belong to this chain
        let stored_genesis = storage
            .find_block_hash_by_depth(0)
            .ok_or(BlockchainError::CorruptedData)?;
        if stored_genesis != genesis.hash() {
            return Err(BlockchainError::CorruptedData);
        }
        state.update_from_genesis(&genesis)?;

        let top_depth = storage
            .get_top_block()
            .map(|block| block.get_depth())
            .ok_or(BlockchainError::NoTopBlock)?;
        for depth in 1..=top_depth {
            let hash = storage
                .find_block_hash_by_depth(depth)
                .ok_or(BlockchainError::CorruptedData)?;
            let block = storage
                .find_block(&hash)?
                .ok_or(BlockchainError::CorruptedData)?;
            let block_statuses =
                executor::apply_block(&mut state, &storage, vm.as_ref(), &block)?;
            statuses.extend(block_statuses);
        }
        if top_depth > 0 {
            info!("Replayed chain state up to depth {}", top_depth);
        }

        let (block_events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (tx_events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Ok(Arc::new(Core {
            vault,
            genesis,
            chain: RwLock::new(storage),
            state: RwLock::new(state),
            mempool: RwLock::new(Mempool::new()),
            tx_statuses: RwLock::new(statuses),
            vm,
            block_events,
            tx_events,
        }))
    }

    pub fn this_node_address(&self) -> &Address {
        self.vault.address()
    }

    pub fn key_vault(&self) -> &KeyVault {
        &self.vault
    }

    pub fn subscribe_blocks(&self) -> broadcast::Receiver<BlockEvent> {
        self.block_events.subscribe()
    }

    pub fn subscribe_transactions(&self) -> broadcast::Receiver<Arc<Transaction>> {
        self.tx_events.subscribe()
    }

    /// Admission into the pending pool. Every outcome is recorded in the
    /// status registry under the transaction hash.
    pub async fn add_pending_transaction(&self, tx: Transaction) -> TransactionStatus {
        let tx_hash = tx.hash();
        let fee = tx.get_fee();

        if !tx.is_well_formed() {
            let status = TransactionStatus::new(
                StatusCode::BadQueryForm,
                ActionType::None,
                fee,
                String::new(),
            );
            self.record_status(tx_hash, status.clone()).await;
            return status;
        }

        if !tx.check_sign() {
            debug!("Failed signature verification for {}", tx_hash);
            let status = TransactionStatus::bad_sign(fee);
            self.record_status(tx_hash, status.clone()).await;
            return status;
        }

        // already mined: report how it went back then
        {
            let chain = self.chain.read().await;
            if chain.has_transaction(&tx_hash) {
                let recorded = self.get_transaction_status(&tx_hash).await;
                return recorded.unwrap_or_else(|| {
                    TransactionStatus::new(
                        StatusCode::Failed,
                        ActionType::None,
                        fee,
                        String::new(),
                    )
                });
            }
        }

        let (status, inserted) = {
            let state = self.state.read().await;
            let mut mempool = self.mempool.write().await;

            if mempool.contains(&tx_hash) {
                (TransactionStatus::pending(fee), false)
            } else {
                let reserved = mempool.reserved_cost(tx.get_from());
                let balance = state.get_balance(tx.get_from());
                if reserved.saturating_add(tx.get_cost()) > balance {
                    (
                        TransactionStatus::new(
                            StatusCode::NotEnoughBalance,
                            ActionType::None,
                            0,
                            String::new(),
                        ),
                        false,
                    )
                } else {
                    mempool.insert(Arc::new(tx.clone()));
                    (TransactionStatus::pending(fee), true)
                }
            }
        };

        self.record_status(tx_hash, status.clone()).await;
        if inserted {
            let _ = self.tx_events.send(Arc::new(tx));
        }
        status
    }

    /// Longest-chain acceptance: validates the block against the current
    /// top and the account balances, persists it, replays its transactions
    /// and drops them from the pending pool. Serialized by the chain lock;
    /// of two concurrent blocks the loser no longer links and returns false.
    pub async fn try_add_block(&self, block: Block) -> Result<bool, BlockchainError> {
        let mut chain = self.chain.write().await;

        {
            let state = self.state.read().await;
            if !self.check_block(&chain, &state, &block) {
                return Ok(false);
            }
        }

        if !chain.try_add_block(&block)? {
            return Ok(false);
        }

        debug!("Applying transactions from block #{}", block.get_depth());
        let statuses = {
            let mut state = self.state.write().await;
            executor::apply_block(&mut state, &*chain, self.vm.as_ref(), &block)?
        };

        {
            let mut mempool = self.mempool.write().await;
            mempool.remove_block_txs(block.get_transactions());
        }
        {
            let mut outputs = self.tx_statuses.write().await;
            outputs.extend(statuses);
        }

        let block_hash = block.hash();
        drop(chain);

        info!("Added block {} at depth {}", block_hash, block.get_depth());
        let _ = self.block_events.send(BlockEvent {
            hash: block_hash,
            block: Arc::new(block),
        });
        Ok(true)
    }

    // Pre-acceptance validation beyond the linkage the store enforces
    fn check_block(&self, chain: &ChainStorage, state: &StateManager, block: &Block) -> bool {
        let Some(top) = chain.get_top_block() else {
            return block.is_genesis();
        };

        if block.get_timestamp() <= top.get_timestamp() {
            debug!("Block timestamp is not past the top block");
            return false;
        }
        if block.get_txs_count() == 0 || block.get_txs_count() > MAX_TRANSACTIONS_IN_BLOCK {
            debug!("Block transaction count {} out of range", block.get_txs_count());
            return false;
        }

        // per-sender totals within the block must be covered by present balances
        let mut block_costs: HashMap<&Address, Balance> = HashMap::new();
        for tx in block.get_transactions() {
            if !tx.is_well_formed() || !tx.check_sign() {
                debug!("Block carries an invalid transaction {}", tx.hash());
                return false;
            }
            let cost = block_costs.entry(tx.get_from()).or_insert_with(Balance::zero);
            *cost = cost.saturating_add(tx.get_cost());
        }
        for (sender, cost) in block_costs {
            let Some(account) = state.get_account(sender) else {
                debug!("Block sender {} has no account", sender);
                return false;
            };
            if cost > account.balance() {
                debug!("Block spends more than {} holds", sender);
                return false;
            }
        }
        true
    }

    /// Template for external miners: next depth, current top hash, a
    /// best-fee selection from the pool, and the chain difficulty.
    pub async fn get_mining_data(&self) -> Result<(Block, Difficulty), BlockchainError> {
        let (top, difficulty) = {
            let chain = self.chain.read().await;
            chain
                .get_top_block_and_difficulty()
                .ok_or(BlockchainError::NoTopBlock)?
        };

        let selected = {
            let mempool = self.mempool.read().await;
            mempool.select_best_by_fee(MAX_TRANSACTIONS_IN_BLOCK)
        };
        let transactions = selected.iter().map(|tx| (**tx).clone()).collect();

        let timestamp = current_timestamp().max(top.get_timestamp() + 1);
        let template = Block::new(
            top.get_depth() + 1,
            top.hash(),
            timestamp,
            *self.vault.address(),
            transactions,
        );
        Ok((template, difficulty))
    }

    pub async fn get_balance(&self, address: &Address) -> Balance {
        let state = self.state.read().await;
        state.get_balance(address)
    }

    pub async fn get_account_info(&self, address: &Address) -> AccountInfo {
        let state = self.state.read().await;
        state
            .get_account(address)
            .map(|account| AccountInfo::from((address, account)))
            .unwrap_or_else(|| AccountInfo::empty(*address))
    }

    pub async fn find_block(&self, hash: &Hash) -> Result<Option<Block>, BlockchainError> {
        let chain = self.chain.read().await;
        chain.find_block(hash)
    }

    pub async fn find_block_hash_by_depth(&self, depth: BlockDepth) -> Option<Hash> {
        let chain = self.chain.read().await;
        chain.find_block_hash_by_depth(depth)
    }

    pub async fn find_transaction(
        &self,
        tx_hash: &Hash,
    ) -> Result<Option<Transaction>, BlockchainError> {
        let chain = self.chain.read().await;
        chain.find_transaction(tx_hash)
    }

    pub async fn get_top_block(&self) -> Block {
        let chain = self.chain.read().await;
        chain
            .get_top_block()
            .cloned()
            .unwrap_or_else(|| self.genesis.clone())
    }

    pub async fn get_top_block_hash(&self) -> Hash {
        let chain = self.chain.read().await;
        chain
            .get_top_hash()
            .cloned()
            .unwrap_or_else(|| self.genesis.hash())
    }

    pub async fn get_transaction_status(&self, tx_hash: &Hash) -> Option<TransactionStatus> {
        let outputs = self.tx_statuses.read().await;
        outputs.get(tx_hash).cloned()
    }

    async fn record_status(&self, tx_hash: Hash, status: TransactionStatus) {
        let mut outputs = self.tx_statuses.write().await;
        outputs.insert(tx_hash, status);
    }

    pub async fn shutdown(&self) -> Result<(), BlockchainError> {
        let chain = self.chain.read().await;
        if let Err(e) = chain.flush() {
            warn!("Failed to flush chain storage: {}", e);
            return Err(e);
        }
        info!("Chain storage flushed");
        Ok(())
    }
}
