use crate::{
    config::{Difficulty, STATIC_DIFFICULTY},
    core::error::BlockchainError,
};
use log::{debug, info};
use std::{collections::HashMap, path::Path};
use vela_common::{
    block::{Block, BlockDepth},
    crypto::{Hash, Hashable},
    serializer::Serializer,
    transaction::Transaction,
};

// Entry kinds share one keyspace, distinguished by a 1-byte prefix
const SYSTEM_PREFIX: u8 = 1;
const BLOCK_PREFIX: u8 = 2;
const PREV_HASH_PREFIX: u8 = 3;
const DEPTH_PREFIX: u8 = 4;

const LAST_BLOCK_HASH: &[u8] = b"last_block_hash";

fn prefixed_key(prefix: u8, key: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(1 + key.len());
    data.push(prefix);
    data.extend_from_slice(key);
    data
}

fn block_key(hash: &Hash) -> Vec<u8> {
    prefixed_key(BLOCK_PREFIX, hash.as_bytes())
}

fn prev_hash_key(hash: &Hash) -> Vec<u8> {
    prefixed_key(PREV_HASH_PREFIX, hash.as_bytes())
}

fn depth_key(depth: BlockDepth) -> Vec<u8> {
    prefixed_key(DEPTH_PREFIX, &depth.to_be_bytes())
}

fn last_block_hash_key() -> Vec<u8> {
    prefixed_key(SYSTEM_PREFIX, LAST_BLOCK_HASH)
}

fn hash_from_value(value: &[u8]) -> Result<Hash, BlockchainError> {
    let bytes: [u8; 32] = value
        .try_into()
        .map_err(|_| BlockchainError::CorruptedData)?;
    Ok(Hash::new(bytes))
}

/// Persistent hash-linked ledger over sled. Holds the blocks and their
/// backwards links on disk; the depth index and the transaction index are
/// rebuilt in memory when the store is opened. Writers must serialize
/// through the core's blockchain lock so that the four writes of an
/// accepted block are observed atomically.
pub struct ChainStorage {
    db: sled::Db,
    // top of the chain, None only while the store is empty
    top: Option<(Hash, Block)>,
    depth_index: HashMap<BlockDepth, Hash>,
    // tx hash -> hash of the block containing it
    tx_index: HashMap<Hash, Hash>,
}

impl ChainStorage {
    pub fn open(path: &Path, clean: bool) -> Result<Self, BlockchainError> {
        if clean && path.exists() {
            std::fs::remove_dir_all(path)?;
            info!("Removed existing database at {}", path.display());
        }

        let db = sled::open(path)?;
        let mut storage = ChainStorage {
            db,
            top: None,
            depth_index: HashMap::new(),
            tx_index: HashMap::new(),
        };
        storage.load()?;
        Ok(storage)
    }

    // Walk the prev-hash links from the stored top back to genesis,
    // rebuilding the in-memory indices
    fn load(&mut self) -> Result<(), BlockchainError> {
        let Some(value) = self.db.get(last_block_hash_key())? else {
            info!("Opened an empty chain database");
            return Ok(());
        };
        let top_hash = hash_from_value(value.as_ref())?;

        let mut current = top_hash.clone();
        let mut walked = 0u64;
        while !current.is_zero() {
            let block = self
                .read_block(&current)?
                .ok_or(BlockchainError::CorruptedData)?;
            self.depth_index.insert(block.get_depth(), current.clone());
            for tx in block.get_transactions() {
                self.tx_index.insert(tx.hash(), current.clone());
            }

            let prev = self
                .db
                .get(prev_hash_key(&current))?
                .ok_or(BlockchainError::CorruptedData)?;
            current = hash_from_value(prev.as_ref())?;
            walked += 1;
        }

        let top_block = self
            .read_block(&top_hash)?
            .ok_or(BlockchainError::CorruptedData)?;
        if top_block.get_depth() + 1 != walked {
            return Err(BlockchainError::CorruptedData);
        }

        info!(
            "Loaded chain: top block {} at depth {}",
            top_hash,
            top_block.get_depth()
        );
        self.top = Some((top_hash, top_block));
        Ok(())
    }

    fn read_block(&self, hash: &Hash) -> Result<Option<Block>, BlockchainError> {
        match self.db.get(block_key(hash))? {
            Some(value) => Ok(Some(Block::from_bytes(value.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    /// Appends a block to the chain. Returns false without touching the
    /// store when the block is already known, or when it does not link to
    /// the current top (genesis is only accepted into an empty store).
    pub fn try_add_block(&mut self, block: &Block) -> Result<bool, BlockchainError> {
        let hash = block.hash();
        if self.db.contains_key(block_key(&hash))? {
            debug!("Block {} is already stored", hash);
            return Ok(false);
        }

        match &self.top {
            None => {
                if !block.is_genesis() {
                    debug!("Rejecting non-genesis block {} on empty chain", hash);
                    return Ok(false);
                }
            }
            Some((top_hash, _)) => {
                if block.get_prev_hash() != top_hash {
                    debug!(
                        "Block {} does not link to top {} (prev: {})",
                        hash,
                        top_hash,
                        block.get_prev_hash()
                    );
                    return Ok(false);
                }
            }
        }

        self.db.insert(block_key(&hash), block.to_bytes())?;
        self.db.insert(
            prev_hash_key(&hash),
            block.get_prev_hash().as_bytes().to_vec(),
        )?;
        self.db
            .insert(depth_key(block.get_depth()), hash.as_bytes().to_vec())?;
        self.db
            .insert(last_block_hash_key(), hash.as_bytes().to_vec())?;
        self.db.flush()?;

        self.depth_index.insert(block.get_depth(), hash.clone());
        for tx in block.get_transactions() {
            self.tx_index.insert(tx.hash(), hash.clone());
        }
        self.top = Some((hash, block.clone()));
        Ok(true)
    }

    pub fn find_block(&self, hash: &Hash) -> Result<Option<Block>, BlockchainError> {
        self.read_block(hash)
    }

    pub fn find_block_hash_by_depth(&self, depth: BlockDepth) -> Option<Hash> {
        self.depth_index.get(&depth).cloned()
    }

    pub fn has_transaction(&self, tx_hash: &Hash) -> bool {
        self.tx_index.contains_key(tx_hash)
    }

    pub fn find_transaction(
        &self,
        tx_hash: &Hash,
    ) -> Result<Option<Transaction>, BlockchainError> {
        let Some(block_hash) = self.tx_index.get(tx_hash) else {
            return Ok(None);
        };
        let block = self
            .read_block(block_hash)?
            .ok_or(BlockchainError::CorruptedData)?;
        Ok(block
            .get_transactions()
            .iter()
            .find(|tx| tx.hash() == *tx_hash)
            .cloned())
    }

    pub fn get_top_block(&self) -> Option<&Block> {
        self.top.as_ref().map(|(_, block)| block)
    }

    pub fn get_top_hash(&self) -> Option<&Hash> {
        self.top.as_ref().map(|(hash, _)| hash)
    }

    pub fn get_top_block_and_difficulty(&self) -> Option<(Block, Difficulty)> {
        self.get_top_block()
            .map(|block| (block.clone(), STATIC_DIFFICULTY))
    }

    pub fn flush(&self) -> Result<(), BlockchainError> {
        self.db.flush()?;
        Ok(())
    }
}
