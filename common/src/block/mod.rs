use crate::{
    crypto::{Address, Hash, Hashable},
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::Timestamp,
    transaction::Transaction,
};
use std::fmt::{Display, Error, Formatter};

// Number of blocks between genesis and this block
pub type BlockDepth = u64;

/// One link of the chain. Blocks are immutable once hashed; the canonical
/// bytes are the field-order concatenation below, and `prev_hash` is the
/// SHA-256 of the previous block's canonical bytes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    depth: BlockDepth,
    prev_hash: Hash,
    timestamp: Timestamp,
    coinbase: Address,
    transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(
        depth: BlockDepth,
        prev_hash: Hash,
        timestamp: Timestamp,
        coinbase: Address,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            depth,
            prev_hash,
            timestamp,
            coinbase,
            transactions,
        }
    }

    pub fn get_depth(&self) -> BlockDepth {
        self.depth
    }

    pub fn get_prev_hash(&self) -> &Hash {
        &self.prev_hash
    }

    pub fn get_timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn get_coinbase(&self) -> &Address {
        &self.coinbase
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn get_txs_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_genesis(&self) -> bool {
        self.depth == 0 && self.prev_hash.is_zero()
    }
}

impl Serializer for Block {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.depth);
        self.prev_hash.write(writer);
        writer.write_u32(self.timestamp);
        self.coinbase.write(writer);
        writer.write_u16(self.transactions.len() as u16);
        for tx in &self.transactions {
            tx.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let depth = reader.read_u64()?;
        let prev_hash = Hash::read(reader)?;
        let timestamp = reader.read_u32()?;
        let coinbase = Address::read(reader)?;
        let count = reader.read_u16()? as usize;
        let mut transactions = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            transactions.push(Transaction::read(reader)?);
        }

        Ok(Block::new(
            depth,
            prev_hash,
            timestamp,
            coinbase,
            transactions,
        ))
    }

    fn size(&self) -> usize {
        8 + self.prev_hash.size()
            + 4
            + self.coinbase.size()
            + 2
            + self
                .transactions
                .iter()
                .map(|tx| tx.size())
                .sum::<usize>()
    }
}

impl Hashable for Block {}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "Block[depth: {}, prev: {}, timestamp: {}, coinbase: {}, txs: {}]",
            self.depth,
            self.prev_hash,
            self.timestamp,
            self.coinbase,
            self.transactions.len()
        )
    }
}
