use indexmap::IndexMap;
use log::debug;
use std::sync::Arc;
use vela_common::{
    account::Balance,
    crypto::{Address, Hash, Hashable},
    transaction::Transaction,
};

/// In-memory set of admitted-but-not-yet-mined transactions, deduplicated
/// by canonical hash. Admission policy lives in the core; the pool itself
/// only stores, reserves and selects.
pub struct Mempool {
    txs: IndexMap<Hash, Arc<Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Mempool {
            txs: IndexMap::new(),
        }
    }

    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.txs.contains_key(tx_hash)
    }

    pub fn get(&self, tx_hash: &Hash) -> Option<&Arc<Transaction>> {
        self.txs.get(tx_hash)
    }

    // Returns false if the transaction was already pending
    pub fn insert(&mut self, tx: Arc<Transaction>) -> bool {
        let tx_hash = tx.hash();
        if self.txs.contains_key(&tx_hash) {
            return false;
        }
        debug!("Adding tx to pending: {}", tx_hash);
        self.txs.insert(tx_hash, tx);
        true
    }

    // Drops every transaction that was mined into the block
    pub fn remove_block_txs(&mut self, txs: &[Transaction]) {
        for tx in txs {
            if self.txs.shift_remove(&tx.hash()).is_some() {
                debug!("Removed mined tx {} from pending", tx.hash());
            }
        }
    }

    /// Sum of `amount + fee` over every pending transaction of this sender:
    /// the part of its balance already spoken for.
    pub fn reserved_cost(&self, address: &Address) -> Balance {
        self.txs
            .values()
            .filter(|tx| tx.get_from() == address)
            .fold(Balance::zero(), |acc, tx| acc.saturating_add(tx.get_cost()))
    }

    /// Top-k transactions by descending fee; ties are broken by ascending
    /// hash so the selection is stable across nodes.
    pub fn select_best_by_fee(&self, k: usize) -> Vec<Arc<Transaction>> {
        let mut entries: Vec<(&Hash, &Arc<Transaction>)> = self.txs.iter().collect();
        entries.sort_by(|(a_hash, a), (b_hash, b)| {
            b.get_fee().cmp(&a.get_fee()).then_with(|| a_hash.cmp(b_hash))
        });
        entries
            .into_iter()
            .take(k)
            .map(|(_, tx)| tx.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash, &Arc<Transaction>)> {
        self.txs.iter()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_common::{crypto::KeyPair, transaction::TransactionBuilder};

    fn tx_with_fee(keypair: &KeyPair, amount: u64, fee: u64, timestamp: u32) -> Arc<Transaction> {
        let mut tx = TransactionBuilder::new()
            .from(keypair.address())
            .to(Address::from_data(b"receiver"))
            .amount(Balance::from(amount))
            .fee(fee)
            .timestamp(timestamp)
            .build()
            .unwrap();
        tx.sign(keypair);
        Arc::new(tx)
    }

    #[test]
    fn test_deduplication() {
        let keypair = KeyPair::generate();
        let mut mempool = Mempool::new();
        let tx = tx_with_fee(&keypair, 10, 1, 100);

        assert!(mempool.insert(tx.clone()));
        assert!(!mempool.insert(tx.clone()));
        assert_eq!(mempool.len(), 1);
        assert!(mempool.contains(&tx.hash()));
    }

    #[test]
    fn test_reserved_cost_tracks_sender() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut mempool = Mempool::new();
        mempool.insert(tx_with_fee(&alice, 100, 5, 1));
        mempool.insert(tx_with_fee(&alice, 200, 10, 2));
        mempool.insert(tx_with_fee(&bob, 50, 1, 3));

        assert_eq!(
            mempool.reserved_cost(&alice.address()),
            Balance::from(100u64 + 5 + 200 + 10)
        );
        assert_eq!(mempool.reserved_cost(&bob.address()), Balance::from(51u64));
        assert_eq!(
            mempool.reserved_cost(&Address::from_data(b"nobody")),
            Balance::zero()
        );
    }

    #[test]
    fn test_selection_by_fee() {
        let keypair = KeyPair::generate();
        let mut mempool = Mempool::new();
        let low = tx_with_fee(&keypair, 10, 1, 1);
        let high = tx_with_fee(&keypair, 10, 50, 2);
        let mid = tx_with_fee(&keypair, 10, 25, 3);
        mempool.insert(low.clone());
        mempool.insert(high.clone());
        mempool.insert(mid.clone());

        let selected = mempool.select_best_by_fee(2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].hash(), high.hash());
        assert_eq!(selected[1].hash(), mid.hash());
    }

    #[test]
    fn test_selection_tie_break_is_stable() {
        let keypair = KeyPair::generate();
        let mut mempool = Mempool::new();
        let a = tx_with_fee(&keypair, 10, 7, 1);
        let b = tx_with_fee(&keypair, 11, 7, 2);
        mempool.insert(a.clone());
        mempool.insert(b.clone());

        let first = mempool.select_best_by_fee(2);
        let second = mempool.select_best_by_fee(2);
        let order: Vec<Hash> = first.iter().map(|tx| tx.hash()).collect();
        assert_eq!(order, second.iter().map(|tx| tx.hash()).collect::<Vec<_>>());
        // ascending hash among equal fees
        assert!(order[0] < order[1]);
    }

    #[test]
    fn test_remove_block_txs() {
        let keypair = KeyPair::generate();
        let mut mempool = Mempool::new();
        let kept = tx_with_fee(&keypair, 10, 1, 1);
        let mined = tx_with_fee(&keypair, 20, 2, 2);
        mempool.insert(kept.clone());
        mempool.insert(mined.clone());

        mempool.remove_block_txs(&[(*mined).clone()]);
        assert_eq!(mempool.len(), 1);
        assert!(mempool.contains(&kept.hash()));
        assert!(!mempool.contains(&mined.hash()));
    }
}
