//! Mempool entry: one resident unconfirmed transaction.
//!
//! A [`TxEntry`] carries the transaction's local costs (size, fee, sigops,
//! heap usage), its direct parent/child links to other in-pool entries, and
//! running aggregates over its ancestor and descendant closures. Links are
//! stored as txids, never as references — the pool's primary index owns every
//! entry and resolves ids on demand.
//!
//! Aggregates change only through the state mutators below; the pool feeds
//! them exact signed deltas as neighbors are added or removed.

use std::collections::HashSet;
use std::mem;

use crate::error::TransactionError;
use crate::types::{FeeRate, Hash256, Transaction};

/// Fixed accounted overhead for one entry resident in the pool, beyond its
/// measured heap usage.
pub const TX_ENTRY_OVERHEAD: u64 = mem::size_of::<TxEntry>() as u64;

/// Accounted cost of one membership in a parent or child link set.
pub const LINK_OVERHEAD: u64 = mem::size_of::<Hash256>() as u64;

/// Accounted cost of one membership in the root index.
pub const ROOT_OVERHEAD: u64 = (mem::size_of::<Hash256>() + mem::size_of::<usize>()) as u64;

/// Estimate of the heap bytes held by a transaction value.
fn dynamic_usage(tx: &Transaction) -> u64 {
    let inputs: usize = tx
        .inputs
        .iter()
        .map(|input| mem::size_of_val(input) + input.signature_script.len())
        .sum();
    let outputs: usize = tx
        .outputs
        .iter()
        .map(|output| mem::size_of_val(output) + output.script_pubkey.len())
        .sum();
    (mem::size_of_val(tx) + inputs + outputs) as u64
}

/// A transaction resident in the mempool, with precomputed costs and
/// incrementally maintained ancestor/descendant aggregates.
///
/// Every aggregate counts the entry itself: a freshly constructed entry has
/// an ancestor count of one and a descendant count of one.
#[derive(Clone, Debug)]
pub struct TxEntry {
    tx: Transaction,
    txid: Hash256,
    tx_size: u64,
    tx_fee: u64,
    sigop_count: u64,
    usage_size: u64,
    time: u64,
    entry_height: u64,
    spends_coinbase: bool,

    /// Txids of in-pool transactions this entry directly spends.
    parents: HashSet<Hash256>,
    /// Txids of in-pool transactions spending one of this entry's outputs.
    children: HashSet<Hash256>,

    count_with_ancestors: i64,
    size_with_ancestors: i64,
    sigops_with_ancestors: i64,
    fee_with_ancestors: i64,

    count_with_descendants: i64,
    size_with_descendants: i64,
    fee_with_descendants: i64,
}

impl TxEntry {
    /// Build an entry for a prevalidated transaction.
    ///
    /// `tx_fee` is in becks, `time` the admission timestamp, `entry_height`
    /// the chain height at admission, `sigop_count` the policy-weighted
    /// signature-operation cost, and `spends_coinbase` whether any input
    /// spends a coinbase output.
    ///
    /// # Errors
    ///
    /// [`TransactionError::Serialization`] if the canonical encoding fails.
    pub fn new(
        tx: Transaction,
        tx_fee: u64,
        time: u64,
        entry_height: u64,
        sigop_count: u64,
        spends_coinbase: bool,
    ) -> Result<Self, TransactionError> {
        let encoded = tx.encode()?;
        let txid = Hash256::double_sha256(&encoded);
        let tx_size = encoded.len() as u64;
        let usage_size = dynamic_usage(&tx);

        Ok(Self {
            tx,
            txid,
            tx_size,
            tx_fee,
            sigop_count,
            usage_size,
            time,
            entry_height,
            spends_coinbase,
            parents: HashSet::new(),
            children: HashSet::new(),
            count_with_ancestors: 1,
            size_with_ancestors: tx_size as i64,
            sigops_with_ancestors: sigop_count as i64,
            fee_with_ancestors: tx_fee as i64,
            count_with_descendants: 1,
            size_with_descendants: tx_size as i64,
            fee_with_descendants: tx_fee as i64,
        })
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> Hash256 {
        self.txid
    }

    /// Serialized byte length of the transaction.
    pub fn tx_size(&self) -> u64 {
        self.tx_size
    }

    /// Fee in becks.
    pub fn tx_fee(&self) -> u64 {
        self.tx_fee
    }

    /// Policy-weighted signature-operation cost.
    pub fn sigop_count(&self) -> u64 {
        self.sigop_count
    }

    /// Estimated heap bytes held by this entry.
    pub fn usage_size(&self) -> u64 {
        self.usage_size
    }

    /// Admission timestamp.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Chain height at admission.
    pub fn entry_height(&self) -> u64 {
        self.entry_height
    }

    /// Whether any input spends a coinbase output.
    pub fn spends_coinbase(&self) -> bool {
        self.spends_coinbase
    }

    /// Txids of in-pool transactions this entry directly spends.
    pub fn parents(&self) -> &HashSet<Hash256> {
        &self.parents
    }

    /// Txids of in-pool transactions spending one of this entry's outputs.
    pub fn children(&self) -> &HashSet<Hash256> {
        &self.children
    }

    /// Number of transactions in this entry's ancestor closure (itself included).
    pub fn count_with_ancestors(&self) -> i64 {
        self.count_with_ancestors
    }

    /// Total serialized size over the ancestor closure.
    pub fn size_with_ancestors(&self) -> i64 {
        self.size_with_ancestors
    }

    /// Total sigop cost over the ancestor closure.
    pub fn sigops_with_ancestors(&self) -> i64 {
        self.sigops_with_ancestors
    }

    /// Total fee over the ancestor closure.
    pub fn fee_with_ancestors(&self) -> i64 {
        self.fee_with_ancestors
    }

    /// Number of transactions in this entry's descendant closure (itself included).
    pub fn count_with_descendants(&self) -> i64 {
        self.count_with_descendants
    }

    /// Total serialized size over the descendant closure.
    pub fn size_with_descendants(&self) -> i64 {
        self.size_with_descendants
    }

    /// Total fee over the descendant closure.
    pub fn fee_with_descendants(&self) -> i64 {
        self.fee_with_descendants
    }

    /// Fee rate of this transaction alone.
    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_fee_and_size(self.tx_fee, self.tx_size)
    }

    /// Fee rate of this transaction's descendant package, the eviction
    /// priority: entries whose descendants pay little per byte go first.
    pub fn package_fee_rate(&self) -> FeeRate {
        FeeRate::from_fee_and_size(
            self.fee_with_descendants as u64,
            self.size_with_descendants as u64,
        )
    }

    /// Add or remove `parent` in this entry's parent link set.
    ///
    /// Idempotent; only a net change adjusts `usage` by the link cost.
    pub(crate) fn update_parent(&mut self, parent: Hash256, usage: &mut u64, add: bool) {
        if add {
            if self.parents.insert(parent) {
                *usage += LINK_OVERHEAD;
            }
        } else if self.parents.remove(&parent) {
            *usage -= LINK_OVERHEAD;
        }
    }

    /// Add or remove `child` in this entry's child link set.
    ///
    /// Idempotent; only a net change adjusts `usage` by the link cost.
    pub(crate) fn update_child(&mut self, child: Hash256, usage: &mut u64, add: bool) {
        if add {
            if self.children.insert(child) {
                *usage += LINK_OVERHEAD;
            }
        } else if self.children.remove(&child) {
            *usage -= LINK_OVERHEAD;
        }
    }

    /// Apply exact signed deltas to the descendant aggregates.
    pub(crate) fn update_descendant_state(&mut self, count: i64, size: i64, fee: i64) {
        self.count_with_descendants += count;
        self.size_with_descendants += size;
        self.fee_with_descendants += fee;
    }

    /// Apply exact signed deltas to the ancestor aggregates.
    pub(crate) fn update_ancestor_state(&mut self, count: i64, size: i64, sigops: i64, fee: i64) {
        self.count_with_ancestors += count;
        self.size_with_ancestors += size;
        self.sigops_with_ancestors += sigops;
        self.fee_with_ancestors += fee;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutPoint, TxInput, TxOutput};

    fn sample_tx(seed: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: Hash256([seed; 32]), index: 0 },
                signature_script: vec![0; 64],
                sequence: u64::MAX,
            }],
            outputs: vec![TxOutput { value: 1_000, script_pubkey: vec![0xAA; 25] }],
            lock_time: 0,
        }
    }

    fn entry(seed: u8, fee: u64) -> TxEntry {
        TxEntry::new(sample_tx(seed), fee, 100, 10, 4, false).unwrap()
    }

    #[test]
    fn new_entry_aggregates_count_itself() {
        let e = entry(1, 500);
        assert_eq!(e.count_with_ancestors(), 1);
        assert_eq!(e.size_with_ancestors(), e.tx_size() as i64);
        assert_eq!(e.sigops_with_ancestors(), 4);
        assert_eq!(e.fee_with_ancestors(), 500);
        assert_eq!(e.count_with_descendants(), 1);
        assert_eq!(e.size_with_descendants(), e.tx_size() as i64);
        assert_eq!(e.fee_with_descendants(), 500);
    }

    #[test]
    fn new_entry_caches_txid_and_size() {
        let tx = sample_tx(1);
        let e = TxEntry::new(tx.clone(), 500, 100, 10, 0, false).unwrap();
        assert_eq!(e.txid(), tx.txid().unwrap());
        assert_eq!(e.tx_size(), tx.serialized_size().unwrap());
        assert!(e.usage_size() > 0);
    }

    #[test]
    fn update_parent_is_idempotent_and_accounts_usage() {
        let mut e = entry(1, 500);
        let parent = Hash256([2; 32]);
        let mut usage = 0u64;

        e.update_parent(parent, &mut usage, true);
        assert_eq!(usage, LINK_OVERHEAD);
        e.update_parent(parent, &mut usage, true);
        assert_eq!(usage, LINK_OVERHEAD, "re-adding must not account twice");

        e.update_parent(parent, &mut usage, false);
        assert_eq!(usage, 0);
        e.update_parent(parent, &mut usage, false);
        assert_eq!(usage, 0, "re-removing must not account twice");
        assert!(e.parents().is_empty());
    }

    #[test]
    fn update_child_mirrors_parent_accounting() {
        let mut e = entry(1, 500);
        let child = Hash256([3; 32]);
        let mut usage = 0u64;

        e.update_child(child, &mut usage, true);
        assert!(e.children().contains(&child));
        assert_eq!(usage, LINK_OVERHEAD);

        e.update_child(child, &mut usage, false);
        assert!(e.children().is_empty());
        assert_eq!(usage, 0);
    }

    #[test]
    fn state_mutators_accept_negative_deltas() {
        let mut e = entry(1, 500);
        e.update_descendant_state(2, 200, 1_000);
        assert_eq!(e.count_with_descendants(), 3);

        e.update_descendant_state(-2, -200, -1_000);
        assert_eq!(e.count_with_descendants(), 1);
        assert_eq!(e.size_with_descendants(), e.tx_size() as i64);
        assert_eq!(e.fee_with_descendants(), 500);

        e.update_ancestor_state(3, 300, 12, 1_500);
        assert_eq!(e.count_with_ancestors(), 4);
        e.update_ancestor_state(-3, -300, -12, -1_500);
        assert_eq!(e.count_with_ancestors(), 1);
        assert_eq!(e.sigops_with_ancestors(), 4);
    }

    #[test]
    fn package_fee_rate_uses_descendant_sums() {
        let mut e = entry(1, 500);
        let own = e.package_fee_rate();
        assert_eq!(own, FeeRate::from_fee_and_size(500, e.tx_size()));

        // A cheap descendant drags the package rate down.
        e.update_descendant_state(1, 10_000, 0);
        assert!(e.package_fee_rate() < own);
    }
}
