//! In-memory pool of unconfirmed transactions (mempool).
//!
//! The mempool stores validated transactions awaiting inclusion in blocks
//! and tracks, for every resident entry, its ancestor and descendant
//! closures over in-pool dependencies together with aggregated size, fee,
//! and sigop counts. It provides:
//! - O(1) lookup by txid and by spent outpoint
//! - admission limits on ancestor/descendant package count and size
//! - block-arrival cleanup, conflict removal, expiry, and size-limited
//!   eviction, each emitting a removal notification per evicted entry
//! - a probabilistic full consistency audit against a UTXO view
//!
//! Transactions must be validated by the caller before insertion; admission
//! additionally assumes no resident entry shares an input with the
//! candidate. [`TxMempool`] itself is not thread-safe — [`SharedMempool`]
//! is the lock-guarded handle used by concurrent callers.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tracing::debug;

use crate::coins::{CoinsView, OverlayCoins};
use crate::constants::{
    AUDIT_SENTINEL_HEIGHT, DEFAULT_ANCESTOR_COUNT_LIMIT, DEFAULT_ANCESTOR_SIZE_LIMIT,
    DEFAULT_DESCENDANT_COUNT_LIMIT, DEFAULT_DESCENDANT_SIZE_LIMIT, DEFAULT_EXPIRY_AGE_SECS,
    DEFAULT_MEMPOOL_SIZE_LIMIT,
};
use crate::entry::{TxEntry, LINK_OVERHEAD, ROOT_OVERHEAD, TX_ENTRY_OVERHEAD};
use crate::error::MempoolError;
use crate::types::{FeeRate, Hash256, OutPoint, Transaction};

/// Why a transaction left the pool. Passed to removal observers.
///
/// The numeric values are wire-stable and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RemovalReason {
    /// Manually removed or unknown reason.
    Unknown = 0,
    /// Expired from the pool by age.
    Expiry = 1,
    /// Evicted while enforcing the pool size limit.
    SizeLimit = 2,
    /// Removed during chain reorganization.
    Reorg = 3,
    /// Confirmed by a block.
    Block = 4,
    /// Conflicts with an in-block transaction.
    Conflict = 5,
    /// Replaced by a higher-paying transaction.
    Replaced = 6,
}

impl RemovalReason {
    /// The wire-stable code for this reason.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Expiry => "expiry",
            Self::SizeLimit => "sizelimit",
            Self::Reorg => "reorg",
            Self::Block => "block",
            Self::Conflict => "conflict",
            Self::Replaced => "replaced",
        };
        write!(f, "{name}")
    }
}

/// Receives one notification per entry removed from the pool.
///
/// Observers run synchronously while the pool's exclusive lock is held and
/// must not call back into the pool.
pub trait RemovalObserver: Send + Sync {
    fn transaction_removed(&self, txid: &Hash256, reason: RemovalReason);
}

/// Mempool policy configuration.
///
/// The per-package limits are defaults for [`TxMempool::add_tx`]; callers
/// can override them per admission via
/// [`TxMempool::add_tx_with_limits`].
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Probability of running the consistency audit on each
    /// [`TxMempool::check`] call, scaled to 2^32. Zero disables the audit;
    /// 2^32 runs it every time.
    pub check_frequency: u64,
    /// Maximum in-pool ancestors per transaction (itself included).
    pub ancestor_count_limit: u64,
    /// Maximum serialized size of a transaction plus its ancestors, bytes.
    pub ancestor_size_limit: u64,
    /// Maximum in-pool descendants any ancestor may carry (itself included).
    pub descendant_count_limit: u64,
    /// Maximum serialized size of any ancestor plus its descendants, bytes.
    pub descendant_size_limit: u64,
    /// Bound on the pool's accounted memory usage, bytes.
    pub size_limit: u64,
    /// Age after which unconfirmed transactions expire, seconds.
    pub expiry_age_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            check_frequency: 0,
            ancestor_count_limit: DEFAULT_ANCESTOR_COUNT_LIMIT,
            ancestor_size_limit: DEFAULT_ANCESTOR_SIZE_LIMIT,
            descendant_count_limit: DEFAULT_DESCENDANT_COUNT_LIMIT,
            descendant_size_limit: DEFAULT_DESCENDANT_SIZE_LIMIT,
            size_limit: DEFAULT_MEMPOOL_SIZE_LIMIT,
            expiry_age_secs: DEFAULT_EXPIRY_AGE_SECS,
        }
    }
}

/// In-memory pool of unconfirmed transactions with ancestor/descendant
/// package tracking.
///
/// Entries are owned by the primary index; the spend, root, and time
/// indices hold txids whose lifetime is bounded by primary membership.
/// After every public operation the indices and the per-entry aggregates
/// are mutually consistent; [`check`](Self::check) verifies this from
/// scratch.
///
/// Not thread-safe — use [`SharedMempool`] for concurrent access.
pub struct TxMempool {
    /// Primary storage: txid → entry.
    entries: HashMap<Hash256, TxEntry>,
    /// Spent outpoint → txid of the pool transaction that spends it.
    spent_outpoints: HashMap<OutPoint, Hash256>,
    /// Entries whose ancestor closure is exactly themselves.
    roots: HashSet<Hash256>,
    /// Admission-time-ordered index: `(time, txid)`, ascending.
    by_entry_time: BTreeSet<(u64, Hash256)>,
    /// Sum of serialized sizes across all entries.
    total_tx_size: u64,
    /// Accounted memory usage: per-entry heap estimate plus fixed entry,
    /// link, and root bookkeeping overheads.
    cache_inner_usage: u64,
    /// Count of successful pool mutations.
    transactions_updated: u64,
    /// Audit probability, scaled to 2^32.
    check_frequency: u64,
    /// Highest per-transaction fee rate seen among block-confirmed entries.
    best_fee_rate: FeeRate,
    config: MempoolConfig,
    observers: Vec<Arc<dyn RemovalObserver>>,
}

impl TxMempool {
    /// Create an empty pool with default policy.
    pub fn new() -> Self {
        Self::with_config(MempoolConfig::default())
    }

    /// Create an empty pool with the given policy.
    pub fn with_config(config: MempoolConfig) -> Self {
        Self {
            entries: HashMap::new(),
            spent_outpoints: HashMap::new(),
            roots: HashSet::new(),
            by_entry_time: BTreeSet::new(),
            total_tx_size: 0,
            cache_inner_usage: 0,
            transactions_updated: 0,
            check_frequency: config.check_frequency,
            best_fee_rate: FeeRate::ZERO,
            config,
            observers: Vec::new(),
        }
    }

    /// Register an observer notified once per removed entry.
    ///
    /// Observers are invoked while the pool is being mutated and must not
    /// reenter it.
    pub fn register_removal_observer(&mut self, observer: Arc<dyn RemovalObserver>) {
        self.observers.push(observer);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Number of transactions in the pool.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if a transaction with the given txid is in the pool.
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    /// Get a pool entry by txid.
    pub fn get(&self, txid: &Hash256) -> Option<&TxEntry> {
        self.entries.get(txid)
    }

    /// Get a pool transaction by txid.
    pub fn find_tx(&self, txid: &Hash256) -> Option<&Transaction> {
        self.entries.get(txid).map(|entry| entry.tx())
    }

    /// The txid of the pool transaction spending `outpoint`, if any.
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent_outpoints.get(outpoint).copied()
    }

    /// Check that none of this transaction's inputs are in the pool, and
    /// thus the tx does not depend on other pool transactions for block
    /// inclusion.
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        tx.inputs
            .iter()
            .all(|input| !self.entries.contains_key(&input.previous_output.txid))
    }

    /// Sum of serialized transaction sizes in the pool.
    pub fn total_tx_size(&self) -> u64 {
        self.total_tx_size
    }

    /// Accounted memory usage of the pool in bytes.
    pub fn cache_inner_usage(&self) -> u64 {
        self.cache_inner_usage
    }

    /// Count of successful pool mutations since creation.
    pub fn transactions_updated(&self) -> u64 {
        self.transactions_updated
    }

    /// Highest per-transaction fee rate seen among block-confirmed entries.
    pub fn best_fee_rate(&self) -> FeeRate {
        self.best_fee_rate
    }

    /// The audit probability, scaled to 2^32.
    pub fn check_frequency(&self) -> u64 {
        self.check_frequency
    }

    /// Set the audit probability, scaled to 2^32.
    pub fn set_check_frequency(&mut self, frequency: u64) {
        self.check_frequency = frequency;
    }

    /// The configured policy.
    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// Txids of entries with no in-pool parent.
    pub fn roots(&self) -> &HashSet<Hash256> {
        &self.roots
    }

    /// Iterate over all entries (arbitrary order).
    pub fn iter(&self) -> impl Iterator<Item = &TxEntry> {
        self.entries.values()
    }

    /// Iterate over all entries in admission-time order.
    pub fn iter_by_time(&self) -> impl Iterator<Item = &TxEntry> + '_ {
        self.by_entry_time
            .iter()
            .filter_map(move |(_, txid)| self.entries.get(txid))
    }

    /// Iterate over the spend index as `(outpoint, spending txid)` pairs.
    pub fn spends(&self) -> impl Iterator<Item = (&OutPoint, &Hash256)> {
        self.spent_outpoints.iter()
    }

    /// Collect all txids in the pool.
    pub fn txids(&self) -> Vec<Hash256> {
        self.entries.keys().copied().collect()
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Admit a prevalidated entry under the configured package limits.
    ///
    /// See [`add_tx_with_limits`](Self::add_tx_with_limits).
    pub fn add_tx(&mut self, entry: TxEntry) -> Result<(), MempoolError> {
        self.add_tx_with_limits(
            entry,
            self.config.ancestor_count_limit,
            self.config.ancestor_size_limit,
            self.config.descendant_count_limit,
            self.config.descendant_size_limit,
        )
    }

    /// Admit a prevalidated entry under explicit package limits.
    ///
    /// On success the entry is wired into every index and the aggregates of
    /// all its ancestors are updated. On failure the pool is untouched.
    ///
    /// The caller is responsible for validation and for ensuring that no
    /// resident entry shares an input with the candidate; violations are
    /// caught only by [`check`](Self::check).
    ///
    /// # Errors
    ///
    /// Any [`MempoolError`] from the ancestor walk: the candidate's package
    /// would exceed an ancestor count/size limit, or would push an
    /// ancestor's descendant package over a count/size limit.
    pub fn add_tx_with_limits(
        &mut self,
        entry: TxEntry,
        limit_ancestor_count: u64,
        limit_ancestor_size: u64,
        limit_descendant_count: u64,
        limit_descendant_size: u64,
    ) -> Result<(), MempoolError> {
        let ancestors = self.calculate_mempool_ancestors(
            &entry,
            limit_ancestor_count,
            limit_ancestor_size,
            limit_descendant_count,
            limit_descendant_size,
            true,
        )?;

        let txid = entry.txid();
        let tx_size = entry.tx_size();
        let outpoints: Vec<OutPoint> = entry
            .tx()
            .inputs
            .iter()
            .map(|input| input.previous_output.clone())
            .collect();
        let parent_txids: HashSet<Hash256> = outpoints.iter().map(|op| op.txid).collect();

        self.cache_inner_usage += entry.usage_size() + TX_ENTRY_OVERHEAD;
        self.by_entry_time.insert((entry.time(), txid));
        self.entries.insert(txid, entry);

        for outpoint in outpoints {
            self.spent_outpoints.insert(outpoint, txid);
        }
        for parent in parent_txids {
            if self.entries.contains_key(&parent) {
                let child = self
                    .entries
                    .get_mut(&txid)
                    .expect("entry was just inserted");
                child.update_parent(parent, &mut self.cache_inner_usage, true);
            }
        }

        self.update_ancestors_of(true, txid, &ancestors);
        self.update_entry_for_ancestors(txid, &ancestors);
        self.total_tx_size += tx_size;
        self.transactions_updated += 1;
        if self
            .entries
            .get(&txid)
            .expect("entry was just inserted")
            .count_with_ancestors()
            == 1
        {
            self.roots.insert(txid);
            self.cache_inner_usage += ROOT_OVERHEAD;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Relational engine
    // ------------------------------------------------------------------

    /// Compute the set of in-pool ancestors of `entry`, enforcing package
    /// limits along the walk.
    ///
    /// With `search_for_parent` the candidate need not be resident: direct
    /// parents are found by looking up each input's prior txid. Without it
    /// the entry must be resident and its stored parent set seeds the walk;
    /// that mode is used by removal and the audit and cannot fail under
    /// unlimited limits.
    ///
    /// Read-only: a failed walk leaves no trace.
    fn calculate_mempool_ancestors(
        &self,
        entry: &TxEntry,
        limit_ancestor_count: u64,
        limit_ancestor_size: u64,
        limit_descendant_count: u64,
        limit_descendant_size: u64,
        search_for_parent: bool,
    ) -> Result<HashSet<Hash256>, MempoolError> {
        let mut frontier: HashSet<Hash256> = HashSet::new();
        if search_for_parent {
            for input in &entry.tx().inputs {
                if self.entries.contains_key(&input.previous_output.txid) {
                    frontier.insert(input.previous_output.txid);
                    if frontier.len() as u64 + 1 > limit_ancestor_count {
                        return Err(MempoolError::TooManyAncestors {
                            limit: limit_ancestor_count,
                        });
                    }
                }
            }
        } else {
            let resident = self
                .entries
                .get(&entry.txid())
                .expect("non-search ancestor walk requires a resident entry");
            frontier = resident.parents().clone();
        }

        let mut ancestors: HashSet<Hash256> = HashSet::new();
        let mut total_size_with_ancestors = entry.tx_size();

        while let Some(&next) = frontier.iter().next() {
            frontier.remove(&next);
            ancestors.insert(next);
            let ancestor = self
                .entries
                .get(&next)
                .expect("ancestor link references an entry missing from the pool");
            total_size_with_ancestors += ancestor.tx_size();

            if (ancestor.size_with_descendants() + ancestor.tx_size() as i64) as u64
                > limit_descendant_size
            {
                return Err(MempoolError::ExceedsDescendantSize {
                    txid: next.to_string(),
                    limit: limit_descendant_size,
                });
            } else if (ancestor.count_with_descendants() + 1) as u64 > limit_descendant_count {
                return Err(MempoolError::TooManyDescendants {
                    txid: next.to_string(),
                    limit: limit_descendant_count,
                });
            } else if total_size_with_ancestors > limit_ancestor_size {
                return Err(MempoolError::ExceedsAncestorSize {
                    limit: limit_ancestor_size,
                });
            }

            for grandparent in ancestor.parents() {
                if !ancestors.contains(grandparent) {
                    frontier.insert(*grandparent);
                }
                if (frontier.len() + ancestors.len() + 1) as u64 > limit_ancestor_count {
                    return Err(MempoolError::TooManyAncestors {
                        limit: limit_ancestor_count,
                    });
                }
            }
        }

        Ok(ancestors)
    }

    /// Add to `descendants` the transitive descendant closure of `txid`,
    /// itself included.
    ///
    /// Skips cheaply if `txid` is already accumulated: the caller contract
    /// is that an accumulated entry has all its descendants accumulated
    /// too. Each entry is visited at most once.
    fn calculate_descendants(&self, txid: Hash256, descendants: &mut HashSet<Hash256>) {
        let mut stage: HashSet<Hash256> = HashSet::new();
        if !descendants.contains(&txid) {
            stage.insert(txid);
        }

        while let Some(&next) = stage.iter().next() {
            stage.remove(&next);
            descendants.insert(next);
            let entry = self
                .entries
                .get(&next)
                .expect("descendant walk hit an entry missing from the pool");
            for child in entry.children() {
                if !descendants.contains(child) {
                    stage.insert(*child);
                }
            }
        }
    }

    /// Toggle `txid`'s membership in its direct parents' child sets, then
    /// apply this entry's `(count, size, fee)` contribution to the
    /// descendant aggregates of every ancestor — positive when adding,
    /// negative when removing. SigOps are not part of the descendant
    /// aggregate.
    fn update_ancestors_of(&mut self, add: bool, txid: Hash256, ancestors: &HashSet<Hash256>) {
        let (parents, tx_size, tx_fee) = {
            let entry = self
                .entries
                .get(&txid)
                .expect("entry must be resident while updating its ancestors");
            (entry.parents().clone(), entry.tx_size(), entry.tx_fee())
        };

        for parent in parents {
            let parent_entry = self
                .entries
                .get_mut(&parent)
                .expect("parent link references an entry missing from the pool");
            parent_entry.update_child(txid, &mut self.cache_inner_usage, add);
        }

        let count: i64 = if add { 1 } else { -1 };
        let size = count * tx_size as i64;
        let fee = count * tx_fee as i64;
        for ancestor in ancestors {
            let ancestor_entry = self
                .entries
                .get_mut(ancestor)
                .expect("ancestor set references an entry missing from the pool");
            ancestor_entry.update_descendant_state(count, size, fee);
        }
    }

    /// Establish a freshly admitted entry's ancestor aggregates by summing
    /// over its ancestor set. The entry's own contribution was established
    /// at construction.
    fn update_entry_for_ancestors(&mut self, txid: Hash256, ancestors: &HashSet<Hash256>) {
        let mut size = 0i64;
        let mut sigops = 0i64;
        let mut fee = 0i64;
        for ancestor in ancestors {
            let entry = self
                .entries
                .get(ancestor)
                .expect("ancestor set references an entry missing from the pool");
            size += entry.tx_size() as i64;
            sigops += entry.sigop_count() as i64;
            fee += entry.tx_fee() as i64;
        }
        let entry = self
            .entries
            .get_mut(&txid)
            .expect("entry must be resident while establishing its aggregates");
        entry.update_ancestor_state(ancestors.len() as i64, size, sigops, fee);
    }

    /// Pre-removal aggregate maintenance for a staged set.
    ///
    /// With `update_descendants`, surviving descendants of each staged
    /// entry have the entry's contribution subtracted from their ancestor
    /// aggregates, and newly parentless survivors are promoted to roots.
    /// Passing `update_descendants = false` is valid only when every staged
    /// entry's full descendant subtree is staged as well.
    fn update_for_remove_from_mempool(
        &mut self,
        to_remove: &HashSet<Hash256>,
        update_descendants: bool,
    ) {
        if update_descendants {
            for &removed in to_remove {
                let mut descendants = HashSet::new();
                self.calculate_descendants(removed, &mut descendants);
                descendants.remove(&removed);

                let (size, sigops, fee) = {
                    let entry = self
                        .entries
                        .get(&removed)
                        .expect("staged entry missing from the pool");
                    (
                        entry.tx_size() as i64,
                        entry.sigop_count() as i64,
                        entry.tx_fee() as i64,
                    )
                };
                let removed_is_root = self.roots.contains(&removed);

                for descendant in descendants {
                    let entry = self
                        .entries
                        .get_mut(&descendant)
                        .expect("descendant missing from the pool");
                    entry.update_ancestor_state(-1, -size, -sigops, -fee);
                    if removed_is_root && entry.count_with_ancestors() == 1 {
                        self.roots.insert(descendant);
                    }
                }
            }
        }

        for &removed in to_remove {
            let ancestors = {
                let entry = self
                    .entries
                    .get(&removed)
                    .expect("staged entry missing from the pool");
                match self.calculate_mempool_ancestors(
                    entry,
                    u64::MAX,
                    u64::MAX,
                    u64::MAX,
                    u64::MAX,
                    false,
                ) {
                    Ok(ancestors) => ancestors,
                    Err(err) => panic!("ancestor recomputation failed during removal: {err}"),
                }
            };
            self.update_ancestors_of(false, removed, &ancestors);
        }

        for &removed in to_remove {
            if self.roots.remove(&removed) {
                self.cache_inner_usage -= ROOT_OVERHEAD;
            }
            let children = self
                .entries
                .get(&removed)
                .expect("staged entry missing from the pool")
                .children()
                .clone();
            for child in children {
                let child_entry = self
                    .entries
                    .get_mut(&child)
                    .expect("child link references an entry missing from the pool");
                child_entry.update_parent(removed, &mut self.cache_inner_usage, false);
            }
        }
    }

    /// Remove a staged set of entries, maintaining all aggregates and
    /// notifying observers with `reason`.
    ///
    /// The `update_descendants` contract is that of
    /// [`update_for_remove_from_mempool`](Self::update_for_remove_from_mempool).
    fn remove_staged(
        &mut self,
        to_remove: HashSet<Hash256>,
        update_descendants: bool,
        reason: RemovalReason,
    ) {
        self.update_for_remove_from_mempool(&to_remove, update_descendants);
        for removed in to_remove {
            self.del_tx_entry(removed, reason);
        }
    }

    /// Tear one entry out of every index and notify observers.
    fn del_tx_entry(&mut self, txid: Hash256, reason: RemovalReason) {
        let entry = self
            .entries
            .remove(&txid)
            .expect("staged entry missing from the pool");
        for input in &entry.tx().inputs {
            self.spent_outpoints.remove(&input.previous_output);
        }
        self.by_entry_time.remove(&(entry.time(), txid));
        self.cache_inner_usage -= entry.usage_size() + TX_ENTRY_OVERHEAD;
        // Surviving neighbors were already unlinked; memberships still held
        // in this entry's own link sets settle their accounting here.
        self.cache_inner_usage -=
            (entry.parents().len() + entry.children().len()) as u64 * LINK_OVERHEAD;
        self.total_tx_size -= entry.tx_size();
        self.transactions_updated += 1;

        for observer in &self.observers {
            observer.transaction_removed(&txid, reason);
        }
    }

    // ------------------------------------------------------------------
    // Removal policy
    // ------------------------------------------------------------------

    /// Remove every pool transaction confirmed by a new block, plus any
    /// pool transaction conflicting with one. Descendant aggregates are
    /// corrected because descendants may survive the block.
    ///
    /// Raises the pool's best-feerate watermark to the highest fee rate
    /// among the confirmed entries.
    pub fn remove_for_block(&mut self, txs: &[Transaction], block_height: u64) {
        let mut best = self.best_fee_rate;
        for tx in txs {
            if let Ok(txid) = tx.txid() {
                if let Some(entry) = self.entries.get(&txid) {
                    best = best.max(entry.fee_rate());
                }
            }
        }

        let mut confirmed = 0usize;
        for tx in txs {
            if let Ok(txid) = tx.txid() {
                if self.entries.contains_key(&txid) {
                    let mut stage = HashSet::new();
                    stage.insert(txid);
                    self.remove_staged(stage, true, RemovalReason::Block);
                    confirmed += 1;
                }
            }
            self.remove_conflicts(tx);
        }

        self.best_fee_rate = best;
        debug!(block_height, confirmed, "removed confirmed transactions for block");
    }

    /// Evict any pool transaction spending an outpoint also spent by `tx`
    /// (with a different identity), together with its descendants.
    fn remove_conflicts(&mut self, tx: &Transaction) {
        let txid = tx.txid().ok();
        for input in &tx.inputs {
            if let Some(&conflicting) = self.spent_outpoints.get(&input.previous_output) {
                if Some(conflicting) != txid {
                    let conflicting_tx = self
                        .entries
                        .get(&conflicting)
                        .expect("spend index references an entry missing from the pool")
                        .tx()
                        .clone();
                    self.remove_recursive(&conflicting_tx, RemovalReason::Conflict);
                }
            }
        }
    }

    /// Remove `tx` and its full in-pool descendant closure.
    ///
    /// If `tx` itself is not resident — e.g. during a reorg where it was
    /// never re-accepted — any resident transaction spending one of its
    /// outputs seeds the removal instead.
    pub fn remove_recursive(&mut self, tx: &Transaction, reason: RemovalReason) {
        let Ok(txid) = tx.txid() else {
            return;
        };

        let mut seeds: HashSet<Hash256> = HashSet::new();
        if self.entries.contains_key(&txid) {
            seeds.insert(txid);
        } else {
            for index in 0..tx.outputs.len() as u32 {
                let outpoint = OutPoint { txid, index };
                if let Some(&child) = self.spent_outpoints.get(&outpoint) {
                    assert!(
                        self.entries.contains_key(&child),
                        "spend index references an entry missing from the pool",
                    );
                    seeds.insert(child);
                }
            }
        }

        let mut to_remove = HashSet::new();
        for seed in seeds {
            self.calculate_descendants(seed, &mut to_remove);
        }
        self.remove_staged(to_remove, false, reason);
    }

    /// Remove every transaction admitted before `cutoff`, together with its
    /// descendants. Returns the number of transactions removed.
    pub fn expire(&mut self, cutoff: u64) -> usize {
        let mut aged: Vec<Hash256> = Vec::new();
        for &(time, txid) in &self.by_entry_time {
            if time < cutoff {
                aged.push(txid);
            } else {
                break;
            }
        }

        let mut stage = HashSet::new();
        for txid in aged {
            self.calculate_descendants(txid, &mut stage);
        }
        let removed = stage.len();
        self.remove_staged(stage, false, RemovalReason::Expiry);
        debug!(removed, cutoff, "expired transactions from mempool");
        removed
    }

    /// Expire transactions older than the configured expiry age, given the
    /// current time. Returns the number of transactions removed.
    pub fn expire_stale(&mut self, now: u64) -> usize {
        self.expire(now.saturating_sub(self.config.expiry_age_secs))
    }

    /// Evict lowest-priority packages until the accounted memory usage is
    /// within `size_limit`.
    ///
    /// The victim is the entry whose descendant package pays the least per
    /// byte (ties broken by txid), evicted together with its descendants.
    /// If `no_spends_remaining` is given, it collects every previously
    /// spent outpoint that, after eviction, is neither spent in the pool
    /// nor an output of any pool transaction — candidates for the UTXO
    /// layer to release.
    pub fn trim_to_size(
        &mut self,
        size_limit: u64,
        mut no_spends_remaining: Option<&mut Vec<OutPoint>>,
    ) {
        let mut removed_count = 0usize;
        while self.cache_inner_usage > size_limit {
            let victim = match self.entries.values().min_by(|a, b| {
                a.package_fee_rate()
                    .cmp(&b.package_fee_rate())
                    .then_with(|| a.txid().cmp(&b.txid()))
            }) {
                Some(entry) => entry.txid(),
                None => break,
            };

            let mut stage = HashSet::new();
            self.calculate_descendants(victim, &mut stage);
            removed_count += stage.len();

            let staged_txs: Vec<Transaction> = if no_spends_remaining.is_some() {
                stage
                    .iter()
                    .map(|txid| {
                        self.entries
                            .get(txid)
                            .expect("staged entry missing from the pool")
                            .tx()
                            .clone()
                    })
                    .collect()
            } else {
                Vec::new()
            };

            self.remove_staged(stage, false, RemovalReason::SizeLimit);

            if let Some(out) = no_spends_remaining.as_deref_mut() {
                for tx in &staged_txs {
                    for input in &tx.inputs {
                        if self.entries.contains_key(&input.previous_output.txid) {
                            continue;
                        }
                        if !self.spent_outpoints.contains_key(&input.previous_output) {
                            out.push(input.previous_output.clone());
                        }
                    }
                }
            }
        }
        debug!(removed = removed_count, size_limit, "trimmed mempool to size");
    }

    /// Enforce the configured pool size limit.
    pub fn enforce_size_limit(&mut self, no_spends_remaining: Option<&mut Vec<OutPoint>>) {
        let limit = self.config.size_limit;
        self.trim_to_size(limit, no_spends_remaining);
    }

    // ------------------------------------------------------------------
    // Consistency audit
    // ------------------------------------------------------------------

    /// Probabilistically verify the whole pool against a from-scratch
    /// recomputation and the UTXO view.
    ///
    /// Skips unless a 32-bit draw lands under the configured frequency.
    /// When it runs, every index, every parent link, and every ancestor
    /// aggregate is recomputed and compared, and all entries are replayed
    /// onto a working copy of `coins` to prove their inputs exist. Any
    /// mismatch panics: the pool is unusable past an invariant breach.
    pub fn check<V: CoinsView + ?Sized>(&self, coins: &V, best_height: u64) {
        if self.check_frequency == 0 {
            return;
        }
        if (rand::thread_rng().gen::<u32>() as u64) >= self.check_frequency {
            return;
        }
        debug!(entries = self.entries.len(), "running mempool consistency audit");

        let mut check_total: u64 = 0;
        let mut link_count: u64 = 0;
        let mut view = OverlayCoins::new(coins);
        let mut waiting: VecDeque<Hash256> = VecDeque::new();

        for (txid, entry) in &self.entries {
            check_total += entry.tx_size();
            link_count += (entry.parents().len() + entry.children().len()) as u64;

            let mut recomputed_parents: HashSet<Hash256> = HashSet::new();
            let mut depends_wait = false;
            for input in &entry.tx().inputs {
                if let Some(parent) = self.entries.get(&input.previous_output.txid) {
                    assert!(
                        (input.previous_output.index as usize) < parent.tx().outputs.len(),
                        "entry {txid} spends nonexistent output {}",
                        input.previous_output,
                    );
                    depends_wait = true;
                    recomputed_parents.insert(parent.txid());
                } else {
                    assert!(
                        view.have_coin(&input.previous_output),
                        "entry {txid} input {} absent from both pool and UTXO view",
                        input.previous_output,
                    );
                }
                assert_eq!(
                    self.spent_outpoints.get(&input.previous_output),
                    Some(txid),
                    "spend index has no mapping for input {} of {txid}",
                    input.previous_output,
                );
            }
            assert_eq!(
                &recomputed_parents,
                entry.parents(),
                "stored parent set of {txid} differs from recomputation",
            );

            let ancestors = match self.calculate_mempool_ancestors(
                entry,
                u64::MAX,
                u64::MAX,
                u64::MAX,
                u64::MAX,
                false,
            ) {
                Ok(ancestors) => ancestors,
                Err(err) => panic!("unlimited ancestor walk failed for {txid}: {err}"),
            };
            assert!(!ancestors.contains(txid), "entry {txid} is its own ancestor");

            let mut count = 1i64;
            let mut size = entry.tx_size() as i64;
            let mut sigops = entry.sigop_count() as i64;
            for ancestor in &ancestors {
                let ancestor_entry = self
                    .entries
                    .get(ancestor)
                    .expect("ancestor set references an entry missing from the pool");
                count += 1;
                size += ancestor_entry.tx_size() as i64;
                sigops += ancestor_entry.sigop_count() as i64;
            }
            assert_eq!(
                entry.count_with_ancestors(),
                count,
                "ancestor count aggregate of {txid} is stale",
            );
            assert_eq!(
                entry.size_with_ancestors(),
                size,
                "ancestor size aggregate of {txid} is stale",
            );
            assert_eq!(
                entry.sigops_with_ancestors(),
                sigops,
                "ancestor sigop aggregate of {txid} is stale",
            );
            assert_eq!(
                self.roots.contains(txid),
                entry.count_with_ancestors() == 1,
                "root index disagrees with ancestor count for {txid}",
            );

            if depends_wait {
                waiting.push_back(*txid);
            } else {
                assert!(
                    entry.tx().is_coinbase()
                        || view.check_tx_inputs(entry.tx(), best_height).is_ok(),
                    "entry {txid} failed the input check against the UTXO view",
                );
                if let Err(err) = view.update_coins(entry.tx(), AUDIT_SENTINEL_HEIGHT) {
                    panic!("applying {txid} to the audit view failed: {err}");
                }
            }
        }

        let mut steps_since_progress = 0usize;
        while let Some(txid) = waiting.pop_front() {
            let entry = self
                .entries
                .get(&txid)
                .expect("waiting queue references an entry missing from the pool");
            if !view.have_inputs(entry.tx()) {
                waiting.push_back(txid);
                steps_since_progress += 1;
                assert!(
                    steps_since_progress < waiting.len(),
                    "dependency replay made no progress; the pool holds a cycle or a phantom parent",
                );
            } else {
                assert!(
                    entry.tx().is_coinbase()
                        || view.check_tx_inputs(entry.tx(), best_height).is_ok(),
                    "entry {txid} failed the input check against the UTXO view",
                );
                if let Err(err) = view.update_coins(entry.tx(), AUDIT_SENTINEL_HEIGHT) {
                    panic!("applying {txid} to the audit view failed: {err}");
                }
                steps_since_progress = 0;
            }
        }

        for (outpoint, txid) in &self.spent_outpoints {
            let entry = self
                .entries
                .get(txid)
                .unwrap_or_else(|| panic!("spend index references {txid} missing from the pool"));
            assert!(
                entry
                    .tx()
                    .inputs
                    .iter()
                    .any(|input| &input.previous_output == outpoint),
                "spend index maps {outpoint} to {txid}, which does not spend it",
            );
        }

        assert_eq!(
            self.by_entry_time.len(),
            self.entries.len(),
            "time index size differs from the primary index",
        );
        for (time, txid) in &self.by_entry_time {
            let entry = self
                .entries
                .get(txid)
                .unwrap_or_else(|| panic!("time index references {txid} missing from the pool"));
            assert_eq!(entry.time(), *time, "time index key is stale for {txid}");
        }

        assert_eq!(
            check_total, self.total_tx_size,
            "total transaction size accounting is stale",
        );
        let recomputed_usage: u64 = self
            .entries
            .values()
            .map(|entry| entry.usage_size() + TX_ENTRY_OVERHEAD)
            .sum::<u64>()
            + link_count * LINK_OVERHEAD
            + self.roots.len() as u64 * ROOT_OVERHEAD;
        assert_eq!(
            recomputed_usage, self.cache_inner_usage,
            "inner usage accounting is stale",
        );
    }
}

impl Default for TxMempool {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to a [`TxMempool`].
///
/// All state sits behind one reader-writer lock: queries take the shared
/// lock for their full duration (including the map reads), mutators and the
/// audit take the exclusive lock. The lock is never held across I/O.
#[derive(Clone)]
pub struct SharedMempool {
    inner: Arc<RwLock<TxMempool>>,
}

impl SharedMempool {
    /// Wrap a pool for concurrent access.
    pub fn new(pool: TxMempool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(pool)),
        }
    }

    /// See [`TxMempool::add_tx`].
    pub fn add_tx(&self, entry: TxEntry) -> Result<(), MempoolError> {
        self.inner.write().add_tx(entry)
    }

    /// See [`TxMempool::add_tx_with_limits`].
    pub fn add_tx_with_limits(
        &self,
        entry: TxEntry,
        limit_ancestor_count: u64,
        limit_ancestor_size: u64,
        limit_descendant_count: u64,
        limit_descendant_size: u64,
    ) -> Result<(), MempoolError> {
        self.inner.write().add_tx_with_limits(
            entry,
            limit_ancestor_count,
            limit_ancestor_size,
            limit_descendant_count,
            limit_descendant_size,
        )
    }

    /// See [`TxMempool::remove_for_block`].
    pub fn remove_for_block(&self, txs: &[Transaction], block_height: u64) {
        self.inner.write().remove_for_block(txs, block_height)
    }

    /// See [`TxMempool::remove_recursive`].
    pub fn remove_recursive(&self, tx: &Transaction, reason: RemovalReason) {
        self.inner.write().remove_recursive(tx, reason)
    }

    /// See [`TxMempool::expire`].
    pub fn expire(&self, cutoff: u64) -> usize {
        self.inner.write().expire(cutoff)
    }

    /// See [`TxMempool::expire_stale`].
    pub fn expire_stale(&self, now: u64) -> usize {
        self.inner.write().expire_stale(now)
    }

    /// See [`TxMempool::trim_to_size`].
    pub fn trim_to_size(&self, size_limit: u64, no_spends_remaining: Option<&mut Vec<OutPoint>>) {
        self.inner.write().trim_to_size(size_limit, no_spends_remaining)
    }

    /// See [`TxMempool::enforce_size_limit`].
    pub fn enforce_size_limit(&self, no_spends_remaining: Option<&mut Vec<OutPoint>>) {
        self.inner.write().enforce_size_limit(no_spends_remaining)
    }

    /// See [`TxMempool::check`]. Runs under the exclusive lock.
    pub fn check<V: CoinsView + ?Sized>(&self, coins: &V, best_height: u64) {
        self.inner.write().check(coins, best_height)
    }

    /// See [`TxMempool::register_removal_observer`].
    pub fn register_removal_observer(&self, observer: Arc<dyn RemovalObserver>) {
        self.inner.write().register_removal_observer(observer)
    }

    /// Look up a pool transaction by txid.
    ///
    /// The shared lock is held across the map read; the transaction is
    /// cloned out so no reference outlives the lock.
    pub fn find_tx(&self, txid: &Hash256) -> Option<Transaction> {
        let pool = self.inner.read();
        pool.find_tx(txid).cloned()
    }

    /// See [`TxMempool::contains`].
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.inner.read().contains(txid)
    }

    /// See [`TxMempool::has_no_inputs_of`].
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        self.inner.read().has_no_inputs_of(tx)
    }

    /// See [`TxMempool::spender_of`].
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.inner.read().spender_of(outpoint)
    }

    /// See [`TxMempool::len`].
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// See [`TxMempool::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// See [`TxMempool::total_tx_size`].
    pub fn total_tx_size(&self) -> u64 {
        self.inner.read().total_tx_size()
    }

    /// See [`TxMempool::cache_inner_usage`].
    pub fn cache_inner_usage(&self) -> u64 {
        self.inner.read().cache_inner_usage()
    }

    /// See [`TxMempool::best_fee_rate`].
    pub fn best_fee_rate(&self) -> FeeRate {
        self.inner.read().best_fee_rate()
    }

    /// See [`TxMempool::check_frequency`].
    pub fn check_frequency(&self) -> u64 {
        self.inner.read().check_frequency()
    }
}
