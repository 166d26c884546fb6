//! Shared test helpers for E2E and property tests.
//!
//! Besides transaction and entry builders, this module provides
//! [`assert_pool_consistent`], an independent from-scratch verification of
//! every cross-index mempool invariant. It deliberately recomputes parent
//! links and closures from raw transaction inputs instead of trusting the
//! pool's stored state.

use std::collections::{HashMap, HashSet};

use beck_core::coins::MemoryCoinsView;
use beck_core::entry::{TxEntry, LINK_OVERHEAD, ROOT_OVERHEAD, TX_ENTRY_OVERHEAD};
use beck_core::mempool::TxMempool;
use beck_core::types::{Coin, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// An outpoint of a confirmed (non-pool) transaction, unique per seed.
pub fn ext(seed: u8) -> OutPoint {
    OutPoint { txid: Hash256([seed; 32]), index: 0 }
}

/// An outpoint of a pool transaction.
pub fn out(txid: Hash256, index: u32) -> OutPoint {
    OutPoint { txid, index }
}

/// Create a simple spending transaction (unsigned).
pub fn make_tx(inputs: Vec<OutPoint>, outputs: Vec<u64>) -> Transaction {
    Transaction {
        version: 1,
        inputs: inputs
            .into_iter()
            .map(|op| TxInput {
                previous_output: op,
                signature_script: vec![0; 64],
                sequence: u64::MAX,
            })
            .collect(),
        outputs: outputs
            .into_iter()
            .map(|value| TxOutput { value, script_pubkey: vec![0xAA; 25] })
            .collect(),
        lock_time: 0,
    }
}

/// Build a pool entry for a test transaction.
pub fn make_entry(tx: &Transaction, fee: u64, time: u64) -> TxEntry {
    TxEntry::new(tx.clone(), fee, time, 1, 1, false).expect("test tx must encode")
}

/// Admit a transaction under default limits, panicking on rejection.
pub fn add_at(pool: &mut TxMempool, tx: &Transaction, fee: u64, time: u64) -> Hash256 {
    let entry = make_entry(tx, fee, time);
    let txid = entry.txid();
    pool.add_tx(entry).expect("admission must succeed");
    txid
}

/// A coins view seeded with every external outpoint the helpers hand out.
pub fn seeded_view() -> MemoryCoinsView {
    let mut view = MemoryCoinsView::new();
    for seed in 0..=255u8 {
        view.add_coin(
            ext(seed),
            Coin {
                output: TxOutput { value: 1_000_000, script_pubkey: vec![] },
                height: 1,
                is_coinbase: false,
            },
        );
    }
    view
}

/// A compact digest of all externally observable pool state, for
/// before/after comparisons.
pub fn pool_digest(pool: &TxMempool) -> Vec<(Hash256, i64, i64, i64, i64, i64, i64, i64)> {
    let mut digest: Vec<_> = pool
        .iter()
        .map(|e| {
            (
                e.txid(),
                e.count_with_ancestors(),
                e.size_with_ancestors(),
                e.sigops_with_ancestors(),
                e.fee_with_ancestors(),
                e.count_with_descendants(),
                e.size_with_descendants(),
                e.fee_with_descendants(),
            )
        })
        .collect();
    digest.sort();
    digest
}

/// Verify every cross-index invariant of the pool by recomputation.
///
/// Parent links are rebuilt from transaction inputs, ancestor and
/// descendant closures from the rebuilt links, and all aggregates, index
/// memberships, and global accounting are compared against the pool's
/// incrementally maintained state.
pub fn assert_pool_consistent(pool: &TxMempool) {
    let entries: HashMap<Hash256, &TxEntry> = pool.iter().map(|e| (e.txid(), e)).collect();
    assert_eq!(entries.len(), pool.len());

    // Rebuild the parent relation from raw inputs.
    let mut parents: HashMap<Hash256, HashSet<Hash256>> = HashMap::new();
    let mut children: HashMap<Hash256, HashSet<Hash256>> = HashMap::new();
    for (txid, entry) in &entries {
        parents.entry(*txid).or_default();
        children.entry(*txid).or_default();
        for input in &entry.tx().inputs {
            let prev = input.previous_output.txid;
            if entries.contains_key(&prev) && prev != *txid {
                parents.entry(*txid).or_default().insert(prev);
                children.entry(prev).or_default().insert(*txid);
            }
        }
    }

    let mut total_inputs = 0usize;
    for (txid, entry) in &entries {
        // Spend index holds exactly this entry for each of its inputs.
        for input in &entry.tx().inputs {
            assert_eq!(
                pool.spender_of(&input.previous_output),
                Some(*txid),
                "spend index must map each input of {txid} back to it",
            );
            total_inputs += 1;
        }

        // Stored links agree with the recomputed relation, both directions.
        assert_eq!(
            entry.parents(),
            &parents[txid],
            "stored parents of {txid} disagree with inputs",
        );
        assert_eq!(
            entry.children(),
            &children[txid],
            "stored children of {txid} disagree with inputs",
        );
        for parent in entry.parents() {
            assert!(
                entries[parent].children().contains(txid),
                "parent/child links must be symmetric",
            );
        }
    }
    // No stray spend mappings beyond the entries' own inputs.
    assert_eq!(pool.spends().count(), total_inputs);

    // Closures and aggregates.
    for (txid, entry) in &entries {
        let ancestors = closure(*txid, &parents);
        let descendants = closure(*txid, &children);
        assert!(
            !ancestors.contains(txid),
            "{txid} must not appear in its own ancestor closure",
        );

        let mut count = 1i64;
        let mut size = entry.tx_size() as i64;
        let mut sigops = entry.sigop_count() as i64;
        let mut fee = entry.tx_fee() as i64;
        for ancestor in &ancestors {
            let a = entries[ancestor];
            count += 1;
            size += a.tx_size() as i64;
            sigops += a.sigop_count() as i64;
            fee += a.tx_fee() as i64;
        }
        assert_eq!(entry.count_with_ancestors(), count, "ancestor count of {txid}");
        assert_eq!(entry.size_with_ancestors(), size, "ancestor size of {txid}");
        assert_eq!(entry.sigops_with_ancestors(), sigops, "ancestor sigops of {txid}");
        assert_eq!(entry.fee_with_ancestors(), fee, "ancestor fee of {txid}");

        let mut dcount = 1i64;
        let mut dsize = entry.tx_size() as i64;
        let mut dfee = entry.tx_fee() as i64;
        for descendant in &descendants {
            let d = entries[descendant];
            dcount += 1;
            dsize += d.tx_size() as i64;
            dfee += d.tx_fee() as i64;
        }
        assert_eq!(entry.count_with_descendants(), dcount, "descendant count of {txid}");
        assert_eq!(entry.size_with_descendants(), dsize, "descendant size of {txid}");
        assert_eq!(entry.fee_with_descendants(), dfee, "descendant fee of {txid}");

        // Root index matches the parentless predicate.
        assert_eq!(
            pool.roots().contains(txid),
            parents[txid].is_empty(),
            "root membership of {txid}",
        );
        assert_eq!(parents[txid].is_empty(), entry.count_with_ancestors() == 1);
    }
    assert!(pool.roots().iter().all(|txid| entries.contains_key(txid)));

    // Time index holds exactly the pool members, ascending.
    let by_time: Vec<(u64, Hash256)> = pool.iter_by_time().map(|e| (e.time(), e.txid())).collect();
    assert_eq!(by_time.len(), entries.len());
    assert!(by_time.windows(2).all(|w| w[0] <= w[1]), "time index must ascend");

    // Global accounting.
    let expected_size: u64 = entries.values().map(|e| e.tx_size()).sum();
    assert_eq!(pool.total_tx_size(), expected_size);

    let link_count: u64 = entries
        .values()
        .map(|e| (e.parents().len() + e.children().len()) as u64)
        .sum();
    let expected_usage: u64 = entries
        .values()
        .map(|e| e.usage_size() + TX_ENTRY_OVERHEAD)
        .sum::<u64>()
        + link_count * LINK_OVERHEAD
        + pool.roots().len() as u64 * ROOT_OVERHEAD;
    assert_eq!(pool.cache_inner_usage(), expected_usage);
}

/// Transitive closure of `start` over `links`. `start` itself appears in
/// the result only if the relation is cyclic.
fn closure(start: Hash256, links: &HashMap<Hash256, HashSet<Hash256>>) -> HashSet<Hash256> {
    let mut seen: HashSet<Hash256> = HashSet::new();
    let mut frontier: Vec<Hash256> = links[&start].iter().copied().collect();
    while let Some(next) = frontier.pop() {
        if seen.insert(next) {
            frontier.extend(links[&next].iter().copied());
        }
    }
    seen
}
