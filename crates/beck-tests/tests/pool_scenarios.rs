//! End-to-end mempool scenarios.
//!
//! Each test drives the pool through a small real-world episode — chained
//! admissions, a block arrival, a conflicting confirmation, expiry, an
//! over-limit admission attempt, and size-bounded eviction — and verifies
//! both the visible outcome and full cross-index consistency afterwards.

use std::sync::Arc;

use beck_core::error::MempoolError;
use beck_core::mempool::{RemovalObserver, RemovalReason, TxMempool};
use beck_core::types::Hash256;
use beck_tests::helpers::*;

/// Collects removal notifications for assertions.
#[derive(Default)]
struct Recorder {
    events: std::sync::Mutex<Vec<(Hash256, RemovalReason)>>,
}

impl RemovalObserver for Recorder {
    fn transaction_removed(&self, txid: &Hash256, reason: RemovalReason) {
        self.events.lock().unwrap().push((*txid, reason));
    }
}

#[test]
fn chain_of_three() {
    let mut pool = TxMempool::new();
    let tx_a = make_tx(vec![ext(1)], vec![50_000]);
    let id_a = add_at(&mut pool, &tx_a, 10, 100);
    let tx_b = make_tx(vec![out(id_a, 0)], vec![40_000]);
    let id_b = add_at(&mut pool, &tx_b, 10, 200);
    let tx_c = make_tx(vec![out(id_b, 0)], vec![30_000]);
    let id_c = add_at(&mut pool, &tx_c, 10, 300);

    assert_eq!(pool.roots().len(), 1);
    assert!(pool.roots().contains(&id_a));
    assert_eq!(pool.get(&id_a).unwrap().count_with_descendants(), 3);
    assert_eq!(pool.get(&id_c).unwrap().count_with_ancestors(), 3);

    let expected_total: u64 = [&tx_a, &tx_b, &tx_c]
        .iter()
        .map(|tx| tx.serialized_size().unwrap())
        .sum();
    assert_eq!(pool.total_tx_size(), expected_total);

    assert_pool_consistent(&pool);

    // The aggregates survive a full audit against the seeded UTXO set.
    pool.set_check_frequency(1 << 32);
    pool.check(&seeded_view(), 10);
}

#[test]
fn block_removal_keeps_descendants() {
    let mut pool = TxMempool::new();
    let tx_a = make_tx(vec![ext(1)], vec![50_000]);
    let id_a = add_at(&mut pool, &tx_a, 10, 100);
    let id_b = add_at(&mut pool, &make_tx(vec![out(id_a, 0)], vec![40_000]), 10, 200);
    let id_c = add_at(&mut pool, &make_tx(vec![out(id_b, 0)], vec![30_000]), 10, 300);

    pool.remove_for_block(std::slice::from_ref(&tx_a), 1);

    assert_eq!(pool.len(), 2);
    assert!(pool.contains(&id_b));
    assert!(pool.contains(&id_c));
    assert_eq!(pool.roots().len(), 1);
    assert!(pool.roots().contains(&id_b));
    assert_eq!(pool.get(&id_b).unwrap().count_with_ancestors(), 1);
    assert_eq!(pool.get(&id_c).unwrap().count_with_ancestors(), 2);

    assert_pool_consistent(&pool);
}

#[test]
fn conflicting_confirmation_evicts_pool_double_spend() {
    let mut pool = TxMempool::new();
    let recorder = Arc::new(Recorder::default());
    pool.register_removal_observer(recorder.clone());

    // A spends ext(1); a different confirmed transaction spends the same
    // outpoint, so A must leave as a conflict.
    let tx_a = make_tx(vec![ext(1)], vec![50_000]);
    let id_a = add_at(&mut pool, &tx_a, 10, 100);
    let confirmed = make_tx(vec![ext(1)], vec![49_000]);
    assert_ne!(confirmed.txid().unwrap(), id_a);

    pool.remove_for_block(&[confirmed], 1);

    assert!(pool.is_empty());
    let events = recorder.events.lock().unwrap();
    assert_eq!(events.as_slice(), &[(id_a, RemovalReason::Conflict)]);
    drop(events);
    assert_pool_consistent(&pool);
}

#[test]
fn expiry_cascades_through_descendants() {
    let mut pool = TxMempool::new();
    let recorder = Arc::new(Recorder::default());
    pool.register_removal_observer(recorder.clone());

    let tx_a = make_tx(vec![ext(1)], vec![50_000]);
    let id_a = add_at(&mut pool, &tx_a, 10, 100);
    let id_b = add_at(&mut pool, &make_tx(vec![out(id_a, 0)], vec![40_000]), 10, 200);

    // Only A predates the cutoff, but B rides along as its descendant.
    assert_eq!(pool.expire(150), 2);
    assert!(pool.is_empty());

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|(_, r)| *r == RemovalReason::Expiry));
    assert!(events.iter().any(|(id, _)| *id == id_a));
    assert!(events.iter().any(|(id, _)| *id == id_b));
    drop(events);
    assert_pool_consistent(&pool);
}

#[test]
fn ancestor_cap_rejects_third_link() {
    let mut pool = TxMempool::new();
    let tx_a = make_tx(vec![ext(1)], vec![50_000]);
    let id_a = add_at(&mut pool, &tx_a, 10, 100);
    let id_b = add_at(&mut pool, &make_tx(vec![out(id_a, 0)], vec![40_000]), 10, 200);

    let before = pool_digest(&pool);
    let before_usage = pool.cache_inner_usage();

    let tx_c = make_tx(vec![out(id_b, 0)], vec![30_000]);
    let err = pool
        .add_tx_with_limits(make_entry(&tx_c, 10, 300), 2, u64::MAX, u64::MAX, u64::MAX)
        .unwrap_err();
    assert_eq!(err, MempoolError::TooManyAncestors { limit: 2 });

    assert_eq!(pool.len(), 2);
    assert_eq!(pool_digest(&pool), before, "rejection must leave the pool unchanged");
    assert_eq!(pool.cache_inner_usage(), before_usage);
    assert_pool_consistent(&pool);
}

#[test]
fn trim_to_size_releases_unreferenced_outpoints() {
    let mut pool = TxMempool::new();
    let recorder = Arc::new(Recorder::default());
    pool.register_removal_observer(recorder.clone());

    // Independent entries with ascending fee rates; the limit forces out
    // everything but the best payer.
    let mut ids = Vec::new();
    for seed in 1..=4u8 {
        let tx = make_tx(vec![ext(seed)], vec![50_000]);
        ids.push(add_at(&mut pool, &tx, 1_000 * seed as u64, 100 + seed as u64));
    }
    let survivor = *ids.last().unwrap();
    let survivor_usage =
        pool.get(&survivor).unwrap().usage_size() + beck_core::entry::TX_ENTRY_OVERHEAD;
    let limit = survivor_usage + beck_core::entry::ROOT_OVERHEAD;

    let mut freed = Vec::new();
    pool.trim_to_size(limit, Some(&mut freed));

    assert!(pool.cache_inner_usage() <= limit);
    assert_eq!(pool.len(), 1);
    assert!(pool.contains(&survivor));

    // Exactly the evicted entries' prevouts come back, none of them spent
    // by a survivor.
    let mut expected: Vec<_> = (1..=3u8).map(ext).collect();
    expected.sort_by_key(|op| op.txid);
    freed.sort_by_key(|op| op.txid);
    assert_eq!(freed, expected);

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|(_, r)| *r == RemovalReason::SizeLimit));
    drop(events);
    assert_pool_consistent(&pool);
}
