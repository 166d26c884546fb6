//! UTXO view interface consumed by the mempool.
//!
//! Provides the [`CoinsView`] trait for unspent-output lookup and input
//! checking, an in-memory [`MemoryCoinsView`] suitable for testing, and
//! [`OverlayCoins`], a throwaway working copy used by the mempool's
//! consistency audit to replay pool entries without touching the base view.
//!
//! All implementations must be in-memory and non-blocking: the mempool
//! invokes them while holding its lock.

use std::collections::{HashMap, HashSet};

use crate::error::TransactionError;
use crate::types::{Coin, OutPoint, Transaction};

/// Read-and-update view of the unspent transaction output set.
///
/// Implemented by the node's UTXO cache; [`MemoryCoinsView`] is the
/// reference in-memory implementation.
pub trait CoinsView: Send + Sync {
    /// Look up a coin by outpoint. Returns `None` if spent or unknown.
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin>;

    /// Check whether a coin exists and is unspent.
    ///
    /// Default implementation delegates to [`get_coin`](Self::get_coin).
    fn have_coin(&self, outpoint: &OutPoint) -> bool {
        self.get_coin(outpoint).is_some()
    }

    /// Check whether every input of `tx` references an available coin.
    ///
    /// Coinbase transactions trivially satisfy this (no real inputs).
    fn have_inputs(&self, tx: &Transaction) -> bool {
        if tx.is_coinbase() {
            return true;
        }
        tx.inputs
            .iter()
            .all(|input| self.have_coin(&input.previous_output))
    }

    /// Validate a transaction's inputs against this view at `height`.
    ///
    /// Checks that every referenced coin exists and is mature, and that the
    /// input value covers the output value. Returns the implied fee.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::UnknownUtxo`] if an input coin is missing
    /// - [`TransactionError::ImmatureCoinbase`] if a coinbase coin is spent early
    /// - [`TransactionError::ValueOverflow`] if input or output sums overflow
    /// - [`TransactionError::InsufficientFunds`] if outputs exceed inputs
    fn check_tx_inputs(&self, tx: &Transaction, height: u64) -> Result<u64, TransactionError> {
        let mut value_in: u64 = 0;
        for (index, input) in tx.inputs.iter().enumerate() {
            let coin = self
                .get_coin(&input.previous_output)
                .ok_or_else(|| TransactionError::UnknownUtxo(input.previous_output.to_string()))?;
            if !coin.is_mature(height) {
                return Err(TransactionError::ImmatureCoinbase { index });
            }
            value_in = value_in
                .checked_add(coin.output.value)
                .ok_or(TransactionError::ValueOverflow)?;
        }
        let value_out = tx
            .total_output_value()
            .ok_or(TransactionError::ValueOverflow)?;
        if value_out > value_in {
            return Err(TransactionError::InsufficientFunds {
                have: value_in,
                need: value_out,
            });
        }
        Ok(value_in - value_out)
    }

    /// Apply a transaction to this view: spend its inputs, add its outputs
    /// at `height`.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::Serialization`] if the txid cannot be computed
    fn update_coins(&mut self, tx: &Transaction, height: u64) -> Result<(), TransactionError>;
}

/// In-memory UTXO view for testing.
///
/// Stores coins in a `HashMap` with no persistence.
#[derive(Clone, Debug, Default)]
pub struct MemoryCoinsView {
    coins: HashMap<OutPoint, Coin>,
}

impl MemoryCoinsView {
    /// Create a new empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a single coin.
    pub fn add_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    /// Insert every output of `tx` as an unspent coin at `height`.
    pub fn add_tx_outputs(&mut self, tx: &Transaction, height: u64) -> Result<(), TransactionError> {
        let txid = tx.txid()?;
        let is_coinbase = tx.is_coinbase();
        for (index, output) in tx.outputs.iter().enumerate() {
            self.coins.insert(
                OutPoint { txid, index: index as u32 },
                Coin {
                    output: output.clone(),
                    height,
                    is_coinbase,
                },
            );
        }
        Ok(())
    }

    /// Number of unspent coins in the view.
    pub fn coin_count(&self) -> usize {
        self.coins.len()
    }
}

impl CoinsView for MemoryCoinsView {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.get(outpoint).cloned()
    }

    fn update_coins(&mut self, tx: &Transaction, height: u64) -> Result<(), TransactionError> {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                self.coins.remove(&input.previous_output);
            }
        }
        self.add_tx_outputs(tx, height)
    }
}

/// A working copy layered over a read-only base view.
///
/// Mutations land in the overlay; the base is never touched. Used by the
/// mempool audit to replay all pool entries on top of the node's UTXO set.
pub struct OverlayCoins<'a, V: CoinsView + ?Sized> {
    base: &'a V,
    added: HashMap<OutPoint, Coin>,
    spent: HashSet<OutPoint>,
}

impl<'a, V: CoinsView + ?Sized> OverlayCoins<'a, V> {
    /// Create an overlay with no local changes.
    pub fn new(base: &'a V) -> Self {
        Self {
            base,
            added: HashMap::new(),
            spent: HashSet::new(),
        }
    }
}

impl<V: CoinsView + ?Sized> CoinsView for OverlayCoins<'_, V> {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        if self.spent.contains(outpoint) {
            return None;
        }
        if let Some(coin) = self.added.get(outpoint) {
            return Some(coin.clone());
        }
        self.base.get_coin(outpoint)
    }

    fn update_coins(&mut self, tx: &Transaction, height: u64) -> Result<(), TransactionError> {
        let txid = tx.txid()?;
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                self.added.remove(&input.previous_output);
                self.spent.insert(input.previous_output.clone());
            }
        }
        let is_coinbase = tx.is_coinbase();
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint { txid, index: index as u32 };
            self.spent.remove(&outpoint);
            self.added.insert(
                outpoint,
                Coin {
                    output: output.clone(),
                    height,
                    is_coinbase,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::types::{Hash256, TxInput, TxOutput};

    fn coin(value: u64) -> Coin {
        Coin {
            output: TxOutput { value, script_pubkey: vec![] },
            height: 1,
            is_coinbase: false,
        }
    }

    fn outpoint(seed: u8, index: u32) -> OutPoint {
        OutPoint { txid: Hash256([seed; 32]), index }
    }

    fn spending_tx(outpoints: &[OutPoint], output_value: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: outpoints
                .iter()
                .map(|op| TxInput {
                    previous_output: op.clone(),
                    signature_script: vec![0; 64],
                    sequence: u64::MAX,
                })
                .collect(),
            outputs: vec![TxOutput { value: output_value, script_pubkey: vec![] }],
            lock_time: 0,
        }
    }

    // --- MemoryCoinsView ---

    #[test]
    fn memory_view_lookup() {
        let mut view = MemoryCoinsView::new();
        let op = outpoint(1, 0);
        view.add_coin(op.clone(), coin(50 * COIN));

        assert!(view.have_coin(&op));
        assert!(!view.have_coin(&outpoint(2, 0)));
        assert_eq!(view.get_coin(&op).unwrap().output.value, 50 * COIN);
    }

    #[test]
    fn have_inputs_all_or_nothing() {
        let mut view = MemoryCoinsView::new();
        view.add_coin(outpoint(1, 0), coin(10));

        assert!(view.have_inputs(&spending_tx(&[outpoint(1, 0)], 5)));
        assert!(!view.have_inputs(&spending_tx(&[outpoint(1, 0), outpoint(2, 0)], 5)));
    }

    #[test]
    fn check_tx_inputs_returns_fee() {
        let mut view = MemoryCoinsView::new();
        view.add_coin(outpoint(1, 0), coin(1_000));

        let fee = view
            .check_tx_inputs(&spending_tx(&[outpoint(1, 0)], 900), 10)
            .unwrap();
        assert_eq!(fee, 100);
    }

    #[test]
    fn check_tx_inputs_missing_coin() {
        let view = MemoryCoinsView::new();
        let err = view
            .check_tx_inputs(&spending_tx(&[outpoint(1, 0)], 900), 10)
            .unwrap_err();
        assert!(matches!(err, TransactionError::UnknownUtxo(_)));
    }

    #[test]
    fn check_tx_inputs_insufficient_funds() {
        let mut view = MemoryCoinsView::new();
        view.add_coin(outpoint(1, 0), coin(100));

        let err = view
            .check_tx_inputs(&spending_tx(&[outpoint(1, 0)], 900), 10)
            .unwrap_err();
        assert!(matches!(err, TransactionError::InsufficientFunds { have: 100, need: 900 }));
    }

    #[test]
    fn check_tx_inputs_immature_coinbase() {
        let mut view = MemoryCoinsView::new();
        view.add_coin(
            outpoint(1, 0),
            Coin {
                output: TxOutput { value: 50 * COIN, script_pubkey: vec![] },
                height: 100,
                is_coinbase: true,
            },
        );

        let err = view
            .check_tx_inputs(&spending_tx(&[outpoint(1, 0)], COIN), 150)
            .unwrap_err();
        assert!(matches!(err, TransactionError::ImmatureCoinbase { index: 0 }));
    }

    #[test]
    fn update_coins_spends_and_creates() {
        let mut view = MemoryCoinsView::new();
        let op = outpoint(1, 0);
        view.add_coin(op.clone(), coin(1_000));

        let tx = spending_tx(&[op.clone()], 900);
        view.update_coins(&tx, 5).unwrap();

        assert!(!view.have_coin(&op));
        let created = OutPoint { txid: tx.txid().unwrap(), index: 0 };
        assert_eq!(view.get_coin(&created).unwrap().output.value, 900);
        assert_eq!(view.get_coin(&created).unwrap().height, 5);
    }

    // --- OverlayCoins ---

    #[test]
    fn overlay_reads_through_to_base() {
        let mut base = MemoryCoinsView::new();
        base.add_coin(outpoint(1, 0), coin(10));

        let overlay = OverlayCoins::new(&base);
        assert!(overlay.have_coin(&outpoint(1, 0)));
        assert!(!overlay.have_coin(&outpoint(2, 0)));
    }

    #[test]
    fn overlay_spend_shadows_base() {
        let mut base = MemoryCoinsView::new();
        let op = outpoint(1, 0);
        base.add_coin(op.clone(), coin(1_000));

        let mut overlay = OverlayCoins::new(&base);
        let tx = spending_tx(&[op.clone()], 900);
        overlay.update_coins(&tx, 5).unwrap();

        assert!(!overlay.have_coin(&op));
        assert!(overlay.have_coin(&OutPoint { txid: tx.txid().unwrap(), index: 0 }));
        // Base untouched.
        assert!(base.have_coin(&op));
    }

    #[test]
    fn overlay_chains_spends() {
        let mut base = MemoryCoinsView::new();
        let op = outpoint(1, 0);
        base.add_coin(op.clone(), coin(1_000));

        let mut overlay = OverlayCoins::new(&base);
        let tx1 = spending_tx(&[op], 900);
        overlay.update_coins(&tx1, 5).unwrap();

        let mid = OutPoint { txid: tx1.txid().unwrap(), index: 0 };
        let tx2 = spending_tx(&[mid.clone()], 800);
        assert!(overlay.have_inputs(&tx2));
        overlay.update_coins(&tx2, 5).unwrap();

        assert!(!overlay.have_coin(&mid));
        assert!(overlay.have_coin(&OutPoint { txid: tx2.txid().unwrap(), index: 0 }));
    }
}
