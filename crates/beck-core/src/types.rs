//! Core protocol types: transactions, outpoints, coins.
//!
//! All monetary values are in becks (1 BECK = 10^8 becks).
//! Transaction identity is the double SHA-256 of the canonical bincode
//! encoding; block-height and value fields use u64 per protocol convention.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::TransactionError;

/// A 32-byte hash value.
///
/// Used for transaction IDs (double SHA-256) and merkle roots.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase previous outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Double SHA-256 of arbitrary data.
    pub fn double_sha256(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        Self(Sha256::digest(first).into())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// Unlocking script. Empty for coinbase inputs.
    pub signature_script: Vec<u8>,
    /// Relative ordering / replacement sequence number.
    pub sequence: u64,
}

/// A transaction output, creating a new spendable coin.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in becks (1 BECK = 10^8 becks).
    pub value: u64,
    /// Locking script that must be satisfied to spend this output.
    pub script_pubkey: Vec<u8>,
}

/// A transaction transferring value between outputs.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u64,
}

impl Transaction {
    /// Canonical encoding used for both identity and size.
    ///
    /// Uses bincode with standard config for deterministic serialization.
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Compute the transaction ID (double SHA-256 of the canonical encoding).
    pub fn txid(&self) -> Result<Hash256, TransactionError> {
        Ok(Hash256::double_sha256(&self.encode()?))
    }

    /// Serialized byte length of the canonical encoding.
    pub fn serialized_size(&self) -> Result<u64, TransactionError> {
        Ok(self.encode()?.len() as u64)
    }

    /// Check if this is a coinbase transaction (single input with null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }
}

/// An unspent output as seen by the UTXO view.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Coin {
    /// The unspent output.
    pub output: TxOutput,
    /// Height of the block containing this coin.
    pub height: u64,
    /// Whether this output is from a coinbase transaction.
    pub is_coinbase: bool,
}

impl Coin {
    /// Check if this coin has matured and can be spent.
    ///
    /// Coinbase outputs require [`COINBASE_MATURITY`](crate::constants::COINBASE_MATURITY)
    /// confirmations. Non-coinbase outputs are always mature.
    pub fn is_mature(&self, current_height: u64) -> bool {
        if !self.is_coinbase {
            return true;
        }
        current_height.saturating_sub(self.height) >= crate::constants::COINBASE_MATURITY
    }
}

/// Fee rate precision multiplier.
///
/// Fee rates are stored as `fee * FEE_RATE_PRECISION / size`, giving
/// milli-becks per byte for fine-grained ordering.
const FEE_RATE_PRECISION: u128 = 1_000;

/// A transaction fee rate in milli-becks per byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeeRate {
    millis_per_byte: u64,
}

impl FeeRate {
    /// The zero fee rate.
    pub const ZERO: Self = Self { millis_per_byte: 0 };

    /// Compute a fee rate from a fee and a serialized size.
    ///
    /// Uses a u128 intermediate to prevent overflow for large fees.
    /// A zero size maps to the maximum rate.
    pub fn from_fee_and_size(fee: u64, size: u64) -> Self {
        if size == 0 {
            return Self { millis_per_byte: u64::MAX };
        }
        let rate = (fee as u128) * FEE_RATE_PRECISION / (size as u128);
        Self {
            millis_per_byte: rate.min(u64::MAX as u128) as u64,
        }
    }

    /// The rate in milli-becks per byte.
    pub fn millis_per_byte(&self) -> u64 {
        self.millis_per_byte
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mbecks/B", self.millis_per_byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    fn sample_script() -> Vec<u8> {
        vec![0xAA; 25]
    }

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: Hash256([0x11; 32]),
                    index: 0,
                },
                signature_script: vec![0u8; 64],
                sequence: u64::MAX,
            }],
            outputs: vec![TxOutput {
                value: 50 * COIN,
                script_pubkey: sample_script(),
            }],
            lock_time: 0,
        }
    }

    fn sample_coinbase() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                signature_script: vec![],
                sequence: u64::MAX,
            }],
            outputs: vec![TxOutput {
                value: 50 * COIN,
                script_pubkey: sample_script(),
            }],
            lock_time: 0,
        }
    }

    // --- Hash256 ---

    #[test]
    fn hash256_zero_is_zero() {
        let h = Hash256::ZERO;
        assert!(h.is_zero());
        assert_eq!(h, Hash256::default());
    }

    #[test]
    fn hash256_display_hex() {
        let h = Hash256([0xAB; 32]);
        let s = format!("{h}");
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(&s[0..2], "ab");
    }

    #[test]
    fn double_sha256_matches_manual() {
        use sha2::{Digest, Sha256};
        let data = b"beck";
        let first = Sha256::digest(data);
        let second: [u8; 32] = Sha256::digest(first).into();
        assert_eq!(Hash256::double_sha256(data), Hash256(second));
    }

    // --- OutPoint ---

    #[test]
    fn outpoint_null_detection() {
        assert!(OutPoint::null().is_null());
        let op = OutPoint { txid: Hash256([1; 32]), index: 0 };
        assert!(!op.is_null());
    }

    #[test]
    fn outpoint_display() {
        let op = OutPoint { txid: Hash256([0xFF; 32]), index: 3 };
        assert!(format!("{op}").ends_with(":3"));
    }

    // --- Transaction ---

    #[test]
    fn coinbase_detection() {
        assert!(sample_coinbase().is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn txid_deterministic() {
        let tx = sample_tx();
        assert_eq!(tx.txid().unwrap(), tx.txid().unwrap());
    }

    #[test]
    fn txid_changes_with_data() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.lock_time = 1;
        assert_ne!(tx1.txid().unwrap(), tx2.txid().unwrap());
    }

    #[test]
    fn txid_is_double_sha_of_encoding() {
        let tx = sample_tx();
        let encoded = tx.encode().unwrap();
        assert_eq!(tx.txid().unwrap(), Hash256::double_sha256(&encoded));
    }

    #[test]
    fn serialized_size_matches_encoding() {
        let tx = sample_tx();
        assert_eq!(tx.serialized_size().unwrap(), tx.encode().unwrap().len() as u64);
        assert!(tx.serialized_size().unwrap() > 0);
    }

    #[test]
    fn total_output_value_sums_and_overflows() {
        let mut tx = sample_tx();
        tx.outputs = vec![
            TxOutput { value: 100, script_pubkey: vec![] },
            TxOutput { value: 200, script_pubkey: vec![] },
        ];
        assert_eq!(tx.total_output_value(), Some(300));

        tx.outputs = vec![
            TxOutput { value: u64::MAX, script_pubkey: vec![] },
            TxOutput { value: 1, script_pubkey: vec![] },
        ];
        assert_eq!(tx.total_output_value(), None);
    }

    // --- Coin maturity ---

    #[test]
    fn coinbase_coin_matures_at_threshold() {
        let coin = Coin {
            output: TxOutput { value: 50 * COIN, script_pubkey: vec![] },
            height: 100,
            is_coinbase: true,
        };
        assert!(!coin.is_mature(150));
        assert!(coin.is_mature(200));
        assert!(coin.is_mature(300));
    }

    #[test]
    fn regular_coin_always_mature() {
        let coin = Coin {
            output: TxOutput { value: 100, script_pubkey: vec![] },
            height: 100,
            is_coinbase: false,
        };
        assert!(coin.is_mature(0));
        assert!(coin.is_mature(100));
    }

    // --- FeeRate ---

    #[test]
    fn fee_rate_precision() {
        // 999 becks / 1000 bytes = 0.999 becks/byte = 999 milli-becks/byte.
        assert_eq!(FeeRate::from_fee_and_size(999, 1000).millis_per_byte(), 999);
    }

    #[test]
    fn fee_rate_zero_fee_and_zero_size() {
        assert_eq!(FeeRate::from_fee_and_size(0, 100), FeeRate::ZERO);
        assert_eq!(FeeRate::from_fee_and_size(1000, 0).millis_per_byte(), u64::MAX);
    }

    #[test]
    fn fee_rate_orders_by_rate() {
        let low = FeeRate::from_fee_and_size(1_000, 1_000);
        let high = FeeRate::from_fee_and_size(5_000, 1_000);
        assert!(low < high);
    }

    // --- Bincode round-trip ---

    #[test]
    fn bincode_round_trip_transaction() {
        let tx = sample_tx();
        let encoded = bincode::encode_to_vec(&tx, bincode::config::standard()).unwrap();
        let (decoded, _): (Transaction, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(tx, decoded);
    }
}
