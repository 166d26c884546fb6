//! Protocol constants. All monetary values in becks (1 BECK = 10^8 becks).

pub const COIN: u64 = 100_000_000;

/// Confirmations required before a coinbase output may be spent.
pub const COINBASE_MATURITY: u64 = 100;

/// Default maximum number of in-pool ancestors (the transaction itself included).
pub const DEFAULT_ANCESTOR_COUNT_LIMIT: u64 = 25;

/// Default maximum total serialized size of a transaction plus its in-pool
/// ancestors, in bytes.
pub const DEFAULT_ANCESTOR_SIZE_LIMIT: u64 = 101_000;

/// Default maximum number of in-pool descendants any ancestor may carry
/// (that ancestor itself included).
pub const DEFAULT_DESCENDANT_COUNT_LIMIT: u64 = 25;

/// Default maximum total serialized size of any ancestor plus its in-pool
/// descendants, in bytes.
pub const DEFAULT_DESCENDANT_SIZE_LIMIT: u64 = 101_000;

/// Default bound on the pool's accounted memory usage (300 MiB).
pub const DEFAULT_MEMPOOL_SIZE_LIMIT: u64 = 300 * 1024 * 1024;

/// Default age after which unconfirmed transactions expire (two weeks).
pub const DEFAULT_EXPIRY_AGE_SECS: u64 = 14 * 24 * 60 * 60;

/// Sentinel height used when replaying pool entries onto a working copy of
/// the UTXO view during the consistency audit.
pub const AUDIT_SENTINEL_HEIGHT: u64 = 1_000_000;
