//! Error types for the Beck protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unknown UTXO: {0}")] UnknownUtxo(String),
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("value overflow")] ValueOverflow,
    #[error("immature coinbase UTXO at input {index}")] ImmatureCoinbase { index: usize },
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("too many unconfirmed ancestors [limit: {limit}]")] TooManyAncestors { limit: u64 },
    #[error("exceeds ancestor size limit [limit: {limit}]")] ExceedsAncestorSize { limit: u64 },
    #[error("too many descendants for tx {txid} [limit: {limit}]")] TooManyDescendants { txid: String, limit: u64 },
    #[error("exceeds descendant size limit for tx {txid} [limit: {limit}]")] ExceedsDescendantSize { txid: String, limit: u64 },
}

#[derive(Error, Debug)]
pub enum BeckError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Mempool(#[from] MempoolError),
}
