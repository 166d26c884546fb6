//! # beck-core
//! Foundation types and transaction mempool for the Beck protocol.

pub mod coins;
pub mod constants;
pub mod entry;
pub mod error;
pub mod mempool;
pub mod types;
