//! Shared helpers for the Beck integration and property test suites.

pub mod helpers;
