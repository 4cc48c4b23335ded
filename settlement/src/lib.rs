//! ClearHub Settlement
//!
//! Settlement window aggregation and deferred-net settlement over the
//! ClearHub ledger.
//!
//! # Architecture
//!
//! - **Recompute, never patch**: aggregation runs are rebuilt from the
//!   committed transfers; retries get a fresh run number
//! - **Derived parent state**: a settlement's state is always the rollup of
//!   its per-account children
//! - **Own store**: settlements persist separately from the ledger; only
//!   position adjustments cross back, through the ledger's writer

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod aggregation;
pub mod config;
pub mod engine;
pub mod error;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{Config, SettlementModelConfig};
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use storage::SettlementStore;
pub use types::{
    rollup, AggregationKey, AggregationRow, AggregationRun, Settlement, SettlementAccount,
    SettlementAccountStateChange, SettlementId, SettlementState, SettlementStateChange,
};
