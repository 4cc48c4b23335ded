//! ClearHub Ledger Core
//!
//! Participant position engine and transfer clearing for a hub-and-spoke
//! payment scheme.
//!
//! # Architecture
//!
//! - **Double Entry**: Every transfer posts balancing debit and credit rows
//! - **Single Writer**: One logical writer thread serializes all mutations
//! - **Append-only History**: State changes are appended, never rewritten
//! - **Net Debit Cap**: Reservations are bounded per account by a hub-set cap
//!
//! # Invariants
//!
//! - Entries for each ledger entry type of a transfer sum to zero
//! - A position mutation and its causing state change land in one batch
//! - Reserved value never goes negative and is fully released on abort
//! - At most one settlement window is open at any time

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod position;
pub mod transfer;
pub mod window;
pub mod validator;
pub mod ledger;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Currency, LedgerAccountType, LedgerEntryType, Limit, LimitType, Participant,
    ParticipantCurrency, ParticipantCurrencyId, ParticipantId, Position, PositionChange,
    SettlementWindow, Transfer, TransferParticipant, TransferParticipantRole, TransferState,
    TransferStateChange, WindowId, WindowState, WindowStateChange,
};
pub use ledger::Ledger;
pub use storage::Storage;
pub use config::Config;
pub use validator::{FulfilmentValidator, Sha256PreimageValidator};
