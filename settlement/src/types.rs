//! Settlement domain types
//!
//! A settlement groups closed windows, nets the obligations accumulated in
//! them per participant-currency, and walks both the parent settlement and
//! its per-account children through an ordered state machine until every
//! obligation is discharged.

use chrono::{DateTime, Utc};
use clearhub_ledger::{
    LedgerEntryType, ParticipantCurrencyId, TransferParticipantRole, WindowId, WindowState,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settlement surrogate id
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SettlementId(pub u64);

impl SettlementId {
    /// Big-endian key bytes for RocksDB ordering
    pub fn key_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Grouping key for window aggregation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AggregationKey {
    /// Account the net amount applies to
    pub participant_currency_id: ParticipantCurrencyId,

    /// Role the account played
    pub role: TransferParticipantRole,

    /// Entry classification
    pub ledger_entry_type: LedgerEntryType,
}

/// One netted row of a window aggregation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRow {
    /// Grouping key
    pub key: AggregationKey,

    /// Signed net amount over the window's committed transfers
    pub net_amount: Decimal,
}

/// A complete aggregation run for one window. Runs are recomputed from the
/// committed transfers, never incrementally patched; each recomputation gets
/// the next run number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRun {
    /// Window the run covers
    pub window_id: WindowId,

    /// Run number, starting at 1
    pub run: u32,

    /// Netted rows, ordered by key
    pub rows: Vec<AggregationRow>,

    /// Window state this run leaves the window in
    pub window_state: WindowState,

    /// Computed timestamp
    pub created_at: DateTime<Utc>,
}

impl AggregationRun {
    /// Net amount for a key, zero when absent
    pub fn net_for(&self, key: &AggregationKey) -> Decimal {
        self.rows
            .iter()
            .find(|r| r.key == *key)
            .map(|r| r.net_amount)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Settlement lifecycle states, ordered by progress
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum SettlementState {
    /// Created, no participant acknowledgement yet
    PendingSettlement = 1,

    /// Obligations recorded by the settlement bank
    PsTransfersRecorded = 2,

    /// Funds reserved at the settlement bank
    PsTransfersReserved = 3,

    /// Funds movement confirmed
    PsTransfersCommitted = 4,

    /// Partially settled across participants
    Settling = 5,

    /// Fully settled, terminal
    Settled = 6,

    /// Abandoned, terminal
    Aborted = 7,
}

impl SettlementState {
    /// Progress rank for the parent rollup. Aborted carries no rank.
    pub fn rank(&self) -> Option<u8> {
        match self {
            SettlementState::PendingSettlement => Some(1),
            SettlementState::PsTransfersRecorded => Some(2),
            SettlementState::PsTransfersReserved => Some(3),
            SettlementState::PsTransfersCommitted => Some(4),
            SettlementState::Settling => Some(5),
            SettlementState::Settled => Some(6),
            SettlementState::Aborted => None,
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementState::Settled | SettlementState::Aborted)
    }

    /// Next acknowledgement step in the forward path, if any
    pub fn next_step(&self) -> Option<SettlementState> {
        match self {
            SettlementState::PendingSettlement => Some(SettlementState::PsTransfersRecorded),
            SettlementState::PsTransfersRecorded => Some(SettlementState::PsTransfersReserved),
            SettlementState::PsTransfersReserved => Some(SettlementState::PsTransfersCommitted),
            SettlementState::PsTransfersCommitted => Some(SettlementState::Settled),
            SettlementState::Settling
            | SettlementState::Settled
            | SettlementState::Aborted => None,
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementState::PendingSettlement => "PENDING_SETTLEMENT",
            SettlementState::PsTransfersRecorded => "PS_TRANSFERS_RECORDED",
            SettlementState::PsTransfersReserved => "PS_TRANSFERS_RESERVED",
            SettlementState::PsTransfersCommitted => "PS_TRANSFERS_COMMITTED",
            SettlementState::Settling => "SETTLING",
            SettlementState::Settled => "SETTLED",
            SettlementState::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

/// Parent state derived from the children.
///
/// The parent reflects its slowest non-aborted child. When settlement is
/// partially complete (some children settled, the rest at least committed)
/// the parent reads SETTLING. A settlement whose children are all aborted
/// is aborted.
pub fn rollup(children: &[SettlementState]) -> SettlementState {
    let mut min_rank: Option<u8> = None;
    let mut any_settled = false;
    for state in children {
        if let Some(rank) = state.rank() {
            any_settled |= *state == SettlementState::Settled;
            min_rank = Some(min_rank.map_or(rank, |m| m.min(rank)));
        }
    }
    match min_rank {
        None => SettlementState::Aborted,
        Some(6) => SettlementState::Settled,
        Some(rank) if any_settled && rank >= 4 => SettlementState::Settling,
        Some(1) => SettlementState::PendingSettlement,
        Some(2) => SettlementState::PsTransfersRecorded,
        Some(3) => SettlementState::PsTransfersReserved,
        Some(4) => SettlementState::PsTransfersCommitted,
        Some(_) => SettlementState::Settling,
    }
}

/// A settlement over one or more closed windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    /// Surrogate id
    pub settlement_id: SettlementId,

    /// Windows the settlement covers
    pub window_ids: Vec<WindowId>,

    /// Operator-supplied reason
    pub reason: String,

    /// Reset participant positions by the net amount on commit
    pub auto_position_reset: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Append-only parent state history row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementStateChange {
    /// Monotonic store sequence
    pub seq: u64,

    /// Owning settlement
    pub settlement_id: SettlementId,

    /// State after this change
    pub state: SettlementState,

    /// Reason for the change
    pub reason: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Per-account obligation within a settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementAccount {
    /// Owning settlement
    pub settlement_id: SettlementId,

    /// Account owing or owed the net amount
    pub participant_currency_id: ParticipantCurrencyId,

    /// Signed net obligation across the settlement's windows
    pub net_amount: Decimal,
}

/// Append-only child state history row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementAccountStateChange {
    /// Monotonic store sequence
    pub seq: u64,

    /// Owning settlement
    pub settlement_id: SettlementId,

    /// Account the change applies to
    pub participant_currency_id: ParticipantCurrencyId,

    /// State after this change
    pub state: SettlementState,

    /// Reason for the change
    pub reason: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollup_all_pending() {
        let children = vec![
            SettlementState::PendingSettlement,
            SettlementState::PendingSettlement,
        ];
        assert_eq!(rollup(&children), SettlementState::PendingSettlement);
    }

    #[test]
    fn test_rollup_slowest_child_wins() {
        let children = vec![
            SettlementState::PsTransfersReserved,
            SettlementState::PsTransfersRecorded,
        ];
        assert_eq!(rollup(&children), SettlementState::PsTransfersRecorded);
    }

    #[test]
    fn test_rollup_aborted_children_ignored() {
        let children = vec![
            SettlementState::Aborted,
            SettlementState::PsTransfersCommitted,
        ];
        assert_eq!(rollup(&children), SettlementState::PsTransfersCommitted);
    }

    #[test]
    fn test_rollup_all_aborted() {
        let children = vec![SettlementState::Aborted, SettlementState::Aborted];
        assert_eq!(rollup(&children), SettlementState::Aborted);
    }

    #[test]
    fn test_rollup_partial_settlement_is_settling() {
        let children = vec![
            SettlementState::Settled,
            SettlementState::PsTransfersCommitted,
        ];
        assert_eq!(rollup(&children), SettlementState::Settling);
    }

    #[test]
    fn test_rollup_all_settled() {
        let children = vec![SettlementState::Settled, SettlementState::Settled];
        assert_eq!(rollup(&children), SettlementState::Settled);
    }

    #[test]
    fn test_next_step_path() {
        let mut state = SettlementState::PendingSettlement;
        let mut path = vec![state];
        while let Some(next) = state.next_step() {
            state = next;
            path.push(state);
        }
        assert_eq!(
            path,
            vec![
                SettlementState::PendingSettlement,
                SettlementState::PsTransfersRecorded,
                SettlementState::PsTransfersReserved,
                SettlementState::PsTransfersCommitted,
                SettlementState::Settled,
            ]
        );
    }

    #[test]
    fn test_aggregation_net_for_missing_key_is_zero() {
        let run = AggregationRun {
            window_id: WindowId(1),
            run: 1,
            rows: vec![],
            window_state: WindowState::PendingSettlement,
            created_at: Utc::now(),
        };
        let key = AggregationKey {
            participant_currency_id: ParticipantCurrencyId(1),
            role: TransferParticipantRole::PayerDfsp,
            ledger_entry_type: LedgerEntryType::PrincipalValue,
        };
        assert_eq!(run.net_for(&key), Decimal::ZERO);
    }
}
