//! Core types for the central ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Participant identifier (store-allocated surrogate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// Big-endian key bytes for storage
    pub fn key_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Participant-currency account identifier (store-allocated surrogate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantCurrencyId(pub u64);

impl ParticipantCurrencyId {
    /// Big-endian key bytes for storage
    pub fn key_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ParticipantCurrencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settlement window identifier (store-allocated surrogate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u64);

impl WindowId {
    /// Big-endian key bytes for storage
    pub fn key_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
    /// UAE Dirham
    AED,
    /// Indian Rupee
    INR,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::AED => "AED",
            Currency::INR => "INR",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "GBP" => Some(Currency::GBP),
            "AED" => Some(Currency::AED),
            "INR" => Some(Currency::INR),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Ledger account classification for a participant-currency account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedgerAccountType {
    /// Running position account (subject to net debit cap)
    Position = 1,
    /// Settlement account (funds movement during settlement)
    Settlement = 2,
}

/// A DFSP (or the hub) registered with the switch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Surrogate id
    pub participant_id: ParticipantId,

    /// Name, immutable after creation
    pub name: String,

    /// Disabled participants accept no new transfers
    pub is_active: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// A participant's account in one currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantCurrency {
    /// Surrogate id
    pub participant_currency_id: ParticipantCurrencyId,

    /// Owning participant
    pub participant_id: ParticipantId,

    /// Account currency
    pub currency: Currency,

    /// Account classification
    pub account_type: LedgerAccountType,

    /// Disabled accounts reject new transfers
    pub is_active: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Current position row for a participant-currency account
///
/// Mutated only through the position engine; every mutation also appends a
/// [`PositionChange`] referencing the causing state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Owning account
    pub participant_currency_id: ParticipantCurrencyId,

    /// Signed running balance
    pub value: Decimal,

    /// Funds held for in-flight transfers, never negative
    pub reserved_value: Decimal,

    /// Last mutation timestamp
    pub changed_at: DateTime<Utc>,
}

impl Position {
    /// Zeroed position for a new account
    pub fn zero(participant_currency_id: ParticipantCurrencyId, now: DateTime<Utc>) -> Self {
        Self {
            participant_currency_id,
            value: Decimal::ZERO,
            reserved_value: Decimal::ZERO,
            changed_at: now,
        }
    }
}

/// What caused a position mutation (audit trail)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionChangeCause {
    /// A transfer state change (seq of the TransferStateChange row)
    Transfer {
        /// Sequence of the causing transfer state change
        state_change_seq: u64,
    },
    /// A settlement-driven adjustment
    Settlement {
        /// Settlement the adjustment belongs to
        settlement_id: u64,
        /// Operator-supplied reason
        reason: String,
    },
}

/// Append-only audit row for every position mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionChange {
    /// Monotonic store sequence
    pub seq: u64,

    /// Account whose position changed
    pub participant_currency_id: ParticipantCurrencyId,

    /// Position value after the mutation
    pub value: Decimal,

    /// Reserved value after the mutation
    pub reserved_value: Decimal,

    /// Causing event, exactly one per mutation
    pub cause: PositionChangeCause,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Limit classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LimitType {
    /// Maximum negative position before reservations are rejected
    NetDebitCap = 1,
}

/// A limit attached to a participant-currency account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limit {
    /// Account the limit applies to
    pub participant_currency_id: ParticipantCurrencyId,

    /// Limit classification
    pub limit_type: LimitType,

    /// Threshold value
    pub value: Decimal,

    /// Fraction of the threshold (0..1) that raises an alarm when crossed
    pub alarm_percentage: Decimal,

    /// Inactive limits are not enforced
    pub is_active: bool,
}

/// Role of a participant entry within a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferParticipantRole {
    /// Sending DFSP
    PayerDfsp = 1,
    /// Receiving DFSP
    PayeeDfsp = 2,
    /// The switch operator
    Hub = 3,
    /// DFSP settlement account leg
    DfspSettlement = 4,
    /// DFSP position account leg
    DfspPosition = 5,
    /// Initiating FSP (FX)
    InitiatingFsp = 6,
    /// Counterparty FSP (FX)
    CounterPartyFsp = 7,
}

/// Classification of a monetary entry within a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedgerEntryType {
    /// Principal transfer amount
    PrincipalValue = 1,
    /// Fee between DFSPs
    InterchangeFee = 2,
    /// Fee paid to the hub
    HubFee = 3,
    /// Net sender leg of a settlement
    SettlementNetSender = 4,
    /// Net recipient leg of a settlement
    SettlementNetRecipient = 5,
    /// Zero-net leg of a settlement
    SettlementNetZero = 6,
}

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    /// Funds leave the account (stored negative)
    Debit,
    /// Funds enter the account (stored positive)
    Credit,
}

impl Sign {
    /// Sign of a non-zero amount; zero has no direction
    pub fn of_amount(amount: Decimal) -> Option<Sign> {
        if amount < Decimal::ZERO {
            Some(Sign::Debit)
        } else if amount > Decimal::ZERO {
            Some(Sign::Credit)
        } else {
            None
        }
    }
}

/// Expected sign of an entry given its role and classification.
///
/// Exhaustive over both enums so new roles or entry types force a policy
/// decision at compile time.
pub fn entry_sign(role: TransferParticipantRole, entry_type: LedgerEntryType) -> Sign {
    use LedgerEntryType::*;
    use TransferParticipantRole::*;

    match (role, entry_type) {
        (PayerDfsp | InitiatingFsp, _) => Sign::Debit,
        (PayeeDfsp | CounterPartyFsp, _) => Sign::Credit,
        (Hub, _) => Sign::Credit,
        (DfspSettlement | DfspPosition, SettlementNetSender) => Sign::Debit,
        (DfspSettlement | DfspPosition, _) => Sign::Credit,
    }
}

/// Account type a role's entries post against
pub fn entry_account_type(role: TransferParticipantRole) -> LedgerAccountType {
    match role {
        TransferParticipantRole::DfspSettlement => LedgerAccountType::Settlement,
        _ => LedgerAccountType::Position,
    }
}

/// Immutable core fields of a transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// End-to-end transfer id, supplied by the caller
    pub transfer_id: Uuid,

    /// Transfer currency
    pub currency: Currency,

    /// Principal amount, positive
    pub amount: Decimal,

    /// Cryptographic condition (hex-encoded SHA-256 digest)
    pub condition: String,

    /// Expiration deadline
    pub expiration: DateTime<Utc>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// A role entry linking a transfer to a participant-currency account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferParticipant {
    /// Owning transfer
    pub transfer_id: Uuid,

    /// Account this entry posts against
    pub participant_currency_id: ParticipantCurrencyId,

    /// Role of the entry
    pub role: TransferParticipantRole,

    /// Entry classification
    pub ledger_entry_type: LedgerEntryType,

    /// Signed amount: debit legs negative, credit legs positive
    pub amount: Decimal,
}

/// Transfer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferState {
    /// Accepted and validated
    Received = 1,
    /// Payer funds reserved
    Reserved = 2,
    /// Fulfilled and posted (terminal)
    Committed = 3,
    /// Rejected, expired, or limit-blocked (terminal)
    Aborted = 4,
}

impl TransferState {
    /// Committed and Aborted are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Committed | TransferState::Aborted)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferState::Received => "RECEIVED",
            TransferState::Reserved => "RESERVED",
            TransferState::Committed => "COMMITTED",
            TransferState::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

/// Append-only transfer state history row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStateChange {
    /// Monotonic store sequence
    pub seq: u64,

    /// Owning transfer
    pub transfer_id: Uuid,

    /// State after this change
    pub state: TransferState,

    /// Reason, mandatory for Aborted
    pub reason: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Fulfilment record written at commit time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFulfilment {
    /// Owning transfer
    pub transfer_id: Uuid,

    /// Fulfilment preimage presented by the payee
    pub fulfilment: String,

    /// Settlement window the commit was assigned to
    pub settlement_window_id: WindowId,

    /// Commit timestamp
    pub completed_at: DateTime<Utc>,
}

/// Settlement window lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WindowState {
    /// Collecting committed transfers
    Open = 1,
    /// Closed to new commits
    Closed = 2,
    /// Aggregation in progress
    Processing = 3,
    /// Aggregated, awaiting settlement
    PendingSettlement = 4,
    /// Settlement completed (terminal)
    Settled = 5,
    /// Settlement aborted (terminal)
    Aborted = 6,
    /// Aggregation failed, retryable
    Failed = 7,
}

impl WindowState {
    /// Settled and Aborted are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, WindowState::Settled | WindowState::Aborted)
    }

    /// Legal forward transitions
    pub fn can_transition(self, next: WindowState) -> bool {
        use WindowState::*;
        matches!(
            (self, next),
            (Open, Closed)
                | (Closed, Processing)
                | (Processing, PendingSettlement)
                | (Processing, Failed)
                | (Failed, Processing)
                | (PendingSettlement, Settled)
                | (PendingSettlement, Aborted)
        )
    }
}

impl fmt::Display for WindowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WindowState::Open => "OPEN",
            WindowState::Closed => "CLOSED",
            WindowState::Processing => "PROCESSING",
            WindowState::PendingSettlement => "PENDING_SETTLEMENT",
            WindowState::Settled => "SETTLED",
            WindowState::Aborted => "ABORTED",
            WindowState::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// A time-bounded bucket of committed transfers awaiting settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementWindow {
    /// Surrogate id
    pub window_id: WindowId,

    /// Opened timestamp
    pub created_at: DateTime<Utc>,
}

/// Append-only window state history row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStateChange {
    /// Monotonic store sequence
    pub seq: u64,

    /// Owning window
    pub window_id: WindowId,

    /// State after this change
    pub state: WindowState,

    /// Reason for the change
    pub reason: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("USD"), Some(Currency::USD));
        assert_eq!(Currency::parse("EUR"), Some(Currency::EUR));
        assert_eq!(Currency::parse("XXX"), None);
    }

    #[test]
    fn test_entry_sign_policy() {
        assert_eq!(
            entry_sign(TransferParticipantRole::PayerDfsp, LedgerEntryType::PrincipalValue),
            Sign::Debit
        );
        assert_eq!(
            entry_sign(TransferParticipantRole::PayeeDfsp, LedgerEntryType::PrincipalValue),
            Sign::Credit
        );
        assert_eq!(
            entry_sign(TransferParticipantRole::Hub, LedgerEntryType::HubFee),
            Sign::Credit
        );
        assert_eq!(
            entry_sign(
                TransferParticipantRole::DfspSettlement,
                LedgerEntryType::SettlementNetSender
            ),
            Sign::Debit
        );
        assert_eq!(
            entry_sign(
                TransferParticipantRole::DfspSettlement,
                LedgerEntryType::SettlementNetRecipient
            ),
            Sign::Credit
        );
    }

    #[test]
    fn test_entry_account_type() {
        assert_eq!(
            entry_account_type(TransferParticipantRole::PayerDfsp),
            LedgerAccountType::Position
        );
        assert_eq!(
            entry_account_type(TransferParticipantRole::DfspSettlement),
            LedgerAccountType::Settlement
        );
    }

    #[test]
    fn test_sign_of_amount() {
        assert_eq!(Sign::of_amount(Decimal::new(-100, 2)), Some(Sign::Debit));
        assert_eq!(Sign::of_amount(Decimal::new(100, 2)), Some(Sign::Credit));
        assert_eq!(Sign::of_amount(Decimal::ZERO), None);
    }

    #[test]
    fn test_transfer_state_terminal() {
        assert!(!TransferState::Received.is_terminal());
        assert!(!TransferState::Reserved.is_terminal());
        assert!(TransferState::Committed.is_terminal());
        assert!(TransferState::Aborted.is_terminal());
    }

    #[test]
    fn test_window_transitions() {
        assert!(WindowState::Open.can_transition(WindowState::Closed));
        assert!(WindowState::Closed.can_transition(WindowState::Processing));
        assert!(WindowState::Processing.can_transition(WindowState::PendingSettlement));
        assert!(WindowState::Processing.can_transition(WindowState::Failed));
        assert!(WindowState::Failed.can_transition(WindowState::Processing));
        assert!(WindowState::PendingSettlement.can_transition(WindowState::Settled));
        assert!(!WindowState::Open.can_transition(WindowState::Settled));
        assert!(!WindowState::Settled.can_transition(WindowState::Open));
    }
}
